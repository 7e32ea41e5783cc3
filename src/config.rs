//! TOML configuration: engine settings plus the task templates.
//!
//! Loading is forgiving. A bad task entry or setting is reported as a warning
//! and left out (or replaced by its default); only an unreadable or
//! syntactically broken file is an error.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{derive_template_id, Priority, TaskTemplate};
use crate::error::ConfigError;
use crate::schedule::{AdaptivePolicy, Recurrence, SegmentBounds};

/// Engine settings from the `[settings]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub timezone: String,
    #[serde(with = "hhmm")]
    pub morning_start: NaiveTime,
    #[serde(with = "hhmm")]
    pub afternoon_start: NaiveTime,
    #[serde(with = "hhmm")]
    pub evening_start: NaiveTime,
    pub backlog_retention_days: i64,
    pub adaptive_cap_percent: u32,
    pub adaptive_floor_minutes: i64,
    pub streak_ratio: f64,
    pub current_streak_badges: Vec<u32>,
    pub longest_streak_badges: Vec<u32>,
    pub time_low_alert_secs: i64,
    pub tick_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let bounds = SegmentBounds::default();
        Self {
            timezone: "UTC".to_string(),
            morning_start: bounds.morning,
            afternoon_start: bounds.afternoon,
            evening_start: bounds.evening,
            backlog_retention_days: 7,
            adaptive_cap_percent: 30,
            adaptive_floor_minutes: 5,
            streak_ratio: 0.8,
            current_streak_badges: vec![3, 7, 30],
            longest_streak_badges: vec![7, 30],
            time_low_alert_secs: 60,
            tick_ms: 1000,
        }
    }
}

impl Settings {
    pub fn segment_bounds(&self) -> SegmentBounds {
        SegmentBounds {
            morning: self.morning_start,
            afternoon: self.afternoon_start,
            evening: self.evening_start,
        }
    }

    pub fn adaptive_policy(&self) -> AdaptivePolicy {
        AdaptivePolicy {
            cap_percent: self.adaptive_cap_percent,
            floor: chrono::Duration::minutes(self.adaptive_floor_minutes),
        }
    }

    /// Replace out-of-range values with defaults, reporting each one
    fn sanitize(&mut self, warnings: &mut Vec<ConfigError>) {
        let defaults = Settings::default();

        if !(self.morning_start < self.afternoon_start && self.afternoon_start < self.evening_start) {
            warnings.push(ConfigError::InvalidSetting {
                key: "morning_start/afternoon_start/evening_start",
                reason: "segment starts must be strictly increasing".to_string(),
            });
            self.morning_start = defaults.morning_start;
            self.afternoon_start = defaults.afternoon_start;
            self.evening_start = defaults.evening_start;
        }
        if self.backlog_retention_days < 1 {
            warnings.push(ConfigError::InvalidSetting {
                key: "backlog_retention_days",
                reason: format!("must be at least 1 (got {})", self.backlog_retention_days),
            });
            self.backlog_retention_days = defaults.backlog_retention_days;
        }
        if self.adaptive_cap_percent > 100 {
            warnings.push(ConfigError::InvalidSetting {
                key: "adaptive_cap_percent",
                reason: format!("must be between 0 and 100 (got {})", self.adaptive_cap_percent),
            });
            self.adaptive_cap_percent = defaults.adaptive_cap_percent;
        }
        if self.adaptive_floor_minutes < 0 {
            warnings.push(ConfigError::InvalidSetting {
                key: "adaptive_floor_minutes",
                reason: format!("must not be negative (got {})", self.adaptive_floor_minutes),
            });
            self.adaptive_floor_minutes = defaults.adaptive_floor_minutes;
        }
        if !(0.0..=1.0).contains(&self.streak_ratio) {
            warnings.push(ConfigError::InvalidSetting {
                key: "streak_ratio",
                reason: format!("must be between 0 and 1 (got {})", self.streak_ratio),
            });
            self.streak_ratio = defaults.streak_ratio;
        }
        if self.time_low_alert_secs < 0 {
            warnings.push(ConfigError::InvalidSetting {
                key: "time_low_alert_secs",
                reason: format!("must not be negative (got {})", self.time_low_alert_secs),
            });
            self.time_low_alert_secs = defaults.time_low_alert_secs;
        }
        if self.tick_ms == 0 {
            warnings.push(ConfigError::InvalidSetting {
                key: "tick_ms",
                reason: "must be greater than 0".to_string(),
            });
            self.tick_ms = defaults.tick_ms;
        }
        self.current_streak_badges.retain(|t| *t > 0);
        self.longest_streak_badges.retain(|t| *t > 0);
    }
}

/// `HH:MM` (24h) times in TOML
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_hhmm(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse a strict `HH:MM` 24-hour time
pub fn parse_hhmm(s: &str) -> Result<NaiveTime, String> {
    let s = s.trim();
    let valid_shape = s.len() == 5 && s.as_bytes()[2] == b':';
    if !valid_shape {
        return Err(format!("time '{s}' must be in HH:MM format"));
    }
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|e| format!("invalid time '{s}': {e}"))
}

/// One `[[tasks]]` entry as written by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTemplate {
    /// Stable identity across edits. Without one the id is derived from
    /// title and time, so renaming makes a new template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
    #[serde(default = "default_category")]
    pub category: String,
    pub time: String,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default = "default_duration")]
    pub duration: i64,
    #[serde(default = "default_true")]
    pub alert: bool,
    #[serde(default = "default_snooze")]
    pub snooze: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

fn default_category() -> String {
    "general".to_string()
}

fn default_priority() -> i64 {
    3
}

fn default_duration() -> i64 {
    crate::domain::DEFAULT_DURATION_MINUTES
}

fn default_snooze() -> i64 {
    crate::domain::DEFAULT_SNOOZE_MINUTES
}

fn default_true() -> bool {
    true
}

impl RawTemplate {
    fn new(id: &str, title: &str, time: &str, priority: i64, duration: i64, recurrence: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            title: title.to_string(),
            notes: String::new(),
            category: default_category(),
            time: time.to_string(),
            priority,
            duration,
            alert: true,
            snooze: default_snooze(),
            recurrence: Some(recurrence.to_string()),
            valid_from: None,
            valid_until: None,
            date: None,
        }
    }

    /// Validate into a template; the error is the reason it was rejected
    pub fn into_template(self) -> Result<TaskTemplate, String> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err("title must not be empty".to_string());
        }
        let time = parse_hhmm(&self.time)?;
        let priority = u8::try_from(self.priority)
            .ok()
            .and_then(Priority::from_level)
            .ok_or_else(|| format!("priority must be 1, 2 or 3 (got {})", self.priority))?;
        if self.duration < 1 {
            return Err(format!("duration must be at least 1 minute (got {})", self.duration));
        }
        if self.snooze < 1 {
            return Err(format!("snooze must be at least 1 minute (got {})", self.snooze));
        }

        let valid_from = parse_optional_date("valid_from", self.valid_from.as_deref())?;
        let valid_until = parse_optional_date("valid_until", self.valid_until.as_deref())?;
        if let (Some(from), Some(until)) = (valid_from, valid_until) {
            if from > until {
                return Err(format!("valid_from {from} is after valid_until {until}"));
            }
        }
        let date = parse_optional_date("date", self.date.as_deref())?;

        let recurrence = match (self.recurrence.as_deref(), date) {
            (Some(rule), _) => Recurrence::parse(rule),
            (None, Some(_)) => Recurrence::None,
            (None, None) => Recurrence::Daily,
        };

        let id = match self.id.map(|id| id.trim().to_string()) {
            Some(id) if !id.is_empty() => id,
            _ => derive_template_id(&title, time),
        };

        Ok(TaskTemplate {
            id,
            title,
            notes: self.notes,
            category: self.category,
            time,
            recurrence,
            valid_from,
            valid_until,
            date,
            priority,
            duration: chrono::Duration::minutes(self.duration),
            alert: self.alert,
            snooze: chrono::Duration::minutes(self.snooze),
        })
    }
}

fn parse_optional_date(field: &str, value: Option<&str>) -> Result<Option<NaiveDate>, String> {
    value
        .map(|s| {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|e| format!("invalid {field} '{s}': {e}"))
        })
        .transpose()
}

/// The file layout; tasks stay untyped so each entry is validated on its own
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    settings: Settings,
    #[serde(default)]
    tasks: Vec<toml::Value>,
}

#[derive(Debug, Serialize)]
struct ConfigFileOut<'a> {
    settings: &'a Settings,
    tasks: &'a [RawTemplate],
}

/// Validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub settings: Settings,
    pub timezone: Tz,
    pub templates: Vec<TaskTemplate>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            timezone: Tz::UTC,
            templates: Vec::new(),
        }
    }
}

/// A loaded configuration together with everything that was dropped from it
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: Config,
    pub warnings: Vec<ConfigError>,
}

impl Config {
    /// Read and validate a configuration file; a missing file yields defaults
    pub fn load(path: &Path) -> Result<LoadedConfig, ConfigError> {
        if !path.exists() {
            return Ok(LoadedConfig {
                config: Config::default(),
                warnings: Vec::new(),
            });
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<LoadedConfig, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        let mut warnings = Vec::new();

        let mut settings = file.settings;
        settings.sanitize(&mut warnings);

        let timezone = match resolve_timezone(&settings.timezone) {
            Ok(tz) => tz,
            Err(err) => {
                warnings.push(err);
                Tz::UTC
            }
        };

        let mut templates = Vec::new();
        let mut ids = HashSet::new();
        for (index, value) in file.tasks.into_iter().enumerate() {
            let title = value
                .get("title")
                .and_then(|t| t.as_str())
                .unwrap_or("<untitled>")
                .to_string();
            let checked = value
                .try_into::<RawTemplate>()
                .map_err(|e| e.to_string())
                .and_then(RawTemplate::into_template)
                .and_then(|template| {
                    if ids.insert(template.id.clone()) {
                        Ok(template)
                    } else {
                        Err(format!("duplicate task id '{}'", template.id))
                    }
                });
            match checked {
                Ok(template) => templates.push(template),
                Err(reason) => warnings.push(ConfigError::InvalidTask { index, title, reason }),
            }
        }

        for warning in &warnings {
            warn!("{}", warning);
        }

        Ok(LoadedConfig {
            config: Config {
                settings,
                timezone,
                templates,
            },
            warnings,
        })
    }
}

/// Look up an IANA zone name
pub fn resolve_timezone(name: &str) -> Result<Tz, ConfigError> {
    name.trim().parse::<Tz>().map_err(|e| ConfigError::InvalidSetting {
        key: "timezone",
        reason: format!("unknown timezone '{}' ({}), using UTC", name, e),
    })
}

/// Starter configuration written by `init`
pub fn default_config_toml(timezone: &str) -> Result<String, ConfigError> {
    let settings = Settings {
        timezone: timezone.to_string(),
        ..Settings::default()
    };
    let mut supplements = RawTemplate::new("supplements", "Take Supplements", "07:00", 1, 10, "daily");
    supplements.category = "health".to_string();
    let mut plants = RawTemplate::new("water_plants", "Water plants", "07:30", 2, 15, "weekly:sun,wed");
    plants.notes = "Balcony first".to_string();
    let tasks = vec![
        supplements,
        plants,
        RawTemplate::new("stretch", "Stretch", "13:00", 3, 20, "daily"),
        RawTemplate::new("read", "Read", "21:00", 3, 30, "daily"),
    ];

    Ok(toml::to_string_pretty(&ConfigFileOut {
        settings: &settings,
        tasks: &tasks,
    })?)
}

/// Notices edits to the configuration file by its modification time
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    seen: Option<SystemTime>,
}

impl ConfigWatcher {
    /// The file as it is now counts as already loaded
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let seen = modified(&path);
        Self { path, seen }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the file again if it changed since the last poll.
    ///
    /// A missing file is not a change; the running configuration stays until
    /// the file comes back.
    pub fn poll(&mut self) -> Option<Result<LoadedConfig, ConfigError>> {
        let current = modified(&self.path)?;
        if self.seen == Some(current) {
            return None;
        }
        self.seen = Some(current);
        debug!(path = %self.path.display(), "configuration file changed");
        Some(Config::load(&self.path))
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
[settings]
timezone = "America/Chicago"
morning_start = "06:00"
adaptive_cap_percent = 25

[[tasks]]
title = "Take Supplements"
time = "07:00"
priority = 1
duration = 10

[[tasks]]
title = "Water plants"
time = "07:30"
recurrence = "FREQ=WEEKLY;BYDAY=SU"
notes = "Balcony first"

[[tasks]]
title = "Broken"
time = "7pm"

[[tasks]]
title = "Too important"
time = "08:00"
priority = 7
"#;

    #[test]
    fn test_invalid_entries_are_excluded() {
        let loaded = Config::from_toml_str(SAMPLE).unwrap();
        let config = loaded.config;

        assert_eq!(config.timezone, chrono_tz::America::Chicago);
        assert_eq!(config.settings.morning_start, NaiveTime::from_hms_opt(6, 0, 0).unwrap());
        assert_eq!(config.settings.adaptive_cap_percent, 25);
        assert_eq!(config.settings.adaptive_floor_minutes, 5);

        let ids: Vec<&str> = config.templates.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["take_supplements_0700", "water_plants_0730"]);
        assert_eq!(config.templates[0].priority, Priority::High);
        assert_eq!(config.templates[0].duration, chrono::Duration::minutes(10));
        assert_eq!(config.templates[1].priority, Priority::Low);
        assert_eq!(config.templates[1].category, "general");

        assert_eq!(loaded.warnings.len(), 2);
        assert!(matches!(
            &loaded.warnings[0],
            ConfigError::InvalidTask { index: 2, title, .. } if title == "Broken"
        ));
    }

    #[test]
    fn test_unknown_timezone_falls_back_to_utc() {
        let loaded = Config::from_toml_str("[settings]\ntimezone = \"Mars/Olympus\"\n").unwrap();
        assert_eq!(loaded.config.timezone, Tz::UTC);
        assert_eq!(loaded.warnings.len(), 1);
    }

    #[test]
    fn test_bad_settings_use_defaults() {
        let toml = "[settings]\nmorning_start = \"13:00\"\nstreak_ratio = 1.5\ntick_ms = 0\n";
        let loaded = Config::from_toml_str(toml).unwrap();
        assert_eq!(loaded.config.settings, Settings::default());
        assert_eq!(loaded.warnings.len(), 3);
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let toml = r#"
[[tasks]]
title = "Read"
time = "21:00"

[[tasks]]
id = "read_2100"
title = "Read again"
time = "22:00"
"#;
        let loaded = Config::from_toml_str(toml).unwrap();
        assert_eq!(loaded.config.templates.len(), 1);
        assert_eq!(loaded.config.templates[0].title, "Read");
        assert_eq!(loaded.warnings.len(), 1);
    }

    #[test]
    fn test_one_shot_date_implies_no_rule() {
        let toml = "[[tasks]]\ntitle = \"Dentist\"\ntime = \"15:00\"\ndate = \"2026-06-02\"\n";
        let loaded = Config::from_toml_str(toml).unwrap();
        let template = &loaded.config.templates[0];
        assert_eq!(template.recurrence, Recurrence::None);
        assert_eq!(template.date, NaiveDate::from_ymd_opt(2026, 6, 2));
    }

    #[test]
    fn test_syntax_error_is_fatal() {
        assert!(matches!(
            Config::from_toml_str("[[tasks]\ntitle ="),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_hhmm() {
        assert!(parse_hhmm("07:05").is_ok());
        assert!(parse_hhmm("7:05").is_err());
        assert!(parse_hhmm("24:00").is_err());
    }

    #[test]
    fn test_default_config_loads_cleanly() {
        let text = default_config_toml("Europe/Madrid").unwrap();
        let loaded = Config::from_toml_str(&text).unwrap();
        assert!(loaded.warnings.is_empty());
        assert_eq!(loaded.config.templates.len(), 4);
        assert_eq!(loaded.config.timezone, chrono_tz::Europe::Madrid);
        let ids: Vec<&str> = loaded.config.templates.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["supplements", "water_plants", "stretch", "read"]);
    }

    #[test]
    fn test_starter_ids_survive_a_rename() {
        let text = default_config_toml("UTC").unwrap();
        let renamed = text.replace("Take Supplements", "Take vitamins");
        let loaded = Config::from_toml_str(&renamed).unwrap();
        let vitamins = &loaded.config.templates[0];
        assert_eq!(vitamins.title, "Take vitamins");
        assert_eq!(vitamins.id, "supplements");
    }

    fn touch(path: &Path, content: &str, offset_secs: u64) {
        fs::write(path, content).unwrap();
        let when = SystemTime::now() + std::time::Duration::from_secs(offset_secs);
        fs::File::options().write(true).open(path).unwrap().set_modified(when).unwrap();
    }

    #[test]
    fn test_watcher_reloads_only_after_a_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        touch(&path, SAMPLE, 0);

        let mut watcher = ConfigWatcher::new(&path);
        assert!(watcher.poll().is_none());

        touch(&path, "[[tasks]]\ntitle = \"Stretch\"\ntime = \"13:00\"\n", 10);
        let loaded = watcher.poll().unwrap().unwrap();
        assert_eq!(loaded.config.templates.len(), 1);
        assert_eq!(loaded.config.templates[0].title, "Stretch");
        assert!(watcher.poll().is_none());

        touch(&path, "[[tasks]\n", 20);
        assert!(matches!(watcher.poll(), Some(Err(ConfigError::Parse(_)))));

        fs::remove_file(&path).unwrap();
        assert!(watcher.poll().is_none());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load(&dir.path().join("config.toml")).unwrap();
        assert!(loaded.config.templates.is_empty());
        assert_eq!(loaded.config.timezone, Tz::UTC);
    }
}
