//! Recurrence rules and their expansion into dated occurrences.
//!
//! Every rule yields at most one occurrence per calendar day. Wall-clock
//! times are converted with the zone rules in force on the target date, so
//! an occurrence at 07:00 stays at 07:00 local across DST changes.

use chrono::offset::LocalResult;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use thiserror::Error;

use crate::domain::TaskTemplate;

/// Longest forward shift tried when a local time falls into a DST gap
const MAX_GAP_SHIFT_MINUTES: i64 = 3 * 60;

/// A parsed recurrence rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recurrence {
    /// No rule: the template's one-shot date, or every day when it has none
    None,
    Daily,
    /// Only on the listed weekdays
    Weekly(Vec<Weekday>),
    /// Every day within `[start, end]`
    DateRange { start: NaiveDate, end: NaiveDate },
    /// Kept so the template can report a warning instead of vanishing silently
    Malformed { rule: String, reason: String },
}

impl Recurrence {
    /// Parse a rule string. Never fails: unrecognized rules become `Malformed`.
    ///
    /// Accepted forms: `none`, `daily`, `weekly:sun,wed`,
    /// `range:2026-01-01..2026-01-31`, `FREQ=DAILY`, `FREQ=WEEKLY;BYDAY=SU,WE`.
    pub fn parse(rule: &str) -> Self {
        match parse_rule(rule) {
            Ok(recurrence) => recurrence,
            Err(reason) => Recurrence::Malformed {
                rule: rule.to_string(),
                reason,
            },
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Recurrence::Malformed { .. })
    }
}

fn parse_rule(rule: &str) -> Result<Recurrence, String> {
    let trimmed = rule.trim();
    if trimmed.to_uppercase().starts_with("FREQ=") {
        return parse_rrule(trimmed);
    }

    let lower = trimmed.to_lowercase();
    if lower.is_empty() || lower == "none" {
        return Ok(Recurrence::None);
    }
    if lower == "daily" {
        return Ok(Recurrence::Daily);
    }
    if let Some(days) = lower.strip_prefix("weekly:") {
        return parse_weekdays(days).map(Recurrence::Weekly);
    }
    if let Some(range) = lower.strip_prefix("range:") {
        let (start, end) = range
            .split_once("..")
            .ok_or_else(|| "date range must look like START..END".to_string())?;
        let start = parse_date(start)?;
        let end = parse_date(end)?;
        if start > end {
            return Err(format!("date range starts after it ends ({start} > {end})"));
        }
        return Ok(Recurrence::DateRange { start, end });
    }

    Err(format!("unrecognized recurrence rule '{trimmed}'"))
}

/// The RRULE subset accepted by older schedule files
fn parse_rrule(rule: &str) -> Result<Recurrence, String> {
    let mut freq = None;
    let mut by_day = None;

    for part in rule.to_uppercase().split(';').filter(|p| !p.is_empty()) {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| format!("RRULE part '{part}' has no value"))?;
        match key {
            "FREQ" => freq = Some(value.to_string()),
            "BYDAY" => by_day = Some(parse_weekdays(value)?),
            other => return Err(format!("unsupported RRULE part '{other}'")),
        }
    }

    match (freq.as_deref(), by_day) {
        (Some("DAILY"), None) => Ok(Recurrence::Daily),
        (Some("DAILY") | Some("WEEKLY"), Some(days)) => Ok(Recurrence::Weekly(days)),
        (Some("WEEKLY"), None) => Err("FREQ=WEEKLY requires BYDAY".to_string()),
        (Some(other), _) => Err(format!("unsupported frequency '{other}'")),
        (None, _) => Err("RRULE has no FREQ".to_string()),
    }
}

fn parse_weekdays(list: &str) -> Result<Vec<Weekday>, String> {
    let mut days = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let day = parse_weekday(name).ok_or_else(|| format!("unknown weekday '{name}'"))?;
        if !days.contains(&day) {
            days.push(day);
        }
    }
    if days.is_empty() {
        return Err("weekly rule lists no weekdays".to_string());
    }
    days.sort_by_key(|d| d.num_days_from_monday());
    Ok(days)
}

fn parse_weekday(name: &str) -> Option<Weekday> {
    match name.to_lowercase().as_str() {
        "mo" | "mon" | "monday" => Some(Weekday::Mon),
        "tu" | "tue" | "tues" | "tuesday" => Some(Weekday::Tue),
        "we" | "wed" | "wednesday" => Some(Weekday::Wed),
        "th" | "thu" | "thurs" | "thursday" => Some(Weekday::Thu),
        "fr" | "fri" | "friday" => Some(Weekday::Fri),
        "sa" | "sat" | "saturday" => Some(Weekday::Sat),
        "su" | "sun" | "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{}': {}", s.trim(), e))
}

/// A template resolved onto one calendar date
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub date: NaiveDate,
    /// Effective local wall-clock time (differs from the template's when shifted)
    pub local_time: NaiveTime,
    pub at: DateTime<Utc>,
    /// The template's time did not exist on this date and was moved forward
    pub dst_shifted: bool,
}

/// Non-fatal problem with a template's rule; the template yields nothing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("template '{template_id}' has an unusable recurrence rule '{rule}': {reason}")]
pub struct RecurrenceWarning {
    pub template_id: String,
    pub rule: String,
    pub reason: String,
}

/// Expands templates into occurrences in one timezone
#[derive(Debug, Clone, Copy)]
pub struct RecurrenceResolver {
    tz: Tz,
}

impl RecurrenceResolver {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Resolve `template` on `date`: `Ok(None)` when the rule does not match
    pub fn resolve(
        &self,
        template: &TaskTemplate,
        date: NaiveDate,
    ) -> Result<Option<Occurrence>, RecurrenceWarning> {
        if !self.matches(template, date)? {
            return Ok(None);
        }

        let (at, local_time, dst_shifted) = localize(self.tz, date, template.time);
        Ok(Some(Occurrence {
            date,
            local_time,
            at,
            dst_shifted,
        }))
    }

    /// All occurrences on dates in `[start, end]`, skipping malformed rules
    pub fn occurrences_between(
        &self,
        template: &TaskTemplate,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<Occurrence> {
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter_map(|d| self.resolve(template, d).ok().flatten())
            .collect()
    }

    fn matches(&self, template: &TaskTemplate, date: NaiveDate) -> Result<bool, RecurrenceWarning> {
        if template.valid_from.is_some_and(|from| date < from)
            || template.valid_until.is_some_and(|until| date > until)
        {
            return Ok(false);
        }

        let matched = match &template.recurrence {
            Recurrence::None => template.date.map_or(true, |on| on == date),
            Recurrence::Daily => true,
            Recurrence::Weekly(days) => days.contains(&date.weekday()),
            Recurrence::DateRange { start, end } => *start <= date && date <= *end,
            Recurrence::Malformed { rule, reason } => {
                return Err(RecurrenceWarning {
                    template_id: template.id.clone(),
                    rule: rule.clone(),
                    reason: reason.clone(),
                })
            }
        };
        Ok(matched)
    }
}

/// Convert a local wall-clock time on `date` to UTC.
///
/// Ambiguous times (clocks going back) use the earlier instant. Times inside
/// a gap are moved forward to the first minute that exists, and flagged.
pub fn localize(tz: Tz, date: NaiveDate, time: NaiveTime) -> (DateTime<Utc>, NaiveTime, bool) {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => return (dt.with_timezone(&Utc), time, false),
        LocalResult::Ambiguous(earliest, _) => return (earliest.with_timezone(&Utc), time, false),
        LocalResult::None => {}
    }

    for minutes in 1..=MAX_GAP_SHIFT_MINUTES {
        let shifted = naive + Duration::minutes(minutes);
        if let Some(dt) = tz.from_local_datetime(&shifted).earliest() {
            return (dt.with_timezone(&Utc), shifted.time(), true);
        }
    }

    // No zone has a gap this long; treat the wall-clock time as UTC
    (Utc.from_utc_datetime(&naive), time, true)
}
