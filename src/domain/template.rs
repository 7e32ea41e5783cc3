use super::enums::Priority;
use crate::schedule::Recurrence;
use chrono::{Duration, NaiveDate, NaiveTime};

/// Default nominal duration for templates that do not set one
pub const DEFAULT_DURATION_MINUTES: i64 = 15;
/// Default snooze length
pub const DEFAULT_SNOOZE_MINUTES: i64 = 15;

/// Immutable task definition loaded from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTemplate {
    /// Stable identifier; instance ids are derived from it
    pub id: String,
    pub title: String,
    pub notes: String,
    /// Free-form grouping label ("morning_tasks", "exercise", ...)
    pub category: String,
    /// Local wall-clock time of day
    pub time: NaiveTime,
    pub recurrence: Recurrence,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    /// One-shot date for templates without a recurrence rule
    pub date: Option<NaiveDate>,
    pub priority: Priority,
    /// Nominal duration
    pub duration: Duration,
    pub alert: bool,
    pub snooze: Duration,
}

impl TaskTemplate {
    pub fn new(title: impl Into<String>, time: NaiveTime) -> Self {
        let title = title.into();
        Self {
            id: derive_template_id(&title, time),
            title,
            notes: String::new(),
            category: "general".to_string(),
            time,
            recurrence: Recurrence::Daily,
            valid_from: None,
            valid_until: None,
            date: None,
            priority: Priority::Low,
            duration: Duration::minutes(DEFAULT_DURATION_MINUTES),
            alert: true,
            snooze: Duration::minutes(DEFAULT_SNOOZE_MINUTES),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = recurrence;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_duration(mut self, minutes: i64) -> Self {
        self.duration = Duration::minutes(minutes);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

/// Build an id like `take_supplements_0700` from title and time
pub fn derive_template_id(title: &str, time: NaiveTime) -> String {
    let slug: String = title
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}_{}", slug, time.format("%H%M"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_template_id() {
        let time = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        assert_eq!(derive_template_id("Take Supplements", time), "take_supplements_0700");
        assert_eq!(derive_template_id(" Walk & stretch ", time), "walk___stretch_0700");
    }

    #[test]
    fn test_template_defaults() {
        let template = TaskTemplate::new("Read", NaiveTime::from_hms_opt(21, 30, 0).unwrap());
        assert_eq!(template.id, "read_2130");
        assert_eq!(template.priority, Priority::Low);
        assert_eq!(template.duration, Duration::minutes(15));
        assert_eq!(template.recurrence, Recurrence::Daily);
        assert!(template.alert);
    }
}
