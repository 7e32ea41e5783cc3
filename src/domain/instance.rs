use super::enums::{InstanceStatus, Priority, Segment};
use super::template::TaskTemplate;
use crate::schedule::Occurrence;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// State transition event for tracking instance history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEvent {
    /// When the transition occurred
    pub timestamp: DateTime<Utc>,
    /// Previous status (None for initial creation)
    pub from_status: Option<InstanceStatus>,
    /// New status after transition
    pub to_status: InstanceStatus,
}

impl StateEvent {
    pub fn new(timestamp: DateTime<Utc>, from_status: Option<InstanceStatus>, to_status: InstanceStatus) -> Self {
        Self {
            timestamp,
            from_status,
            to_status,
        }
    }
}

/// Id of the instance of `template_id` on `date`
pub fn instance_id(template_id: &str, date: NaiveDate) -> String {
    format!("{}@{}", template_id, date.format("%Y-%m-%d"))
}

/// A template resolved to one calendar date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInstance {
    /// `<template id>@<YYYY-MM-DD>`
    pub id: String,
    pub template_id: String,
    pub date: NaiveDate,
    pub title: String,
    pub notes: String,
    pub category: String,
    pub priority: Priority,
    pub alert: bool,
    pub snooze_secs: i64,
    pub scheduled_at: DateTime<Utc>,
    /// Local wall-clock time the instance is shown at
    pub local_time: NaiveTime,
    pub segment: Segment,
    /// Moved forward out of a DST gap
    pub dst_shifted: bool,
    pub status: InstanceStatus,
    pub nominal_secs: i64,
    /// Countdown left; never negative
    pub remaining_secs: i64,
    /// Running time charged while Active; unlike the countdown it keeps
    /// growing past zero
    #[serde(default)]
    pub used_secs: i64,
    pub activated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<StateEvent>,
}

impl TaskInstance {
    pub fn from_template(
        template: &TaskTemplate,
        occurrence: &Occurrence,
        segment: Segment,
        created_at: DateTime<Utc>,
    ) -> Self {
        let nominal_secs = template.duration.num_seconds().max(0);
        Self {
            id: instance_id(&template.id, occurrence.date),
            template_id: template.id.clone(),
            date: occurrence.date,
            title: template.title.clone(),
            notes: template.notes.clone(),
            category: template.category.clone(),
            priority: template.priority,
            alert: template.alert,
            snooze_secs: template.snooze.num_seconds(),
            scheduled_at: occurrence.at,
            local_time: occurrence.local_time,
            segment,
            dst_shifted: occurrence.dst_shifted,
            status: InstanceStatus::Pending,
            nominal_secs,
            remaining_secs: nominal_secs,
            used_secs: 0,
            activated_at: None,
            completed_at: None,
            history: vec![StateEvent::new(created_at, None, InstanceStatus::Pending)],
        }
    }

    /// Copy template-level fields; status and remaining time are untouched
    pub fn refresh_from_template(&mut self, template: &TaskTemplate) {
        self.title = template.title.clone();
        self.notes = template.notes.clone();
        self.category = template.category.clone();
        self.priority = template.priority;
        self.alert = template.alert;
        self.snooze_secs = template.snooze.num_seconds();
    }

    /// Move a Pending instance to a new slot (after a reload changed its time)
    pub fn reschedule(&mut self, occurrence: &Occurrence, segment: Segment) {
        self.scheduled_at = occurrence.at;
        self.local_time = occurrence.local_time;
        self.dst_shifted = occurrence.dst_shifted;
        self.segment = segment;
    }

    pub fn nominal(&self) -> Duration {
        Duration::seconds(self.nominal_secs)
    }

    pub fn remaining(&self) -> Duration {
        Duration::seconds(self.remaining_secs)
    }

    /// Scheduled time has arrived
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now
    }

    /// Still inside the slot it was scheduled for, so it can be presented live
    pub fn activation_window_open(&self, now: DateTime<Utc>) -> bool {
        self.is_due(now) && now < self.scheduled_at + self.remaining()
    }

    /// Record a status change
    pub fn transition(&mut self, to: InstanceStatus, now: DateTime<Utc>) {
        if self.status == to {
            return;
        }
        let from = self.status;
        self.status = to;
        match to {
            InstanceStatus::Active => self.activated_at = Some(now),
            InstanceStatus::Completed | InstanceStatus::Skipped | InstanceStatus::Redeemed => {
                self.completed_at = Some(now)
            }
            InstanceStatus::Expired => self.remaining_secs = 0,
            InstanceStatus::Pending => {}
        }
        self.history.push(StateEvent::new(now, Some(from), to));
    }

    /// Charge `secs` of running time, returning the countdown left
    pub fn consume(&mut self, secs: i64) -> i64 {
        let secs = secs.max(0);
        self.used_secs += secs;
        self.remaining_secs = (self.remaining_secs - secs).max(0);
        self.remaining_secs
    }

    /// Charged running time beyond the nominal duration; paused time is never charged
    pub fn overrun(&self) -> Duration {
        Duration::seconds((self.used_secs - self.nominal_secs).max(0))
    }

    /// Format remaining time as MM:SS
    pub fn remaining_formatted(&self) -> String {
        format_countdown(self.remaining_secs)
    }
}

/// Format seconds as MM:SS (minutes keep counting past 59)
pub fn format_countdown(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> TaskInstance {
        let template = TaskTemplate::new("Stretch", NaiveTime::from_hms_opt(9, 0, 0).unwrap()).with_duration(10);
        let at = Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap();
        let occurrence = Occurrence {
            date: at.date_naive(),
            local_time: template.time,
            at,
            dst_shifted: false,
        };
        TaskInstance::from_template(&template, &occurrence, Segment::Morning, at)
    }

    #[test]
    fn test_new_instance_is_pending() {
        let instance = sample();
        assert_eq!(instance.id, "stretch_0900@2026-05-04");
        assert_eq!(instance.status, InstanceStatus::Pending);
        assert_eq!(instance.remaining_secs, 600);
        assert_eq!(instance.history.len(), 1);
    }

    #[test]
    fn test_activation_window() {
        let instance = sample();
        let at = instance.scheduled_at;
        assert!(!instance.activation_window_open(at - Duration::seconds(1)));
        assert!(instance.activation_window_open(at));
        assert!(instance.activation_window_open(at + Duration::minutes(9)));
        assert!(!instance.activation_window_open(at + Duration::minutes(10)));
    }

    #[test]
    fn test_transition_records_history() {
        let mut instance = sample();
        let at = instance.scheduled_at;
        instance.transition(InstanceStatus::Active, at);
        instance.transition(InstanceStatus::Active, at);
        instance.transition(InstanceStatus::Completed, at + Duration::minutes(3));

        assert_eq!(instance.activated_at, Some(at));
        assert_eq!(instance.completed_at, Some(at + Duration::minutes(3)));
        assert_eq!(instance.history.len(), 3);
        assert_eq!(instance.history[2].from_status, Some(InstanceStatus::Active));
    }

    #[test]
    fn test_consume_never_goes_negative() {
        let mut instance = sample();
        assert_eq!(instance.consume(590), 10);
        assert_eq!(instance.consume(30), 0);
        assert_eq!(instance.consume(-5), 0);
        assert_eq!(instance.used_secs, 620);
    }

    #[test]
    fn test_overrun_counts_charged_time_only() {
        let mut instance = sample();
        let at = instance.scheduled_at;
        instance.transition(InstanceStatus::Active, at);
        instance.consume(8 * 60);
        assert_eq!(instance.overrun(), Duration::zero());
        instance.consume(5 * 60);
        assert_eq!(instance.overrun(), Duration::minutes(3));
    }

    #[test]
    fn test_format_countdown() {
        assert_eq!(format_countdown(0), "00:00");
        assert_eq!(format_countdown(61), "01:01");
        assert_eq!(format_countdown(3725), "62:05");
    }
}
