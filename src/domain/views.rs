//! Read-only, serializable views handed to presentation code.

use super::enums::{InstanceStatus, Priority, Segment};
use super::instance::{format_countdown, TaskInstance};
use crate::persistence::StreakSummary;
use crate::schedule::{AdaptiveAdjustment, CatchUpBlock};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

/// The instance currently on screen
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveView {
    pub instance_id: String,
    pub title: String,
    pub notes: String,
    pub priority: Priority,
    pub local_time: NaiveTime,
    pub remaining_secs: i64,
    pub nominal_secs: i64,
    /// MM:SS
    pub remaining: String,
    pub paused: bool,
    /// How long a snoozed alert stays quiet
    pub snooze_secs: i64,
}

impl ActiveView {
    pub fn new(instance: &TaskInstance, paused: bool) -> Self {
        Self {
            instance_id: instance.id.clone(),
            title: instance.title.clone(),
            notes: instance.notes.clone(),
            priority: instance.priority,
            local_time: instance.local_time,
            remaining_secs: instance.remaining_secs,
            nominal_secs: instance.nominal_secs,
            remaining: instance.remaining_formatted(),
            paused,
            snooze_secs: instance.snooze_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatchUpItemView {
    pub instance_id: String,
    pub title: String,
    pub notes: String,
    /// Original local time
    pub time: NaiveTime,
    pub status: InstanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatchUpView {
    pub block_id: String,
    pub segment: Segment,
    pub created_at: DateTime<Utc>,
    pub items: Vec<CatchUpItemView>,
}

impl CatchUpView {
    pub fn new(block: &CatchUpBlock, instances: &[TaskInstance]) -> Self {
        let items = block
            .instance_ids
            .iter()
            .filter_map(|id| instances.iter().find(|i| &i.id == id))
            .map(|i| CatchUpItemView {
                instance_id: i.id.clone(),
                title: i.title.clone(),
                notes: i.notes.clone(),
                time: i.local_time,
                status: i.status,
            })
            .collect();
        Self {
            block_id: block.id.clone(),
            segment: block.segment,
            created_at: block.created_at,
            items,
        }
    }
}

/// One line of the day's plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanRowView {
    pub instance_id: String,
    pub time: NaiveTime,
    pub title: String,
    pub priority: Priority,
    pub segment: Segment,
    pub status: InstanceStatus,
    pub remaining_secs: i64,
    pub dst_shifted: bool,
}

impl From<&TaskInstance> for PlanRowView {
    fn from(instance: &TaskInstance) -> Self {
        Self {
            instance_id: instance.id.clone(),
            time: instance.local_time,
            title: instance.title.clone(),
            priority: instance.priority,
            segment: instance.segment,
            status: instance.status,
            remaining_secs: instance.remaining_secs,
            dst_shifted: instance.dst_shifted,
        }
    }
}

/// Everything a presenter needs in one serializable value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub date: NaiveDate,
    pub timezone: String,
    pub generated_at: DateTime<Utc>,
    pub active: Option<ActiveView>,
    pub plan: Vec<PlanRowView>,
    pub catch_up: Vec<CatchUpView>,
    pub adjustments: Vec<AdaptiveAdjustment>,
    pub streak: StreakSummary,
}

/// Short status marker for text output
pub fn status_badge(status: InstanceStatus) -> &'static str {
    match status {
        InstanceStatus::Pending => "[ ]",
        InstanceStatus::Active => "[>]",
        InstanceStatus::Completed => "[x]",
        InstanceStatus::Skipped => "[-]",
        InstanceStatus::Expired => "[!]",
        InstanceStatus::Redeemed => "[+]",
    }
}

impl std::fmt::Display for PlanRowView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {:<9} p{} {} ({})",
            status_badge(self.status),
            self.time.format("%H:%M"),
            self.segment,
            self.priority.level(),
            self.title,
            format_countdown(self.remaining_secs)
        )?;
        if self.dst_shifted {
            write!(f, " *")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskTemplate;
    use crate::schedule::Occurrence;
    use chrono::TimeZone;

    fn instance() -> TaskInstance {
        let at = Utc.with_ymd_and_hms(2026, 5, 4, 7, 0, 0).unwrap();
        let template = TaskTemplate::new("Stretch", NaiveTime::from_hms_opt(7, 0, 0).unwrap())
            .with_duration(10)
            .with_notes("Mat by the window");
        let occurrence = Occurrence {
            date: at.date_naive(),
            local_time: template.time,
            at,
            dst_shifted: false,
        };
        TaskInstance::from_template(&template, &occurrence, Segment::Morning, at)
    }

    #[test]
    fn test_plan_row_display() {
        let row = PlanRowView::from(&instance());
        assert_eq!(row.to_string(), "[ ] 07:00 morning   p3 Stretch (10:00)");
    }

    #[test]
    fn test_catch_up_view_carries_notes_and_time() {
        let inst = instance();
        let block = CatchUpBlock {
            id: "catchup:2026-05-04:morning".to_string(),
            date: inst.date,
            segment: Segment::Morning,
            created_at: inst.scheduled_at,
            instance_ids: vec![inst.id.clone(), "gone@2026-05-04".to_string()],
        };
        let view = CatchUpView::new(&block, &[inst]);
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.items[0].notes, "Mat by the window");
        assert_eq!(view.items[0].time, NaiveTime::from_hms_opt(7, 0, 0).unwrap());
    }

    #[test]
    fn test_active_view_formats_remaining() {
        let view = ActiveView::new(&instance(), true);
        assert_eq!(view.remaining, "10:00");
        assert!(view.paused);
        assert_eq!(view.snooze_secs, 15 * 60);
    }
}
