//! Notifications the engine queues for presentation and alerting code.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::Segment;
use crate::persistence::{Badge, BacklogEntry};
use crate::schedule::AdaptiveAdjustment;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    InstanceActivated {
        instance_id: String,
        title: String,
        notes: String,
        alert: bool,
        remaining_secs: i64,
    },
    TimeLow {
        instance_id: String,
        title: String,
        remaining_secs: i64,
    },
    Expired {
        instance_id: String,
        title: String,
    },
    Completed {
        instance_id: String,
        title: String,
    },
    Skipped {
        instance_id: String,
        title: String,
    },
    TimerPaused {
        instance_id: String,
    },
    TimerResumed {
        instance_id: String,
    },
    CatchUpUpdated {
        block_id: String,
        segment: Segment,
        instance_ids: Vec<String>,
    },
    CatchUpDissolved {
        block_id: String,
        segment: Segment,
    },
    TimeAdjusted(AdaptiveAdjustment),
    BacklogRecorded(BacklogEntry),
    Redeemed {
        entry_id: String,
        title: String,
    },
    BadgeEarned(Badge),
    DayRolledOver {
        date: NaiveDate,
        completion_ratio: f64,
        current_streak: u32,
        backlog_added: usize,
    },
    TemplateWarning {
        message: String,
    },
    PersistenceFailed {
        store: String,
        message: String,
    },
    ConfigReloaded {
        templates: usize,
        warnings: usize,
        at: DateTime<Utc>,
    },
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::InstanceActivated {
                title, remaining_secs, ..
            } => write!(f, "Now: {} ({})", title, crate::domain::format_countdown(*remaining_secs)),
            EngineEvent::TimeLow {
                title, remaining_secs, ..
            } => write!(f, "{} left for {}", crate::domain::format_countdown(*remaining_secs), title),
            EngineEvent::Expired { title, .. } => write!(f, "Time is up: {}", title),
            EngineEvent::Completed { title, .. } => write!(f, "Completed: {}", title),
            EngineEvent::Skipped { title, .. } => write!(f, "Skipped: {}", title),
            EngineEvent::TimerPaused { instance_id } => write!(f, "Paused {}", instance_id),
            EngineEvent::TimerResumed { instance_id } => write!(f, "Resumed {}", instance_id),
            EngineEvent::CatchUpUpdated {
                segment, instance_ids, ..
            } => write!(f, "Catch-up ({}): {} task(s) waiting", segment, instance_ids.len()),
            EngineEvent::CatchUpDissolved { segment, .. } => write!(f, "Catch-up ({}) cleared", segment),
            EngineEvent::TimeAdjusted(adj) => write!(
                f,
                "{} shortened {} -> {} ({})",
                adj.title,
                crate::domain::format_countdown(adj.original_secs),
                crate::domain::format_countdown(adj.new_secs),
                adj.reason
            ),
            EngineEvent::BacklogRecorded(entry) => write!(f, "Backlog: {} ({})", entry.title, entry.reason),
            EngineEvent::Redeemed { title, .. } => write!(f, "Redeemed: {}", title),
            EngineEvent::BadgeEarned(badge) => write!(f, "Badge earned: {}", badge.id),
            EngineEvent::DayRolledOver {
                date,
                completion_ratio,
                current_streak,
                ..
            } => write!(
                f,
                "Closed {}: {:.0}% done, streak {}",
                date,
                completion_ratio * 100.0,
                current_streak
            ),
            EngineEvent::TemplateWarning { message } => write!(f, "Warning: {}", message),
            EngineEvent::PersistenceFailed { store, message } => {
                write!(f, "Storage problem with {}: {}", store, message)
            }
            EngineEvent::ConfigReloaded { templates, warnings, .. } => {
                write!(f, "Configuration reloaded: {} task(s), {} warning(s)", templates, warnings)
            }
        }
    }
}
