use crate::domain::TaskInstance;
use crate::error::PersistenceError;
use crate::schedule::{ActiveTimer, AdaptiveAdjustment, CatchUpBlock};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The current day's working state, stored in day.json
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayState {
    /// Last processed date
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub instances: Vec<TaskInstance>,
    #[serde(default)]
    pub adjustments: Vec<AdaptiveAdjustment>,
    #[serde(default)]
    pub blocks: Vec<CatchUpBlock>,
    #[serde(default)]
    pub timer: Option<ActiveTimer>,
    /// Backlog entry ids redeemed on this date
    #[serde(default)]
    pub redemptions: Vec<String>,
    #[serde(default)]
    pub last_tick: Option<DateTime<Utc>>,
}

/// Load day state from day.json; None if there is none yet
pub fn load_day_state<P: AsRef<Path>>(path: P) -> Result<Option<DayState>, PersistenceError> {
    crate::persistence::load_json(path)
}

/// Save day state to day.json
pub fn save_day_state<P: AsRef<Path>>(path: P, state: &DayState) -> Result<(), PersistenceError> {
    crate::persistence::save_json(path, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Segment, TaskTemplate};
    use crate::schedule::{Occurrence, TimerState};
    use chrono::{NaiveTime, TimeZone};
    use tempfile::tempdir;

    #[test]
    fn test_load_nonexistent_day_state() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("day.json");
        assert_eq!(load_day_state(&path).unwrap(), None);
    }

    #[test]
    fn test_save_and_load_day_state() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("day.json");

        let at = Utc.with_ymd_and_hms(2026, 5, 4, 7, 0, 0).unwrap();
        let template = TaskTemplate::new("Stretch", NaiveTime::from_hms_opt(7, 0, 0).unwrap());
        let occurrence = Occurrence {
            date: at.date_naive(),
            local_time: template.time,
            at,
            dst_shifted: false,
        };
        let instance = TaskInstance::from_template(&template, &occurrence, Segment::Morning, at);

        let state = DayState {
            date: Some(at.date_naive()),
            timer: Some(ActiveTimer {
                instance_id: instance.id.clone(),
                state: TimerState::Paused,
                accounted_until: at,
                time_low_sent: false,
            }),
            instances: vec![instance],
            redemptions: vec!["read_2100@2026-05-03".to_string()],
            last_tick: Some(at),
            ..DayState::default()
        };

        save_day_state(&path, &state).unwrap();
        assert_eq!(load_day_state(&path).unwrap(), Some(state));
    }
}
