//! Daily completion ratio, streak counters and milestone badges.
//!
//! Each calendar day is recorded exactly once, at rollover.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::files::{load_json, save_json};
use crate::domain::{InstanceStatus, TaskInstance};
use crate::error::PersistenceError;

/// Tolerance for ratios that land exactly on the threshold
const RATIO_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeKind {
    Current,
    Longest,
}

impl BadgeKind {
    fn prefix(&self) -> &'static str {
        match self {
            BadgeKind::Current => "current",
            BadgeKind::Longest => "longest",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    /// Threshold id such as `current-7`
    pub id: String,
    pub kind: BadgeKind,
    pub threshold: u32,
    pub earned_on: NaiveDate,
}

pub fn badge_id(kind: BadgeKind, threshold: u32) -> String {
    format!("{}-{}", kind.prefix(), threshold)
}

/// Counts for one day's plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayTally {
    pub total: u32,
    pub completed: u32,
    pub skipped: u32,
    /// Backlog entries redeemed on this day (from any day)
    pub redeemed: u32,
}

impl DayTally {
    pub fn from_instances(instances: &[TaskInstance], redeemed: u32) -> Self {
        let count = |status: InstanceStatus| instances.iter().filter(|i| i.status == status).count() as u32;
        Self {
            total: instances.len() as u32,
            completed: count(InstanceStatus::Completed),
            skipped: count(InstanceStatus::Skipped),
            redeemed,
        }
    }

    /// min(1, (completed + redeemed) / total), 0 for an empty day
    pub fn completion_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (f64::from(self.completed + self.redeemed) / f64::from(self.total)).min(1.0)
    }

    pub fn skip_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        f64::from(self.skipped) / f64::from(self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreakRecord {
    pub date: NaiveDate,
    pub total: u32,
    pub completed: u32,
    pub skipped: u32,
    pub redeemed: u32,
    pub completion_ratio: f64,
    pub skip_ratio: f64,
    pub current_streak: u32,
    pub longest_streak: u32,
    #[serde(default)]
    pub badges: Vec<String>,
}

/// What recording a day produced
#[derive(Debug, Clone, PartialEq)]
pub struct StreakUpdate {
    pub record: StreakRecord,
    pub new_badges: Vec<Badge>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreakSummary {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_record: Option<StreakRecord>,
    pub badges: Vec<Badge>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreakPolicy {
    pub threshold: f64,
    pub current_badges: Vec<u32>,
    pub longest_badges: Vec<u32>,
}

impl Default for StreakPolicy {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            current_badges: vec![3, 7, 30],
            longest_badges: vec![7, 30],
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StreakFile {
    #[serde(default)]
    current_streak: u32,
    #[serde(default)]
    longest_streak: u32,
    #[serde(default)]
    days: BTreeMap<NaiveDate, StreakRecord>,
    /// Keyed by badge id; each is awarded once ever
    #[serde(default)]
    badges: BTreeMap<String, Badge>,
}

#[derive(Debug)]
pub struct StreakTracker {
    path: Option<PathBuf>,
    state: StreakFile,
    policy: StreakPolicy,
    dirty: bool,
}

impl StreakTracker {
    pub fn in_memory(policy: StreakPolicy) -> Self {
        Self {
            path: None,
            state: StreakFile::default(),
            policy,
            dirty: false,
        }
    }

    pub fn load(path: &Path, policy: StreakPolicy) -> Result<Self, PersistenceError> {
        let state: StreakFile = load_json(path)?.unwrap_or_default();
        debug!(days = state.days.len(), path = %path.display(), "streaks loaded");
        Ok(Self {
            path: Some(path.to_path_buf()),
            state,
            policy,
            dirty: false,
        })
    }

    pub fn set_policy(&mut self, policy: StreakPolicy) {
        self.policy = policy;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn record(&self, date: NaiveDate) -> Option<&StreakRecord> {
        self.state.days.get(&date)
    }

    /// Close out `date`. Returns None if that date was already recorded.
    pub fn record_day(&mut self, date: NaiveDate, tally: DayTally) -> Option<StreakUpdate> {
        if self.state.days.contains_key(&date) {
            debug!(%date, "day already recorded");
            return None;
        }

        let ratio = tally.completion_ratio();
        if ratio + RATIO_EPSILON >= self.policy.threshold {
            self.state.current_streak += 1;
        } else {
            self.state.current_streak = 0;
        }
        self.state.longest_streak = self.state.longest_streak.max(self.state.current_streak);

        let new_badges = self.award_badges(date);
        let record = StreakRecord {
            date,
            total: tally.total,
            completed: tally.completed,
            skipped: tally.skipped,
            redeemed: tally.redeemed,
            completion_ratio: ratio,
            skip_ratio: tally.skip_ratio(),
            current_streak: self.state.current_streak,
            longest_streak: self.state.longest_streak,
            badges: new_badges.iter().map(|b| b.id.clone()).collect(),
        };
        info!(
            %date,
            ratio,
            current = record.current_streak,
            longest = record.longest_streak,
            "day recorded"
        );

        self.state.days.insert(date, record.clone());
        self.dirty = true;
        Some(StreakUpdate { record, new_badges })
    }

    fn award_badges(&mut self, date: NaiveDate) -> Vec<Badge> {
        let current = self.state.current_streak;
        let longest = self.state.longest_streak;
        let checks = self
            .policy
            .current_badges
            .iter()
            .map(|t| (BadgeKind::Current, *t, current))
            .chain(self.policy.longest_badges.iter().map(|t| (BadgeKind::Longest, *t, longest)));

        let mut earned = Vec::new();
        for (kind, threshold, value) in checks {
            let id = badge_id(kind, threshold);
            if value < threshold || self.state.badges.contains_key(&id) {
                continue;
            }
            let badge = Badge {
                id: id.clone(),
                kind,
                threshold,
                earned_on: date,
            };
            info!(badge = %id, "badge earned");
            self.state.badges.insert(id, badge.clone());
            earned.push(badge);
        }
        earned
    }

    pub fn summary(&self) -> StreakSummary {
        StreakSummary {
            current_streak: self.state.current_streak,
            longest_streak: self.state.longest_streak,
            last_record: self.state.days.values().next_back().cloned(),
            badges: self.state.badges.values().cloned().collect(),
        }
    }

    /// Most recent records first
    pub fn recent(&self, n: usize) -> Vec<StreakRecord> {
        self.state.days.values().rev().take(n).cloned().collect()
    }

    pub fn save(&mut self) -> Result<(), PersistenceError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(path) = &self.path {
            save_json(path, &self.state)?;
        }
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, d).unwrap()
    }

    fn tally(completed: u32, total: u32) -> DayTally {
        DayTally {
            total,
            completed,
            ..DayTally::default()
        }
    }

    #[test]
    fn test_streak_sequence() {
        let mut tracker = StreakTracker::in_memory(StreakPolicy::default());
        // 0.9, 0.85, 0.5, 0.8, 0.8
        let days = [tally(9, 10), tally(17, 20), tally(1, 2), tally(4, 5), tally(8, 10)];

        let currents: Vec<u32> = days
            .iter()
            .enumerate()
            .map(|(i, t)| tracker.record_day(day(i as u32 + 1), *t).unwrap().record.current_streak)
            .collect();

        assert_eq!(currents, vec![1, 2, 0, 1, 2]);
        assert_eq!(tracker.summary().longest_streak, 2);
    }

    #[test]
    fn test_day_is_recorded_once() {
        let mut tracker = StreakTracker::in_memory(StreakPolicy::default());
        assert!(tracker.record_day(day(1), tally(1, 1)).is_some());
        assert!(tracker.record_day(day(1), tally(0, 1)).is_none());
        assert_eq!(tracker.summary().current_streak, 1);
    }

    #[test]
    fn test_ratio_counts_redemptions_and_caps_at_one() {
        let t = DayTally {
            total: 4,
            completed: 3,
            skipped: 1,
            redeemed: 3,
        };
        assert_eq!(t.completion_ratio(), 1.0);
        assert_eq!(t.skip_ratio(), 0.25);
        assert_eq!(DayTally::default().completion_ratio(), 0.0);
    }

    #[test]
    fn test_badges_awarded_once() {
        let mut tracker = StreakTracker::in_memory(StreakPolicy::default());
        let mut earned = Vec::new();
        for d in 1..=3 {
            earned.extend(tracker.record_day(day(d), tally(1, 1)).unwrap().new_badges);
        }
        assert_eq!(earned.len(), 1);
        assert_eq!(earned[0].id, "current-3");
        assert_eq!(earned[0].earned_on, day(3));

        // Break the streak and reach 3 again: no second award
        tracker.record_day(day(4), tally(0, 1));
        for d in 5..=7 {
            assert!(tracker.record_day(day(d), tally(1, 1)).unwrap().new_badges.is_empty());
        }
    }

    #[test]
    fn test_longest_badge() {
        let policy = StreakPolicy {
            threshold: 0.8,
            current_badges: vec![],
            longest_badges: vec![2],
        };
        let mut tracker = StreakTracker::in_memory(policy);
        tracker.record_day(day(1), tally(1, 1));
        let update = tracker.record_day(day(2), tally(1, 1)).unwrap();
        assert_eq!(update.record.badges, vec!["longest-2".to_string()]);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("streaks.json");

        let mut tracker = StreakTracker::load(&path, StreakPolicy::default()).unwrap();
        tracker.record_day(day(1), tally(1, 1));
        tracker.save().unwrap();

        let loaded = StreakTracker::load(&path, StreakPolicy::default()).unwrap();
        assert_eq!(loaded.summary(), tracker.summary());
        assert!(loaded.record(day(1)).is_some());
    }
}
