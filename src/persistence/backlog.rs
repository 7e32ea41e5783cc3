//! Store of instances that were missed or skipped, kept for a retention
//! window so the user can redeem them later.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::files::{load_json, save_json};
use crate::domain::{InstanceStatus, Priority, TaskInstance};
use crate::error::{EngineError, EngineResult, PersistenceError};

pub const REASON_MISSED: &str = "missed";
pub const REASON_SKIPPED: &str = "skipped";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogEntry {
    /// Same as the originating instance id
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub notes: String,
    pub original_date: NaiveDate,
    pub reason: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub redeemed: bool,
    #[serde(default)]
    pub redeemed_at: Option<DateTime<Utc>>,
}

impl BacklogEntry {
    pub fn from_instance(instance: &TaskInstance, reason: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: instance.id.clone(),
            title: instance.title.clone(),
            notes: instance.notes.clone(),
            original_date: instance.date,
            reason: reason.to_string(),
            priority: instance.priority,
            created_at: now,
            redeemed: false,
            redeemed_at: None,
        }
    }

    /// Whole days between the original date and `today`
    pub fn age_days(&self, today: NaiveDate) -> i64 {
        (today - self.original_date).num_days()
    }
}

/// `skipped` for Skipped instances, `missed` for everything else
pub fn reason_for(status: InstanceStatus) -> &'static str {
    match status {
        InstanceStatus::Skipped => REASON_SKIPPED,
        _ => REASON_MISSED,
    }
}

/// Result of a redemption request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub entry: BacklogEntry,
    /// False when the entry had already been redeemed
    pub newly_redeemed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgeBuckets {
    /// Up to 3 days old
    pub recent: usize,
    /// 4 to 7 days
    pub week_old: usize,
    /// 8 to 30 days
    pub month_old: usize,
    pub older: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BacklogStats {
    pub total: usize,
    pub redeemed: usize,
    pub open: usize,
    /// Percentage of entries redeemed
    pub redemption_rate: f64,
    /// Entry count per priority level
    pub by_priority: BTreeMap<u8, usize>,
    /// Ages of open entries
    pub by_age: AgeBuckets,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BacklogFile {
    #[serde(default)]
    entries: BTreeMap<String, BacklogEntry>,
}

#[derive(Debug)]
pub struct BacklogStore {
    path: Option<PathBuf>,
    entries: BTreeMap<String, BacklogEntry>,
    retention_days: i64,
    dirty: bool,
}

impl BacklogStore {
    /// Store that never touches the disk
    pub fn in_memory(retention_days: i64) -> Self {
        Self {
            path: None,
            entries: BTreeMap::new(),
            retention_days,
            dirty: false,
        }
    }

    /// Load from `path`; a missing file is an empty backlog
    pub fn load(path: &Path, retention_days: i64) -> Result<Self, PersistenceError> {
        let file: BacklogFile = load_json(path)?.unwrap_or_default();
        debug!(entries = file.entries.len(), path = %path.display(), "backlog loaded");
        Ok(Self {
            path: Some(path.to_path_buf()),
            entries: file.entries,
            retention_days,
            dirty: false,
        })
    }

    pub fn set_retention_days(&mut self, days: i64) {
        self.retention_days = days;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get(&self, id: &str) -> Option<&BacklogEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add an entry for `instance` unless one already exists
    pub fn record(&mut self, instance: &TaskInstance, reason: &str, now: DateTime<Utc>) -> Option<BacklogEntry> {
        if self.entries.contains_key(&instance.id) {
            return None;
        }
        let entry = BacklogEntry::from_instance(instance, reason, now);
        info!(entry = %entry.id, reason, "added to backlog");
        self.entries.insert(entry.id.clone(), entry.clone());
        self.dirty = true;
        Some(entry)
    }

    /// End-of-day archive: every Pending, Skipped or Expired instance
    pub fn record_rollover(&mut self, instances: &[TaskInstance], now: DateTime<Utc>) -> Vec<BacklogEntry> {
        instances
            .iter()
            .filter(|i| i.status.needs_backlog())
            .filter_map(|i| self.record(i, reason_for(i.status), now))
            .collect()
    }

    /// On-demand archive during the day: only Skipped or Expired instances
    pub fn flush(&mut self, instances: &[TaskInstance], now: DateTime<Utc>) -> Vec<BacklogEntry> {
        instances
            .iter()
            .filter(|i| matches!(i.status, InstanceStatus::Skipped | InstanceStatus::Expired))
            .filter_map(|i| self.record(i, reason_for(i.status), now))
            .collect()
    }

    /// Drop entries older than the retention window, returning how many went
    pub fn purge(&mut self, today: NaiveDate) -> usize {
        let retention = self.retention_days;
        let before = self.entries.len();
        self.entries.retain(|_, e| e.age_days(today) <= retention);
        let purged = before - self.entries.len();
        if purged > 0 {
            debug!(purged, "purged old backlog entries");
            self.dirty = true;
        }
        purged
    }

    /// Entries in the retention window, priority first then oldest first
    pub fn list(&mut self, today: NaiveDate) -> Vec<BacklogEntry> {
        self.purge(today);
        let mut entries: Vec<BacklogEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.original_date.cmp(&b.original_date))
                .then(a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        entries
    }

    /// Mark an entry redeemed. Redeeming twice changes nothing.
    pub fn redeem(&mut self, id: &str, today: NaiveDate, now: DateTime<Utc>) -> EngineResult<Redemption> {
        self.purge(today);
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownBacklogEntry(id.to_string()))?;

        if entry.redeemed {
            return Ok(Redemption {
                entry: entry.clone(),
                newly_redeemed: false,
            });
        }

        entry.redeemed = true;
        entry.redeemed_at = Some(now);
        self.dirty = true;
        info!(entry = %id, "backlog entry redeemed");
        Ok(Redemption {
            entry: entry.clone(),
            newly_redeemed: true,
        })
    }

    pub fn remove(&mut self, id: &str, today: NaiveDate) -> EngineResult<BacklogEntry> {
        self.purge(today);
        let entry = self
            .entries
            .remove(id)
            .ok_or_else(|| EngineError::UnknownBacklogEntry(id.to_string()))?;
        self.dirty = true;
        Ok(entry)
    }

    pub fn stats(&mut self, today: NaiveDate) -> BacklogStats {
        self.purge(today);
        let mut stats = BacklogStats {
            total: self.entries.len(),
            ..BacklogStats::default()
        };

        for entry in self.entries.values() {
            *stats.by_priority.entry(entry.priority.level()).or_insert(0) += 1;
            if entry.redeemed {
                stats.redeemed += 1;
                continue;
            }
            match entry.age_days(today) {
                d if d <= 3 => stats.by_age.recent += 1,
                d if d <= 7 => stats.by_age.week_old += 1,
                d if d <= 30 => stats.by_age.month_old += 1,
                _ => stats.by_age.older += 1,
            }
        }

        stats.open = stats.total - stats.redeemed;
        if stats.total > 0 {
            stats.redemption_rate = stats.redeemed as f64 / stats.total as f64 * 100.0;
        }
        stats
    }

    /// Write to disk if anything changed; the dirty flag survives a failed write
    pub fn save(&mut self) -> Result<(), PersistenceError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(path) = &self.path {
            let file = BacklogFile {
                entries: self.entries.clone(),
            };
            save_json(path, &file)?;
        }
        self.dirty = false;
        Ok(())
    }
}
