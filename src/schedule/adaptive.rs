//! Shortens later, lower-priority instances to absorb time lost to an
//! expired or overrunning task.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{InstanceStatus, Priority, TaskInstance};

/// Record of one reduction applied to one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptiveAdjustment {
    pub instance_id: String,
    pub title: String,
    /// Remaining time before the reduction
    pub original_secs: i64,
    pub new_secs: i64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl AdaptiveAdjustment {
    pub fn reduction_secs(&self) -> i64 {
        self.original_secs - self.new_secs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptivePolicy {
    /// Most a single adjustment may take, as a percentage of nominal duration
    pub cap_percent: u32,
    /// Remaining time never drops below this
    pub floor: Duration,
}

impl Default for AdaptivePolicy {
    fn default() -> Self {
        Self {
            cap_percent: 30,
            floor: Duration::minutes(5),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdaptiveTimeManager {
    policy: AdaptivePolicy,
    history: Vec<AdaptiveAdjustment>,
}

impl AdaptiveTimeManager {
    pub fn new(policy: AdaptivePolicy) -> Self {
        Self {
            policy,
            history: Vec::new(),
        }
    }

    pub fn policy(&self) -> AdaptivePolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: AdaptivePolicy) {
        self.policy = policy;
    }

    pub fn history(&self) -> &[AdaptiveAdjustment] {
        &self.history
    }

    pub fn restore(&mut self, history: Vec<AdaptiveAdjustment>) {
        self.history = history;
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Most recent adjustments first
    pub fn recent(&self, n: usize) -> Vec<AdaptiveAdjustment> {
        self.history.iter().rev().take(n).cloned().collect()
    }

    /// Take up to `overrun` out of later Pending instances with priority > 1.
    ///
    /// Candidates are visited by priority (2 before 3) then scheduled time;
    /// each gives up at most `cap_percent` of its nominal duration and never
    /// goes below the floor.
    pub fn redistribute(
        &mut self,
        instances: &mut [TaskInstance],
        overrun: Duration,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Vec<AdaptiveAdjustment> {
        let mut left = overrun.num_seconds();
        if left <= 0 {
            return Vec::new();
        }

        let mut candidates: Vec<&mut TaskInstance> = instances
            .iter_mut()
            .filter(|i| {
                i.status == InstanceStatus::Pending && i.priority != Priority::High && i.scheduled_at > now
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.scheduled_at.cmp(&b.scheduled_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        let floor = self.policy.floor.num_seconds();
        let mut applied = Vec::new();
        for instance in candidates {
            if left <= 0 {
                break;
            }
            let cap = instance.nominal_secs * i64::from(self.policy.cap_percent) / 100;
            let room = instance.remaining_secs - floor;
            let reduction = cap.min(room).min(left);
            if reduction <= 0 {
                continue;
            }

            let original_secs = instance.remaining_secs;
            instance.remaining_secs -= reduction;
            left -= reduction;

            info!(
                instance = %instance.id,
                from = original_secs,
                to = instance.remaining_secs,
                "adjusted remaining time"
            );
            applied.push(AdaptiveAdjustment {
                instance_id: instance.id.clone(),
                title: instance.title.clone(),
                original_secs,
                new_secs: instance.remaining_secs,
                reason: reason.to_string(),
                timestamp: now,
            });
        }

        self.history.extend(applied.iter().cloned());
        applied
    }
}
