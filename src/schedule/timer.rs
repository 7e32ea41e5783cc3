//! Countdown for the instance currently presented to the user.
//!
//! Remaining time is reduced by the wall-clock time elapsed since the previous
//! tick, so a late or stalled driver catches up exactly on its next tick.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{InstanceStatus, TaskInstance};
use crate::error::{EngineError, EngineResult};

/// Default remaining-time threshold for the time-low alert
pub const DEFAULT_TIME_LOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerState {
    Running,
    Paused,
}

/// The timer session of the single Active instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTimer {
    pub instance_id: String,
    pub state: TimerState,
    /// Instant up to which elapsed time has been accounted for
    pub accounted_until: DateTime<Utc>,
    pub time_low_sent: bool,
}

/// What a tick did to the plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerOutcome {
    Activated { instance_id: String },
    TimeLow { instance_id: String, remaining_secs: i64 },
    Expired { instance_id: String },
}

#[derive(Debug, Clone, Default)]
pub struct TimerEngine {
    time_low_secs: i64,
    session: Option<ActiveTimer>,
}

impl TimerEngine {
    pub fn new(time_low_secs: i64) -> Self {
        Self {
            time_low_secs,
            session: None,
        }
    }

    pub fn set_time_low_secs(&mut self, secs: i64) {
        self.time_low_secs = secs;
    }

    pub fn session(&self) -> Option<&ActiveTimer> {
        self.session.as_ref()
    }

    pub fn active_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.instance_id.as_str())
    }

    pub fn is_paused(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.state == TimerState::Paused)
    }

    /// Reinstate a session persisted before a restart
    pub fn restore(&mut self, session: Option<ActiveTimer>) {
        self.session = session;
    }

    /// Drop the session if it belongs to `instance_id`
    pub fn end_session(&mut self, instance_id: &str) {
        if self.active_id() == Some(instance_id) {
            self.session = None;
        }
    }

    pub fn clear(&mut self) {
        self.session = None;
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> EngineResult<String> {
        let session = self.session.as_mut().ok_or(EngineError::NoActiveInstance)?;
        if session.state == TimerState::Running {
            session.state = TimerState::Paused;
            session.accounted_until = now;
        }
        Ok(session.instance_id.clone())
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> EngineResult<String> {
        let session = self.session.as_mut().ok_or(EngineError::NoActiveInstance)?;
        if session.state == TimerState::Paused {
            session.state = TimerState::Running;
            session.accounted_until = now;
        }
        Ok(session.instance_id.clone())
    }

    /// Charge running time up to `now` without expiring, for an instance the
    /// user is about to resolve. A paused session charges nothing.
    pub fn settle(&mut self, instances: &mut [TaskInstance], now: DateTime<Utc>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let elapsed = (now - session.accounted_until).num_seconds();
        if session.state == TimerState::Paused || elapsed <= 0 {
            session.accounted_until = now;
            return;
        }
        session.accounted_until = session.accounted_until + Duration::seconds(elapsed);
        if let Some(instance) = instances.iter_mut().find(|i| i.id == session.instance_id) {
            instance.consume(elapsed);
        }
    }

    /// Advance the countdown to `now` and activate the next due instance
    pub fn tick(&mut self, instances: &mut [TaskInstance], now: DateTime<Utc>) -> Vec<TimerOutcome> {
        let mut outcomes = Vec::new();

        self.adopt_orphan(instances, now);
        self.advance(instances, now, &mut outcomes);

        if self.session.is_none() {
            if let Some(instance) = next_due(instances, now) {
                instance.transition(InstanceStatus::Active, now);
                debug!(instance = %instance.id, "instance activated");
                outcomes.push(TimerOutcome::Activated {
                    instance_id: instance.id.clone(),
                });
                self.session = Some(ActiveTimer {
                    instance_id: instance.id.clone(),
                    state: TimerState::Running,
                    accounted_until: now,
                    time_low_sent: false,
                });
                self.check_time_low(instances, &mut outcomes);
            }
        }

        outcomes
    }

    /// An Active instance with no session (e.g. a session lost on restart) gets one back
    fn adopt_orphan(&mut self, instances: &[TaskInstance], now: DateTime<Utc>) {
        if let Some(session) = &self.session {
            let still_active = instances
                .iter()
                .any(|i| i.id == session.instance_id && i.status == InstanceStatus::Active);
            if still_active {
                return;
            }
            self.session = None;
        }

        if let Some(orphan) = instances.iter().find(|i| i.status == InstanceStatus::Active) {
            self.session = Some(ActiveTimer {
                instance_id: orphan.id.clone(),
                state: TimerState::Running,
                accounted_until: now,
                time_low_sent: false,
            });
        }
    }

    fn advance(&mut self, instances: &mut [TaskInstance], now: DateTime<Utc>, outcomes: &mut Vec<TimerOutcome>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.state == TimerState::Paused {
            session.accounted_until = now;
            return;
        }

        let elapsed = (now - session.accounted_until).num_seconds();
        if elapsed < 0 {
            // Clock moved backwards; resync without charging the instance
            session.accounted_until = now;
            return;
        }
        session.accounted_until = session.accounted_until + Duration::seconds(elapsed);

        let Some(instance) = instances.iter_mut().find(|i| i.id == session.instance_id) else {
            self.session = None;
            return;
        };

        // The countdown may sit at 00:00 for a second; it expires once time runs past zero
        let overrun = elapsed > instance.remaining_secs;
        instance.consume(elapsed);
        if overrun {
            instance.transition(InstanceStatus::Expired, now);
            debug!(instance = %instance.id, "instance expired");
            outcomes.push(TimerOutcome::Expired {
                instance_id: instance.id.clone(),
            });
            self.session = None;
            return;
        }

        self.check_time_low(instances, outcomes);
    }

    fn check_time_low(&mut self, instances: &[TaskInstance], outcomes: &mut Vec<TimerOutcome>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.time_low_sent {
            return;
        }
        let Some(instance) = instances.iter().find(|i| i.id == session.instance_id) else {
            return;
        };
        if instance.remaining_secs > 0 && instance.remaining_secs <= self.time_low_secs {
            session.time_low_sent = true;
            outcomes.push(TimerOutcome::TimeLow {
                instance_id: instance.id.clone(),
                remaining_secs: instance.remaining_secs,
            });
        }
    }
}

/// Earliest Pending instance that is due and whose slot has not run out
fn next_due(instances: &mut [TaskInstance], now: DateTime<Utc>) -> Option<&mut TaskInstance> {
    instances
        .iter_mut()
        .filter(|i| i.status == InstanceStatus::Pending && i.activation_window_open(now))
        .min_by(|a, b| {
            a.scheduled_at
                .cmp(&b.scheduled_at)
                .then(a.priority.cmp(&b.priority))
        })
}
