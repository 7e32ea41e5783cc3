//! The scheduling context for one user.
//!
//! `Engine` owns the day's plan and every store, and is the only place state
//! changes. All operations take the current instant explicitly; the driver
//! thread and presentation code share it through [`SharedEngine`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::config::{Config, LoadedConfig, Settings};
use crate::domain::{
    ActiveView, CatchUpView, EngineSnapshot, InstanceStatus, PlanRowView, TaskInstance,
};
use crate::error::{ConfigError, EngineError, EngineResult, PersistenceError};
use crate::events::EngineEvent;
use crate::persistence::{
    backlog_file, day_file, load_day_state, quarantine, save_day_state, streaks_file, BacklogEntry, BacklogStats,
    BacklogStore, DayState, DayTally, StreakPolicy, StreakRecord, StreakSummary, StreakTracker,
};
use crate::schedule::{
    AdaptiveAdjustment, AdaptiveTimeManager, CatchUpChange, CatchUpConsolidator, DailyPlanBuilder,
    RecurrenceResolver, TimerEngine, TimerOutcome,
};

/// Days further back than this are not replayed after a long absence
const MAX_ROLLOVER_DAYS: i64 = 366;

pub type SharedEngine = Arc<Mutex<Engine>>;

pub struct Engine {
    config: Config,
    builder: DailyPlanBuilder,
    date: NaiveDate,
    instances: Vec<TaskInstance>,
    timer: TimerEngine,
    catch_up: CatchUpConsolidator,
    adaptive: AdaptiveTimeManager,
    backlog: BacklogStore,
    streaks: StreakTracker,
    /// Backlog entries redeemed today
    redemptions: Vec<String>,
    events: Vec<EngineEvent>,
    day_path: Option<PathBuf>,
    needs_save: bool,
    last_tick: Option<DateTime<Utc>>,
    failing_stores: BTreeSet<&'static str>,
}

fn streak_policy(settings: &Settings) -> StreakPolicy {
    StreakPolicy {
        threshold: settings.streak_ratio,
        current_badges: settings.current_streak_badges.clone(),
        longest_badges: settings.longest_streak_badges.clone(),
    }
}

fn plan_builder(config: &Config) -> DailyPlanBuilder {
    DailyPlanBuilder::new(
        RecurrenceResolver::new(config.timezone),
        config.settings.segment_bounds(),
    )
}

fn local_date(tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

impl Engine {
    /// Engine with no backing files
    pub fn in_memory(loaded: LoadedConfig, now: DateTime<Utc>) -> Self {
        let settings = &loaded.config.settings;
        let backlog = BacklogStore::in_memory(settings.backlog_retention_days);
        let streaks = StreakTracker::in_memory(streak_policy(settings));
        Self::assemble(loaded, backlog, streaks, None, None, now)
    }

    /// Load every store from `data_dir` and catch up on any days missed.
    ///
    /// A store whose file does not parse is moved aside to `*.corrupt` and
    /// starts empty; the failure is reported as `PersistenceFailed`.
    pub fn open(loaded: LoadedConfig, data_dir: &Path, now: DateTime<Utc>) -> EngineResult<Self> {
        let settings = &loaded.config.settings;
        let retention = settings.backlog_retention_days;
        let policy = streak_policy(settings);
        let mut failures = Vec::new();

        let backlog = load_or_quarantine(
            "backlog",
            &backlog_file(data_dir),
            |path| BacklogStore::load(path, retention),
            &mut failures,
        )?
        .unwrap_or_else(|| BacklogStore::in_memory(retention));
        let streaks = load_or_quarantine(
            "streaks",
            &streaks_file(data_dir),
            |path| StreakTracker::load(path, policy.clone()),
            &mut failures,
        )?
        .unwrap_or_else(|| StreakTracker::in_memory(policy.clone()));
        let day_path = day_file(data_dir);
        let previous = load_or_quarantine("day", &day_path, |path| load_day_state(path), &mut failures)?.flatten();

        let mut engine = Self::assemble(loaded, backlog, streaks, Some(day_path), previous, now);
        let later = std::mem::replace(&mut engine.events, failures);
        engine.events.extend(later);
        Ok(engine)
    }

    fn assemble(
        loaded: LoadedConfig,
        backlog: BacklogStore,
        streaks: StreakTracker,
        day_path: Option<PathBuf>,
        previous: Option<DayState>,
        now: DateTime<Utc>,
    ) -> Self {
        let LoadedConfig { config, warnings } = loaded;
        let today = local_date(config.timezone, now);

        let mut engine = Self {
            builder: plan_builder(&config),
            timer: TimerEngine::new(config.settings.time_low_alert_secs),
            adaptive: AdaptiveTimeManager::new(config.settings.adaptive_policy()),
            config,
            date: today,
            instances: Vec::new(),
            catch_up: CatchUpConsolidator::new(),
            backlog,
            streaks,
            redemptions: Vec::new(),
            events: Vec::new(),
            day_path,
            needs_save: true,
            last_tick: None,
            failing_stores: BTreeSet::new(),
        };

        for warning in warnings {
            engine.events.push(EngineEvent::TemplateWarning {
                message: warning.to_string(),
            });
        }

        match previous {
            Some(state) if state.date == Some(today) => {
                engine.restore(state);
                engine.rebuild_plan(now);
            }
            Some(DayState { date: Some(date), .. }) if date > today => {
                warn!(%date, %today, "saved day is in the future, starting a fresh plan");
                engine.rebuild_plan(now);
            }
            Some(state) if state.date.is_some() => {
                let saved = state.date.unwrap_or(today);
                engine.date = saved;
                engine.restore(state);
                engine.roll_over_until(today, now);
            }
            _ => engine.rebuild_plan(now),
        }

        engine.consolidate(now);
        engine.persist();
        info!(date = %engine.date, instances = engine.instances.len(), "engine ready");
        engine
    }

    fn restore(&mut self, state: DayState) {
        self.instances = state.instances;
        self.adaptive.restore(state.adjustments);
        self.catch_up = CatchUpConsolidator::from_blocks(state.blocks);
        self.timer.restore(state.timer);
        self.redemptions = state.redemptions;
        self.last_tick = state.last_tick;
    }

    pub fn into_shared(self) -> SharedEngine {
        Arc::new(Mutex::new(self))
    }

    // ---- reads ----

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn timezone(&self) -> Tz {
        self.config.timezone
    }

    pub fn settings(&self) -> &Settings {
        &self.config.settings
    }

    pub fn plan(&self) -> &[TaskInstance] {
        &self.instances
    }

    pub fn instance(&self, id: &str) -> Option<&TaskInstance> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub fn active(&self) -> Option<ActiveView> {
        let id = self.timer.active_id()?;
        self.instance(id)
            .map(|instance| ActiveView::new(instance, self.timer.is_paused()))
    }

    pub fn catch_up_blocks(&self) -> Vec<CatchUpView> {
        self.catch_up
            .blocks()
            .iter()
            .map(|block| CatchUpView::new(block, &self.instances))
            .collect()
    }

    /// Newest first
    pub fn recent_adjustments(&self, n: usize) -> Vec<AdaptiveAdjustment> {
        self.adaptive.recent(n)
    }

    /// Backlog within the retention window, priority then oldest first
    pub fn backlog(&mut self, now: DateTime<Utc>) -> Vec<BacklogEntry> {
        let entries = self.backlog.list(local_date(self.config.timezone, now));
        self.persist();
        entries
    }

    pub fn backlog_stats(&mut self, now: DateTime<Utc>) -> BacklogStats {
        let stats = self.backlog.stats(local_date(self.config.timezone, now));
        self.persist();
        stats
    }

    pub fn streak_summary(&self) -> StreakSummary {
        self.streaks.summary()
    }

    pub fn streak_history(&self, n: usize) -> Vec<StreakRecord> {
        self.streaks.recent(n)
    }

    pub fn redemptions_today(&self) -> &[String] {
        &self.redemptions
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> EngineSnapshot {
        EngineSnapshot {
            date: self.date,
            timezone: self.config.timezone.name().to_string(),
            generated_at: now,
            active: self.active(),
            plan: self.instances.iter().map(PlanRowView::from).collect(),
            catch_up: self.catch_up_blocks(),
            adjustments: self.adaptive.history().to_vec(),
            streak: self.streak_summary(),
        }
    }

    /// Take every event queued since the last call
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    // ---- time ----

    /// Advance the schedule to `now`
    pub fn tick(&mut self, now: DateTime<Utc>) {
        self.sync_day(now);

        let crossed = self.scheduled_time_crossed(now);
        let outcomes = self.timer.tick(&mut self.instances, now);
        let transitioned = !outcomes.is_empty();
        for outcome in outcomes {
            self.handle_timer_outcome(outcome, now);
        }

        if crossed || transitioned {
            self.consolidate(now);
        }
        if transitioned {
            self.needs_save = true;
        }
        self.last_tick = Some(now);
        self.persist();
    }

    /// Roll over if the local date moved past the plan's date
    fn sync_day(&mut self, now: DateTime<Utc>) {
        let today = local_date(self.config.timezone, now);
        if today > self.date {
            self.roll_over_until(today, now);
            self.consolidate(now);
        } else if today < self.date {
            debug!(%today, plan_date = %self.date, "clock is behind the plan date");
        }
    }

    fn scheduled_time_crossed(&self, now: DateTime<Utc>) -> bool {
        match self.last_tick {
            None => true,
            Some(previous) => self.instances.iter().any(|i| {
                i.status == InstanceStatus::Pending && previous < i.scheduled_at && i.scheduled_at <= now
            }),
        }
    }

    fn handle_timer_outcome(&mut self, outcome: TimerOutcome, now: DateTime<Utc>) {
        match outcome {
            TimerOutcome::Activated { instance_id } => {
                if let Some(instance) = self.instance(&instance_id) {
                    info!(instance = %instance_id, "activated");
                    let event = EngineEvent::InstanceActivated {
                        title: instance.title.clone(),
                        notes: instance.notes.clone(),
                        alert: instance.alert,
                        remaining_secs: instance.remaining_secs,
                        instance_id,
                    };
                    self.events.push(event);
                }
            }
            TimerOutcome::TimeLow {
                instance_id,
                remaining_secs,
            } => {
                let title = self.title_of(&instance_id);
                self.events.push(EngineEvent::TimeLow {
                    instance_id,
                    title,
                    remaining_secs,
                });
            }
            TimerOutcome::Expired { instance_id } => {
                let Some(instance) = self.instance(&instance_id) else {
                    return;
                };
                let title = instance.title.clone();
                let lost = instance.nominal();
                info!(instance = %instance_id, "expired");
                self.events.push(EngineEvent::Expired {
                    instance_id,
                    title: title.clone(),
                });
                self.redistribute(lost, &format!("Missed task: {}", title), now);
            }
        }
    }

    fn title_of(&self, instance_id: &str) -> String {
        self.instance(instance_id)
            .map(|i| i.title.clone())
            .unwrap_or_default()
    }

    fn redistribute(&mut self, overrun: Duration, reason: &str, now: DateTime<Utc>) {
        let applied = self
            .adaptive
            .redistribute(&mut self.instances, overrun, reason, now);
        if !applied.is_empty() {
            self.needs_save = true;
        }
        self.events
            .extend(applied.into_iter().map(EngineEvent::TimeAdjusted));
    }

    fn consolidate(&mut self, now: DateTime<Utc>) {
        let changes = self.catch_up.consolidate(self.date, &self.instances, now);
        if changes.is_empty() {
            return;
        }
        self.needs_save = true;
        for change in changes {
            let event = match change {
                CatchUpChange::Updated(block) => EngineEvent::CatchUpUpdated {
                    block_id: block.id,
                    segment: block.segment,
                    instance_ids: block.instance_ids,
                },
                CatchUpChange::Dissolved { block_id, segment } => {
                    EngineEvent::CatchUpDissolved { block_id, segment }
                }
            };
            self.events.push(event);
        }
    }

    /// Build (or refresh) the plan for the current date
    fn rebuild_plan(&mut self, now: DateTime<Utc>) {
        let build = self
            .builder
            .build(&self.config.templates, self.date, &self.instances, now);
        for warning in build.warnings {
            warn!("{}", warning);
            self.events.push(EngineEvent::TemplateWarning {
                message: warning.to_string(),
            });
        }
        if !build.dropped.is_empty() {
            debug!(dropped = ?build.dropped, "pending instances dropped from plan");
        }
        self.instances = build.instances;
        self.needs_save = true;
    }

    // ---- rollover ----

    /// Close the current date and every date after it up to (not including) `today`
    fn roll_over_until(&mut self, today: NaiveDate, now: DateTime<Utc>) {
        if today <= self.date {
            return;
        }
        self.close_day(now);

        let mut next = self.date.succ_opt().unwrap_or(today);
        let earliest = today - Duration::days(MAX_ROLLOVER_DAYS);
        if next < earliest {
            warn!(from = %next, to = %earliest, "not replaying days beyond the rollover limit");
            next = earliest;
        }

        while next < today {
            self.start_day(next, now);
            self.close_day(now);
            next = match next.succ_opt() {
                Some(d) => d,
                None => break,
            };
        }

        self.start_day(today, now);
    }

    fn close_day(&mut self, now: DateTime<Utc>) {
        let date = self.date;

        // Anything still running at the end of its day counts as missed
        self.timer.clear();
        for instance in self
            .instances
            .iter_mut()
            .filter(|i| i.status == InstanceStatus::Active)
        {
            instance.transition(InstanceStatus::Expired, now);
        }

        let added = self.backlog.record_rollover(&self.instances, now);
        let backlog_added = added.len();
        self.events
            .extend(added.into_iter().map(EngineEvent::BacklogRecorded));

        let tally = DayTally::from_instances(&self.instances, self.redemptions.len() as u32);
        let (completion_ratio, current_streak) = match self.streaks.record_day(date, tally) {
            Some(update) => {
                self.events
                    .extend(update.new_badges.into_iter().map(EngineEvent::BadgeEarned));
                (update.record.completion_ratio, update.record.current_streak)
            }
            None => (
                tally.completion_ratio(),
                self.streaks.summary().current_streak,
            ),
        };

        info!(%date, completion_ratio, backlog_added, "day closed");
        self.events.push(EngineEvent::DayRolledOver {
            date,
            completion_ratio,
            current_streak,
            backlog_added,
        });
    }

    fn start_day(&mut self, date: NaiveDate, now: DateTime<Utc>) {
        self.date = date;
        self.instances.clear();
        self.timer.clear();
        self.adaptive.clear();
        self.redemptions.clear();
        self.last_tick = None;
        self.rebuild_plan(now);
    }

    // ---- actions ----

    pub fn complete(&mut self, instance_id: &str, now: DateTime<Utc>) -> EngineResult<()> {
        self.resolve(instance_id, InstanceStatus::Completed, "complete", now)
    }

    pub fn skip(&mut self, instance_id: &str, now: DateTime<Utc>) -> EngineResult<()> {
        self.resolve(instance_id, InstanceStatus::Skipped, "skip", now)
    }

    fn resolve(
        &mut self,
        instance_id: &str,
        to: InstanceStatus,
        action: &'static str,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        self.sync_day(now);
        let index = self
            .instances
            .iter()
            .position(|i| i.id == instance_id)
            .ok_or_else(|| EngineError::UnknownInstance(instance_id.to_string()))?;

        let from = self.instances[index].status;
        if !matches!(
            from,
            InstanceStatus::Pending | InstanceStatus::Active | InstanceStatus::Expired
        ) {
            return Err(EngineError::InvalidTransition {
                instance_id: instance_id.to_string(),
                from,
                action,
            });
        }

        let overrun = if from == InstanceStatus::Active {
            self.timer.settle(&mut self.instances, now);
            self.instances[index].overrun()
        } else {
            Duration::zero()
        };
        let instance = &mut self.instances[index];
        instance.transition(to, now);
        let title = instance.title.clone();
        self.timer.end_session(instance_id);
        info!(instance = %instance_id, status = %to, "resolved");

        self.events.push(resolution_event(to, instance_id, &title));
        if overrun > Duration::zero() {
            self.redistribute(overrun, &format!("Overran task: {}", title), now);
        }
        self.after_action(now);
        Ok(())
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        // Charge the time run so far before freezing
        self.tick(now);
        let instance_id = self.timer.pause(now)?;
        self.events.push(EngineEvent::TimerPaused { instance_id });
        self.after_action(now);
        Ok(())
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        let instance_id = self.timer.resume(now)?;
        self.events.push(EngineEvent::TimerResumed { instance_id });
        self.after_action(now);
        Ok(())
    }

    /// Complete every member of a catch-up block; returns how many were resolved
    pub fn complete_all(&mut self, block_id: &str, now: DateTime<Utc>) -> EngineResult<usize> {
        self.resolve_block(block_id, InstanceStatus::Completed, now)
    }

    pub fn skip_all(&mut self, block_id: &str, now: DateTime<Utc>) -> EngineResult<usize> {
        self.resolve_block(block_id, InstanceStatus::Skipped, now)
    }

    fn resolve_block(&mut self, block_id: &str, to: InstanceStatus, now: DateTime<Utc>) -> EngineResult<usize> {
        self.sync_day(now);
        let block = self
            .catch_up
            .block(block_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownBlock(block_id.to_string()))?;

        let mut resolved = 0;
        for id in &block.instance_ids {
            let Some(instance) = self
                .instances
                .iter_mut()
                .find(|i| &i.id == id && i.status.is_unresolved())
            else {
                continue;
            };
            instance.transition(to, now);
            let event = resolution_event(to, &instance.id, &instance.title);
            self.events.push(event);
            resolved += 1;
        }

        info!(block = %block_id, resolved, status = %to, "catch-up block resolved");
        self.after_action(now);
        Ok(resolved)
    }

    /// Redeem a backlog entry. Credit goes to the current day; repeating is a no-op.
    pub fn redeem(&mut self, entry_id: &str, now: DateTime<Utc>) -> EngineResult<BacklogEntry> {
        self.sync_day(now);
        let today = local_date(self.config.timezone, now);
        let redemption = self.backlog.redeem(entry_id, today, now)?;

        if redemption.newly_redeemed {
            self.redemptions.push(entry_id.to_string());
            if let Some(instance) = self.instances.iter_mut().find(|i| {
                i.id == entry_id && matches!(i.status, InstanceStatus::Skipped | InstanceStatus::Expired)
            }) {
                instance.transition(InstanceStatus::Redeemed, now);
            }
            self.events.push(EngineEvent::Redeemed {
                entry_id: entry_id.to_string(),
                title: redemption.entry.title.clone(),
            });
            self.after_action(now);
        }
        Ok(redemption.entry)
    }

    /// Record today's Skipped/Expired instances in the backlog now
    pub fn flush_backlog(&mut self, now: DateTime<Utc>) -> Vec<BacklogEntry> {
        self.sync_day(now);
        let added = self.backlog.flush(&self.instances, now);
        self.events
            .extend(added.iter().cloned().map(EngineEvent::BacklogRecorded));
        self.persist();
        added
    }

    pub fn remove_backlog_entry(&mut self, entry_id: &str, now: DateTime<Utc>) -> EngineResult<BacklogEntry> {
        let entry = self
            .backlog
            .remove(entry_id, local_date(self.config.timezone, now))?;
        info!(entry = %entry_id, "backlog entry removed");
        self.persist();
        Ok(entry)
    }

    /// Swap in a new configuration, keeping every instance's mutable state
    pub fn reload_configuration(&mut self, loaded: LoadedConfig, now: DateTime<Utc>) {
        let LoadedConfig { config, warnings } = loaded;
        let warning_count = warnings.len();
        for warning in warnings {
            self.events.push(EngineEvent::TemplateWarning {
                message: warning.to_string(),
            });
        }

        self.builder = plan_builder(&config);
        self.timer.set_time_low_secs(config.settings.time_low_alert_secs);
        self.adaptive.set_policy(config.settings.adaptive_policy());
        self.backlog
            .set_retention_days(config.settings.backlog_retention_days);
        self.streaks.set_policy(streak_policy(&config.settings));
        self.config = config;

        self.sync_day(now);
        self.rebuild_plan(now);
        self.consolidate(now);

        info!(templates = self.config.templates.len(), warnings = warning_count, "configuration reloaded");
        self.events.push(EngineEvent::ConfigReloaded {
            templates: self.config.templates.len(),
            warnings: warning_count,
            at: now,
        });
        self.persist();
    }

    /// A configuration that failed to load; the running one stays in force
    pub fn reject_configuration(&mut self, err: &ConfigError) {
        warn!(error = %err, "configuration not reloaded");
        self.events.push(EngineEvent::TemplateWarning {
            message: format!("configuration not reloaded: {err}"),
        });
    }

    fn after_action(&mut self, now: DateTime<Utc>) {
        self.consolidate(now);
        self.needs_save = true;
        self.persist();
    }

    // ---- persistence ----

    fn day_state(&self) -> DayState {
        DayState {
            date: Some(self.date),
            instances: self.instances.clone(),
            adjustments: self.adaptive.history().to_vec(),
            blocks: self.catch_up.blocks().to_vec(),
            timer: self.timer.session().cloned(),
            redemptions: self.redemptions.clone(),
            last_tick: self.last_tick,
        }
    }

    /// Write whatever changed. Failures keep the dirty flags so the next call retries.
    fn persist(&mut self) {
        let result = self.backlog.save();
        self.note_write("backlog", result);

        let result = self.streaks.save();
        self.note_write("streaks", result);

        if self.needs_save {
            let result = match &self.day_path {
                Some(path) => save_day_state(path, &self.day_state()),
                None => Ok(()),
            };
            if result.is_ok() {
                self.needs_save = false;
            }
            self.note_write("day", result);
        }
    }

    fn note_write(&mut self, store: &'static str, result: Result<(), PersistenceError>) {
        match result {
            Ok(()) => {
                if self.failing_stores.remove(store) {
                    info!(store, "write recovered");
                }
            }
            Err(err) => {
                warn!(store, error = %err, "failed to save state");
                if self.failing_stores.insert(store) {
                    self.events.push(EngineEvent::PersistenceFailed {
                        store: store.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
    }
}

/// Load one store. A parse failure moves the file aside and loads again from
/// scratch; None when even that fails, so the caller falls back to memory.
fn load_or_quarantine<T>(
    store: &'static str,
    path: &Path,
    load: impl Fn(&Path) -> Result<T, PersistenceError>,
    failures: &mut Vec<EngineEvent>,
) -> EngineResult<Option<T>> {
    let err = match load(path) {
        Ok(value) => return Ok(Some(value)),
        Err(err @ PersistenceError::Json { .. }) => err,
        Err(err) => return Err(err.into()),
    };

    warn!(store, error = %err, "unreadable state file");
    let message = match quarantine(path) {
        Ok(moved) => {
            info!(store, moved = %moved.display(), "unreadable state file set aside");
            format!("{err}; moved to {}", moved.display())
        }
        Err(move_err) => {
            warn!(store, error = %move_err, "could not set unreadable file aside");
            failures.push(EngineEvent::PersistenceFailed {
                store: store.to_string(),
                message: format!("{err}; {move_err}"),
            });
            return Ok(None);
        }
    };
    failures.push(EngineEvent::PersistenceFailed {
        store: store.to_string(),
        message,
    });
    Ok(load(path).ok())
}

fn resolution_event(status: InstanceStatus, instance_id: &str, title: &str) -> EngineEvent {
    match status {
        InstanceStatus::Skipped => EngineEvent::Skipped {
            instance_id: instance_id.to_string(),
            title: title.to_string(),
        },
        _ => EngineEvent::Completed {
            instance_id: instance_id.to_string(),
            title: title.to_string(),
        },
    }
}
