//! The periodic driver: one thread that ticks the shared engine and forwards
//! its events over a channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::ConfigWatcher;
use crate::engine::SharedEngine;
use crate::events::EngineEvent;

/// Default tick interval in milliseconds
pub const DEFAULT_TICK_MS: u64 = 1000;

/// Get tick duration, falling back to the default for a zero interval
pub fn tick_duration(tick_ms: u64) -> Duration {
    if tick_ms == 0 {
        Duration::from_millis(DEFAULT_TICK_MS)
    } else {
        Duration::from_millis(tick_ms)
    }
}

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Run one tick under the engine lock and return the events it produced
pub fn tick_once(engine: &SharedEngine, now: DateTime<Utc>) -> Vec<EngineEvent> {
    // A panic elsewhere must not stop the schedule; the state is still usable
    let mut guard = engine.lock().unwrap_or_else(PoisonError::into_inner);
    guard.tick(now);
    guard.drain_events()
}

/// Apply an edited configuration file; true when the engine was reloaded.
/// The file is read before the engine lock is taken.
pub fn reload_if_changed(engine: &SharedEngine, watcher: &mut ConfigWatcher, now: DateTime<Utc>) -> bool {
    let Some(result) = watcher.poll() else {
        return false;
    };
    let mut guard = engine.lock().unwrap_or_else(PoisonError::into_inner);
    match result {
        Ok(loaded) => {
            info!(path = %watcher.path().display(), "configuration file changed, reloading");
            guard.reload_configuration(loaded, now);
            true
        }
        Err(err) => {
            guard.reject_configuration(&err);
            false
        }
    }
}

/// Handle to the background driver thread
pub struct Driver {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Driver {
    /// Tick `engine` every `interval`, sending events to `events`. With a
    /// watcher, edits to the configuration file are applied before each tick.
    ///
    /// The thread ends when stopped or when the receiver goes away.
    pub fn spawn(
        engine: SharedEngine,
        clock: Arc<dyn Clock>,
        interval: Duration,
        events: Sender<EngineEvent>,
        mut watcher: Option<ConfigWatcher>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            debug!(?interval, watching = watcher.is_some(), "driver started");
            while !stop_flag.load(Ordering::Relaxed) {
                let now = clock.now();
                if let Some(watcher) = watcher.as_mut() {
                    reload_if_changed(&engine, watcher, now);
                }
                for event in tick_once(&engine, now) {
                    if events.send(event).is_err() {
                        debug!("event receiver dropped, driver exiting");
                        return;
                    }
                }
                thread::sleep(interval);
            }
            debug!("driver stopped");
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Signal the thread and wait for it to finish its current tick
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("driver thread panicked");
            }
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
