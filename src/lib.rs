//! Day planner engine: recurring task templates expanded into a daily plan,
//! countdown timers, catch-up blocks for missed tasks, adaptive time
//! redistribution, and backlog and streak bookkeeping across days.

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod events;
pub mod notifications;
pub mod persistence;
pub mod report;
pub mod schedule;
pub mod ticker;

pub use config::{Config, LoadedConfig, Settings};
pub use engine::{Engine, SharedEngine};
pub use error::{ConfigError, EngineError, EngineResult, PersistenceError};
pub use events::EngineEvent;
