//! Error types for the scheduling engine.
//!
//! Nothing in the engine is fatal: these errors are returned to the caller of
//! a single action (or logged and turned into an event) while the schedule
//! keeps running.

use std::path::PathBuf;
use thiserror::Error;

use crate::domain::InstanceStatus;

/// Errors returned by engine actions.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unknown task instance: {0}")]
    UnknownInstance(String),

    #[error("unknown catch-up block: {0}")]
    UnknownBlock(String),

    #[error("unknown backlog entry: {0}")]
    UnknownBacklogEntry(String),

    /// The requested action is not allowed from the instance's current status
    #[error("cannot {action} instance {instance_id} while it is {from}")]
    InvalidTransition {
        instance_id: String,
        from: InstanceStatus,
        action: &'static str,
    },

    #[error("no instance is currently active")]
    NoActiveInstance,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A single task entry failed validation
    #[error("task {index} ({title}): {reason}")]
    InvalidTask {
        index: usize,
        title: String,
        reason: String,
    },

    #[error("invalid setting `{key}`: {reason}")]
    InvalidSetting { key: &'static str, reason: String },
}

/// Errors raised by the on-disk stores.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed state file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not determine a data directory")]
    NoDataDir,
}

pub type EngineResult<T> = Result<T, EngineError>;
