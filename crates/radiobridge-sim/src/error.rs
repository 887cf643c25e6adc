//! Error types for the simulator.

use std::path::PathBuf;

use radiobridge_core::{BridgeError, ConfigError};
use thiserror::Error;

/// Errors raised while loading or running a scenario.
#[derive(Error, Debug)]
pub enum SimError {
    /// File could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Scenario or profile YAML is malformed.
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Report could not be serialised.
    #[error("failed to encode report: {0}")]
    Json(#[from] serde_json::Error),

    /// Modem profile is inconsistent.
    #[error("invalid modem profile: {0}")]
    Profile(String),

    /// Bridge configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Bridge refused to start or stopped early.
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Modem worker thread could not be started.
    #[error("failed to start modem thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Result type for simulator operations.
pub type SimResult<T> = Result<T, SimError>;
