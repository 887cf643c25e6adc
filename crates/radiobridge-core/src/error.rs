//! Error types for the bridge.

use std::path::PathBuf;

use radiobridge_protocol::{HalVersion, RadioError, RequestKind};
use thiserror::Error;

/// Terminal failure delivered to a request's completion callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// No version this build speaks is accepted by the modem for this kind.
    #[error("{kind} is not supported by the modem at any known version")]
    Unsupported {
        /// Kind of the failed request.
        kind: RequestKind,
    },

    /// The modem answered with a failure code other than "not supported".
    #[error("{kind} rejected by the modem: {code}")]
    HardwareRejected {
        /// Kind of the failed request.
        kind: RequestKind,
        /// Code the modem returned.
        code: RadioError,
    },

    /// No response arrived before the request aged out.
    #[error("{kind} timed out waiting for a response")]
    TimedOut {
        /// Kind of the failed request.
        kind: RequestKind,
    },

    /// The channel could not take the request, or went away while it was pending.
    #[error("{kind} could not be delivered: channel unavailable")]
    ChannelUnavailable {
        /// Kind of the failed request.
        kind: RequestKind,
    },
}

impl RequestError {
    /// Kind of the failed request.
    pub fn kind(&self) -> RequestKind {
        match self {
            RequestError::Unsupported { kind }
            | RequestError::HardwareRejected { kind, .. }
            | RequestError::TimedOut { kind }
            | RequestError::ChannelUnavailable { kind } => *kind,
        }
    }

    /// Outcome label used in metrics and reports.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            RequestError::Unsupported { .. } => "unsupported",
            RequestError::HardwareRejected { .. } => "rejected",
            RequestError::TimedOut { .. } => "timed_out",
            RequestError::ChannelUnavailable { .. } => "channel_unavailable",
        }
    }
}

/// Result delivered to completion callbacks.
pub type RequestResult<T> = Result<T, RequestError>;

/// Synchronous refusal from [`HardwareChannel::send`](crate::HardwareChannel::send).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The channel cannot accept anything right now.
    #[error("channel unavailable: {0}")]
    Unavailable(String),

    /// The channel has no entry point for the request at this version.
    #[error("request not supported at HAL {version}")]
    VersionUnsupported {
        /// Version that was refused.
        version: HalVersion,
    },
}

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The YAML did not parse into a configuration.
    #[error("invalid configuration YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors from the bridge handle.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The event loop has exited; nothing more can be queued.
    #[error("bridge event loop has stopped")]
    LoopStopped,

    /// Configuration was rejected at startup.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The event loop thread could not be started.
    #[error("failed to spawn event loop thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The event loop thread panicked.
    #[error("event loop thread panicked")]
    Panicked,
}
