//! Request/response bridge between a telephony stack and a modem.
//!
//! Callers submit typed requests; the bridge tags each with a unique serial,
//! issues it to the modem at the highest HAL version the modem is known to
//! accept, keeps the host awake while answers are outstanding, and delivers
//! exactly one outcome per request. Unsupported versions are retried one
//! rung lower, unanswered requests age out, and repeated anomalies are
//! reported by the radio bug detector.
//!
//! # Example
//!
//! ```rust
//! use radiobridge_core::{
//!     spawn_bridge, Attribution, BridgeConfig, RecordingChannel, RequestError, WakeLocks,
//! };
//! use radiobridge_protocol::RequestKind;
//!
//! let (channel, recorder) = RecordingChannel::new();
//! let bridge = spawn_bridge(BridgeConfig::default(), WakeLocks::noop(), |_sink| channel).unwrap();
//!
//! let reply = bridge
//!     .call(RequestKind::GetSimStatus, Vec::<u8>::new(), Attribution::none())
//!     .unwrap();
//!
//! // Nothing answers the recording channel, so shutting down fails the request.
//! bridge.shutdown().unwrap();
//! assert_eq!(
//!     reply.wait(),
//!     Err(RequestError::ChannelUnavailable { kind: RequestKind::GetSimStatus })
//! );
//! assert!(recorder.requests().len() <= 1);
//! ```

pub mod bridge;
pub mod bug_detector;
pub mod channel;
pub mod compat;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod event_loop;
pub mod pending;
pub mod request;
pub mod serial;
pub mod wakelock;

pub use bridge::{BridgeCore, BridgeEvent};
pub use bug_detector::{BugDetectorSnapshot, BugStatus, RadioBugDetector};
pub use channel::{
    ChannelRecorder, HardwareChannel, OutboundRequest, RecordingChannel, ResponseSink, SentRequest,
};
pub use compat::{CompatibilityDispatcher, DispatchError, Fallback};
pub use config::{load_config, BridgeConfig, BugDetectorConfig};
pub use diagnostics::{Diagnostics, RequestTotals};
pub use error::{BridgeError, ChannelError, ConfigError, ConfigResult, RequestError, RequestResult};
pub use event_loop::{spawn_bridge, BridgeHandle};
pub use pending::PendingRequestTable;
pub use request::{
    Attribution, Callback, Completion, PendingReply, RequestHandle, RequestRecord, Submission,
};
pub use serial::SerialAllocator;
pub use wakelock::{
    LockExpiry, LockId, LockTimer, NoopWakeLock, RecordingWakeLock, ResourceLockManager, WakeLock,
    WakeLockProbe, WakeLocks,
};
