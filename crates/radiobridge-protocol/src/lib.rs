//! Radio command channel protocol vocabulary.
//!
//! This crate defines the types shared by the bridge core and anything that
//! talks to the modem on its behalf. Nothing here performs I/O.
//!
//! # Overview
//!
//! - **Requests** (host → modem): identified by a [`RequestKind`] and a
//!   correlation [`Serial`], carried at a specific [`HalVersion`].
//! - **Responses** (modem → host): a [`ResponseInfo`] keyed by serial with a
//!   [`RadioError`] code, optionally asking for an acknowledgement frame.
//! - **Indications** (modem → host): unsolicited [`Indication`]s.
//!
//! Payloads are opaque [`bytes::Bytes`]; the concrete byte layouts belong to
//! the codec layer that sits behind the channel.
//!
//! # Example
//!
//! ```rust
//! use radiobridge_protocol::{HalVersion, RequestKind};
//!
//! let kind = RequestKind::SetupDataCall;
//! assert_eq!(kind.max_version(), HalVersion::V1_6);
//! assert_eq!(kind.version_below(HalVersion::V1_5), Some(HalVersion::V1_4));
//! ```

mod constants;
mod error;
mod kind;
mod response;
mod version;

pub use constants::*;
pub use error::*;
pub use kind::*;
pub use response::*;
pub use version::*;

pub use bytes::Bytes;
