//! Per-kind HAL version negotiation.
//!
//! Each request kind starts at the highest version this build speaks (capped
//! by configuration). When the modem says a version is unsupported, the
//! kind's ceiling drops to the next rung below the failed version and stays
//! there: the modem's capabilities do not change while the bridge runs, so
//! the ceiling never rises again.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use radiobridge_protocol::{HalVersion, RequestKind, Serial};
use tracing::{debug, warn};

use crate::channel::{HardwareChannel, OutboundRequest};
use crate::error::ChannelError;
use crate::request::Attribution;

/// Why a dispatch did not reach the modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No version is left to try for this kind.
    NoUsableVersion,
    /// The channel refused the request synchronously.
    Channel(ChannelError),
}

/// Result of walking a kind one rung down its ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// Retry at this version.
    Retry(HalVersion),
    /// The ladder is exhausted; the kind is unsupported.
    Exhausted,
}

/// Tracks the version each kind is issued at and sends requests.
#[derive(Debug, Clone)]
pub struct CompatibilityDispatcher {
    cap: Option<HalVersion>,
    /// `None` once a kind has no usable version.
    versions: HashMap<RequestKind, Option<HalVersion>>,
}

impl CompatibilityDispatcher {
    /// Start every kind at its highest version at or below `cap`.
    pub fn new(cap: Option<HalVersion>) -> Self {
        let versions = RequestKind::ALL
            .iter()
            .map(|kind| (*kind, initial_version(*kind, cap)))
            .collect();
        Self { cap, versions }
    }

    /// Configured version cap.
    pub fn cap(&self) -> Option<HalVersion> {
        self.cap
    }

    /// Version the next request of `kind` will be issued at.
    /// `None` if the kind is known to be unsupported.
    pub fn version_for(&self, kind: RequestKind) -> Option<HalVersion> {
        match self.versions.get(&kind) {
            Some(version) => *version,
            None => initial_version(kind, self.cap),
        }
    }

    /// Issue `payload` as `kind` at the kind's current version.
    ///
    /// Returns the version used so the caller can record it against the
    /// pending request.
    pub fn dispatch<C: HardwareChannel + ?Sized>(
        &self,
        channel: &mut C,
        serial: Serial,
        kind: RequestKind,
        payload: &Bytes,
        attribution: &Attribution,
    ) -> Result<HalVersion, DispatchError> {
        let version = self
            .version_for(kind)
            .ok_or(DispatchError::NoUsableVersion)?;
        channel
            .send(OutboundRequest {
                serial,
                kind,
                version,
                payload,
                attribution,
            })
            .map_err(DispatchError::Channel)?;
        Ok(version)
    }

    /// Record that the modem rejected `kind` at `failed` as unsupported.
    ///
    /// Lowers the kind's ceiling to the next rung below `failed` (never
    /// raising it) and says whether a retry is possible. Once exhausted the
    /// kind stays unsupported.
    pub fn downgrade(&mut self, kind: RequestKind, failed: HalVersion) -> Fallback {
        let lower = kind.version_below(failed);
        let current = self.version_for(kind);
        let next = match (current, lower) {
            (Some(current), Some(lower)) => Some(current.min(lower)),
            _ => None,
        };
        self.versions.insert(kind, next);

        match next {
            Some(version) => {
                if Some(version) != current {
                    warn!(%kind, from = %failed, to = %version, "Modem rejected version, falling back");
                }
                Fallback::Retry(version)
            }
            None => {
                debug!(%kind, failed = %failed, "No lower version left, kind is unsupported");
                Fallback::Exhausted
            }
        }
    }

    /// Current version of every kind, for diagnostics.
    pub fn snapshot(&self) -> BTreeMap<RequestKind, Option<HalVersion>> {
        RequestKind::ALL
            .iter()
            .map(|kind| (*kind, self.version_for(*kind)))
            .collect()
    }
}

fn initial_version(kind: RequestKind, cap: Option<HalVersion>) -> Option<HalVersion> {
    let ladder = kind.ladder();
    match cap {
        Some(cap) => ladder.highest_at_or_below(cap),
        None => ladder.highest(),
    }
}
