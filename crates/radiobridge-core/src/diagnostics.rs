//! Point-in-time view of a bridge, published after every event batch.

use std::collections::BTreeMap;

use bytes::Bytes;
use radiobridge_protocol::{HalVersion, RequestKind};
use serde::Serialize;

use crate::bug_detector::BugDetectorSnapshot;
use crate::error::{RequestError, RequestResult};

/// Running totals since the bridge started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestTotals {
    /// Requests handed to the channel, including fallback resubmissions.
    pub sent: u64,
    /// Requests completed successfully.
    pub completed_ok: u64,
    /// Requests the modem rejected.
    pub rejected: u64,
    /// Requests no version could serve.
    pub unsupported: u64,
    /// Requests that aged out.
    pub timed_out: u64,
    /// Requests failed because the channel was unavailable.
    pub channel_unavailable: u64,
    /// Version fallbacks performed.
    pub fallbacks: u64,
    /// Responses matching no pending request.
    pub stale_responses: u64,
    /// Acknowledgement frames sent.
    pub acks_sent: u64,
    /// Indications received.
    pub indications: u64,
    /// Primary wake lock timeouts.
    pub wake_lock_timeouts: u64,
}

impl RequestTotals {
    /// Count a terminal outcome.
    pub fn record_outcome(&mut self, result: &RequestResult<Bytes>) {
        match result {
            Ok(_) => self.completed_ok += 1,
            Err(RequestError::HardwareRejected { .. }) => self.rejected += 1,
            Err(RequestError::Unsupported { .. }) => self.unsupported += 1,
            Err(RequestError::TimedOut { .. }) => self.timed_out += 1,
            Err(RequestError::ChannelUnavailable { .. }) => self.channel_unavailable += 1,
        }
    }

    /// Requests that reached any terminal outcome.
    pub fn completed(&self) -> u64 {
        self.completed_ok + self.rejected + self.unsupported + self.timed_out + self.channel_unavailable
    }
}

/// Snapshot of one bridge instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// Instance name.
    pub instance: String,
    /// Requests awaiting a response.
    pub pending: usize,
    /// Age of the oldest pending attempt in milliseconds.
    pub oldest_pending_age_ms: Option<u64>,
    /// Whether the primary wake lock is held.
    pub primary_wake_lock_held: bool,
    /// Outstanding primary wake lock references.
    pub primary_wake_lock_refs: u32,
    /// How long the primary wake lock has been held, in milliseconds.
    pub primary_wake_lock_held_ms: Option<u64>,
    /// Whether the ack wake lock is held.
    pub ack_wake_lock_held: bool,
    /// Configured version cap.
    pub hal_version_cap: Option<HalVersion>,
    /// Version each kind is currently issued at (`None`: unsupported).
    pub versions: BTreeMap<RequestKind, Option<HalVersion>>,
    /// Bug detector state.
    pub bug_detector: BugDetectorSnapshot,
    /// Running totals.
    pub totals: RequestTotals,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_record_outcome() {
        let mut totals = RequestTotals::default();
        totals.record_outcome(&Ok(Bytes::new()));
        totals.record_outcome(&Err(RequestError::TimedOut {
            kind: RequestKind::SendSms,
        }));
        totals.record_outcome(&Err(RequestError::Unsupported {
            kind: RequestKind::SendSms,
        }));
        assert_eq!(totals.completed_ok, 1);
        assert_eq!(totals.timed_out, 1);
        assert_eq!(totals.unsupported, 1);
        assert_eq!(totals.completed(), 3);
    }

    #[test]
    fn test_serializes_kinds_as_labels() {
        let mut diagnostics = Diagnostics {
            instance: "radio0".to_string(),
            ..Default::default()
        };
        diagnostics
            .versions
            .insert(RequestKind::SendSms, Some(HalVersion::V1_6));
        diagnostics.versions.insert(RequestKind::GetSlicingConfig, None);

        let json = serde_json::to_value(&diagnostics).unwrap();
        assert_eq!(json["instance"], "radio0");
        assert_eq!(json["versions"]["send_sms"], "1.6");
        assert!(json["versions"]["get_slicing_config"].is_null());
        assert_eq!(json["bug_detector"]["status"], "normal");
    }
}
