//! Radio bug detection.
//!
//! Watches two signals that suggest the modem firmware is wedged:
//!
//! - consecutive primary wake lock timeouts (the modem stopped answering)
//! - consecutive designated system errors for the same request kind
//!
//! Crossing a threshold moves the status to a suspected state; crossing the
//! larger confirm threshold moves it to [`BugStatus::Confirmed`], which
//! sticks until [`RadioBugDetector::reset`] (on channel restart). Any
//! non-system-error response for a kind clears that kind's streak; only a
//! success clears the timeout streak.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::time::Instant;

use radiobridge_protocol::{RadioError, RequestKind};
use serde::Serialize;

use crate::config::BugDetectorConfig;

/// Detector verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BugStatus {
    /// Nothing unusual.
    #[default]
    Normal,
    /// Repeated wake lock timeouts.
    LockSuspected,
    /// Repeated system errors for one request kind.
    RepetitiveErrorSuspected,
    /// A suspicion persisted past its confirm threshold.
    Confirmed,
}

impl BugStatus {
    /// Metric and log label.
    pub const fn as_label(&self) -> &'static str {
        match self {
            BugStatus::Normal => "normal",
            BugStatus::LockSuspected => "lock_suspected",
            BugStatus::RepetitiveErrorSuspected => "repetitive_error_suspected",
            BugStatus::Confirmed => "confirmed",
        }
    }
}

impl fmt::Display for BugStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Point-in-time view of the detector's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BugDetectorSnapshot {
    /// Current status.
    pub status: BugStatus,
    /// Consecutive wake lock timeouts counted.
    pub lock_timeouts: u32,
    /// Consecutive designated errors per kind (non-zero only).
    pub system_errors: BTreeMap<RequestKind, u32>,
}

/// Counts anomalies and derives a [`BugStatus`].
#[derive(Debug, Clone)]
pub struct RadioBugDetector {
    config: BugDetectorConfig,
    lock_timeouts: VecDeque<Instant>,
    system_errors: HashMap<RequestKind, u32>,
    status: BugStatus,
}

impl RadioBugDetector {
    /// Create a detector with the given thresholds.
    pub fn new(config: BugDetectorConfig) -> Self {
        Self {
            config,
            lock_timeouts: VecDeque::new(),
            system_errors: HashMap::new(),
            status: BugStatus::Normal,
        }
    }

    /// Current status.
    pub fn status(&self) -> BugStatus {
        self.status
    }

    /// Count a primary wake lock timeout. Returns the new status if it changed.
    pub fn on_lock_timeout(&mut self, now: Instant) -> Option<BugStatus> {
        self.lock_timeouts.push_back(now);
        self.prune(now);
        self.recompute()
    }

    /// Count a response. Returns the new status if it changed.
    pub fn on_response(&mut self, kind: RequestKind, error: RadioError, now: Instant) -> Option<BugStatus> {
        if self.config.system_error_codes.contains(&error) {
            *self.system_errors.entry(kind).or_insert(0) += 1;
        } else {
            self.system_errors.remove(&kind);
            if error.is_success() {
                self.lock_timeouts.clear();
            }
        }
        self.prune(now);
        self.recompute()
    }

    /// Forget everything, e.g. after the modem restarted.
    /// Returns `Some(Normal)` if the status was anything else.
    pub fn reset(&mut self) -> Option<BugStatus> {
        self.lock_timeouts.clear();
        self.system_errors.clear();
        let previous = std::mem::take(&mut self.status);
        (previous != BugStatus::Normal).then_some(BugStatus::Normal)
    }

    /// Current counters.
    pub fn snapshot(&self) -> BugDetectorSnapshot {
        BugDetectorSnapshot {
            status: self.status,
            lock_timeouts: self.lock_timeout_count(),
            system_errors: self
                .system_errors
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(kind, count)| (*kind, *count))
                .collect(),
        }
    }

    fn lock_timeout_count(&self) -> u32 {
        self.lock_timeouts.len() as u32
    }

    fn max_system_errors(&self) -> u32 {
        self.system_errors.values().copied().max().unwrap_or(0)
    }

    fn prune(&mut self, now: Instant) {
        let Some(window) = self.config.lock_timeout_window() else {
            return;
        };
        while let Some(oldest) = self.lock_timeouts.front() {
            if now.saturating_duration_since(*oldest) > window {
                self.lock_timeouts.pop_front();
            } else {
                break;
            }
        }
    }

    fn recompute(&mut self) -> Option<BugStatus> {
        if self.status == BugStatus::Confirmed {
            return None;
        }

        let timeouts = self.lock_timeout_count();
        let errors = self.max_system_errors();
        let lock_suspected = timeouts >= self.config.lock_timeout_threshold;
        let errors_suspected = errors >= self.config.system_error_threshold;

        let next = if timeouts >= self.config.lock_timeout_confirm_threshold
            || errors >= self.config.system_error_confirm_threshold
        {
            BugStatus::Confirmed
        } else {
            // An existing suspicion keeps its label while its condition holds.
            match (self.status, lock_suspected, errors_suspected) {
                (BugStatus::LockSuspected, true, _) => BugStatus::LockSuspected,
                (_, _, true) => BugStatus::RepetitiveErrorSuspected,
                (_, true, _) => BugStatus::LockSuspected,
                _ => BugStatus::Normal,
            }
        };

        if next == self.status {
            None
        } else {
            self.status = next;
            Some(next)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn detector() -> RadioBugDetector {
        RadioBugDetector::new(BugDetectorConfig {
            lock_timeout_threshold: 3,
            lock_timeout_confirm_threshold: 5,
            lock_timeout_window_ms: None,
            system_error_threshold: 2,
            system_error_confirm_threshold: 4,
            system_error_codes: vec![RadioError::SystemErr],
        })
    }

    #[test]
    fn test_lock_timeouts_escalate() {
        let mut detector = detector();
        let now = Instant::now();
        assert_eq!(detector.on_lock_timeout(now), None);
        assert_eq!(detector.on_lock_timeout(now), None);
        assert_eq!(detector.on_lock_timeout(now), Some(BugStatus::LockSuspected));
        assert_eq!(detector.on_lock_timeout(now), None);
        assert_eq!(detector.on_lock_timeout(now), Some(BugStatus::Confirmed));
    }

    #[test]
    fn test_success_resets_lock_streak() {
        let mut detector = detector();
        let now = Instant::now();
        for _ in 0..3 {
            detector.on_lock_timeout(now);
        }
        assert_eq!(detector.status(), BugStatus::LockSuspected);
        assert_eq!(
            detector.on_response(RequestKind::GetSimStatus, RadioError::None, now),
            Some(BugStatus::Normal)
        );
        assert_eq!(detector.snapshot().lock_timeouts, 0);
    }

    #[test]
    fn test_rejection_keeps_lock_streak() {
        let mut detector = detector();
        let now = Instant::now();
        for _ in 0..3 {
            detector.on_lock_timeout(now);
        }
        assert_eq!(
            detector.on_response(RequestKind::SendSms, RadioError::InvalidArguments, now),
            None
        );
        assert_eq!(
            detector.on_response(RequestKind::SetupDataCall, RadioError::RequestNotSupported, now),
            None
        );
        assert_eq!(detector.status(), BugStatus::LockSuspected);
        assert_eq!(detector.snapshot().lock_timeouts, 3);
    }

    #[test]
    fn test_success_heals_repetitive_errors() {
        let mut detector = detector();
        let now = Instant::now();
        for _ in 0..3 {
            detector.on_response(RequestKind::GetBarringInfo, RadioError::SystemErr, now);
        }
        assert_eq!(detector.status(), BugStatus::RepetitiveErrorSuspected);

        assert_eq!(
            detector.on_response(RequestKind::GetBarringInfo, RadioError::None, now),
            Some(BugStatus::Normal)
        );
        assert!(detector.snapshot().system_errors.is_empty());
    }

    #[test]
    fn test_system_errors_counted_per_kind() {
        let mut detector = detector();
        let now = Instant::now();
        detector.on_response(RequestKind::SendSms, RadioError::SystemErr, now);
        detector.on_response(RequestKind::GetSimStatus, RadioError::SystemErr, now);
        assert_eq!(detector.status(), BugStatus::Normal);

        assert_eq!(
            detector.on_response(RequestKind::SendSms, RadioError::SystemErr, now),
            Some(BugStatus::RepetitiveErrorSuspected)
        );
        let snapshot = detector.snapshot();
        assert_eq!(snapshot.system_errors[&RequestKind::SendSms], 2);
        assert_eq!(snapshot.system_errors[&RequestKind::GetSimStatus], 1);
    }

    #[test]
    fn test_other_error_breaks_streak() {
        let mut detector = detector();
        let now = Instant::now();
        detector.on_response(RequestKind::SendSms, RadioError::SystemErr, now);
        detector.on_response(RequestKind::SendSms, RadioError::InvalidArguments, now);
        detector.on_response(RequestKind::SendSms, RadioError::SystemErr, now);
        assert_eq!(detector.status(), BugStatus::Normal);
    }

    #[test]
    fn test_confirmed_is_sticky_until_reset() {
        let mut detector = detector();
        let now = Instant::now();
        for _ in 0..4 {
            detector.on_response(RequestKind::SendSms, RadioError::SystemErr, now);
        }
        assert_eq!(detector.status(), BugStatus::Confirmed);

        assert_eq!(detector.on_response(RequestKind::SendSms, RadioError::None, now), None);
        assert_eq!(detector.status(), BugStatus::Confirmed);

        assert_eq!(detector.reset(), Some(BugStatus::Normal));
        assert_eq!(detector.reset(), None);
        assert_eq!(detector.snapshot(), BugDetectorSnapshot::default());
    }

    #[test]
    fn test_window_drops_old_timeouts() {
        let mut detector = RadioBugDetector::new(BugDetectorConfig {
            lock_timeout_threshold: 2,
            lock_timeout_confirm_threshold: 3,
            lock_timeout_window_ms: Some(1_000),
            ..Default::default()
        });
        let start = Instant::now();
        detector.on_lock_timeout(start);
        assert_eq!(detector.on_lock_timeout(start + Duration::from_secs(5)), None);
        assert_eq!(detector.snapshot().lock_timeouts, 1);
        assert_eq!(
            detector.on_lock_timeout(start + Duration::from_millis(5_500)),
            Some(BugStatus::LockSuspected)
        );
    }

    #[test]
    fn test_existing_suspicion_keeps_label() {
        let mut detector = detector();
        let now = Instant::now();
        for _ in 0..3 {
            detector.on_lock_timeout(now);
        }
        assert_eq!(detector.status(), BugStatus::LockSuspected);
        detector.on_response(RequestKind::SendSms, RadioError::SystemErr, now);
        assert_eq!(
            detector.on_response(RequestKind::SendSms, RadioError::SystemErr, now),
            None
        );
        assert_eq!(detector.status(), BugStatus::LockSuspected);
    }
}
