//! The bridge state machine.
//!
//! [`BridgeCore`] owns every piece of mutable bridge state: the pending
//! table, the wake locks, the version table and the bug detector. It is
//! driven one batch of [`BridgeEvent`]s at a time by the event loop thread
//! (see [`crate::event_loop`]), so none of that state is shared or locked.
//!
//! Every handler takes the current time explicitly. Tests and benchmarks
//! drive the core directly with synthetic instants.
//!
//! Within a batch, work is applied in a fixed order:
//!
//! 1. timers that are due (wake lock ceilings, then request age-out)
//! 2. inbound channel traffic (responses, request acks, indications,
//!    channel loss) in arrival order
//! 3. new submissions in arrival order
//! 4. control (subscriptions, channel restart, shutdown)

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::Sender;
use radiobridge_metrics::{metric_defs, MetricLabels};
use radiobridge_protocol::{HalVersion, Indication, RequestKind, ResponseInfo, Serial};
use tracing::{debug, error, info, trace, warn};

use crate::bug_detector::{BugStatus, RadioBugDetector};
use crate::channel::HardwareChannel;
use crate::compat::{CompatibilityDispatcher, DispatchError, Fallback};
use crate::config::BridgeConfig;
use crate::diagnostics::{Diagnostics, RequestTotals};
use crate::error::{ChannelError, RequestError, RequestResult};
use crate::pending::PendingRequestTable;
use crate::request::{RequestRecord, Submission};
use crate::serial::SerialAllocator;
use crate::wakelock::{LockExpiry, LockId, LockTimer, ResourceLockManager, WakeLocks};

// ============================================================================
// Events
// ============================================================================

/// Everything the event loop can be asked to do.
#[derive(Debug)]
pub enum BridgeEvent {
    /// A caller submitted a request.
    Submit(Submission),
    /// The modem answered a request.
    Response {
        /// Response header.
        info: ResponseInfo,
        /// Opaque response body.
        payload: Bytes,
    },
    /// The modem acknowledged receipt of a request.
    RequestAck {
        /// Serial acknowledged.
        serial: Serial,
    },
    /// The modem sent an unsolicited indication.
    Indication(Indication),
    /// The transport died.
    ChannelLost,
    /// The transport came back after a modem restart.
    ChannelRestarted,
    /// Register a listener for indications.
    SubscribeIndications(Sender<Indication>),
    /// Register a listener for bug status changes.
    SubscribeBugStatus(Sender<BugStatus>),
    /// Fail everything outstanding and stop.
    Shutdown,
}

// ============================================================================
// Bridge Core
// ============================================================================

/// Serialized bridge state. See the module docs for batch ordering.
pub struct BridgeCore<C> {
    labels: MetricLabels,
    max_age: Duration,
    serials: Arc<SerialAllocator>,
    pending: PendingRequestTable,
    locks: ResourceLockManager,
    compat: CompatibilityDispatcher,
    detector: RadioBugDetector,
    channel: C,
    /// Live timer per lock. The primary one is set when the lock goes from
    /// free to held; each ack frame replaces the ack one.
    primary_timer: Option<LockTimer>,
    ack_timer: Option<LockTimer>,
    indication_subscribers: Vec<Sender<Indication>>,
    bug_subscribers: Vec<Sender<BugStatus>>,
    totals: RequestTotals,
    running: bool,
}

impl<C: HardwareChannel> BridgeCore<C> {
    /// Build a core from configuration.
    pub fn new(config: &BridgeConfig, serials: Arc<SerialAllocator>, locks: WakeLocks, channel: C) -> Self {
        let labels = MetricLabels::new(config.name.clone());
        BridgeCore {
            max_age: config.request_max_age(),
            serials,
            pending: PendingRequestTable::new(),
            locks: ResourceLockManager::new(
                locks,
                config.wake_lock_timeout(),
                config.ack_wake_lock_timeout(),
                labels.clone(),
            ),
            compat: CompatibilityDispatcher::new(config.hal_version_cap),
            detector: RadioBugDetector::new(config.bug_detector.clone()),
            channel,
            primary_timer: None,
            ack_timer: None,
            indication_subscribers: Vec::new(),
            bug_subscribers: Vec::new(),
            totals: RequestTotals::default(),
            running: true,
            labels,
        }
    }

    /// Shared serial allocator.
    pub fn serials(&self) -> &Arc<SerialAllocator> {
        &self.serials
    }

    /// Outstanding requests.
    pub fn pending(&self) -> &PendingRequestTable {
        &self.pending
    }

    /// Wake lock state.
    pub fn locks(&self) -> &ResourceLockManager {
        &self.locks
    }

    /// Version table.
    pub fn compat(&self) -> &CompatibilityDispatcher {
        &self.compat
    }

    /// Current bug detector verdict.
    pub fn bug_status(&self) -> BugStatus {
        self.detector.status()
    }

    /// The bug detector.
    pub fn bug_detector(&self) -> &RadioBugDetector {
        &self.detector
    }

    /// Running totals.
    pub fn totals(&self) -> &RequestTotals {
        &self.totals
    }

    /// The hardware channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Whether shutdown has been processed.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Earliest instant at which [`fire_due_timers`](Self::fire_due_timers)
    /// has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let age_out = self.pending.oldest_submission().map(|oldest| oldest + self.max_age);
        [
            self.primary_timer.map(|timer| timer.deadline),
            self.ack_timer.map(|timer| timer.deadline),
            age_out,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Process one batch of events. Returns `false` once shut down.
    pub fn handle_batch(&mut self, events: Vec<BridgeEvent>, now: Instant) -> bool {
        self.fire_due_timers(now);

        let mut submissions = Vec::new();
        let mut control = Vec::new();
        for event in events {
            match event {
                BridgeEvent::Response { info, payload } => self.on_response(info, payload, now),
                BridgeEvent::RequestAck { serial } => self.on_request_ack(serial),
                BridgeEvent::Indication(indication) => self.on_indication(indication, now),
                BridgeEvent::ChannelLost => self.on_channel_lost(now),
                BridgeEvent::Submit(submission) => submissions.push(submission),
                other => control.push(other),
            }
        }

        for submission in submissions {
            self.submit(submission, now);
        }

        for event in control {
            match event {
                BridgeEvent::SubscribeIndications(tx) => self.indication_subscribers.push(tx),
                BridgeEvent::SubscribeBugStatus(tx) => self.bug_subscribers.push(tx),
                BridgeEvent::ChannelRestarted => self.on_channel_restarted(),
                BridgeEvent::Shutdown => self.shutdown(now),
                // Handled in the inbound and submission passes above
                _ => {}
            }
        }

        metric_defs::PENDING_REQUESTS.set(&self.labels.to_labels(), self.pending.len() as f64);
        self.running
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Fire every timer due at `now`: lock ceilings first, then age-out.
    pub fn fire_due_timers(&mut self, now: Instant) {
        if let Some(timer) = self.primary_timer.filter(|timer| timer.deadline <= now) {
            self.primary_timer = None;
            self.on_lock_timer(timer, now);
        }
        if let Some(timer) = self.ack_timer.filter(|timer| timer.deadline <= now) {
            self.ack_timer = None;
            self.on_lock_timer(timer, now);
        }
        self.age_out(now);
    }

    fn release_wake_lock(&mut self, now: Instant) {
        self.locks.release(now);
        if !self.locks.primary_held() {
            self.primary_timer = None;
        }
    }

    fn schedule(&mut self, timer: LockTimer) {
        match timer.lock {
            LockId::Primary => self.primary_timer = Some(timer),
            LockId::Ack => self.ack_timer = Some(timer),
        }
    }

    fn on_lock_timer(&mut self, timer: LockTimer, now: Instant) {
        match self.locks.on_timer(timer, now) {
            LockExpiry::TimedOut { outstanding } => {
                let detached = self.pending.detach_wake_locks();
                debug_assert_eq!(detached as u32, outstanding);
                self.totals.wake_lock_timeouts += 1;
                let change = self.detector.on_lock_timeout(now);
                self.publish_bug_status(change);
            }
            LockExpiry::Released => trace!("Ack wake lock hold expired"),
            LockExpiry::Stale => {}
        }
    }

    fn age_out(&mut self, now: Instant) {
        for record in self.pending.age_out(now, self.max_age) {
            warn!(
                serial = %record.serial,
                kind = %record.kind,
                version = %record.version,
                age_ms = record.age(now).as_millis() as u64,
                acknowledged = record.acknowledged,
                "Request timed out"
            );
            let kind = record.kind;
            self.finish(record, Err(RequestError::TimedOut { kind }), now);
        }
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Issue a new request at its kind's current version.
    pub fn submit(&mut self, submission: Submission, now: Instant) {
        let kind = submission.kind;
        let Some(version) = self.compat.version_for(kind) else {
            debug!(serial = %submission.serial, %kind, "No usable version, failing immediately");
            let result = Err(RequestError::Unsupported { kind });
            self.record_outcome(kind, &result, Duration::ZERO);
            submission.completion.complete(result);
            return;
        };
        let record = RequestRecord::from_submission(submission, version, now);
        self.issue(record, now);
    }

    /// Track `record`, take a wake lock reference and hand it to the channel.
    fn issue(&mut self, mut record: RequestRecord, now: Instant) {
        let serial = record.serial;
        let kind = record.kind;
        let attempt = record.attempt;

        if let Some(timer) = self.locks.acquire(now) {
            self.schedule(timer);
        }
        record.holds_wake_lock = true;
        self.pending.insert(record);

        let dispatched = match self.pending.get(serial) {
            Some(record) => self.compat.dispatch(
                &mut self.channel,
                serial,
                kind,
                &record.payload,
                &record.attribution,
            ),
            None => return,
        };

        match dispatched {
            Ok(version) => {
                self.totals.sent += 1;
                metric_defs::REQUESTS_SUBMITTED.increment(
                    &self
                        .labels
                        .with_kind(kind.as_label())
                        .with(&[("version", version.to_string())]),
                    1,
                );
                trace!(%serial, %kind, %version, attempt, "Request sent");
            }
            Err(DispatchError::Channel(ChannelError::VersionUnsupported { version })) => {
                debug!(%serial, %kind, %version, "Channel refused version");
                if let Some(record) = self.pending.remove(serial) {
                    self.fall_back(record, version, now);
                }
            }
            Err(DispatchError::Channel(ChannelError::Unavailable(reason))) => {
                warn!(%serial, %kind, %reason, "Channel unavailable, failing request");
                if let Some(record) = self.pending.remove(serial) {
                    self.finish(record, Err(RequestError::ChannelUnavailable { kind }), now);
                }
            }
            Err(DispatchError::NoUsableVersion) => {
                if let Some(record) = self.pending.remove(serial) {
                    self.finish(record, Err(RequestError::Unsupported { kind }), now);
                }
            }
        }
    }

    /// Retry `record` one rung below `failed`, or fail it as unsupported.
    fn fall_back(&mut self, record: RequestRecord, failed: HalVersion, now: Instant) {
        let kind = record.kind;
        match self.compat.downgrade(kind, failed) {
            Fallback::Retry(version) => {
                let serial = self.serials.next();
                self.totals.fallbacks += 1;
                metric_defs::VERSION_FALLBACKS.increment(
                    &self.labels.with_kind(kind.as_label()).with(&[
                        ("from", failed.to_string()),
                        ("to", version.to_string()),
                    ]),
                    1,
                );
                debug!(old = %record.serial, new = %serial, %kind, %version, "Resubmitting at lower version");

                // The retry takes its own reference before the old one is
                // dropped so the lock does not flap.
                let held = record.holds_wake_lock;
                self.issue(record.reissue(serial, version, now), now);
                if held {
                    self.release_wake_lock(now);
                }
            }
            Fallback::Exhausted => {
                self.finish(record, Err(RequestError::Unsupported { kind }), now);
            }
        }
    }

    // ========================================================================
    // Inbound traffic
    // ========================================================================

    /// Match a response to its pending request and deliver the outcome.
    pub fn on_response(&mut self, info: ResponseInfo, payload: Bytes, now: Instant) {
        let Some(record) = self.pending.remove(info.serial) else {
            self.totals.stale_responses += 1;
            metric_defs::STALE_RESPONSES.increment(&self.labels.to_labels(), 1);
            warn!(serial = %info.serial, kind = %info.kind, error = %info.error, "Response for unknown serial, ignoring");
            return;
        };

        if info.response_type.ack_expected() {
            self.send_ack(now);
        }
        if record.kind != info.kind {
            warn!(
                serial = %info.serial,
                expected = %record.kind,
                actual = %info.kind,
                "Response kind does not match request"
            );
        }

        let kind = record.kind;
        let change = self.detector.on_response(kind, info.error, now);
        self.publish_bug_status(change);

        if info.error.is_not_supported() {
            let failed = record.version;
            self.fall_back(record, failed, now);
        } else if info.error.is_success() {
            self.finish(record, Ok(payload), now);
        } else {
            self.finish(
                record,
                Err(RequestError::HardwareRejected {
                    kind,
                    code: info.error,
                }),
                now,
            );
        }
    }

    /// Note that the modem received a request.
    pub fn on_request_ack(&mut self, serial: Serial) {
        match self.pending.get_mut(serial) {
            Some(record) => {
                record.acknowledged = true;
                trace!(%serial, kind = %record.kind, "Request acknowledged by modem");
            }
            None => debug!(%serial, "Ack for unknown serial, ignoring"),
        }
    }

    /// Forward an indication to subscribers, acknowledging it if asked.
    pub fn on_indication(&mut self, indication: Indication, now: Instant) {
        self.totals.indications += 1;
        metric_defs::INDICATIONS_RECEIVED.increment(&self.labels.to_labels(), 1);
        trace!(code = indication.code, len = indication.payload.len(), "Indication received");

        if indication.indication_type.ack_expected() {
            self.send_ack(now);
        }
        self.indication_subscribers
            .retain(|tx| tx.send(indication.clone()).is_ok());
    }

    fn send_ack(&mut self, now: Instant) {
        match self.channel.send_ack() {
            Ok(()) => {
                self.totals.acks_sent += 1;
                metric_defs::ACKS_SENT.increment(&self.labels.to_labels(), 1);
                let timer = self.locks.hold_for_ack(now);
                self.schedule(timer);
            }
            Err(e) => warn!(error = %e, "Failed to send ack"),
        }
    }

    /// Fail everything outstanding; the transport is gone.
    pub fn on_channel_lost(&mut self, now: Instant) {
        let records = self.pending.drain();
        warn!(pending = records.len(), "Channel lost");
        for record in records {
            let kind = record.kind;
            self.finish(record, Err(RequestError::ChannelUnavailable { kind }), now);
        }
    }

    /// The modem restarted; anomalies seen before no longer apply.
    pub fn on_channel_restarted(&mut self) {
        info!("Channel restarted, resetting bug detector");
        let change = self.detector.reset();
        self.publish_bug_status(change);
    }

    /// Fail everything outstanding, release both locks and stop.
    pub fn shutdown(&mut self, now: Instant) {
        if !self.running {
            return;
        }
        let records = self.pending.drain();
        info!(pending = records.len(), "Shutting down bridge");
        for record in records {
            let kind = record.kind;
            self.finish(record, Err(RequestError::ChannelUnavailable { kind }), now);
        }
        self.locks.release_all(now);
        self.primary_timer = None;
        self.ack_timer = None;
        self.indication_subscribers.clear();
        self.bug_subscribers.clear();
        self.running = false;
    }

    // ========================================================================
    // Completion
    // ========================================================================

    fn finish(&mut self, record: RequestRecord, result: RequestResult<Bytes>, now: Instant) {
        if record.holds_wake_lock {
            self.release_wake_lock(now);
        }
        self.record_outcome(record.kind, &result, record.latency(now));
        match &result {
            Ok(payload) => trace!(serial = %record.serial, kind = %record.kind, len = payload.len(), "Request completed"),
            Err(e) => debug!(serial = %record.serial, error = %e, "Request failed"),
        }
        record.complete(result);
    }

    fn record_outcome(&mut self, kind: RequestKind, result: &RequestResult<Bytes>, latency: Duration) {
        self.totals.record_outcome(result);
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.outcome_label(),
        };
        let kind_labels = self.labels.with_kind(kind.as_label());
        metric_defs::REQUESTS_COMPLETED
            .increment(&kind_labels.with(&[("outcome", outcome.to_string())]), 1);
        metric_defs::REQUEST_LATENCY.record(&kind_labels.to_labels(), latency.as_secs_f64() * 1000.0);
    }

    fn publish_bug_status(&mut self, change: Option<BugStatus>) {
        let Some(status) = change else {
            return;
        };
        metric_defs::BUG_STATUS_CHANGES
            .increment(&self.labels.with(&[("status", status.as_label().to_string())]), 1);
        let snapshot = self.detector.snapshot();
        match status {
            BugStatus::Confirmed => error!(
                lock_timeouts = snapshot.lock_timeouts,
                "Radio bug confirmed"
            ),
            BugStatus::Normal => info!("Radio bug status back to normal"),
            suspected => warn!(
                status = %suspected,
                lock_timeouts = snapshot.lock_timeouts,
                "Radio bug suspected"
            ),
        }
        self.bug_subscribers.retain(|tx| tx.send(status).is_ok());
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Snapshot current state.
    pub fn diagnostics(&self, now: Instant) -> Diagnostics {
        Diagnostics {
            instance: self.labels.instance.clone(),
            pending: self.pending.len(),
            oldest_pending_age_ms: self
                .pending
                .oldest_submission()
                .map(|oldest| now.saturating_duration_since(oldest).as_millis() as u64),
            primary_wake_lock_held: self.locks.primary_held(),
            primary_wake_lock_refs: self.locks.primary_count(),
            primary_wake_lock_held_ms: self
                .locks
                .primary_held_for(now)
                .map(|held| held.as_millis() as u64),
            ack_wake_lock_held: self.locks.ack_held(),
            hal_version_cap: self.compat.cap(),
            versions: self.compat.snapshot(),
            bug_detector: self.detector.snapshot(),
            totals: self.totals.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelRecorder, RecordingChannel};
    use crate::config::BugDetectorConfig;
    use crate::request::Completion;
    use crate::wakelock::{RecordingWakeLock, WakeLockProbe};
    use radiobridge_protocol::{IndicationType, RadioError};
    use std::collections::HashSet;

    type Outcomes = crossbeam_channel::Receiver<(Serial, RequestResult<Bytes>)>;

    struct Harness {
        core: BridgeCore<RecordingChannel>,
        channel: ChannelRecorder,
        primary: WakeLockProbe,
        ack: WakeLockProbe,
        outcomes_tx: crossbeam_channel::Sender<(Serial, RequestResult<Bytes>)>,
        outcomes: Outcomes,
        start: Instant,
    }

    impl Harness {
        fn new(config: BridgeConfig) -> Self {
            let (channel, recorder) = RecordingChannel::new();
            let (primary, primary_probe) = RecordingWakeLock::new();
            let (ack, ack_probe) = RecordingWakeLock::new();
            let serials = Arc::new(SerialAllocator::new(config.serial_seed.unwrap_or(1)));
            let core = BridgeCore::new(&config, serials, WakeLocks::new(primary, ack), channel);
            let (outcomes_tx, outcomes) = crossbeam_channel::unbounded();
            Harness {
                core,
                channel: recorder,
                primary: primary_probe,
                ack: ack_probe,
                outcomes_tx,
                outcomes,
                start: Instant::now(),
            }
        }

        fn at(&self, ms: u64) -> Instant {
            self.start + Duration::from_millis(ms)
        }

        fn submit(&mut self, kind: RequestKind, ms: u64) -> Serial {
            let serial = self.core.serials().next();
            let tx = self.outcomes_tx.clone();
            let submission = Submission {
                serial,
                kind,
                payload: Bytes::from_static(b"req"),
                attribution: Default::default(),
                submitted_at: self.at(ms),
                completion: Completion::new(kind, move |result| {
                    let _ = tx.send((serial, result));
                }),
            };
            let now = self.at(ms);
            self.core.handle_batch(vec![BridgeEvent::Submit(submission)], now);
            serial
        }

        fn respond(&mut self, serial: Serial, kind: RequestKind, error: RadioError, ms: u64) {
            let info = ResponseInfo::new(serial, kind, error);
            self.respond_with(info, ms);
        }

        fn respond_with(&mut self, info: ResponseInfo, ms: u64) {
            let now = self.at(ms);
            self.core.handle_batch(
                vec![BridgeEvent::Response {
                    info,
                    payload: Bytes::from_static(b"resp"),
                }],
                now,
            );
        }

        fn tick(&mut self, ms: u64) {
            let now = self.at(ms);
            self.core.handle_batch(Vec::new(), now);
        }

        fn outcomes(&self) -> Vec<(Serial, RequestResult<Bytes>)> {
            self.outcomes.try_iter().collect()
        }
    }

    fn config() -> BridgeConfig {
        BridgeConfig::default()
            .with_serial_seed(100)
            .with_wake_lock_timeout(Duration::from_millis(60))
            .with_ack_wake_lock_timeout(Duration::from_millis(5))
            .with_request_max_age(Duration::from_millis(90))
    }

    // ========================================================================
    // Basic flow
    // ========================================================================

    #[test]
    fn test_submit_and_complete() {
        let mut h = Harness::new(config());
        let serial = h.submit(RequestKind::GetSimStatus, 0);

        let sent = h.channel.last_request().unwrap();
        assert_eq!(sent.serial, serial);
        assert_eq!(sent.version, HalVersion::V1_6);
        assert!(h.primary.is_held());
        assert_eq!(h.core.pending().len(), 1);

        h.respond(serial, RequestKind::GetSimStatus, RadioError::None, 10);
        assert_eq!(h.outcomes(), vec![(serial, Ok(Bytes::from_static(b"resp")))]);
        assert!(!h.primary.is_held());
        assert!(h.core.pending().is_empty());
    }

    #[test]
    fn test_hardware_rejection() {
        let mut h = Harness::new(config());
        let serial = h.submit(RequestKind::SendSms, 0);
        h.respond(serial, RequestKind::SendSms, RadioError::InvalidArguments, 1);
        assert_eq!(
            h.outcomes(),
            vec![(
                serial,
                Err(RequestError::HardwareRejected {
                    kind: RequestKind::SendSms,
                    code: RadioError::InvalidArguments
                })
            )]
        );
    }

    #[test]
    fn test_stale_and_duplicate_responses_ignored() {
        let mut h = Harness::new(config());
        let serial = h.submit(RequestKind::GetSimStatus, 0);
        h.respond(serial, RequestKind::GetSimStatus, RadioError::None, 1);
        h.respond(serial, RequestKind::GetSimStatus, RadioError::None, 2);
        h.respond(Serial(9999), RequestKind::GetSimStatus, RadioError::None, 3);

        assert_eq!(h.outcomes().len(), 1);
        assert_eq!(h.core.totals().stale_responses, 2);
        assert!(!h.primary.is_held());
    }

    #[test]
    fn test_serials_unique_and_lock_tracks_pending() {
        let mut h = Harness::new(config());
        let serials: Vec<Serial> = (0..20).map(|i| h.submit(RequestKind::GetSignalStrength, i)).collect();
        let unique: HashSet<_> = serials.iter().collect();
        assert_eq!(unique.len(), serials.len());
        assert!(serials.iter().all(|s| !s.is_none()));

        for (i, serial) in serials.iter().enumerate() {
            assert!(h.primary.is_held());
            h.respond(*serial, RequestKind::GetSignalStrength, RadioError::None, 20 + i as u64);
        }
        assert!(!h.primary.is_held());
        assert_eq!(h.primary.acquisitions(), 1);
        assert_eq!(h.outcomes().len(), 20);
    }

    // ========================================================================
    // Version fallback
    // ========================================================================

    #[test]
    fn test_fallback_resubmits_once_at_lower_version() {
        let mut h = Harness::new(config());
        let first = h.submit(RequestKind::SetupDataCall, 0);
        assert_eq!(h.channel.last_request().unwrap().version, HalVersion::V1_6);

        h.respond(first, RequestKind::SetupDataCall, RadioError::RequestNotSupported, 5);
        assert!(h.outcomes().is_empty());

        let retry = h.channel.last_request().unwrap();
        assert_ne!(retry.serial, first);
        assert_eq!(retry.version, HalVersion::V1_5);
        assert_eq!(retry.payload, Bytes::from_static(b"req"));
        assert!(h.primary.is_held());
        assert_eq!(h.primary.acquisitions(), 1);

        h.respond(retry.serial, RequestKind::SetupDataCall, RadioError::None, 8);
        assert_eq!(h.outcomes(), vec![(first, Ok(Bytes::from_static(b"resp")))]);

        // Later requests start at the lowered version
        h.submit(RequestKind::SetupDataCall, 10);
        assert_eq!(h.channel.last_request().unwrap().version, HalVersion::V1_5);
        assert_eq!(h.core.totals().fallbacks, 1);
    }

    #[test]
    fn test_fallback_exhaustion_reports_unsupported() {
        let mut h = Harness::new(config());
        let serial = h.submit(RequestKind::GetDeviceIdentity, 0);
        h.respond(serial, RequestKind::GetDeviceIdentity, RadioError::RequestNotSupported, 1);

        assert_eq!(
            h.outcomes(),
            vec![(
                serial,
                Err(RequestError::Unsupported {
                    kind: RequestKind::GetDeviceIdentity
                })
            )]
        );
        assert_eq!(h.channel.requests().len(), 1);
        assert!(!h.primary.is_held());

        // The kind stays unsupported without touching the channel
        let next = h.submit(RequestKind::GetDeviceIdentity, 2);
        assert_eq!(h.channel.requests().len(), 1);
        let outcomes = h.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, next);
        assert!(matches!(outcomes[0].1, Err(RequestError::Unsupported { .. })));
    }

    #[test]
    fn test_synchronous_version_refusal_falls_back() {
        let mut h = Harness::new(config());
        h.channel.refuse_version(RequestKind::SetRadioPower, HalVersion::V1_6);
        h.submit(RequestKind::SetRadioPower, 0);

        let requests = h.channel.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].version, HalVersion::V1_5);
        assert_eq!(h.core.pending().len(), 1);
        assert_eq!(h.core.locks().primary_count(), 1);
    }

    #[test]
    fn test_concurrent_unsupported_never_raises_version() {
        let mut h = Harness::new(config());
        let a = h.submit(RequestKind::GetCellInfoList, 0);
        let b = h.submit(RequestKind::GetCellInfoList, 0);

        h.respond(a, RequestKind::GetCellInfoList, RadioError::RequestNotSupported, 1);
        let retry_a = h.channel.last_request().unwrap();
        assert_eq!(retry_a.version, HalVersion::V1_5);
        h.respond(retry_a.serial, RequestKind::GetCellInfoList, RadioError::RequestNotSupported, 2);
        assert_eq!(h.core.compat().version_for(RequestKind::GetCellInfoList), Some(HalVersion::V1_4));

        // b was issued at 1.6; its rejection must not lift the ceiling
        h.respond(b, RequestKind::GetCellInfoList, RadioError::RequestNotSupported, 3);
        assert_eq!(h.channel.last_request().unwrap().version, HalVersion::V1_4);
        assert_eq!(h.core.compat().version_for(RequestKind::GetCellInfoList), Some(HalVersion::V1_4));
    }

    #[test]
    fn test_version_cap() {
        let mut h = Harness::new(config().with_hal_version_cap(HalVersion::V1_4));
        h.submit(RequestKind::GetSimStatus, 0);
        assert_eq!(h.channel.last_request().unwrap().version, HalVersion::V1_4);

        let slicing = h.submit(RequestKind::GetSlicingConfig, 1);
        assert_eq!(h.channel.requests().len(), 1);
        assert_eq!(
            h.outcomes(),
            vec![(
                slicing,
                Err(RequestError::Unsupported {
                    kind: RequestKind::GetSlicingConfig
                })
            )]
        );
    }

    // ========================================================================
    // Timers
    // ========================================================================

    #[test]
    fn test_lock_ceiling_then_age_out() {
        let mut h = Harness::new(config());
        for i in 0..10 {
            h.submit(RequestKind::GetSignalStrength, i % 2);
        }
        // The ceiling runs from the first acquisition
        assert_eq!(h.core.next_deadline(), Some(h.at(60)));

        h.tick(60);
        assert!(!h.primary.is_held());
        assert_eq!(h.core.totals().wake_lock_timeouts, 1);
        assert_eq!(h.core.bug_detector().snapshot().lock_timeouts, 1);
        assert_eq!(h.core.pending().len(), 10);
        assert!(h.outcomes().is_empty());

        h.tick(92);
        let outcomes = h.outcomes();
        assert_eq!(outcomes.len(), 10);
        assert!(outcomes
            .iter()
            .all(|(_, r)| matches!(r, Err(RequestError::TimedOut { .. }))));
        assert!(h.core.pending().is_empty());
        assert_eq!(h.primary.releases(), 1);
    }

    #[test]
    fn test_response_after_forced_release_does_not_double_release() {
        let mut h = Harness::new(config());
        let serial = h.submit(RequestKind::GetSimStatus, 0);
        h.tick(60);
        assert!(!h.primary.is_held());

        // A new request takes the lock again
        let other = h.submit(RequestKind::GetSimStatus, 70);
        assert!(h.primary.is_held());

        // The old request completes late; the new reference survives
        h.respond(serial, RequestKind::GetSimStatus, RadioError::None, 75);
        assert!(h.primary.is_held());
        assert_eq!(h.core.locks().primary_count(), 1);

        h.respond(other, RequestKind::GetSimStatus, RadioError::None, 76);
        assert!(!h.primary.is_held());
    }

    #[test]
    fn test_ceiling_fires_under_steady_unanswered_traffic() {
        let mut h = Harness::new(config());
        for ms in (0..=1000).step_by(40) {
            h.submit(RequestKind::GetSignalStrength, ms);
        }
        h.tick(1100);

        // Each hold is cut at 60 ms; new polls take the lock again
        let timeouts = h.core.totals().wake_lock_timeouts;
        assert!(timeouts >= 10, "only {} lock timeouts", timeouts);
        assert_eq!(h.core.bug_detector().snapshot().lock_timeouts as u64, timeouts);
        assert_eq!(h.core.bug_status(), BugStatus::LockSuspected);
        assert_eq!(h.primary.acquisitions(), timeouts);
        assert!(!h.primary.is_held());
        assert!(h.core.pending().is_empty());
        assert_eq!(h.core.totals().timed_out, 26);
    }

    #[test]
    fn test_second_request_does_not_extend_ceiling() {
        let mut h = Harness::new(config());
        h.submit(RequestKind::GetSignalStrength, 0);
        h.submit(RequestKind::GetSignalStrength, 50);
        assert_eq!(h.core.next_deadline(), Some(h.at(60)));

        h.tick(60);
        assert!(!h.primary.is_held());
        assert_eq!(h.core.totals().wake_lock_timeouts, 1);
        assert_eq!(h.core.pending().len(), 2);
    }

    #[test]
    fn test_age_out_uses_resubmission_time() {
        let mut h = Harness::new(config());
        let first = h.submit(RequestKind::SendSms, 0);
        h.respond(first, RequestKind::SendSms, RadioError::RequestNotSupported, 50);
        h.tick(91);
        assert!(h.outcomes().is_empty());
        assert_eq!(h.core.pending().len(), 1);
        h.tick(140);
        assert!(h.outcomes().is_empty());
        h.tick(141);
        assert_eq!(
            h.outcomes(),
            vec![(first, Err(RequestError::TimedOut { kind: RequestKind::SendSms }))]
        );
    }

    // ========================================================================
    // Bug detection
    // ========================================================================

    #[test]
    fn test_repetitive_system_errors() {
        let mut h = Harness::new(config().with_bug_detector(BugDetectorConfig {
            system_error_threshold: 10,
            system_error_confirm_threshold: 20,
            ..Default::default()
        }));
        let (tx, statuses) = crossbeam_channel::unbounded();
        h.core.handle_batch(vec![BridgeEvent::SubscribeBugStatus(tx)], h.at(0));

        for i in 0..10 {
            let serial = h.submit(RequestKind::GetModemActivityInfo, i);
            h.respond(serial, RequestKind::GetModemActivityInfo, RadioError::SystemErr, i);
        }
        assert_eq!(h.core.bug_status(), BugStatus::RepetitiveErrorSuspected);
        assert_eq!(statuses.try_iter().collect::<Vec<_>>(), vec![BugStatus::RepetitiveErrorSuspected]);
        assert_eq!(h.core.totals().rejected, 10);

        h.core.handle_batch(vec![BridgeEvent::ChannelRestarted], h.at(20));
        assert_eq!(h.core.bug_status(), BugStatus::Normal);
        assert_eq!(statuses.try_iter().collect::<Vec<_>>(), vec![BugStatus::Normal]);
    }

    #[test]
    fn test_success_heals_repetitive_errors() {
        let mut h = Harness::new(config().with_bug_detector(BugDetectorConfig {
            system_error_threshold: 10,
            system_error_confirm_threshold: 20,
            ..Default::default()
        }));
        let (tx, statuses) = crossbeam_channel::unbounded();
        h.core.handle_batch(vec![BridgeEvent::SubscribeBugStatus(tx)], h.at(0));

        for i in 0..10 {
            let serial = h.submit(RequestKind::GetModemActivityInfo, i);
            h.respond(serial, RequestKind::GetModemActivityInfo, RadioError::SystemErr, i);
        }
        assert_eq!(h.core.bug_status(), BugStatus::RepetitiveErrorSuspected);

        let serial = h.submit(RequestKind::GetModemActivityInfo, 11);
        h.respond(serial, RequestKind::GetModemActivityInfo, RadioError::None, 12);
        assert_eq!(h.core.bug_status(), BugStatus::Normal);
        assert!(h.core.bug_detector().snapshot().system_errors.is_empty());
        assert_eq!(
            statuses.try_iter().collect::<Vec<_>>(),
            vec![BugStatus::RepetitiveErrorSuspected, BugStatus::Normal]
        );
    }

    #[test]
    fn test_success_clears_lock_streak() {
        let mut h = Harness::new(config().with_bug_detector(BugDetectorConfig {
            lock_timeout_threshold: 3,
            lock_timeout_confirm_threshold: 6,
            ..Default::default()
        }));
        for round in 0..3u64 {
            let base = round * 100;
            h.submit(RequestKind::GetSimStatus, base);
            h.tick(base + 60);
            h.tick(base + 91);
        }
        assert_eq!(h.core.bug_status(), BugStatus::LockSuspected);

        let serial = h.submit(RequestKind::GetSimStatus, 400);
        h.respond(serial, RequestKind::GetSimStatus, RadioError::None, 401);
        assert_eq!(h.core.bug_status(), BugStatus::Normal);
    }

    // ========================================================================
    // Acks, indications and channel state
    // ========================================================================

    #[test]
    fn test_ack_expected_response_holds_ack_lock() {
        let mut h = Harness::new(config());
        let serial = h.submit(RequestKind::GetSimStatus, 0);
        h.respond_with(
            ResponseInfo::new(serial, RequestKind::GetSimStatus, RadioError::None).with_ack_expected(),
            1,
        );
        assert_eq!(h.channel.acks(), 1);
        assert!(h.ack.is_held());
        assert_eq!(h.core.next_deadline(), Some(h.at(6)));

        h.tick(6);
        assert!(!h.ack.is_held());
    }

    #[test]
    fn test_request_ack_marks_record() {
        let mut h = Harness::new(config());
        let serial = h.submit(RequestKind::SendSms, 0);
        h.core
            .handle_batch(vec![BridgeEvent::RequestAck { serial }, BridgeEvent::RequestAck { serial: Serial(1) }], h.at(1));
        assert!(h.core.pending().get(serial).unwrap().acknowledged);
    }

    #[test]
    fn test_indications_forwarded_and_acked() {
        let mut h = Harness::new(config());
        let (tx, rx) = crossbeam_channel::unbounded();
        let indication = Indication {
            code: 1000,
            payload: Bytes::from_static(b"ind"),
            indication_type: IndicationType::UnsolicitedAckExpected,
        };
        h.core.handle_batch(
            vec![
                BridgeEvent::SubscribeIndications(tx),
                BridgeEvent::Indication(indication.clone()),
            ],
            h.at(0),
        );
        // Subscriptions are control events, applied after inbound traffic
        assert!(rx.try_recv().is_err());
        assert_eq!(h.channel.acks(), 1);

        h.core
            .handle_batch(vec![BridgeEvent::Indication(indication.clone())], h.at(1));
        assert_eq!(rx.try_recv().unwrap(), indication);
    }

    #[test]
    fn test_channel_unavailable_on_send() {
        let mut h = Harness::new(config());
        h.channel.set_unavailable(Some("hal died"));
        let serial = h.submit(RequestKind::GetSimStatus, 0);
        assert_eq!(
            h.outcomes(),
            vec![(serial, Err(RequestError::ChannelUnavailable { kind: RequestKind::GetSimStatus }))]
        );
        assert!(!h.primary.is_held());
        assert!(h.core.pending().is_empty());
    }

    #[test]
    fn test_channel_lost_fails_pending() {
        let mut h = Harness::new(config());
        h.submit(RequestKind::GetSimStatus, 0);
        h.submit(RequestKind::SendSms, 0);
        h.core.handle_batch(vec![BridgeEvent::ChannelLost], h.at(1));
        let outcomes = h.outcomes();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|(_, r)| matches!(r, Err(RequestError::ChannelUnavailable { .. }))));
        assert!(!h.primary.is_held());
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut h = Harness::new(config());
        let serial = h.submit(RequestKind::GetSimStatus, 0);
        h.respond_with(
            ResponseInfo::new(serial, RequestKind::GetSimStatus, RadioError::None).with_ack_expected(),
            1,
        );
        h.submit(RequestKind::SendSms, 1);
        assert!(h.ack.is_held());

        assert!(!h.core.handle_batch(vec![BridgeEvent::Shutdown], h.at(2)));
        assert!(!h.core.is_running());
        assert!(!h.primary.is_held());
        assert!(!h.ack.is_held());
        let outcomes = h.outcomes();
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(
            outcomes[1].1,
            Err(RequestError::ChannelUnavailable { kind: RequestKind::SendSms })
        ));
        assert!(h.core.next_deadline().is_none());
    }

    #[test]
    fn test_batch_order_response_before_submission() {
        let mut h = Harness::new(config());
        let serial = h.submit(RequestKind::GetSimStatus, 0);

        let next = h.core.serials().next();
        let tx = h.outcomes_tx.clone();
        let submission = Submission {
            serial: next,
            kind: RequestKind::GetSimStatus,
            payload: Bytes::new(),
            attribution: Default::default(),
            submitted_at: h.at(1),
            completion: Completion::new(RequestKind::GetSimStatus, move |r| {
                let _ = tx.send((next, r));
            }),
        };
        // Submission queued first, response second: the response is still
        // matched before the new request is issued.
        h.core.handle_batch(
            vec![
                BridgeEvent::Submit(submission),
                BridgeEvent::Response {
                    info: ResponseInfo::new(serial, RequestKind::GetSimStatus, RadioError::None),
                    payload: Bytes::new(),
                },
            ],
            h.at(1),
        );
        assert_eq!(h.outcomes().len(), 1);
        assert_eq!(h.core.pending().len(), 1);
        assert!(h.core.pending().contains(next));
        assert!(h.primary.is_held());
    }

    #[test]
    fn test_diagnostics_snapshot() {
        let mut h = Harness::new(config().with_name("radio7"));
        h.submit(RequestKind::GetSimStatus, 0);
        let diagnostics = h.core.diagnostics(h.at(10));
        assert_eq!(diagnostics.instance, "radio7");
        assert_eq!(diagnostics.pending, 1);
        assert_eq!(diagnostics.oldest_pending_age_ms, Some(10));
        assert!(diagnostics.primary_wake_lock_held);
        assert_eq!(diagnostics.primary_wake_lock_held_ms, Some(10));
        assert_eq!(diagnostics.hal_version_cap, None);
        assert_eq!(diagnostics.versions[&RequestKind::SendSms], Some(HalVersion::V1_6));
        assert_eq!(diagnostics.totals.sent, 1);
    }
}
