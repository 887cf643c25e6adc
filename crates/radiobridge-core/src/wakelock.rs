//! Wake lock accounting.
//!
//! Two system resources keep the host awake while the modem owes it
//! something:
//!
//! - the **primary** lock is reference counted: held while at least one
//!   request is pending, released when the last one completes. A ceiling
//!   timer, armed when the first reference is taken, force-releases it if
//!   the lock is still held when it fires.
//! - the **ack** lock is held briefly after each acknowledgement frame and
//!   released when the hold time after the most recent frame runs out.
//!
//! Timers are owned by the event loop; this module only hands out
//! [`LockTimer`] tickets and judges them when they fire. A ticket whose
//! generation is no longer current is stale and ignored.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use radiobridge_metrics::{metric_defs, MetricLabels};
use tracing::{debug, trace, warn};

/// A system resource that keeps the host from sleeping.
pub trait WakeLock: Send {
    /// Take the resource.
    fn acquire(&mut self);
    /// Give the resource back.
    fn release(&mut self);
}

impl<T: WakeLock + ?Sized> WakeLock for Box<T> {
    fn acquire(&mut self) {
        (**self).acquire()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Wake lock that does nothing, for hosts without power management.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWakeLock;

impl WakeLock for NoopWakeLock {
    fn acquire(&mut self) {}
    fn release(&mut self) {}
}

#[derive(Debug, Default)]
struct ProbeState {
    held: AtomicBool,
    acquisitions: AtomicU64,
    releases: AtomicU64,
}

/// Read side of a [`RecordingWakeLock`], shareable across threads.
#[derive(Debug, Clone, Default)]
pub struct WakeLockProbe {
    state: Arc<ProbeState>,
}

impl WakeLockProbe {
    /// Whether the resource is currently held.
    pub fn is_held(&self) -> bool {
        self.state.held.load(Ordering::SeqCst)
    }

    /// Times the resource was taken.
    pub fn acquisitions(&self) -> u64 {
        self.state.acquisitions.load(Ordering::SeqCst)
    }

    /// Times the resource was given back.
    pub fn releases(&self) -> u64 {
        self.state.releases.load(Ordering::SeqCst)
    }
}

/// Wake lock that records what was done to it.
///
/// Used by the simulator and tests to observe lock behaviour from outside
/// the event loop thread.
#[derive(Debug, Default)]
pub struct RecordingWakeLock {
    probe: WakeLockProbe,
}

impl RecordingWakeLock {
    /// Create a lock and its probe.
    pub fn new() -> (Self, WakeLockProbe) {
        let lock = RecordingWakeLock::default();
        let probe = lock.probe.clone();
        (lock, probe)
    }
}

impl WakeLock for RecordingWakeLock {
    fn acquire(&mut self) {
        self.probe.state.held.store(true, Ordering::SeqCst);
        self.probe.state.acquisitions.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&mut self) {
        self.probe.state.held.store(false, Ordering::SeqCst);
        self.probe.state.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// The resources a bridge manages.
pub struct WakeLocks {
    /// Held while requests are pending.
    pub primary: Box<dyn WakeLock>,
    /// Held briefly after acknowledgement frames.
    pub ack: Box<dyn WakeLock>,
}

impl WakeLocks {
    /// Wrap two resources.
    pub fn new(primary: impl WakeLock + 'static, ack: impl WakeLock + 'static) -> Self {
        WakeLocks {
            primary: Box::new(primary),
            ack: Box::new(ack),
        }
    }

    /// No-op resources.
    pub fn noop() -> Self {
        WakeLocks::new(NoopWakeLock, NoopWakeLock)
    }
}

impl Default for WakeLocks {
    fn default() -> Self {
        WakeLocks::noop()
    }
}

impl fmt::Debug for WakeLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeLocks").finish_non_exhaustive()
    }
}

/// Which lock a timer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockId {
    /// Reference-counted request lock.
    Primary,
    /// Short-lived acknowledgement lock.
    Ack,
}

impl LockId {
    /// Metric label.
    pub const fn as_label(&self) -> &'static str {
        match self {
            LockId::Primary => "primary",
            LockId::Ack => "ack",
        }
    }
}

/// Ceiling timer handed out on acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimer {
    /// Lock the timer belongs to.
    pub lock: LockId,
    /// Acquisition generation the timer was armed for.
    pub generation: u64,
    /// When the timer fires.
    pub deadline: Instant,
}

/// What happened when a lock timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockExpiry {
    /// A newer acquisition superseded the timer, or the lock was already free.
    Stale,
    /// The ack lock's hold time ran out.
    Released,
    /// The primary lock was force-released with references outstanding.
    TimedOut {
        /// References dropped by the forced release.
        outstanding: u32,
    },
}

struct TrackedLock {
    id: LockId,
    resource: Box<dyn WakeLock>,
    count: u32,
    generation: u64,
    held_since: Option<Instant>,
    ceiling: Duration,
}

impl TrackedLock {
    fn new(id: LockId, resource: Box<dyn WakeLock>, ceiling: Duration) -> Self {
        TrackedLock {
            id,
            resource,
            count: 0,
            generation: 0,
            held_since: None,
            ceiling,
        }
    }

    /// Add a reference. Returns `true` if this took the resource.
    fn take(&mut self, now: Instant, labels: &MetricLabels) -> bool {
        let first = self.count == 0;
        if first {
            self.resource.acquire();
            self.held_since = Some(now);
            metric_defs::WAKELOCK_ACQUIRED.increment(&self.metric_labels(labels), 1);
            trace!(lock = self.id.as_label(), "Wake lock acquired");
        }
        self.count += 1;
        first
    }

    /// Start a new ceiling, superseding any earlier timer.
    fn arm(&mut self, now: Instant) -> LockTimer {
        self.generation += 1;
        LockTimer {
            lock: self.id,
            generation: self.generation,
            deadline: now + self.ceiling,
        }
    }

    fn release(&mut self, now: Instant, labels: &MetricLabels) {
        if self.count == 0 {
            return;
        }
        self.count -= 1;
        if self.count == 0 {
            self.release_resource(now, labels);
        }
    }

    fn expire(&mut self, generation: u64, now: Instant, labels: &MetricLabels) -> Option<u32> {
        if generation != self.generation || self.count == 0 {
            return None;
        }
        let outstanding = self.count;
        self.release_resource(now, labels);
        Some(outstanding)
    }

    fn release_resource(&mut self, now: Instant, labels: &MetricLabels) {
        self.resource.release();
        self.count = 0;
        if let Some(since) = self.held_since.take() {
            let held = now.saturating_duration_since(since);
            metric_defs::WAKELOCK_HELD
                .record(&self.metric_labels(labels), held.as_secs_f64() * 1000.0);
            trace!(lock = self.id.as_label(), held_ms = held.as_millis() as u64, "Wake lock released");
        }
    }

    fn metric_labels(&self, labels: &MetricLabels) -> Vec<(&'static str, String)> {
        labels.with(&[("lock", self.id.as_label().to_string())])
    }
}

/// Holds the primary and ack wake locks on behalf of the event loop.
pub struct ResourceLockManager {
    primary: TrackedLock,
    ack: TrackedLock,
    labels: MetricLabels,
}

impl ResourceLockManager {
    /// Wrap the resources with their ceilings.
    pub fn new(
        locks: WakeLocks,
        primary_ceiling: Duration,
        ack_hold: Duration,
        labels: MetricLabels,
    ) -> Self {
        ResourceLockManager {
            primary: TrackedLock::new(LockId::Primary, locks.primary, primary_ceiling),
            ack: TrackedLock::new(LockId::Ack, locks.ack, ack_hold),
            labels,
        }
    }

    /// Add a primary reference for a newly pending request.
    ///
    /// Takes the resource on the first reference and returns the ceiling
    /// timer to schedule. Further references only bump the count and return
    /// `None`; the ceiling keeps running from the first acquisition.
    pub fn acquire(&mut self, now: Instant) -> Option<LockTimer> {
        if self.primary.take(now, &self.labels) {
            Some(self.primary.arm(now))
        } else {
            None
        }
    }

    /// Drop a primary reference. Releasing an unheld lock is a no-op.
    pub fn release(&mut self, now: Instant) {
        self.primary.release(now, &self.labels)
    }

    /// Take or extend the ack lock after an acknowledgement frame.
    ///
    /// Unlike the primary lock, every frame restarts the hold time.
    pub fn hold_for_ack(&mut self, now: Instant) -> LockTimer {
        self.ack.take(now, &self.labels);
        self.ack.arm(now)
    }

    /// Judge a fired timer.
    pub fn on_timer(&mut self, timer: LockTimer, now: Instant) -> LockExpiry {
        match timer.lock {
            LockId::Primary => match self.primary.expire(timer.generation, now, &self.labels) {
                Some(outstanding) => {
                    metric_defs::WAKELOCK_TIMEOUTS
                        .increment(&self.primary.metric_labels(&self.labels), 1);
                    warn!(
                        outstanding,
                        ceiling_ms = self.primary.ceiling.as_millis() as u64,
                        "Primary wake lock timed out with requests outstanding"
                    );
                    LockExpiry::TimedOut { outstanding }
                }
                None => LockExpiry::Stale,
            },
            LockId::Ack => match self.ack.expire(timer.generation, now, &self.labels) {
                Some(_) => LockExpiry::Released,
                None => LockExpiry::Stale,
            },
        }
    }

    /// Release both resources regardless of references.
    pub fn release_all(&mut self, now: Instant) {
        if self.primary.count > 0 {
            debug!(outstanding = self.primary.count, "Releasing primary wake lock");
            self.primary.release_resource(now, &self.labels);
        }
        if self.ack.count > 0 {
            self.ack.release_resource(now, &self.labels);
        }
    }

    /// Whether the primary resource is held.
    pub fn primary_held(&self) -> bool {
        self.primary.count > 0
    }

    /// Outstanding primary references.
    pub fn primary_count(&self) -> u32 {
        self.primary.count
    }

    /// Whether the ack resource is held.
    pub fn ack_held(&self) -> bool {
        self.ack.count > 0
    }

    /// How long the primary resource has been held.
    pub fn primary_held_for(&self, now: Instant) -> Option<Duration> {
        self.primary
            .held_since
            .map(|since| now.saturating_duration_since(since))
    }
}

impl fmt::Debug for ResourceLockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLockManager")
            .field("primary_count", &self.primary.count)
            .field("ack_count", &self.ack.count)
            .finish_non_exhaustive()
    }
}
