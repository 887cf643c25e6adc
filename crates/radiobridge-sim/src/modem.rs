//! A simulated modem behind the hardware channel.
//!
//! [`SimulatedModem`] is the outbound half handed to the bridge. Requests are
//! forwarded to a worker thread that schedules each answer after a sampled
//! latency and pushes it back through the bridge's [`ResponseSink`].
//! [`ModemControl`] stays with the test driver and can inject indications,
//! crash the modem or bring it back.

use std::collections::{BTreeMap, BinaryHeap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use radiobridge_core::{ChannelError, HardwareChannel, OutboundRequest, ResponseSink};
use radiobridge_protocol::{HalVersion, Indication, IndicationType, RequestKind, ResponseInfo, Serial};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::{SimError, SimResult};
use crate::profile::{ModemProfile, Reaction};

// ============================================================================
// Worker Commands
// ============================================================================

/// Messages from the channel and the control handle to the worker.
#[derive(Debug)]
enum ModemCommand {
    Request {
        serial: Serial,
        kind: RequestKind,
        version: HalVersion,
        payload: Bytes,
    },
    Indicate(Indication),
    /// Forget every queued answer.
    Crash,
    Stop,
}

/// An answer waiting for its latency to elapse.
struct ScheduledReply {
    due: Instant,
    info: ResponseInfo,
    payload: Bytes,
}

impl PartialEq for ScheduledReply {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due
    }
}

impl Eq for ScheduledReply {}

impl PartialOrd for ScheduledReply {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledReply {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap (earliest due first)
        other.due.cmp(&self.due)
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
struct StatsInner {
    requests: AtomicU64,
    refused_versions: AtomicU64,
    ignored: AtomicU64,
    responses: AtomicU64,
    request_acks: AtomicU64,
    acks_received: AtomicU64,
    indications: AtomicU64,
    dropped_by_crash: AtomicU64,
    per_kind: Mutex<BTreeMap<RequestKind, u64>>,
}

/// Counters describing what the modem saw.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModemStats {
    /// Requests received.
    pub requests: u64,
    /// Requests answered with `RequestNotSupported` because of their version.
    pub refused_versions: u64,
    /// Requests swallowed without an answer.
    pub ignored: u64,
    /// Responses delivered to the bridge.
    pub responses: u64,
    /// Request-ack frames sent.
    pub request_acks: u64,
    /// Ack frames received from the bridge.
    pub acks_received: u64,
    /// Indications delivered.
    pub indications: u64,
    /// Queued answers lost to a crash.
    pub dropped_by_crash: u64,
    /// Requests received per kind.
    pub per_kind: BTreeMap<RequestKind, u64>,
}

impl StatsInner {
    fn snapshot(&self) -> ModemStats {
        ModemStats {
            requests: self.requests.load(Ordering::Relaxed),
            refused_versions: self.refused_versions.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            request_acks: self.request_acks.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            indications: self.indications.load(Ordering::Relaxed),
            dropped_by_crash: self.dropped_by_crash.load(Ordering::Relaxed),
            per_kind: self.per_kind.lock().clone(),
        }
    }
}

/// State shared by the channel half, the control handle and the worker.
#[derive(Debug, Default)]
struct Shared {
    down: AtomicBool,
    running: AtomicBool,
    stats: StatsInner,
}

// ============================================================================
// Channel Half
// ============================================================================

/// Outbound half of the simulated modem, owned by the bridge.
///
/// Requests sent before the worker starts are buffered.
pub struct SimulatedModem {
    name: String,
    tx: Sender<ModemCommand>,
    shared: Arc<Shared>,
}

impl SimulatedModem {
    /// Create the channel half and the backend that will answer it.
    ///
    /// Hand the modem to the bridge, then start the backend with the
    /// bridge's sink.
    pub fn new(name: impl Into<String>) -> (SimulatedModem, ModemBackend) {
        let name = name.into();
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared::default());
        let backend = ModemBackend {
            name: name.clone(),
            tx: tx.clone(),
            rx,
            shared: Arc::clone(&shared),
        };
        (SimulatedModem { name, tx, shared }, backend)
    }

    /// Modem name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl HardwareChannel for SimulatedModem {
    fn send(&mut self, request: OutboundRequest<'_>) -> Result<(), ChannelError> {
        if self.shared.down.load(Ordering::Acquire) {
            return Err(ChannelError::Unavailable(format!("modem {} is down", self.name)));
        }
        self.tx
            .send(ModemCommand::Request {
                serial: request.serial,
                kind: request.kind,
                version: request.version,
                payload: request.payload.clone(),
            })
            .map_err(|_| ChannelError::Unavailable(format!("modem {} stopped", self.name)))
    }

    fn send_ack(&mut self) -> Result<(), ChannelError> {
        if self.shared.down.load(Ordering::Acquire) {
            return Err(ChannelError::Unavailable(format!("modem {} is down", self.name)));
        }
        self.shared.stats.acks_received.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for SimulatedModem {
    fn drop(&mut self) {
        let _ = self.tx.send(ModemCommand::Stop);
        // Don't wait for the worker in drop - it exits on its own
    }
}

// ============================================================================
// Backend
// ============================================================================

/// Answering side of a simulated modem, not yet running.
pub struct ModemBackend {
    name: String,
    tx: Sender<ModemCommand>,
    rx: Receiver<ModemCommand>,
    shared: Arc<Shared>,
}

impl ModemBackend {
    /// Start the worker thread.
    ///
    /// Answers go to `sink`; `seed` drives latency and ack sampling.
    pub fn start(self, profile: ModemProfile, seed: u64, sink: ResponseSink) -> SimResult<ModemControl> {
        profile.validate()?;
        let worker = ModemWorker {
            profile,
            sink,
            rng: ChaCha8Rng::seed_from_u64(seed),
            queue: BinaryHeap::new(),
            shared: Arc::clone(&self.shared),
        };

        self.shared.running.store(true, Ordering::Release);
        let rx = self.rx;
        let spawned = thread::Builder::new()
            .name(format!("modem-{}", self.name))
            .spawn(move || modem_thread_main(worker, rx));
        if let Err(e) = spawned {
            self.shared.running.store(false, Ordering::Release);
            return Err(SimError::Spawn(e));
        }

        debug!(modem = %self.name, seed, "Simulated modem started");
        Ok(ModemControl {
            tx: self.tx,
            shared: self.shared,
        })
    }
}

// ============================================================================
// Control Half
// ============================================================================

/// Driver-side handle for poking a running simulated modem.
#[derive(Clone)]
pub struct ModemControl {
    tx: Sender<ModemCommand>,
    shared: Arc<Shared>,
}

impl ModemControl {
    /// Push an indication to the bridge.
    pub fn indicate(&self, code: u32, payload: impl Into<Bytes>, ack_expected: bool) {
        let indication_type = if ack_expected {
            IndicationType::UnsolicitedAckExpected
        } else {
            IndicationType::Unsolicited
        };
        let _ = self.tx.send(ModemCommand::Indicate(Indication {
            code,
            payload: payload.into(),
            indication_type,
        }));
    }

    /// Simulate a modem crash: queued answers are lost and sends fail until
    /// [`ModemControl::restart`].
    pub fn crash(&self) {
        self.shared.down.store(true, Ordering::Release);
        let _ = self.tx.send(ModemCommand::Crash);
    }

    /// Bring a crashed modem back.
    pub fn restart(&self) {
        self.shared.down.store(false, Ordering::Release);
    }

    /// Whether the worker thread is still running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Whether the modem is currently crashed.
    pub fn is_down(&self) -> bool {
        self.shared.down.load(Ordering::Acquire)
    }

    /// Current counters.
    pub fn stats(&self) -> ModemStats {
        self.shared.stats.snapshot()
    }
}

impl std::fmt::Debug for ModemControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModemControl")
            .field("running", &self.is_running())
            .field("down", &self.is_down())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Worker Thread
// ============================================================================

struct ModemWorker {
    profile: ModemProfile,
    sink: ResponseSink,
    rng: ChaCha8Rng,
    queue: BinaryHeap<ScheduledReply>,
    shared: Arc<Shared>,
}

impl ModemWorker {
    fn on_request(&mut self, serial: Serial, kind: RequestKind, version: HalVersion, payload: Bytes) -> bool {
        let stats = &self.shared.stats;
        stats.requests.fetch_add(1, Ordering::Relaxed);
        *stats.per_kind.lock().entry(kind).or_insert(0) += 1;
        trace!(%serial, %kind, %version, payload = %hex::encode(&payload), "Modem received request");

        if self.profile.request_acks {
            if self.sink.acknowledge_request(serial).is_err() {
                return false;
            }
            stats.request_acks.fetch_add(1, Ordering::Relaxed);
        }

        let error = match self.profile.react(kind, version) {
            Reaction::Ignore => {
                stats.ignored.fetch_add(1, Ordering::Relaxed);
                trace!(%serial, %kind, "Modem ignoring request");
                return true;
            }
            Reaction::Respond(error) => error,
        };
        if error.is_not_supported() {
            stats.refused_versions.fetch_add(1, Ordering::Relaxed);
        }

        let mut info = ResponseInfo::new(serial, kind, error);
        if self.profile.roll_ack_expected(&mut self.rng) {
            info = info.with_ack_expected();
        }
        let payload = if error.is_success() { payload } else { Bytes::new() };
        let due = Instant::now() + self.profile.sample_latency(&mut self.rng);
        self.queue.push(ScheduledReply { due, info, payload });
        true
    }

    /// Deliver every answer that is due. Returns false once the bridge is gone.
    fn deliver_due(&mut self, now: Instant) -> bool {
        while self.queue.peek().map_or(false, |reply| reply.due <= now) {
            let Some(reply) = self.queue.pop() else {
                break;
            };
            trace!(serial = %reply.info.serial, error = %reply.info.error, "Modem answering");
            if self.sink.respond(reply.info, reply.payload).is_err() {
                return false;
            }
            self.shared.stats.responses.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    fn crash(&mut self) {
        let dropped = self.queue.len() as u64;
        self.queue.clear();
        self.shared.stats.dropped_by_crash.fetch_add(dropped, Ordering::Relaxed);
        warn!(dropped, "Simulated modem crashed");
    }
}

/// Main function for the modem worker thread.
fn modem_thread_main(mut worker: ModemWorker, rx: Receiver<ModemCommand>) {
    loop {
        let command = match worker.queue.peek().map(|reply| reply.due) {
            Some(due) => {
                let now = Instant::now();
                if due <= now {
                    None
                } else {
                    match rx.recv_timeout(due - now) {
                        Ok(command) => Some(command),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            }
            None => match rx.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            },
        };

        let alive = match command {
            Some(ModemCommand::Request {
                serial,
                kind,
                version,
                payload,
            }) => worker.on_request(serial, kind, version, payload),
            Some(ModemCommand::Indicate(indication)) => {
                worker.shared.stats.indications.fetch_add(1, Ordering::Relaxed);
                worker.sink.indicate(indication).is_ok()
            }
            Some(ModemCommand::Crash) => {
                worker.crash();
                true
            }
            Some(ModemCommand::Stop) => break,
            None => true,
        };

        if !alive || !worker.deliver_due(Instant::now()) {
            debug!("Bridge gone, modem worker stopping");
            break;
        }
    }
    worker.shared.running.store(false, Ordering::Release);
    trace!(pending = worker.queue.len(), "Modem worker exited");
}
