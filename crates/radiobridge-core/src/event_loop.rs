//! The event loop thread and the handle callers use to reach it.
//!
//! All bridge state lives on one dedicated thread. Callers, the transport's
//! receive path and timers never touch it directly: they push
//! [`BridgeEvent`]s into a single unbounded queue, and the thread drains the
//! queue in batches, sleeping until the next timer deadline when idle.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use radiobridge_protocol::{Indication, RequestKind};
use tracing::{debug, info, trace};

use crate::bridge::{BridgeCore, BridgeEvent};
use crate::bug_detector::BugStatus;
use crate::channel::{HardwareChannel, ResponseSink};
use crate::config::BridgeConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{BridgeError, RequestResult};
use crate::request::{Attribution, Completion, PendingReply, RequestHandle, Submission};
use crate::serial::SerialAllocator;
use crate::wakelock::WakeLocks;

/// Most events folded into one batch after the first.
const MAX_BATCH: usize = 256;

/// Handle to a running bridge.
///
/// Dropping the handle asks the loop to shut down without waiting for it.
pub struct BridgeHandle {
    tx: Sender<BridgeEvent>,
    name: String,
    serials: Arc<SerialAllocator>,
    diagnostics: Arc<RwLock<Diagnostics>>,
    thread: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    /// Instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a request. `callback` receives the outcome exactly once, on the
    /// event loop thread.
    ///
    /// If the loop has already stopped this returns
    /// [`BridgeError::LoopStopped`] and the callback has already received
    /// `ChannelUnavailable`.
    pub fn submit<F>(
        &self,
        kind: RequestKind,
        payload: impl Into<Bytes>,
        attribution: Attribution,
        callback: F,
    ) -> Result<RequestHandle, BridgeError>
    where
        F: FnOnce(RequestResult<Bytes>) + Send + 'static,
    {
        let serial = self.serials.next();
        let submission = Submission {
            serial,
            kind,
            payload: payload.into(),
            attribution,
            submitted_at: Instant::now(),
            completion: Completion::new(kind, callback),
        };
        self.send(BridgeEvent::Submit(submission))?;
        trace!(%serial, %kind, "Request queued");
        Ok(RequestHandle { serial, kind })
    }

    /// Queue a request and get a reply that can be waited on.
    pub fn call(
        &self,
        kind: RequestKind,
        payload: impl Into<Bytes>,
        attribution: Attribution,
    ) -> Result<PendingReply, BridgeError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let handle = self.submit(kind, payload, attribution, move |result| {
            let _ = tx.send(result);
        })?;
        Ok(PendingReply::new(handle, rx))
    }

    /// A sink feeding this bridge's queue.
    pub fn sink(&self) -> ResponseSink {
        ResponseSink::new(self.tx.clone())
    }

    /// Latest published snapshot. Updated after every batch.
    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().clone()
    }

    /// Receive every indication from now on.
    pub fn subscribe_indications(&self) -> Result<Receiver<Indication>, BridgeError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.send(BridgeEvent::SubscribeIndications(tx))?;
        Ok(rx)
    }

    /// Receive every bug status change from now on.
    pub fn subscribe_bug_status(&self) -> Result<Receiver<BugStatus>, BridgeError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.send(BridgeEvent::SubscribeBugStatus(tx))?;
        Ok(rx)
    }

    /// Report that the transport died.
    pub fn channel_lost(&self) -> Result<(), BridgeError> {
        self.send(BridgeEvent::ChannelLost)
    }

    /// Report that the transport came back after a modem restart.
    pub fn channel_restarted(&self) -> Result<(), BridgeError> {
        self.send(BridgeEvent::ChannelRestarted)
    }

    /// Check if the loop thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |thread| thread.is_finished())
    }

    /// Fail everything outstanding, stop the loop and wait for it.
    /// Returns the final snapshot.
    pub fn shutdown(mut self) -> Result<Diagnostics, BridgeError> {
        let _ = self.tx.send(BridgeEvent::Shutdown);
        if let Some(thread) = self.thread.take() {
            thread.join().map_err(|_| BridgeError::Panicked)?;
        }
        Ok(self.diagnostics())
    }

    fn send(&self, event: BridgeEvent) -> Result<(), BridgeError> {
        self.tx.send(event).map_err(|_| BridgeError::LoopStopped)
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.tx.send(BridgeEvent::Shutdown);
            // Don't wait for the thread in drop - it exits on its own
        }
    }
}

impl std::fmt::Debug for BridgeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeHandle")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

/// Start a bridge on its own thread.
///
/// `make_channel` receives the sink the transport must push inbound traffic
/// into and returns the outbound half, which moves to the loop thread.
pub fn spawn_bridge<C, F>(
    config: BridgeConfig,
    wake_locks: WakeLocks,
    make_channel: F,
) -> Result<BridgeHandle, BridgeError>
where
    C: HardwareChannel + 'static,
    F: FnOnce(ResponseSink) -> C,
{
    config.validate()?;

    let (tx, rx) = crossbeam_channel::unbounded();
    let channel = make_channel(ResponseSink::new(tx.clone()));
    let serials = Arc::new(match config.serial_seed {
        Some(seed) => SerialAllocator::new(seed),
        None => SerialAllocator::random(),
    });
    let core = BridgeCore::new(&config, Arc::clone(&serials), wake_locks, channel);
    let diagnostics = Arc::new(RwLock::new(core.diagnostics(Instant::now())));
    let published = Arc::clone(&diagnostics);

    let thread = thread::Builder::new()
        .name(format!("radiobridge-{}", config.name))
        .spawn(move || event_loop_main(core, rx, published))?;

    info!(
        instance = %config.name,
        first_serial = %serials.peek(),
        hal_version_cap = ?config.hal_version_cap,
        "Bridge started"
    );

    Ok(BridgeHandle {
        tx,
        name: config.name,
        serials,
        diagnostics,
        thread: Some(thread),
    })
}

/// Main function for the event loop thread.
///
/// Blocks until an event arrives or the next timer is due, then processes
/// everything queued as one batch, until shutdown.
fn event_loop_main<C: HardwareChannel>(
    mut core: BridgeCore<C>,
    rx: Receiver<BridgeEvent>,
    published: Arc<RwLock<Diagnostics>>,
) {
    loop {
        let first = match core.next_deadline() {
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    None
                } else {
                    match rx.recv_timeout(deadline - now) {
                        Ok(event) => Some(event),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            }
            None => match rx.recv() {
                Ok(event) => Some(event),
                // Every sender is gone
                Err(_) => break,
            },
        };

        let mut batch: Vec<BridgeEvent> = first.into_iter().collect();
        batch.extend(rx.try_iter().take(MAX_BATCH));

        let now = Instant::now();
        let running = core.handle_batch(batch, now);
        *published.write() = core.diagnostics(now);
        if !running {
            break;
        }
    }

    let now = Instant::now();
    core.shutdown(now);
    *published.write() = core.diagnostics(now);

    // Anything queued behind the shutdown is dropped here; dropped
    // submissions report ChannelUnavailable to their callers.
    let leftover = rx.try_iter().count();
    debug!(leftover, "Event loop exited");
}
