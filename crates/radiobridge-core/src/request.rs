//! Request records and caller-facing handles.

use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use radiobridge_protocol::{HalVersion, RequestKind, Serial};

use crate::error::{RequestError, RequestResult};

/// Caller-supplied callback receiving a request's outcome.
pub type Callback = Box<dyn FnOnce(RequestResult<Bytes>) + Send + 'static>;

/// Delivers the outcome of one logical request exactly once.
///
/// If dropped without being completed (the bridge stopped with the request
/// still queued) the callback receives `ChannelUnavailable`.
pub struct Completion {
    kind: RequestKind,
    callback: Option<Callback>,
}

impl Completion {
    /// Wrap a callback for a request of `kind`.
    pub fn new<F>(kind: RequestKind, callback: F) -> Self
    where
        F: FnOnce(RequestResult<Bytes>) + Send + 'static,
    {
        Completion {
            kind,
            callback: Some(Box::new(callback)),
        }
    }

    /// Deliver the outcome.
    pub fn complete(mut self, result: RequestResult<Bytes>) {
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(Err(RequestError::ChannelUnavailable { kind: self.kind }));
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("kind", &self.kind)
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

/// Opaque label naming who a request is performed for.
///
/// Forwarded to the hardware channel for power accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Attribution(Option<String>);

impl Attribution {
    /// Attribute to a named origin.
    pub fn new(origin: impl Into<String>) -> Self {
        Attribution(Some(origin.into()))
    }

    /// No attribution.
    pub fn none() -> Self {
        Attribution(None)
    }

    /// The origin, if any.
    pub fn origin(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl fmt::Display for Attribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.origin().unwrap_or("-"))
    }
}

/// A request as queued by a caller, before it reaches the event loop.
pub struct Submission {
    /// Serial allocated at submit time.
    pub serial: Serial,
    /// What to do.
    pub kind: RequestKind,
    /// Opaque request body.
    pub payload: Bytes,
    /// Accounting label.
    pub attribution: Attribution,
    /// When the caller submitted.
    pub submitted_at: Instant,
    /// Where the outcome goes.
    pub completion: Completion,
}

impl fmt::Debug for Submission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submission")
            .field("serial", &self.serial)
            .field("kind", &self.kind)
            .field("payload_len", &self.payload.len())
            .field("attribution", &self.attribution)
            .finish_non_exhaustive()
    }
}

/// An in-flight request, owned by the pending table.
pub struct RequestRecord {
    /// Serial the modem will answer with.
    pub serial: Serial,
    /// What was asked.
    pub kind: RequestKind,
    /// Version the request was issued at.
    pub version: HalVersion,
    /// Body, kept so a fallback can resend it.
    pub payload: Bytes,
    /// Accounting label.
    pub attribution: Attribution,
    /// When this attempt was issued. Age-out measures from here.
    pub submitted_at: Instant,
    /// When the caller first submitted. Latency measures from here.
    pub first_submitted_at: Instant,
    /// 1 for the original issue, incremented per fallback.
    pub attempt: u32,
    /// Whether this record still accounts for a primary wake lock reference.
    pub holds_wake_lock: bool,
    /// Whether the modem has acknowledged receipt.
    pub acknowledged: bool,
    completion: Completion,
}

impl RequestRecord {
    /// Build a first-attempt record from a submission.
    pub fn from_submission(submission: Submission, version: HalVersion, now: Instant) -> Self {
        RequestRecord {
            serial: submission.serial,
            kind: submission.kind,
            version,
            payload: submission.payload,
            attribution: submission.attribution,
            submitted_at: now,
            first_submitted_at: submission.submitted_at.min(now),
            attempt: 1,
            holds_wake_lock: false,
            acknowledged: false,
            completion: submission.completion,
        }
    }

    /// Carry the same logical request to a new serial and version.
    ///
    /// The completion moves with it, so the caller still sees exactly one
    /// outcome.
    pub fn reissue(self, serial: Serial, version: HalVersion, now: Instant) -> Self {
        RequestRecord {
            serial,
            version,
            submitted_at: now,
            attempt: self.attempt + 1,
            holds_wake_lock: false,
            acknowledged: false,
            ..self
        }
    }

    /// How long this attempt has been outstanding.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.submitted_at)
    }

    /// Time since the caller first submitted.
    pub fn latency(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.first_submitted_at)
    }

    /// Deliver the outcome, consuming the record.
    pub fn complete(self, result: RequestResult<Bytes>) {
        self.completion.complete(result)
    }
}

impl fmt::Debug for RequestRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestRecord")
            .field("serial", &self.serial)
            .field("kind", &self.kind)
            .field("version", &self.version)
            .field("attempt", &self.attempt)
            .field("holds_wake_lock", &self.holds_wake_lock)
            .field("acknowledged", &self.acknowledged)
            .finish_non_exhaustive()
    }
}

/// Returned by submit: identifies the request that was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHandle {
    /// Serial of the first attempt. Fallbacks use new serials.
    pub serial: Serial,
    /// What was asked.
    pub kind: RequestKind,
}

/// A submitted request whose outcome can be waited on.
#[derive(Debug)]
pub struct PendingReply {
    handle: RequestHandle,
    rx: Receiver<RequestResult<Bytes>>,
}

impl PendingReply {
    pub(crate) fn new(handle: RequestHandle, rx: Receiver<RequestResult<Bytes>>) -> Self {
        Self { handle, rx }
    }

    /// The queued request.
    pub fn handle(&self) -> RequestHandle {
        self.handle
    }

    /// Block until the outcome arrives.
    ///
    /// Returns `ChannelUnavailable` if the bridge went away without
    /// completing the request.
    pub fn wait(self) -> RequestResult<Bytes> {
        let kind = self.handle.kind;
        self.rx
            .recv()
            .unwrap_or(Err(RequestError::ChannelUnavailable { kind }))
    }

    /// Block up to `timeout` for the outcome. `None` if it has not arrived.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<RequestResult<Bytes>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(RequestError::ChannelUnavailable {
                kind: self.handle.kind,
            })),
        }
    }

    /// The outcome, if it has already arrived.
    pub fn try_wait(&self) -> Option<RequestResult<Bytes>> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn submission(completion: Completion) -> Submission {
        Submission {
            serial: Serial(5),
            kind: RequestKind::GetSimStatus,
            payload: Bytes::from_static(b"abc"),
            attribution: Attribution::new("com.example.dialer"),
            submitted_at: Instant::now(),
            completion,
        }
    }

    #[test]
    fn test_reissue_keeps_completion_and_origin() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let start = Instant::now();
        let record = RequestRecord::from_submission(
            submission(Completion::new(RequestKind::GetSimStatus, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            HalVersion::V1_6,
            start,
        );

        let later = start + Duration::from_millis(10);
        let retry = record.reissue(Serial(9), HalVersion::V1_5, later);
        assert_eq!(retry.serial, Serial(9));
        assert_eq!(retry.version, HalVersion::V1_5);
        assert_eq!(retry.attempt, 2);
        assert_eq!(retry.submitted_at, later);
        assert!(retry.first_submitted_at <= start);
        assert_eq!(retry.payload, Bytes::from_static(b"abc"));
        assert_eq!(retry.attribution.origin(), Some("com.example.dialer"));

        retry.complete(Ok(Bytes::new()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_completion_reports_unavailable() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let completion = Completion::new(RequestKind::SendSms, move |result| {
            let _ = tx.send(result);
        });
        drop(completion);
        assert_eq!(
            rx.try_recv().unwrap(),
            Err(RequestError::ChannelUnavailable {
                kind: RequestKind::SendSms
            })
        );
    }

    #[test]
    fn test_completed_completion_fires_once() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let completion = Completion::new(RequestKind::SendSms, move |result| {
            let _ = tx.send(result);
        });
        completion.complete(Ok(Bytes::from_static(b"ok")));
        assert_eq!(rx.try_recv().unwrap(), Ok(Bytes::from_static(b"ok")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_pending_reply_disconnected() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        drop(tx);
        let reply = PendingReply::new(
            RequestHandle {
                serial: Serial(1),
                kind: RequestKind::SendSms,
            },
            rx,
        );
        assert_eq!(
            reply.wait(),
            Err(RequestError::ChannelUnavailable {
                kind: RequestKind::SendSms
            })
        );
    }

    #[test]
    fn test_attribution_display() {
        assert_eq!(Attribution::none().to_string(), "-");
        assert_eq!(Attribution::new("ims").to_string(), "ims");
    }
}
