//! The seam between the bridge and the modem transport.
//!
//! Outbound traffic goes through a [`HardwareChannel`] owned by the event
//! loop. Inbound traffic (responses, request acks, indications) arrives on
//! whatever thread the transport uses and is pushed into the loop's queue
//! through a [`ResponseSink`].

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use radiobridge_protocol::{HalVersion, Indication, RequestKind, ResponseInfo, Serial};

use crate::bridge::BridgeEvent;
use crate::error::{BridgeError, ChannelError};
use crate::request::Attribution;

/// A request as handed to the transport.
#[derive(Debug, Clone, Copy)]
pub struct OutboundRequest<'a> {
    /// Serial the response must carry.
    pub serial: Serial,
    /// What to do.
    pub kind: RequestKind,
    /// Wire version to encode at.
    pub version: HalVersion,
    /// Opaque body.
    pub payload: &'a Bytes,
    /// Accounting label.
    pub attribution: &'a Attribution,
}

/// Outbound half of the modem transport.
///
/// Calls are made from the event loop thread only and must not block for
/// long: the answer comes back later through the [`ResponseSink`].
pub trait HardwareChannel: Send {
    /// Issue a request.
    fn send(&mut self, request: OutboundRequest<'_>) -> Result<(), ChannelError>;

    /// Acknowledge a response or indication that asked for it.
    fn send_ack(&mut self) -> Result<(), ChannelError>;
}

impl<T: HardwareChannel + ?Sized> HardwareChannel for Box<T> {
    fn send(&mut self, request: OutboundRequest<'_>) -> Result<(), ChannelError> {
        (**self).send(request)
    }

    fn send_ack(&mut self) -> Result<(), ChannelError> {
        (**self).send_ack()
    }
}

/// Inbound half: pushes modem traffic into the bridge's event queue.
///
/// Cheap to clone; every clone feeds the same queue.
#[derive(Debug, Clone)]
pub struct ResponseSink {
    tx: Sender<BridgeEvent>,
}

impl ResponseSink {
    pub(crate) fn new(tx: Sender<BridgeEvent>) -> Self {
        Self { tx }
    }

    /// Deliver a solicited response.
    pub fn respond(&self, info: ResponseInfo, payload: impl Into<Bytes>) -> Result<(), BridgeError> {
        self.push(BridgeEvent::Response {
            info,
            payload: payload.into(),
        })
    }

    /// Report that the modem received (but has not yet answered) a request.
    pub fn acknowledge_request(&self, serial: Serial) -> Result<(), BridgeError> {
        self.push(BridgeEvent::RequestAck { serial })
    }

    /// Deliver an unsolicited indication.
    pub fn indicate(&self, indication: Indication) -> Result<(), BridgeError> {
        self.push(BridgeEvent::Indication(indication))
    }

    /// Report that the transport died. Pending requests fail.
    pub fn channel_lost(&self) -> Result<(), BridgeError> {
        self.push(BridgeEvent::ChannelLost)
    }

    /// Report that the transport came back after a modem restart.
    pub fn channel_restarted(&self) -> Result<(), BridgeError> {
        self.push(BridgeEvent::ChannelRestarted)
    }

    fn push(&self, event: BridgeEvent) -> Result<(), BridgeError> {
        self.tx.send(event).map_err(|_| BridgeError::LoopStopped)
    }
}

// ============================================================================
// Recording channel
// ============================================================================

/// A request captured by a [`RecordingChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRequest {
    /// Serial the request was sent with.
    pub serial: Serial,
    /// Kind sent.
    pub kind: RequestKind,
    /// Version sent.
    pub version: HalVersion,
    /// Body sent.
    pub payload: Bytes,
    /// Accounting label.
    pub attribution: Attribution,
}

#[derive(Debug, Default)]
struct RecorderState {
    requests: Vec<SentRequest>,
    acks: usize,
    unavailable: Option<String>,
    refused: HashSet<(RequestKind, HalVersion)>,
}

/// Shared view of what a [`RecordingChannel`] has seen, and knobs to make
/// it refuse traffic.
#[derive(Debug, Clone, Default)]
pub struct ChannelRecorder {
    state: Arc<Mutex<RecorderState>>,
}

impl ChannelRecorder {
    /// Requests sent so far.
    pub fn requests(&self) -> Vec<SentRequest> {
        self.state.lock().requests.clone()
    }

    /// The most recent request.
    pub fn last_request(&self) -> Option<SentRequest> {
        self.state.lock().requests.last().cloned()
    }

    /// Ack frames sent so far.
    pub fn acks(&self) -> usize {
        self.state.lock().acks
    }

    /// Make every send fail with `Unavailable` until cleared.
    pub fn set_unavailable(&self, reason: Option<&str>) {
        self.state.lock().unavailable = reason.map(str::to_string);
    }

    /// Make sends of `kind` at `version` fail with `VersionUnsupported`.
    pub fn refuse_version(&self, kind: RequestKind, version: HalVersion) {
        self.state.lock().refused.insert((kind, version));
    }
}

/// In-memory channel that records requests and never answers.
///
/// Tests and benchmarks drive responses themselves.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    recorder: ChannelRecorder,
}

impl RecordingChannel {
    /// Create a channel and its recorder.
    pub fn new() -> (Self, ChannelRecorder) {
        let channel = RecordingChannel::default();
        let recorder = channel.recorder.clone();
        (channel, recorder)
    }
}

impl HardwareChannel for RecordingChannel {
    fn send(&mut self, request: OutboundRequest<'_>) -> Result<(), ChannelError> {
        let mut state = self.recorder.state.lock();
        if let Some(reason) = &state.unavailable {
            return Err(ChannelError::Unavailable(reason.clone()));
        }
        if state.refused.contains(&(request.kind, request.version)) {
            return Err(ChannelError::VersionUnsupported {
                version: request.version,
            });
        }
        state.requests.push(SentRequest {
            serial: request.serial,
            kind: request.kind,
            version: request.version,
            payload: request.payload.clone(),
            attribution: request.attribution.clone(),
        });
        Ok(())
    }

    fn send_ack(&mut self) -> Result<(), ChannelError> {
        let mut state = self.recorder.state.lock();
        if let Some(reason) = &state.unavailable {
            return Err(ChannelError::Unavailable(reason.clone()));
        }
        state.acks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(channel: &mut RecordingChannel, serial: u32, version: HalVersion) -> Result<(), ChannelError> {
        channel.send(OutboundRequest {
            serial: Serial(serial),
            kind: RequestKind::SendSms,
            version,
            payload: &Bytes::from_static(b"hi"),
            attribution: &Attribution::none(),
        })
    }

    #[test]
    fn test_recording_channel_records() {
        let (mut channel, recorder) = RecordingChannel::new();
        send(&mut channel, 1, HalVersion::V1_6).unwrap();
        channel.send_ack().unwrap();
        assert_eq!(recorder.requests().len(), 1);
        assert_eq!(recorder.last_request().unwrap().serial, Serial(1));
        assert_eq!(recorder.acks(), 1);
    }

    #[test]
    fn test_recording_channel_refusals() {
        let (mut channel, recorder) = RecordingChannel::new();
        recorder.refuse_version(RequestKind::SendSms, HalVersion::V1_6);
        assert_eq!(
            send(&mut channel, 1, HalVersion::V1_6),
            Err(ChannelError::VersionUnsupported {
                version: HalVersion::V1_6
            })
        );
        send(&mut channel, 2, HalVersion::V1_0).unwrap();

        recorder.set_unavailable(Some("modem reset"));
        assert!(matches!(
            send(&mut channel, 3, HalVersion::V1_0),
            Err(ChannelError::Unavailable(_))
        ));
        assert_eq!(recorder.requests().len(), 1);
    }

    #[test]
    fn test_sink_reports_stopped_loop() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sink = ResponseSink::new(tx);
        drop(rx);
        assert!(matches!(
            sink.acknowledge_request(Serial(1)),
            Err(BridgeError::LoopStopped)
        ));
    }
}
