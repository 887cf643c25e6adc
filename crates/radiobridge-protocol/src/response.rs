//! Response and indication metadata delivered by the modem.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::constants::SERIAL_NONE;
use crate::error::RadioError;
use crate::kind::RequestKind;

/// Correlation id linking a request to its response.
///
/// Serial `0` is reserved and never names a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Serial(pub u32);

impl Serial {
    /// The reserved "no request" serial.
    pub const NONE: Serial = Serial(SERIAL_NONE);

    /// Whether this is the reserved value.
    pub fn is_none(&self) -> bool {
        *self == Serial::NONE
    }
}

impl std::fmt::Display for Serial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the modem wants a solicited response handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Plain response.
    #[default]
    Solicited,
    /// Response the host must acknowledge with an ack frame.
    SolicitedAckExpected,
}

impl ResponseType {
    /// Whether an acknowledgement frame is owed.
    pub fn ack_expected(&self) -> bool {
        matches!(self, ResponseType::SolicitedAckExpected)
    }
}

/// How the modem wants an indication handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicationType {
    /// Plain indication.
    #[default]
    Unsolicited,
    /// Indication the host must acknowledge with an ack frame.
    UnsolicitedAckExpected,
}

impl IndicationType {
    /// Whether an acknowledgement frame is owed.
    pub fn ack_expected(&self) -> bool {
        matches!(self, IndicationType::UnsolicitedAckExpected)
    }
}

/// Header of a solicited response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseInfo {
    /// Serial of the request being answered.
    pub serial: Serial,
    /// Kind the modem believes it is answering.
    pub kind: RequestKind,
    /// Outcome code.
    pub error: RadioError,
    /// Whether an ack frame is owed.
    pub response_type: ResponseType,
}

impl ResponseInfo {
    /// A plain response.
    pub fn new(serial: Serial, kind: RequestKind, error: RadioError) -> Self {
        ResponseInfo {
            serial,
            kind,
            error,
            response_type: ResponseType::Solicited,
        }
    }

    /// Mark the response as requiring an acknowledgement frame.
    pub fn with_ack_expected(mut self) -> Self {
        self.response_type = ResponseType::SolicitedAckExpected;
        self
    }
}

/// Unsolicited message from the modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indication {
    /// Indication code (opaque to the bridge).
    pub code: u32,
    /// Opaque payload.
    pub payload: Bytes,
    /// Whether an ack frame is owed.
    pub indication_type: IndicationType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_none() {
        assert!(Serial::NONE.is_none());
        assert!(!Serial(1).is_none());
    }

    #[test]
    fn test_response_info_ack_flag() {
        let info = ResponseInfo::new(Serial(7), RequestKind::SendSms, RadioError::None);
        assert!(!info.response_type.ack_expected());
        assert!(info.with_ack_expected().response_type.ack_expected());
    }

    #[test]
    fn test_indication_ack_flag() {
        assert!(IndicationType::UnsolicitedAckExpected.ack_expected());
        assert!(!IndicationType::Unsolicited.ack_expected());
    }
}
