//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when interpreting protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Opcode does not name a known request kind.
    #[error("unknown request opcode: {0}")]
    UnknownOpcode(u32),

    /// Request kind name is not recognised.
    #[error("unknown request kind: {0}")]
    UnknownKind(String),

    /// Version string is not of the form `major.minor`.
    #[error("invalid HAL version: {0:?}")]
    InvalidVersion(String),
}

/// Error codes reported by the modem in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RadioError {
    /// Success.
    None,
    /// Radio is off or unreachable.
    RadioNotAvailable,
    /// Unspecified failure.
    GenericFailure,
    /// Request not implemented at the issued version.
    RequestNotSupported,
    /// Cancelled by the modem.
    Cancelled,
    /// Out of memory.
    NoMemory,
    /// Vendor internal error.
    InternalErr,
    /// Vendor system error.
    SystemErr,
    /// Baseband error.
    ModemErr,
    /// Invalid state for this request.
    InvalidState,
    /// Not enough resources.
    NoResources,
    /// Invalid arguments.
    InvalidArguments,
    /// Code this build does not know.
    Unknown(i32),
}

impl RadioError {
    /// Whether this code reports success.
    pub fn is_success(self) -> bool {
        self == RadioError::None
    }

    /// Whether this code is the "not supported at this version" signal.
    pub fn is_not_supported(self) -> bool {
        self == RadioError::RequestNotSupported
    }

    /// Numeric wire value.
    pub fn code(self) -> i32 {
        self.into()
    }
}

impl std::fmt::Display for RadioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RadioError::None => write!(f, "none"),
            RadioError::RadioNotAvailable => write!(f, "radio not available"),
            RadioError::GenericFailure => write!(f, "generic failure"),
            RadioError::RequestNotSupported => write!(f, "request not supported"),
            RadioError::Cancelled => write!(f, "cancelled"),
            RadioError::NoMemory => write!(f, "no memory"),
            RadioError::InternalErr => write!(f, "internal error"),
            RadioError::SystemErr => write!(f, "system error"),
            RadioError::ModemErr => write!(f, "modem error"),
            RadioError::InvalidState => write!(f, "invalid state"),
            RadioError::NoResources => write!(f, "no resources"),
            RadioError::InvalidArguments => write!(f, "invalid arguments"),
            RadioError::Unknown(code) => write!(f, "unknown error ({})", code),
        }
    }
}

impl From<i32> for RadioError {
    fn from(code: i32) -> Self {
        use crate::constants::*;
        match code {
            ERR_NONE => RadioError::None,
            ERR_RADIO_NOT_AVAILABLE => RadioError::RadioNotAvailable,
            ERR_GENERIC_FAILURE => RadioError::GenericFailure,
            ERR_REQUEST_NOT_SUPPORTED => RadioError::RequestNotSupported,
            ERR_CANCELLED => RadioError::Cancelled,
            ERR_NO_MEMORY => RadioError::NoMemory,
            ERR_INTERNAL_ERR => RadioError::InternalErr,
            ERR_SYSTEM_ERR => RadioError::SystemErr,
            ERR_MODEM_ERR => RadioError::ModemErr,
            ERR_INVALID_STATE => RadioError::InvalidState,
            ERR_NO_RESOURCES => RadioError::NoResources,
            ERR_INVALID_ARGUMENTS => RadioError::InvalidArguments,
            _ => RadioError::Unknown(code),
        }
    }
}

impl From<RadioError> for i32 {
    fn from(error: RadioError) -> Self {
        use crate::constants::*;
        match error {
            RadioError::None => ERR_NONE,
            RadioError::RadioNotAvailable => ERR_RADIO_NOT_AVAILABLE,
            RadioError::GenericFailure => ERR_GENERIC_FAILURE,
            RadioError::RequestNotSupported => ERR_REQUEST_NOT_SUPPORTED,
            RadioError::Cancelled => ERR_CANCELLED,
            RadioError::NoMemory => ERR_NO_MEMORY,
            RadioError::InternalErr => ERR_INTERNAL_ERR,
            RadioError::SystemErr => ERR_SYSTEM_ERR,
            RadioError::ModemErr => ERR_MODEM_ERR,
            RadioError::InvalidState => ERR_INVALID_STATE,
            RadioError::NoResources => ERR_NO_RESOURCES,
            RadioError::InvalidArguments => ERR_INVALID_ARGUMENTS,
            RadioError::Unknown(code) => code,
        }
    }
}

impl serde::Serialize for RadioError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> serde::Deserialize<'de> for RadioError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i32::deserialize(deserializer).map(RadioError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_map_back() {
        for code in [0, 1, 2, 6, 7, 37, 38, 39, 40, 41, 42, 44] {
            let error = RadioError::from(code);
            assert!(!matches!(error, RadioError::Unknown(_)), "code {} unmapped", code);
            assert_eq!(error.code(), code);
        }
    }

    #[test]
    fn test_unknown_code_preserved() {
        let error = RadioError::from(1234);
        assert_eq!(error, RadioError::Unknown(1234));
        assert_eq!(error.code(), 1234);
        assert_eq!(error.to_string(), "unknown error (1234)");
    }

    #[test]
    fn test_predicates() {
        assert!(RadioError::None.is_success());
        assert!(!RadioError::SystemErr.is_success());
        assert!(RadioError::RequestNotSupported.is_not_supported());
        assert!(!RadioError::GenericFailure.is_not_supported());
    }

    #[test]
    fn test_serde_as_integer() {
        let yaml = serde_yaml::to_string(&RadioError::SystemErr).unwrap();
        assert_eq!(yaml.trim(), "39");
        let parsed: RadioError = serde_yaml::from_str("38").unwrap();
        assert_eq!(parsed, RadioError::InternalErr);
    }
}
