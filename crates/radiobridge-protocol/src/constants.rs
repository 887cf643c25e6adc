//! Protocol constants
//!
//! These constants define the request opcodes and error codes used on the
//! radio command channel.

// ============================================================================
// Request Opcodes (host → modem)
// ============================================================================

/// Read the SIM/ICC card status.
pub const REQ_GET_SIM_STATUS: u32 = 1;
/// Read the current signal strength.
pub const REQ_SIGNAL_STRENGTH: u32 = 19;
/// Turn the radio on or off.
pub const REQ_RADIO_POWER: u32 = 23;
/// Send an SMS over the IMS or CS domain.
pub const REQ_SEND_SMS: u32 = 25;
/// Bring up a packet data connection.
pub const REQ_SETUP_DATA_CALL: u32 = 27;
/// Tear down a packet data connection.
pub const REQ_DEACTIVATE_DATA_CALL: u32 = 41;
/// Read IMEI / MEID and friends.
pub const REQ_DEVICE_IDENTITY: u32 = 98;
/// Read the list of visible cells.
pub const REQ_GET_CELL_INFO_LIST: u32 = 109;
/// Read modem activity counters.
pub const REQ_GET_ACTIVITY_INFO: u32 = 135;
/// Provision the carrier key used for IMSI encryption.
pub const REQ_SET_CARRIER_INFO_IMSI_ENCRYPTION: u32 = 141;
/// Start an incremental network scan.
pub const REQ_START_NETWORK_SCAN: u32 = 142;
/// Enable or disable the UICC applications.
pub const REQ_ENABLE_UICC_APPLICATIONS: u32 = 208;
/// Read cell barring information.
pub const REQ_GET_BARRING_INFO: u32 = 211;
/// Read the network slicing configuration.
pub const REQ_GET_SLICING_CONFIG: u32 = 224;

// ============================================================================
// Error Codes (modem → host)
// ============================================================================

/// Success.
pub const ERR_NONE: i32 = 0;
/// The radio is off or the modem is not reachable.
pub const ERR_RADIO_NOT_AVAILABLE: i32 = 1;
/// Unspecified failure.
pub const ERR_GENERIC_FAILURE: i32 = 2;
/// The request is not implemented at the version it was issued with.
pub const ERR_REQUEST_NOT_SUPPORTED: i32 = 6;
/// The request was cancelled by the modem.
pub const ERR_CANCELLED: i32 = 7;
/// Out of memory inside the modem stack.
pub const ERR_NO_MEMORY: i32 = 37;
/// Internal error in the vendor stack.
pub const ERR_INTERNAL_ERR: i32 = 38;
/// System error in the vendor stack. Repeated occurrences point at a stuck modem.
pub const ERR_SYSTEM_ERR: i32 = 39;
/// Error reported by the modem baseband.
pub const ERR_MODEM_ERR: i32 = 40;
/// The modem is in a state where the request cannot be served.
pub const ERR_INVALID_STATE: i32 = 41;
/// Not enough resources to serve the request.
pub const ERR_NO_RESOURCES: i32 = 42;
/// The request carried invalid arguments.
pub const ERR_INVALID_ARGUMENTS: i32 = 44;

// ============================================================================
// Serials
// ============================================================================

/// Serial value that never identifies a request.
pub const SERIAL_NONE: u32 = 0;
