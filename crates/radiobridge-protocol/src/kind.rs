//! Request kinds that can be issued on the command channel.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::ProtocolError;
use crate::version::{HalVersion, VersionLadder};

/// What a request does, independent of the wire version it travels at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum RequestKind {
    /// Read the SIM/ICC card status.
    GetSimStatus,
    /// Read the current signal strength.
    GetSignalStrength,
    /// Turn the radio on or off.
    SetRadioPower,
    /// Send an SMS.
    SendSms,
    /// Bring up a data call.
    SetupDataCall,
    /// Tear down a data call.
    DeactivateDataCall,
    /// Read device identifiers.
    GetDeviceIdentity,
    /// Read the visible cell list.
    GetCellInfoList,
    /// Read modem activity counters.
    GetModemActivityInfo,
    /// Provision the IMSI encryption key.
    SetCarrierInfoForImsiEncryption,
    /// Start a network scan.
    StartNetworkScan,
    /// Enable or disable UICC applications.
    EnableUiccApplications,
    /// Read cell barring info.
    GetBarringInfo,
    /// Read the slicing configuration.
    GetSlicingConfig,
}

impl RequestKind {
    /// Every kind this build knows, in opcode order.
    pub const ALL: &'static [RequestKind] = &[
        RequestKind::GetSimStatus,
        RequestKind::GetSignalStrength,
        RequestKind::SetRadioPower,
        RequestKind::SendSms,
        RequestKind::SetupDataCall,
        RequestKind::DeactivateDataCall,
        RequestKind::GetDeviceIdentity,
        RequestKind::GetCellInfoList,
        RequestKind::GetModemActivityInfo,
        RequestKind::SetCarrierInfoForImsiEncryption,
        RequestKind::StartNetworkScan,
        RequestKind::EnableUiccApplications,
        RequestKind::GetBarringInfo,
        RequestKind::GetSlicingConfig,
    ];

    /// Wire opcode for this kind.
    pub fn opcode(&self) -> u32 {
        match self {
            RequestKind::GetSimStatus => REQ_GET_SIM_STATUS,
            RequestKind::GetSignalStrength => REQ_SIGNAL_STRENGTH,
            RequestKind::SetRadioPower => REQ_RADIO_POWER,
            RequestKind::SendSms => REQ_SEND_SMS,
            RequestKind::SetupDataCall => REQ_SETUP_DATA_CALL,
            RequestKind::DeactivateDataCall => REQ_DEACTIVATE_DATA_CALL,
            RequestKind::GetDeviceIdentity => REQ_DEVICE_IDENTITY,
            RequestKind::GetCellInfoList => REQ_GET_CELL_INFO_LIST,
            RequestKind::GetModemActivityInfo => REQ_GET_ACTIVITY_INFO,
            RequestKind::SetCarrierInfoForImsiEncryption => REQ_SET_CARRIER_INFO_IMSI_ENCRYPTION,
            RequestKind::StartNetworkScan => REQ_START_NETWORK_SCAN,
            RequestKind::EnableUiccApplications => REQ_ENABLE_UICC_APPLICATIONS,
            RequestKind::GetBarringInfo => REQ_GET_BARRING_INFO,
            RequestKind::GetSlicingConfig => REQ_GET_SLICING_CONFIG,
        }
    }

    /// Look up a kind by opcode.
    pub fn from_opcode(opcode: u32) -> Result<Self, ProtocolError> {
        RequestKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.opcode() == opcode)
            .ok_or(ProtocolError::UnknownOpcode(opcode))
    }

    /// Short snake_case name, used as a log field and metric label.
    pub const fn as_label(&self) -> &'static str {
        match self {
            RequestKind::GetSimStatus => "get_sim_status",
            RequestKind::GetSignalStrength => "get_signal_strength",
            RequestKind::SetRadioPower => "set_radio_power",
            RequestKind::SendSms => "send_sms",
            RequestKind::SetupDataCall => "setup_data_call",
            RequestKind::DeactivateDataCall => "deactivate_data_call",
            RequestKind::GetDeviceIdentity => "get_device_identity",
            RequestKind::GetCellInfoList => "get_cell_info_list",
            RequestKind::GetModemActivityInfo => "get_modem_activity_info",
            RequestKind::SetCarrierInfoForImsiEncryption => "set_carrier_info_for_imsi_encryption",
            RequestKind::StartNetworkScan => "start_network_scan",
            RequestKind::EnableUiccApplications => "enable_uicc_applications",
            RequestKind::GetBarringInfo => "get_barring_info",
            RequestKind::GetSlicingConfig => "get_slicing_config",
        }
    }

    /// Versions this build can issue the request at.
    ///
    /// A ladder starts at the version that introduced the request and gains
    /// a rung each time the request's wire shape changed.
    pub fn ladder(&self) -> VersionLadder {
        use HalVersion as V;
        match self {
            RequestKind::GetSimStatus => {
                VersionLadder::new(&[V::V1_0, V::V1_2, V::V1_4, V::V1_5, V::V1_6])
            }
            RequestKind::GetSignalStrength => {
                VersionLadder::new(&[V::V1_0, V::V1_2, V::V1_4, V::V1_6])
            }
            RequestKind::SetRadioPower => VersionLadder::new(&[V::V1_0, V::V1_5, V::V1_6]),
            RequestKind::SendSms => VersionLadder::new(&[V::V1_0, V::V1_6]),
            RequestKind::SetupDataCall => {
                VersionLadder::new(&[V::V1_0, V::V1_2, V::V1_4, V::V1_5, V::V1_6])
            }
            RequestKind::DeactivateDataCall => VersionLadder::new(&[V::V1_0, V::V1_2]),
            RequestKind::GetDeviceIdentity => VersionLadder::new(&[V::V1_0]),
            RequestKind::GetCellInfoList => {
                VersionLadder::new(&[V::V1_0, V::V1_2, V::V1_4, V::V1_5, V::V1_6])
            }
            RequestKind::GetModemActivityInfo => VersionLadder::new(&[V::V1_0]),
            RequestKind::SetCarrierInfoForImsiEncryption => {
                VersionLadder::new(&[V::V1_1, V::V1_6])
            }
            RequestKind::StartNetworkScan => {
                VersionLadder::new(&[V::V1_1, V::V1_2, V::V1_4, V::V1_5])
            }
            RequestKind::EnableUiccApplications => VersionLadder::new(&[V::V1_5]),
            RequestKind::GetBarringInfo => VersionLadder::new(&[V::V1_5]),
            RequestKind::GetSlicingConfig => VersionLadder::new(&[V::V1_6]),
        }
    }

    /// Highest version this build can issue the request at.
    pub fn max_version(&self) -> HalVersion {
        // Every ladder above is non-empty.
        self.ladder().highest().unwrap_or(HalVersion::V1_0)
    }

    /// Next rung strictly below `version`, if any.
    pub fn version_below(&self, version: HalVersion) -> Option<HalVersion> {
        self.ladder().below(version)
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

impl FromStr for RequestKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequestKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_label() == s)
            .ok_or_else(|| ProtocolError::UnknownKind(s.to_string()))
    }
}
