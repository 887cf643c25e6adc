//! Simulated modem and scenario runner for the radio bridge.
//!
//! [`SimulatedModem`] implements the bridge's hardware channel with a worker
//! thread that answers after a configurable latency, refuses versions it
//! does not implement, and can fail, ignore or crash on demand. Scenarios
//! written in YAML drive a real bridge against it and produce a
//! [`ScenarioReport`].
//!
//! # Example
//!
//! ```rust
//! use radiobridge_sim::{run_scenario, Scenario};
//! use radiobridge_protocol::RequestKind;
//!
//! let scenario = Scenario::from_yaml_str(
//!     r#"
//! name: doc
//! modem:
//!   max_version: "1.4"
//! steps:
//!   - action: submit
//!     kind: setup_data_call
//!     count: 2
//! "#,
//! )
//! .unwrap();
//!
//! let report = run_scenario(&scenario, Some(1)).unwrap();
//! assert_eq!(report.outcomes_for(RequestKind::SetupDataCall).ok, 2);
//! ```

pub mod error;
pub mod modem;
pub mod profile;
pub mod scenario;

pub use error::{SimError, SimResult};
pub use modem::{ModemBackend, ModemControl, ModemStats, SimulatedModem};
pub use profile::{ModemProfile, Reaction};
pub use scenario::{
    load_scenario, run_scenario, KindOutcomes, LockUsage, Scenario, ScenarioReport, Step,
};
