//! YAML scenarios driving a bridge against a simulated modem.
//!
//! A scenario pairs a [`BridgeConfig`] with a [`ModemProfile`] and a list of
//! [`Step`]s. [`run_scenario`] plays the steps against a live bridge and
//! summarises what happened in a [`ScenarioReport`].
//!
//! ```yaml
//! name: flaky-barring
//! bridge:
//!   wake_lock_timeout_ms: 500
//!   bug_detector:
//!     system_error_threshold: 3
//! modem:
//!   errors:
//!     get_barring_info: 39
//! steps:
//!   - action: submit
//!     kind: get_barring_info
//!     count: 5
//!   - action: settle
//!   - action: channel_restart
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use radiobridge_core::{
    spawn_bridge, Attribution, BridgeConfig, BugStatus, Diagnostics, RecordingWakeLock,
    RequestError, RequestResult, WakeLockProbe, WakeLocks,
};
use radiobridge_protocol::RequestKind;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{SimError, SimResult};
use crate::modem::{ModemStats, SimulatedModem};
use crate::profile::ModemProfile;

// ============================================================================
// Scenario Definition
// ============================================================================

fn default_count() -> u32 {
    1
}

fn default_settle_timeout_ms() -> u64 {
    5_000
}

/// One action in a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Submit `count` requests of one kind.
    Submit {
        kind: RequestKind,
        #[serde(default = "default_count")]
        count: u32,
        /// UTF-8 payload carried by every request.
        #[serde(default)]
        payload: String,
    },
    /// Sleep.
    Wait { ms: u64 },
    /// Wait until every request submitted so far has an outcome.
    Settle,
    /// Have the modem push an indication.
    Indicate {
        code: u32,
        #[serde(default)]
        ack_expected: bool,
    },
    /// Crash the modem and tell the bridge the channel is gone.
    ChannelLost,
    /// Bring the modem back and tell the bridge it restarted.
    ChannelRestart,
}

/// A complete scenario file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Scenario name, used as the request attribution.
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Seed for the modem's latency and ack sampling.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub modem: ModemProfile,
    /// Upper bound on every settle, including the implicit one at the end.
    #[serde(default = "default_settle_timeout_ms")]
    pub settle_timeout_ms: u64,
    pub steps: Vec<Step>,
}

impl Scenario {
    /// Parse and validate a scenario.
    pub fn from_yaml_str(yaml: &str) -> SimResult<Self> {
        let scenario: Scenario = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Check the embedded bridge config and modem profile.
    pub fn validate(&self) -> SimResult<()> {
        self.bridge.validate()?;
        self.modem.validate()?;
        Ok(())
    }

    /// Total requests the steps submit.
    pub fn request_count(&self) -> u64 {
        self.steps
            .iter()
            .map(|step| match step {
                Step::Submit { count, .. } => u64::from(*count),
                _ => 0,
            })
            .sum()
    }
}

/// Load a scenario file.
pub fn load_scenario(path: impl AsRef<Path>) -> SimResult<Scenario> {
    let path = path.as_ref();
    let yaml = std::fs::read_to_string(path).map_err(|source| SimError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Scenario::from_yaml_str(&yaml)
}

// ============================================================================
// Report
// ============================================================================

/// Outcomes for one request kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindOutcomes {
    pub submitted: u64,
    pub ok: u64,
    pub rejected: u64,
    pub unsupported: u64,
    pub timed_out: u64,
    pub channel_unavailable: u64,
}

impl KindOutcomes {
    fn record(&mut self, result: &RequestResult<Bytes>) {
        match result {
            Ok(_) => self.ok += 1,
            Err(RequestError::HardwareRejected { .. }) => self.rejected += 1,
            Err(RequestError::Unsupported { .. }) => self.unsupported += 1,
            Err(RequestError::TimedOut { .. }) => self.timed_out += 1,
            Err(RequestError::ChannelUnavailable { .. }) => self.channel_unavailable += 1,
        }
    }

    /// Requests with an outcome.
    pub fn completed(&self) -> u64 {
        self.ok + self.rejected + self.unsupported + self.timed_out + self.channel_unavailable
    }
}

/// What happened to a wake lock over the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LockUsage {
    pub acquisitions: u64,
    pub releases: u64,
    pub held_at_end: bool,
}

impl From<&WakeLockProbe> for LockUsage {
    fn from(probe: &WakeLockProbe) -> Self {
        LockUsage {
            acquisitions: probe.acquisitions(),
            releases: probe.releases(),
            held_at_end: probe.is_held(),
        }
    }
}

/// Summary of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub seed: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Whether every request had an outcome before shutdown.
    pub settled: bool,
    pub outcomes: BTreeMap<RequestKind, KindOutcomes>,
    /// Bug status transitions, in order.
    pub bug_status_changes: Vec<BugStatus>,
    pub indications_delivered: u64,
    pub primary_wake_lock: LockUsage,
    pub ack_wake_lock: LockUsage,
    pub modem: ModemStats,
    /// Snapshot taken after shutdown.
    pub diagnostics: Diagnostics,
}

impl ScenarioReport {
    /// Outcomes for `kind`, zero if it was never submitted.
    pub fn outcomes_for(&self, kind: RequestKind) -> KindOutcomes {
        self.outcomes.get(&kind).cloned().unwrap_or_default()
    }

    /// Encode as pretty JSON.
    pub fn to_json(&self) -> SimResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Scenario {} (seed {})", self.scenario, self.seed)?;
        writeln!(f, "  started:  {}", self.started_at.to_rfc3339())?;
        writeln!(f, "  duration: {} ms", self.duration_ms)?;
        if !self.settled {
            writeln!(f, "  WARNING: requests were still pending at shutdown")?;
        }
        writeln!(
            f,
            "  {:<38} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6}",
            "kind", "sent", "ok", "rej", "unsup", "tmout", "chan"
        )?;
        for (kind, o) in &self.outcomes {
            writeln!(
                f,
                "  {:<38} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6}",
                kind.as_label(),
                o.submitted,
                o.ok,
                o.rejected,
                o.unsupported,
                o.timed_out,
                o.channel_unavailable
            )?;
        }
        let totals = &self.diagnostics.totals;
        writeln!(
            f,
            "  fallbacks: {}  stale responses: {}  acks sent: {}  lock timeouts: {}",
            totals.fallbacks, totals.stale_responses, totals.acks_sent, totals.wake_lock_timeouts
        )?;
        writeln!(
            f,
            "  primary wake lock: {} acquired, {} released",
            self.primary_wake_lock.acquisitions, self.primary_wake_lock.releases
        )?;
        writeln!(f, "  indications delivered: {}", self.indications_delivered)?;
        if self.bug_status_changes.is_empty() {
            write!(f, "  bug status: {}", self.diagnostics.bug_detector.status)
        } else {
            let changes: Vec<String> = self.bug_status_changes.iter().map(|s| s.to_string()).collect();
            write!(f, "  bug status: {}", changes.join(" -> "))
        }
    }
}

// ============================================================================
// Runner
// ============================================================================

#[derive(Default)]
struct Tally {
    outcomes: BTreeMap<RequestKind, KindOutcomes>,
    outstanding: u64,
}

/// Outcome bookkeeping shared with completion callbacks.
#[derive(Default)]
struct Ledger {
    tally: Mutex<Tally>,
    settled: Condvar,
}

impl Ledger {
    fn submitted(&self, kind: RequestKind) {
        let mut tally = self.tally.lock();
        tally.outcomes.entry(kind).or_default().submitted += 1;
        tally.outstanding += 1;
    }

    fn completed(&self, kind: RequestKind, result: &RequestResult<Bytes>) {
        let mut tally = self.tally.lock();
        tally.outcomes.entry(kind).or_default().record(result);
        tally.outstanding = tally.outstanding.saturating_sub(1);
        if tally.outstanding == 0 {
            self.settled.notify_all();
        }
    }

    /// Block until nothing is outstanding or `timeout` passes.
    fn settle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut tally = self.tally.lock();
        while tally.outstanding > 0 {
            if self.settled.wait_until(&mut tally, deadline).timed_out() {
                return tally.outstanding == 0;
            }
        }
        true
    }
}

/// Play `scenario` against a fresh bridge and simulated modem.
///
/// `seed` overrides the scenario's own seed. The bridge is shut down at the
/// end, so any request still pending reports `ChannelUnavailable`.
pub fn run_scenario(scenario: &Scenario, seed: Option<u64>) -> SimResult<ScenarioReport> {
    scenario.validate()?;
    let seed = seed.or(scenario.seed).unwrap_or(0);
    let settle_timeout = Duration::from_millis(scenario.settle_timeout_ms);
    let started_at = Utc::now();
    let start = Instant::now();

    let (primary, primary_probe) = RecordingWakeLock::new();
    let (ack, ack_probe) = RecordingWakeLock::new();

    let (modem, backend) = SimulatedModem::new(scenario.bridge.name.clone());
    let bridge = spawn_bridge(scenario.bridge.clone(), WakeLocks::new(primary, ack), |_sink| modem)?;
    let control = backend.start(scenario.modem.clone(), seed, bridge.sink())?;

    let statuses = bridge.subscribe_bug_status()?;
    let indications = bridge.subscribe_indications()?;
    let ledger = Arc::new(Ledger::default());
    let attribution = Attribution::new(scenario.name.clone());

    info!(scenario = %scenario.name, seed, steps = scenario.steps.len(), "Running scenario");

    for (index, step) in scenario.steps.iter().enumerate() {
        debug!(step = index, ?step, "Scenario step");
        match step {
            Step::Submit { kind, count, payload } => {
                let payload = Bytes::from(payload.clone().into_bytes());
                for _ in 0..*count {
                    let ledger_cb = Arc::clone(&ledger);
                    let kind = *kind;
                    ledger.submitted(kind);
                    bridge.submit(kind, payload.clone(), attribution.clone(), move |result| {
                        ledger_cb.completed(kind, &result);
                    })?;
                }
            }
            Step::Wait { ms } => thread::sleep(Duration::from_millis(*ms)),
            Step::Settle => {
                if !ledger.settle(settle_timeout) {
                    warn!(step = index, "Settle timed out");
                }
            }
            Step::Indicate { code, ack_expected } => {
                control.indicate(*code, Bytes::new(), *ack_expected);
            }
            Step::ChannelLost => {
                control.crash();
                bridge.channel_lost()?;
            }
            Step::ChannelRestart => {
                control.restart();
                bridge.channel_restarted()?;
            }
        }
    }

    let settled = ledger.settle(settle_timeout);
    if !settled {
        warn!(scenario = %scenario.name, "Requests still pending at end of scenario");
    }
    let diagnostics = bridge.shutdown()?;

    let tally = std::mem::take(&mut *ledger.tally.lock());
    let report = ScenarioReport {
        scenario: scenario.name.clone(),
        seed,
        started_at,
        duration_ms: start.elapsed().as_millis() as u64,
        settled,
        outcomes: tally.outcomes,
        bug_status_changes: statuses.try_iter().collect(),
        indications_delivered: indications.try_iter().count() as u64,
        primary_wake_lock: LockUsage::from(&primary_probe),
        ack_wake_lock: LockUsage::from(&ack_probe),
        modem: control.stats(),
        diagnostics,
    };

    info!(
        scenario = %report.scenario,
        duration_ms = report.duration_ms,
        completed = report.diagnostics.totals.completed(),
        "Scenario finished"
    );
    Ok(report)
}
