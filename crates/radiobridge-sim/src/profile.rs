//! Behaviour of a simulated modem.
//!
//! A [`ModemProfile`] says which HAL versions the modem implements, which
//! requests it fails or ignores, and how long it takes to answer.
//!
//! ```yaml
//! max_version: "1.6"
//! kind_max_versions:
//!   setup_data_call: "1.4"
//! errors:
//!   get_barring_info: 39      # SystemErr
//! silent: [get_signal_strength]
//! latency_ms: 5
//! jitter_ms: 2
//! ack_expected_probability: 0.25
//! request_acks: true
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use rand::Rng;
use rand_distr::{Distribution, Normal};
use radiobridge_protocol::{HalVersion, RadioError, RequestKind};
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

/// How a simulated modem reacts to requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModemProfile {
    /// Highest HAL version implemented for every kind.
    pub max_version: HalVersion,
    /// Per-kind overrides of `max_version`. Only ever lowers it.
    pub kind_max_versions: BTreeMap<RequestKind, HalVersion>,
    /// Error code returned for a kind instead of success.
    pub errors: BTreeMap<RequestKind, RadioError>,
    /// Kinds that are accepted but never answered.
    pub silent: BTreeSet<RequestKind>,
    /// Mean response latency.
    pub latency_ms: u64,
    /// Standard deviation of the response latency.
    pub jitter_ms: u64,
    /// Probability that a response asks for an ack frame.
    pub ack_expected_probability: f64,
    /// Whether the modem acknowledges receipt of each request before answering.
    pub request_acks: bool,
}

impl Default for ModemProfile {
    fn default() -> Self {
        ModemProfile {
            max_version: HalVersion::V1_6,
            kind_max_versions: BTreeMap::new(),
            errors: BTreeMap::new(),
            silent: BTreeSet::new(),
            latency_ms: 1,
            jitter_ms: 0,
            ack_expected_probability: 0.0,
            request_acks: false,
        }
    }
}

/// What the modem does with one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// Answer with this code after the sampled latency.
    Respond(RadioError),
    /// Swallow the request.
    Ignore,
}

impl ModemProfile {
    /// Parse a profile from YAML.
    pub fn from_yaml_str(yaml: &str) -> SimResult<Self> {
        let profile: ModemProfile = serde_yaml::from_str(yaml)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Highest version implemented for `kind`.
    pub fn max_version_for(&self, kind: RequestKind) -> HalVersion {
        match self.kind_max_versions.get(&kind) {
            Some(version) => (*version).min(self.max_version),
            None => self.max_version,
        }
    }

    /// Decide how to react to `kind` issued at `version`.
    ///
    /// A version above what the modem implements is always refused, even for
    /// kinds that are otherwise silent or failing.
    pub fn react(&self, kind: RequestKind, version: HalVersion) -> Reaction {
        if version > self.max_version_for(kind) {
            return Reaction::Respond(RadioError::RequestNotSupported);
        }
        if self.silent.contains(&kind) {
            return Reaction::Ignore;
        }
        Reaction::Respond(self.errors.get(&kind).copied().unwrap_or(RadioError::None))
    }

    /// Sample a response latency. Negative draws clamp to zero.
    pub fn sample_latency<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.jitter_ms == 0 {
            return Duration::from_millis(self.latency_ms);
        }
        match Normal::new(self.latency_ms as f64, self.jitter_ms as f64) {
            Ok(dist) => {
                let ms = dist.sample(rng).max(0.0);
                Duration::from_micros((ms * 1000.0) as u64)
            }
            Err(_) => Duration::from_millis(self.latency_ms),
        }
    }

    /// Roll whether a response should ask for an ack.
    pub fn roll_ack_expected<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        self.ack_expected_probability > 0.0 && rng.gen_bool(self.ack_expected_probability)
    }

    /// Check the profile for inconsistencies.
    pub fn validate(&self) -> SimResult<()> {
        if !(0.0..=1.0).contains(&self.ack_expected_probability) {
            return Err(SimError::Profile(format!(
                "ack_expected_probability must be within 0..=1, got {}",
                self.ack_expected_probability
            )));
        }
        for (kind, error) in &self.errors {
            if error.is_success() {
                return Err(SimError::Profile(format!(
                    "error override for {} is the success code",
                    kind
                )));
            }
        }
        Ok(())
    }
}
