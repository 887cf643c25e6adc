//! Metrics for the radio bridge.
//!
//! Every metric the bridge emits is declared here as a const [`Metric`] so that
//! names, units and label keys live in one place. The crate re-exports the
//! `metrics` facade; install whichever recorder you like before starting a
//! bridge (the optional `prometheus` feature pulls in the Prometheus exporter).
//!
//! # Example
//!
//! ```rust,ignore
//! use radiobridge_metrics::{describe_metrics, metric_defs, MetricLabels};
//!
//! describe_metrics();
//!
//! let labels = MetricLabels::new("radio0").with_kind("send_sms");
//! metric_defs::REQUESTS_SUBMITTED.increment(&labels.to_labels(), 1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, IntoLabels, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonically increasing.
    Counter,
    /// Goes up and down.
    Gauge,
    /// Distribution of samples.
    Histogram,
}

impl MetricKind {
    /// Lowercase name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// ```rust
/// use radiobridge_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const RESETS: Metric = Metric::counter("radiobridge.example.resets")
///     .with_description("Times the example was reset")
///     .with_unit(Unit::Count)
///     .with_labels(&["instance"]);
///
/// assert_eq!(RESETS.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// Dotted metric name.
    pub name: &'static str,
    /// Counter, gauge or histogram.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// Unit of measurement, if any.
    pub unit: Option<Unit>,
    /// Label keys this metric is recorded with.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Declare a counter.
    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    /// Declare a gauge.
    pub const fn gauge(name: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    /// Declare a histogram.
    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    /// Set the description.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Set the unit.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Set the label keys.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Register this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => describe_counter!(self.name, unit, self.description),
            (MetricKind::Counter, None) => describe_counter!(self.name, self.description),
            (MetricKind::Gauge, Some(unit)) => describe_gauge!(self.name, unit, self.description),
            (MetricKind::Gauge, None) => describe_gauge!(self.name, self.description),
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description)
            }
            (MetricKind::Histogram, None) => describe_histogram!(self.name, self.description),
        }
    }

    /// Increment a counter.
    pub fn increment(&self, labels: impl IntoLabels, value: u64) {
        debug_assert_eq!(self.kind, MetricKind::Counter, "{} is not a counter", self.name);
        metrics::counter!(self.name, labels).increment(value);
    }

    /// Set a gauge.
    pub fn set(&self, labels: impl IntoLabels, value: f64) {
        debug_assert_eq!(self.kind, MetricKind::Gauge, "{} is not a gauge", self.name);
        metrics::gauge!(self.name, labels).set(value);
    }

    /// Record a histogram sample.
    pub fn record(&self, labels: impl IntoLabels, value: f64) {
        debug_assert_eq!(self.kind, MetricKind::Histogram, "{} is not a histogram", self.name);
        metrics::histogram!(self.name, labels).record(value);
    }
}

/// All metric definitions for the bridge.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Labels present on every bridge metric.
    pub const INSTANCE_LABELS: &[&str] = &["instance"];

    // ========================================================================
    // Request lifecycle
    // ========================================================================

    /// Requests handed to the channel (including fallback resubmissions).
    ///
    /// Labels: instance, kind, version
    pub const REQUESTS_SUBMITTED: Metric = Metric::counter("radiobridge.request.submitted")
        .with_description("Requests handed to the hardware channel")
        .with_unit(Unit::Count)
        .with_labels(&["instance", "kind", "version"]);

    /// Requests that reached a terminal outcome.
    ///
    /// Labels: instance, kind, outcome (`ok`, `unsupported`, `rejected`,
    /// `timed_out`, `channel_unavailable`)
    pub const REQUESTS_COMPLETED: Metric = Metric::counter("radiobridge.request.completed")
        .with_description("Requests that reached a terminal outcome")
        .with_unit(Unit::Count)
        .with_labels(&["instance", "kind", "outcome"]);

    /// Time from first submission to terminal outcome.
    ///
    /// Labels: instance, kind
    pub const REQUEST_LATENCY: Metric = Metric::histogram("radiobridge.request.latency_ms")
        .with_description("Time from first submission to terminal outcome in milliseconds")
        .with_unit(Unit::Milliseconds)
        .with_labels(&["instance", "kind"]);

    /// Version fallbacks performed after an "unsupported" signal.
    ///
    /// Labels: instance, kind, from, to
    pub const VERSION_FALLBACKS: Metric = Metric::counter("radiobridge.compat.fallbacks")
        .with_description("Requests resubmitted at a lower HAL version")
        .with_unit(Unit::Count)
        .with_labels(&["instance", "kind", "from", "to"]);

    /// Responses that matched no pending request.
    ///
    /// Labels: instance
    pub const STALE_RESPONSES: Metric = Metric::counter("radiobridge.response.stale")
        .with_description("Responses whose serial matched no pending request")
        .with_unit(Unit::Count)
        .with_labels(INSTANCE_LABELS);

    /// Number of requests awaiting a response.
    ///
    /// Labels: instance
    pub const PENDING_REQUESTS: Metric = Metric::gauge("radiobridge.pending.count")
        .with_description("Requests awaiting a response")
        .with_unit(Unit::Count)
        .with_labels(INSTANCE_LABELS);

    // ========================================================================
    // Wake locks
    // ========================================================================

    /// Times a wake lock went from released to held.
    ///
    /// Labels: instance, lock (`primary` or `ack`)
    pub const WAKELOCK_ACQUIRED: Metric = Metric::counter("radiobridge.wakelock.acquired")
        .with_description("Wake lock acquisitions")
        .with_unit(Unit::Count)
        .with_labels(&["instance", "lock"]);

    /// Times a wake lock was released by its ceiling timer while work was outstanding.
    ///
    /// Labels: instance, lock
    pub const WAKELOCK_TIMEOUTS: Metric = Metric::counter("radiobridge.wakelock.timeouts")
        .with_description("Wake locks force-released by their ceiling timer")
        .with_unit(Unit::Count)
        .with_labels(&["instance", "lock"]);

    /// How long a wake lock stayed held.
    ///
    /// Labels: instance, lock
    pub const WAKELOCK_HELD: Metric = Metric::histogram("radiobridge.wakelock.held_ms")
        .with_description("Wake lock hold duration in milliseconds")
        .with_unit(Unit::Milliseconds)
        .with_labels(&["instance", "lock"]);

    // ========================================================================
    // Channel
    // ========================================================================

    /// Acknowledgement frames sent to the modem.
    ///
    /// Labels: instance
    pub const ACKS_SENT: Metric = Metric::counter("radiobridge.channel.acks_sent")
        .with_description("Acknowledgement frames sent to the modem")
        .with_unit(Unit::Count)
        .with_labels(INSTANCE_LABELS);

    /// Unsolicited indications received.
    ///
    /// Labels: instance
    pub const INDICATIONS_RECEIVED: Metric = Metric::counter("radiobridge.channel.indications")
        .with_description("Unsolicited indications received from the modem")
        .with_unit(Unit::Count)
        .with_labels(INSTANCE_LABELS);

    // ========================================================================
    // Bug detector
    // ========================================================================

    /// Bug detector status transitions.
    ///
    /// Labels: instance, status
    pub const BUG_STATUS_CHANGES: Metric = Metric::counter("radiobridge.bug.status_changes")
        .with_description("Radio bug detector status transitions")
        .with_unit(Unit::Count)
        .with_labels(&["instance", "status"]);

    /// Returns a slice of all defined metrics.
    pub const ALL: &[&Metric] = &[
        &REQUESTS_SUBMITTED,
        &REQUESTS_COMPLETED,
        &REQUEST_LATENCY,
        &VERSION_FALLBACKS,
        &STALE_RESPONSES,
        &PENDING_REQUESTS,
        &WAKELOCK_ACQUIRED,
        &WAKELOCK_TIMEOUTS,
        &WAKELOCK_HELD,
        &ACKS_SENT,
        &INDICATIONS_RECEIVED,
        &BUG_STATUS_CHANGES,
    ];
}

/// Labels identifying one bridge instance, optionally narrowed to a request kind.
///
/// ```rust
/// use radiobridge_metrics::MetricLabels;
///
/// let labels = MetricLabels::new("radio1").with_kind("send_sms");
/// let pairs = labels.to_labels();
/// assert!(pairs.contains(&("instance", "radio1".to_string())));
/// assert!(pairs.contains(&("kind", "send_sms".to_string())));
/// ```
#[derive(Debug, Clone)]
pub struct MetricLabels {
    /// Bridge instance name (one per modem).
    pub instance: String,
    /// Request kind label, when the metric is per kind.
    pub kind: Option<&'static str>,
}

impl MetricLabels {
    /// Labels for a bridge instance.
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            kind: None,
        }
    }

    /// Narrow to one request kind.
    pub fn with_kind(&self, kind: &'static str) -> Self {
        Self {
            instance: self.instance.clone(),
            kind: Some(kind),
        }
    }

    /// Convert to `metrics` label pairs.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        let mut labels = vec![("instance", self.instance.clone())];
        if let Some(kind) = self.kind {
            labels.push(("kind", kind.to_string()));
        }
        labels
    }

    /// Label pairs with extra pairs appended.
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }
}

/// Register descriptions of every bridge metric with the installed recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

/// Install a Prometheus recorder serving `/metrics` on `addr`.
#[cfg(feature = "prometheus")]
pub fn install_prometheus(
    addr: std::net::SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_without_kind() {
        let labels = MetricLabels::new("radio0").to_labels();
        assert_eq!(labels, vec![("instance", "radio0".to_string())]);
    }

    #[test]
    fn test_labels_with_kind_and_extra() {
        let labels = MetricLabels::new("radio0").with_kind("get_sim_status");
        let pairs = labels.with(&[("outcome", "ok".to_string())]);
        assert_eq!(pairs.len(), 3);
        assert!(pairs.contains(&("kind", "get_sim_status".to_string())));
        assert!(pairs.contains(&("outcome", "ok".to_string())));
    }

    #[test]
    fn test_metric_names_are_unique_and_prefixed() {
        let mut names: Vec<&str> = metric_defs::ALL.iter().map(|m| m.name).collect();
        assert!(names.iter().all(|n| n.starts_with("radiobridge.")));
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
    }

    #[test]
    fn test_every_metric_has_instance_label() {
        for metric in metric_defs::ALL {
            assert!(metric.labels.contains(&"instance"), "{} lacks instance", metric.name);
            assert!(!metric.description.is_empty(), "{} lacks description", metric.name);
        }
    }

    #[test]
    fn test_kinds() {
        assert_eq!(metric_defs::PENDING_REQUESTS.kind, MetricKind::Gauge);
        assert_eq!(metric_defs::REQUEST_LATENCY.kind, MetricKind::Histogram);
        assert_eq!(metric_defs::REQUEST_LATENCY.unit, Some(Unit::Milliseconds));
        assert_eq!(MetricKind::Counter.to_string(), "counter");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let labels = MetricLabels::new("radio0").to_labels();
        metric_defs::STALE_RESPONSES.increment(&labels, 1);
        metric_defs::PENDING_REQUESTS.set(&labels, 3.0);
        describe_metrics();
    }
}
