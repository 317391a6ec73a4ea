//! Process-wide metric registry backed by `prometheus-client`.
//!
//! Gauges are registered lazily the first time a field is seen and are never
//! removed, so the set of exported names only grows for the life of the
//! process.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tracing::{debug, error, trace};

use crate::error::{ExporterError, Result};

/// Gauge holding an `f64` value.
pub type FloatGauge = Gauge<f64, AtomicU64>;

/// Ordered label pairs of one series.
pub type LabelSet = Vec<(String, String)>;

/// Gauge vector keyed by label set.
pub type GaugeFamily = Family<LabelSet, FloatGauge>;

/// Help text of the version info gauge vector.
pub const VERSION_HELP: &str = "gpsd version";

/// Help text of the last poll gauge.
pub const LAST_POLL_HELP: &str =
    "Last time the gpsd daemon was polled, in seconds since the Unix epoch";

/// Destination for projected values.
pub trait MetricSink: Send + Sync {
    /// Create `name` on first use and set it to `value`.
    fn set_gauge(&self, name: &str, help: &str, value: f64) -> Result<()>;

    /// Create the gauge vector `name` on first use and set the series
    /// identified by `labels` to `value`.
    fn set_gauge_vec(
        &self,
        name: &str,
        help: &str,
        labels: &[(&str, &str)],
        value: f64,
    ) -> Result<()>;
}

/// Exporter statistics.
#[derive(Debug, Clone, Default)]
pub struct ExporterStats {
    /// Lines read from gpsd.
    pub lines_received: u64,
    /// Lines dropped for being shorter than the sanity threshold.
    pub lines_short: u64,
    /// Reports handed to the projector.
    pub records_projected: u64,
    /// POLL arrays that failed to decode into their shape.
    pub decode_failures: u64,
    /// Watch/poll commands written to gpsd.
    pub commands_sent: u64,
    /// Sessions established, including the first one.
    pub connections: u64,
    /// Whether a session is currently up.
    pub connected: bool,
}

struct Inner {
    registry: Registry,
    gauges: HashMap<String, FloatGauge>,
    families: HashMap<String, GaugeFamily>,
    series: HashMap<(String, LabelSet), FloatGauge>,
}

impl Inner {
    fn ensure_unused(&self, name: &str, wanted: &str) -> Result<()> {
        let existing = if self.gauges.contains_key(name) {
            Some("gauge")
        } else if self.families.contains_key(name) {
            Some("gauge vector")
        } else {
            None
        };

        match existing {
            Some(kind) => Err(ExporterError::SchemaMismatch {
                metric: name.to_string(),
                reason: format!("already registered as a {}, cannot become a {}", kind, wanted),
            }),
            None => Ok(()),
        }
    }

    fn gauge(&mut self, name: &str, help: &str) -> Result<FloatGauge> {
        if let Some(gauge) = self.gauges.get(name) {
            return Ok(gauge.clone());
        }
        self.ensure_unused(name, "gauge")?;

        debug!(metric = %name, "Registering gauge");
        let gauge = FloatGauge::default();
        self.registry.register(name, help, gauge.clone());
        self.gauges.insert(name.to_string(), gauge.clone());
        Ok(gauge)
    }

    fn family(&mut self, name: &str, help: &str) -> Result<GaugeFamily> {
        if let Some(family) = self.families.get(name) {
            return Ok(family.clone());
        }
        self.ensure_unused(name, "gauge vector")?;

        debug!(metric = %name, "Registering gauge vector");
        let family = GaugeFamily::default();
        self.registry.register(name, help, family.clone());
        self.families.insert(name.to_string(), family.clone());
        Ok(family)
    }

    fn series(&mut self, name: &str, help: &str, labels: &[(&str, &str)]) -> Result<FloatGauge> {
        let labels: LabelSet = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let key = (name.to_string(), labels);
        if let Some(gauge) = self.series.get(&key) {
            return Ok(gauge.clone());
        }

        let family = self.family(name, help)?;
        let gauge = family.get_or_create(&key.1).clone();
        self.series.insert(key, gauge.clone());
        Ok(gauge)
    }
}

/// Thread-safe metric registry shared by the reader, the poll timer and the
/// HTTP endpoint.
pub struct MetricRegistry {
    prefix: String,
    inner: Mutex<Inner>,
    last_poll: FloatGauge,
    stats: RwLock<ExporterStats>,
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<MetricRegistry>;

impl MetricRegistry {
    /// Create a registry whose built-in metrics use `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let mut registry = Registry::default();

        let last_poll_name = format!("{}_last_poll", prefix);
        let last_poll = FloatGauge::default();
        registry.register(&last_poll_name, LAST_POLL_HELP, last_poll.clone());

        let version_name = format!("{}_version", prefix);
        let version = GaugeFamily::default();
        registry.register(&version_name, VERSION_HELP, version.clone());

        let inner = Inner {
            registry,
            gauges: HashMap::from([(last_poll_name, last_poll.clone())]),
            families: HashMap::from([(version_name, version)]),
            series: HashMap::new(),
        };

        Self {
            prefix,
            inner: Mutex::new(inner),
            last_poll,
            stats: RwLock::new(ExporterStats::default()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Name of the version info gauge vector.
    pub fn version_metric(&self) -> String {
        format!("{}_version", self.prefix)
    }

    /// Record that a poll command was written just now.
    pub fn mark_polled(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        self.last_poll.set(now);
    }

    /// Current value of a plain gauge.
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.inner.lock().gauges.get(name).map(|g| g.get())
    }

    /// Current value of one series of a gauge vector.
    pub fn gauge_vec_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let labels: LabelSet = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.inner
            .lock()
            .series
            .get(&(name.to_string(), labels))
            .map(|g| g.get())
    }

    /// Whether a metric with this name has been registered.
    pub fn contains(&self, name: &str) -> bool {
        let inner = self.inner.lock();
        inner.gauges.contains_key(name) || inner.families.contains_key(name)
    }

    /// All registered metric names, sorted.
    pub fn metric_names(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut names: Vec<String> = inner
            .gauges
            .keys()
            .chain(inner.families.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Number of exported series (plain gauges plus vector children).
    pub fn series_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.gauges.len() + inner.series.len()
    }

    /// Get exporter statistics.
    pub fn stats(&self) -> ExporterStats {
        self.stats.read().clone()
    }

    pub(crate) fn update_stats(&self, f: impl FnOnce(&mut ExporterStats)) {
        f(&mut self.stats.write());
    }

    /// Render metrics in OpenMetrics text format.
    pub fn render(&self) -> String {
        let inner = self.inner.lock();
        let mut output = String::new();
        if let Err(e) = prometheus_client::encoding::text::encode(&mut output, &inner.registry) {
            error!("Failed to encode metrics: {}", e);
        }
        output
    }
}

impl MetricSink for MetricRegistry {
    fn set_gauge(&self, name: &str, help: &str, value: f64) -> Result<()> {
        let gauge = self.inner.lock().gauge(name, help)?;
        trace!(metric = %name, value, "Setting gauge");
        gauge.set(value);
        Ok(())
    }

    fn set_gauge_vec(
        &self,
        name: &str,
        help: &str,
        labels: &[(&str, &str)],
        value: f64,
    ) -> Result<()> {
        let gauge = self.inner.lock().series(name, help, labels)?;
        trace!(metric = %name, ?labels, value, "Setting gauge vector");
        gauge.set(value);
        Ok(())
    }
}
