//! Classification of gpsd JSON lines.
//!
//! Every line is parsed twice: once as an untyped value to read its `class`,
//! then per POLL array into the concrete report shape.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::error::{ExporterError, Result};
use crate::projector::Projector;
use crate::registry::{MetricSink, VERSION_HELP};
use crate::schema::{Gst, Osc, POLL_BOOKKEEPING_KEYS, Pps, Record, Shape, Sky, Toff, Tpv};

/// Lines shorter than this are keepalive noise and never parsed.
pub const MIN_LINE_LEN: usize = 16;

/// Label carrying the daemon release on the version gauge vector.
pub const VERSION_LABEL: &str = "version";

/// What a single line turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Below [`MIN_LINE_LEN`], dropped unparsed.
    TooShort,
    /// A message class the exporter does not handle.
    Ignored,
    /// A VERSION banner; carries the label that was set.
    Version(String),
    /// A POLL response.
    Poll(PollSummary),
}

/// Counters for one POLL response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Reports projected across all arrays.
    pub records: usize,
    /// Arrays that did not decode into their shape and were skipped.
    pub decode_failures: usize,
    /// Keys that are neither a known shape nor bookkeeping.
    pub unknown_keys: usize,
}

/// Routes lines to the projector.
pub struct Dispatcher<S> {
    sink: Arc<S>,
    prefix: String,
}

impl<S: MetricSink> Dispatcher<S> {
    pub fn new(sink: Arc<S>, prefix: impl Into<String>) -> Self {
        Self {
            sink,
            prefix: prefix.into(),
        }
    }

    /// Handle one line as read from gpsd.
    ///
    /// Returns an error for input that cannot be trusted: a line that is not
    /// JSON, a time stamp that does not parse, or a schema mismatch.
    pub fn handle_line(&self, line: &str) -> Result<Outcome> {
        if line.len() < MIN_LINE_LEN {
            trace!(line, "Dropping short line");
            return Ok(Outcome::TooShort);
        }

        let message: Value = serde_json::from_str(line).map_err(ExporterError::MalformedLine)?;

        match message.get("class").and_then(Value::as_str) {
            Some("VERSION") => self.handle_version(&message),
            Some("POLL") => Ok(Outcome::Poll(self.handle_poll(&message)?)),
            class => {
                trace!(?class, "Ignoring message class");
                Ok(Outcome::Ignored)
            }
        }
    }

    fn handle_version(&self, message: &Value) -> Result<Outcome> {
        let Some(release) = message.get("release").and_then(Value::as_str) else {
            warn!(%message, "VERSION message without a release");
            return Ok(Outcome::Ignored);
        };

        let label = format!("GPSD v{}", release);
        let name = format!("{}_version", self.prefix);
        self.sink
            .set_gauge_vec(&name, VERSION_HELP, &[(VERSION_LABEL, label.as_str())], 1.0)?;

        info!(version = %label, "Connected to gpsd");
        Ok(Outcome::Version(label))
    }

    fn handle_poll(&self, message: &Value) -> Result<PollSummary> {
        let mut summary = PollSummary::default();
        let Some(object) = message.as_object() else {
            return Ok(summary);
        };

        for (key, value) in object {
            match Shape::from_key(key) {
                Some(Shape::Tpv) => self.project_all::<Tpv>(value, &mut summary)?,
                Some(Shape::Sky) => self.project_all::<Sky>(value, &mut summary)?,
                Some(Shape::Gst) => self.project_all::<Gst>(value, &mut summary)?,
                Some(Shape::Pps) => self.project_all::<Pps>(value, &mut summary)?,
                Some(Shape::Toff) => self.project_all::<Toff>(value, &mut summary)?,
                Some(Shape::Osc) => self.project_all::<Osc>(value, &mut summary)?,
                None if POLL_BOOKKEEPING_KEYS.contains(&key.as_str()) => {}
                None => {
                    info!(key = %key, "Unknown poll type");
                    summary.unknown_keys += 1;
                }
            }
        }

        debug!(
            records = summary.records,
            decode_failures = summary.decode_failures,
            "Processed POLL response"
        );
        Ok(summary)
    }

    fn project_all<R: Record>(&self, value: &Value, summary: &mut PollSummary) -> Result<()> {
        let records = match Option::<Vec<R>>::deserialize(value) {
            Ok(records) => records.unwrap_or_default(),
            Err(e) => {
                warn!(shape = R::NAMESPACE, error = %e, "Failed to decode POLL array");
                summary.decode_failures += 1;
                return Ok(());
            }
        };

        let projector = Projector::new(&*self.sink, &self.prefix);
        for record in &records {
            projector.project(record)?;
            summary.records += 1;
        }

        trace!(shape = R::NAMESPACE, count = records.len(), "Projected reports");
        Ok(())
    }
}
