//! Projection of decoded gpsd reports onto gauges.

use chrono::DateTime;
use tracing::trace;

use crate::error::{ExporterError, Result};
use crate::registry::MetricSink;
use crate::schema::{
    FieldKind, FieldValue, Record, SATELLITE_ID_KEY, Satellite, Sky, TIME_KEY,
};

/// Label carrying the satellite identifier on every `sat` gauge vector.
pub const PRN_LABEL: &str = "prn";

/// Build a metric name.
///
/// Format: `{prefix}_{namespace}_{key}`, e.g. `gpsd_tpv_lat` or `gpsd_sat_el`.
pub fn metric_name(prefix: &str, namespace: &str, key: &str) -> String {
    format!("{}_{}_{}", prefix, namespace, key)
}

/// Parse an ISO-8601 time stamp into nanoseconds since the Unix epoch.
pub fn parse_timestamp_nanos(value: &str) -> std::result::Result<f64, chrono::ParseError> {
    let ts = DateTime::parse_from_rfc3339(value)?;
    Ok(match ts.timestamp_nanos_opt() {
        Some(nanos) => nanos as f64,
        // Beyond year 2262 the i64 overflows; keep second precision
        None => ts.timestamp() as f64 * 1e9,
    })
}

/// Walks a report's field table and updates one gauge per field.
pub struct Projector<'a, S: ?Sized> {
    sink: &'a S,
    prefix: &'a str,
}

impl<'a, S: MetricSink + ?Sized> Projector<'a, S> {
    pub fn new(sink: &'a S, prefix: &'a str) -> Self {
        Self { sink, prefix }
    }

    /// Project one report. Text fields other than `time` are skipped and a
    /// satellite list fans out to [`Projector::project_satellite`].
    pub fn project<R: Record>(&self, record: &R) -> Result<()> {
        for field in R::fields() {
            let name = metric_name(self.prefix, R::NAMESPACE, field.key);
            let value = (field.get)(record);
            check_kind(&name, field.kind, &value)?;

            match value {
                FieldValue::Boolean(b) => {
                    self.sink.set_gauge(&name, field.help, bool_value(b))?;
                }
                FieldValue::Number(n) => {
                    self.sink.set_gauge(&name, field.help, n)?;
                }
                FieldValue::Text(text) if field.key == TIME_KEY => {
                    // No fix yet
                    if text.is_empty() {
                        continue;
                    }
                    let nanos = parse_timestamp_nanos(text).map_err(|source| {
                        ExporterError::InvalidTimestamp {
                            metric: name.clone(),
                            value: text.to_string(),
                            source,
                        }
                    })?;
                    self.sink.set_gauge(&name, field.help, nanos)?;
                }
                FieldValue::Text(_) => {
                    trace!(metric = %name, "Skipping text field");
                }
                FieldValue::Satellites(satellites) => {
                    if R::NAMESPACE != Sky::NAMESPACE {
                        return Err(ExporterError::SchemaMismatch {
                            metric: name,
                            reason: "satellite list outside a SKY report".to_string(),
                        });
                    }
                    for satellite in satellites {
                        self.project_satellite(satellite)?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Project one satellite as gauge vectors labeled by its PRN.
    pub fn project_satellite(&self, satellite: &Satellite) -> Result<()> {
        let prn = format!("{}", satellite.prn as i64);
        let labels = [(PRN_LABEL, prn.as_str())];

        for field in Satellite::fields() {
            if field.key == SATELLITE_ID_KEY {
                continue;
            }

            let name = metric_name(self.prefix, Satellite::NAMESPACE, field.key);
            let value = (field.get)(satellite);
            check_kind(&name, field.kind, &value)?;

            let value = match value {
                FieldValue::Boolean(b) => bool_value(b),
                FieldValue::Number(n) => n,
                other => {
                    return Err(ExporterError::SchemaMismatch {
                        metric: name,
                        reason: format!("unsupported {} field on a satellite", other.kind().as_str()),
                    });
                }
            };
            self.sink.set_gauge_vec(&name, field.help, &labels, value)?;
        }

        Ok(())
    }
}

fn bool_value(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

fn check_kind(name: &str, declared: FieldKind, value: &FieldValue<'_>) -> Result<()> {
    if value.kind() == declared {
        return Ok(());
    }
    Err(ExporterError::SchemaMismatch {
        metric: name.to_string(),
        reason: format!(
            "declared as {} but read as {}",
            declared.as_str(),
            value.kind().as_str()
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MetricRegistry;
    use crate::schema::{Gst, Osc, Tpv};

    fn tpv(json: &str) -> Tpv {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_metric_name() {
        assert_eq!(metric_name("gpsd", "tpv", "lat"), "gpsd_tpv_lat");
        assert_eq!(metric_name("gpsd", "sat", "el"), "gpsd_sat_el");
        assert_ne!(
            metric_name("gpsd", "tpv", "lat"),
            metric_name("gpsd", "gst", "lat")
        );
    }

    #[test]
    fn test_parse_timestamp_nanos() {
        assert_eq!(parse_timestamp_nanos("1970-01-01T00:00:00.000Z").unwrap(), 0.0);
        assert_eq!(
            parse_timestamp_nanos("2024-01-01T00:00:00.000Z").unwrap(),
            1_704_067_200_000_000_000.0
        );
        assert_eq!(
            parse_timestamp_nanos("1970-01-01T00:00:01.5Z").unwrap(),
            1_500_000_000.0
        );
        assert!(parse_timestamp_nanos("yesterday").is_err());
    }

    #[test]
    fn test_project_numbers_and_skips_text() {
        let registry = MetricRegistry::new("gpsd");
        let projector = Projector::new(&registry, "gpsd");

        projector
            .project(&tpv(r#"{"device":"/dev/ttyACM0","mode":3,"lat":52.5,"datum":"WGS84"}"#))
            .unwrap();

        assert_eq!(registry.gauge("gpsd_tpv_mode"), Some(3.0));
        assert_eq!(registry.gauge("gpsd_tpv_lat"), Some(52.5));
        // Absent numeric fields still produce a zero gauge
        assert_eq!(registry.gauge("gpsd_tpv_speed"), Some(0.0));
        assert!(!registry.contains("gpsd_tpv_device"));
        assert!(!registry.contains("gpsd_tpv_datum"));
    }

    #[test]
    fn test_project_latest_value_wins() {
        let registry = MetricRegistry::new("gpsd");
        let projector = Projector::new(&registry, "gpsd");

        projector.project(&tpv(r#"{"lat":52.5}"#)).unwrap();
        projector.project(&tpv(r#"{"lat":48.1}"#)).unwrap();

        assert_eq!(registry.gauge("gpsd_tpv_lat"), Some(48.1));
    }

    #[test]
    fn test_project_time() {
        let registry = MetricRegistry::new("gpsd");
        let projector = Projector::new(&registry, "gpsd");

        projector
            .project(&tpv(r#"{"time":"2024-01-01T00:00:00.000Z"}"#))
            .unwrap();

        assert_eq!(
            registry.gauge("gpsd_tpv_time"),
            Some(1_704_067_200_000_000_000.0)
        );
    }

    #[test]
    fn test_project_empty_time_is_noop() {
        let registry = MetricRegistry::new("gpsd");
        let projector = Projector::new(&registry, "gpsd");

        projector.project(&Gst::default()).unwrap();

        assert!(!registry.contains("gpsd_gst_time"));
        assert_eq!(registry.gauge("gpsd_gst_rms"), Some(0.0));
    }

    #[test]
    fn test_project_bad_time_is_fatal() {
        let registry = MetricRegistry::new("gpsd");
        let projector = Projector::new(&registry, "gpsd");

        let err = projector
            .project(&tpv(r#"{"time":"not a time"}"#))
            .unwrap_err();

        assert!(matches!(err, ExporterError::InvalidTimestamp { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_project_booleans() {
        let registry = MetricRegistry::new("gpsd");
        let projector = Projector::new(&registry, "gpsd");

        let osc: Osc =
            serde_json::from_str(r#"{"running":true,"reference":false,"delta":-12}"#).unwrap();
        projector.project(&osc).unwrap();

        assert_eq!(registry.gauge("gpsd_osc_running"), Some(1.0));
        assert_eq!(registry.gauge("gpsd_osc_reference"), Some(0.0));
        assert_eq!(registry.gauge("gpsd_osc_disciplined"), Some(0.0));
        assert_eq!(registry.gauge("gpsd_osc_delta"), Some(-12.0));
    }

    #[test]
    fn test_project_satellites_by_prn() {
        let registry = MetricRegistry::new("gpsd");
        let projector = Projector::new(&registry, "gpsd");

        let sky: Sky = serde_json::from_str(
            r#"{"hdop":0.9,"satellites":[
                {"PRN":5,"el":45,"az":120,"ss":38,"used":true},
                {"PRN":12,"el":10,"az":300,"ss":21,"used":false}
            ]}"#,
        )
        .unwrap();
        projector.project(&sky).unwrap();

        assert_eq!(registry.gauge("gpsd_sky_hdop"), Some(0.9));
        assert!(!registry.contains("gpsd_sky_satellites"));
        assert!(!registry.contains("gpsd_sat_PRN"));
        assert_eq!(
            registry.gauge_vec_value("gpsd_sat_el", &[("prn", "5")]),
            Some(45.0)
        );
        assert_eq!(
            registry.gauge_vec_value("gpsd_sat_el", &[("prn", "12")]),
            Some(10.0)
        );
        assert_eq!(
            registry.gauge_vec_value("gpsd_sat_used", &[("prn", "5")]),
            Some(1.0)
        );

        // Updating satellite 5 leaves 12 alone
        let update: Satellite = serde_json::from_str(r#"{"PRN":5,"el":50}"#).unwrap();
        projector.project_satellite(&update).unwrap();

        assert_eq!(
            registry.gauge_vec_value("gpsd_sat_el", &[("prn", "5")]),
            Some(50.0)
        );
        assert_eq!(
            registry.gauge_vec_value("gpsd_sat_el", &[("prn", "12")]),
            Some(10.0)
        );
    }

    #[test]
    fn test_prn_label_is_integer() {
        let registry = MetricRegistry::new("gpsd");
        let projector = Projector::new(&registry, "gpsd");

        let sat: Satellite = serde_json::from_str(r#"{"PRN":133.0,"ss":30}"#).unwrap();
        projector.project_satellite(&sat).unwrap();

        assert_eq!(
            registry.gauge_vec_value("gpsd_sat_ss", &[("prn", "133")]),
            Some(30.0)
        );
    }

    #[test]
    fn test_name_clash_is_fatal() {
        let registry = MetricRegistry::new("gpsd");
        registry
            .set_gauge_vec("gpsd_tpv_lat", "clash", &[("prn", "1")], 1.0)
            .unwrap();

        let projector = Projector::new(&registry, "gpsd");
        let err = projector.project(&tpv(r#"{"lat":1}"#)).unwrap_err();
        assert!(matches!(err, ExporterError::SchemaMismatch { .. }));
    }
}
