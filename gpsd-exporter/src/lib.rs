//! Prometheus exporter for gpsd.
//!
//! This crate keeps a watch session open on the gpsd control socket, polls it
//! periodically and exposes every reported field as a gauge via an HTTP
//! `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │      gpsd       │────>│   Supervisor    │────>│   Dispatcher    │────>│    Registry     │
//! │  (tcp/2947)     │<────│  + Poller       │     │  + Projector    │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! Every line read from gpsd is classified by its `class` field. `VERSION`
//! updates the version info gauge; `POLL` carries arrays of TPV, SKY, GST,
//! PPS, TOFF and OSC reports which are projected field by field into gauges
//! named `<prefix>_<namespace>_<key>`. Satellites become gauge vectors labeled
//! by PRN.
//!
//! # Usage
//!
//! ```bash
//! gpsd-exporter --config config.json5
//! gpsd-exporter --gpsd gps.local:2947 --listen 127.0.0.1:9100 -v
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod projector;
pub mod registry;
pub mod runner;
pub mod schema;

pub use config::ExporterConfig;
pub use connection::{Poller, Supervisor, WATCH_POLL_COMMAND};
pub use dispatch::{Dispatcher, Outcome};
pub use error::{ExporterError, Result};
pub use http::HttpServer;
pub use projector::Projector;
pub use registry::{MetricRegistry, MetricSink, SharedRegistry};
pub use runner::ExporterRunner;
