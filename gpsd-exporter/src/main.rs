//! Prometheus exporter for gpsd.

use clap::Parser;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use gpsd_exporter::config::{LogFormat, LoggingConfig};
use gpsd_exporter::{ExporterConfig, ExporterRunner};

/// Prometheus exporter for gpsd.
#[derive(Parser, Debug)]
#[command(name = "gpsd-exporter")]
#[command(about = "Export gpsd reports as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// gpsd address as host:port (overrides config).
    #[arg(short = 'd', long = "gpsd")]
    gpsd: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(short, long)]
    listen: Option<String>,

    /// Seconds between POLL commands (overrides config).
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Increase verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log level (trace, debug, info, warn, error; overrides config).
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut ExporterConfig) {
        if let Some(addr) = &self.gpsd {
            config.gpsd.address = addr.clone();
        }
        if let Some(listen) = &self.listen {
            config.prometheus.listen = listen.clone();
        }
        if let Some(secs) = self.poll_interval {
            config.gpsd.poll_interval_secs = secs;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        match self.verbose {
            0 => {}
            1 => config.logging.level = "debug".to_string(),
            _ => config.logging.level = "trace".to_string(),
        }
    }
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let log_level = logging.level.parse().unwrap_or(Level::INFO);
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("gpsd_exporter={}", log_level).parse()?)
        .add_directive(format!("hyper={}", Level::WARN).parse()?);

    match logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let terminate = async {
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };
    args.apply(&mut config);
    config.validate()?;

    init_tracing(&config.logging)?;

    info!(
        gpsd = %config.gpsd.address,
        listen = %config.prometheus.listen,
        poll_interval_secs = config.gpsd.poll_interval_secs,
        "Starting gpsd exporter"
    );

    ExporterRunner::new(config).run(shutdown_signal()).await
}
