//! Exporter lifecycle management.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{error, info};

use crate::config::ExporterConfig;
use crate::connection::Supervisor;
use crate::http::HttpServer;
use crate::registry::{MetricRegistry, SharedRegistry};

/// How long stopped tasks get to finish after shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Runs the gpsd supervisor, the poll timer and the HTTP server together.
///
/// The exporter stops when the stop future resolves, when the supervisor
/// hits a fatal error, or when the HTTP server fails. In the latter two cases
/// [`ExporterRunner::run`] returns the error.
pub struct ExporterRunner {
    config: ExporterConfig,
    registry: SharedRegistry,
}

impl ExporterRunner {
    pub fn new(config: ExporterConfig) -> Self {
        let registry = Arc::new(MetricRegistry::new(config.prometheus.prefix.clone()));
        Self { config, registry }
    }

    /// Get a handle to the metric registry.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Run until `stop` resolves or a component fails.
    pub async fn run<F>(self, stop: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let listen_addr: SocketAddr = self
            .config
            .prometheus
            .listen
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = Supervisor::new(self.config.gpsd.clone(), self.registry.clone());
        let poller = supervisor.poller();
        let http_server = HttpServer::new(
            self.registry.clone(),
            listen_addr,
            self.config.prometheus.path.clone(),
        );

        let mut http_task = tokio::spawn(http_server.run(shutdown_rx.clone()));
        let poller_task = tokio::spawn(poller.run(shutdown_rx.clone()));
        let mut supervisor_task = tokio::spawn(supervisor.run(shutdown_rx));

        let mut supervisor_done = None;
        let mut http_done = None;
        tokio::select! {
            _ = stop => info!("Stopping exporter"),
            joined = &mut supervisor_task => supervisor_done = Some(joined),
            joined = &mut http_task => http_done = Some(joined),
        }

        let _ = shutdown_tx.send(true);

        if supervisor_done.is_none() {
            supervisor_done = tokio::time::timeout(SHUTDOWN_GRACE, supervisor_task)
                .await
                .ok();
        }
        if http_done.is_none() {
            http_done = tokio::time::timeout(SHUTDOWN_GRACE, http_task).await.ok();
        }
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, poller_task).await;

        let stats = self.registry.stats();
        info!(
            lines_received = stats.lines_received,
            lines_short = stats.lines_short,
            records_projected = stats.records_projected,
            decode_failures = stats.decode_failures,
            commands_sent = stats.commands_sent,
            connections = stats.connections,
            series_count = self.registry.series_count(),
            "Final statistics"
        );

        let supervisor_err = task_error("gpsd supervisor", supervisor_done);
        let http_err = task_error("HTTP server", http_done);
        match supervisor_err.or(http_err) {
            Some(e) => Err(e),
            None => {
                info!("Exporter stopped");
                Ok(())
            }
        }
    }
}

/// Log and extract the failure of a finished task, if any.
fn task_error<E>(
    name: &str,
    joined: Option<std::result::Result<std::result::Result<(), E>, JoinError>>,
) -> Option<anyhow::Error>
where
    E: Into<anyhow::Error>,
{
    let err = match joined? {
        Ok(Ok(())) => return None,
        Ok(Err(e)) => e.into(),
        Err(e) => anyhow::Error::from(e),
    };
    error!(task = name, error = %err, "Task failed");
    Some(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExporterError;
    use tokio::net::TcpListener;

    fn config_for(gpsd: &TcpListener, listen: SocketAddr) -> ExporterConfig {
        let mut config = ExporterConfig::default();
        config.gpsd.address = gpsd.local_addr().unwrap().to_string();
        config.prometheus.listen = listen.to_string();
        config
    }

    async fn free_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    #[tokio::test]
    async fn test_http_bind_failure_stops_exporter() {
        let gpsd = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = config_for(&gpsd, occupied.local_addr().unwrap());

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            ExporterRunner::new(config).run(std::future::pending()),
        )
        .await
        .expect("exporter kept running without a metrics endpoint");

        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to bind"));
    }

    #[tokio::test]
    async fn test_unreachable_gpsd_stops_exporter() {
        let gpsd = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config_for(&gpsd, free_addr().await);
        drop(gpsd);
        config.gpsd.connect_timeout_secs = 1;

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            ExporterRunner::new(config).run(std::future::pending()),
        )
        .await
        .unwrap()
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ExporterError>(),
            Some(ExporterError::Connect { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_signal_shuts_down_cleanly() {
        let gpsd = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = config_for(&gpsd, free_addr().await);
        let runner = ExporterRunner::new(config);
        let registry = runner.registry();

        let stop = async {
            let (_socket, _) = gpsd.accept().await.unwrap();
            while !registry.stats().connected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };

        let result = tokio::time::timeout(Duration::from_secs(5), runner.run(stop))
            .await
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(registry.stats().connections, 1);
    }
}
