//! gpsd session supervision.
//!
//! Two tasks share one TCP session:
//!
//! - [`Supervisor`] dials gpsd, sends the watch/poll handshake, reads
//!   newline-delimited JSON and redials when the session drops.
//! - [`Poller`] re-sends the watch/poll command on a fixed interval.
//!
//! Both write through the same [`Link`], whose mutex serializes writes to the
//! socket.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, Notify, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::GpsdConfig;
use crate::dispatch::{Dispatcher, Outcome};
use crate::error::{ExporterError, Result};
use crate::registry::{MetricRegistry, SharedRegistry};

/// Enables watch mode and asks for an immediate poll.
pub const WATCH_POLL_COMMAND: &str = "?WATCH={\"enable\": true}\n?POLL;\n";

/// Longest line accepted from gpsd, terminator excluded.
pub const MAX_LINE_LEN: usize = 64 * 1024;

struct Session {
    writer: OwnedWriteHalf,
    /// Wakes the reader when a poll write fails on this session.
    broken: Arc<Notify>,
}

/// Shared write side of the current gpsd session, if any.
#[derive(Clone, Default)]
pub struct Link {
    slot: Arc<Mutex<Option<Session>>>,
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a session is currently attached.
    pub async fn is_connected(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Send the handshake on a fresh session and attach it.
    ///
    /// The slot stays empty when the handshake write fails.
    async fn open(&self, mut writer: OwnedWriteHalf, broken: Arc<Notify>) -> io::Result<()> {
        let mut slot = self.slot.lock().await;
        writer.write_all(WATCH_POLL_COMMAND.as_bytes()).await?;
        writer.flush().await?;
        *slot = Some(Session { writer, broken });
        Ok(())
    }

    /// Detach and drop the current session.
    async fn close(&self) {
        self.slot.lock().await.take();
    }

    /// Write the watch/poll command on the live session.
    ///
    /// Returns `Ok(false)` when disconnected. A failed write detaches the
    /// session and wakes its reader so it can redial.
    pub async fn send_command(&self) -> io::Result<bool> {
        let mut slot = self.slot.lock().await;
        let Some(session) = slot.as_mut() else {
            return Ok(false);
        };

        let result: io::Result<()> = async {
            session
                .writer
                .write_all(WATCH_POLL_COMMAND.as_bytes())
                .await?;
            session.writer.flush().await
        }
        .await;

        match result {
            Ok(()) => Ok(true),
            Err(e) => {
                if let Some(session) = slot.take() {
                    session.broken.notify_one();
                }
                Err(e)
            }
        }
    }
}

/// Exponential redial delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay before the next attempt; doubles up to the maximum.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Why a session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// gpsd closed the socket.
    Closed,
    Shutdown,
}

/// Owns the gpsd session lifecycle and feeds lines to the dispatcher.
pub struct Supervisor {
    config: GpsdConfig,
    registry: SharedRegistry,
    dispatcher: Dispatcher<MetricRegistry>,
    link: Link,
}

impl Supervisor {
    pub fn new(config: GpsdConfig, registry: SharedRegistry) -> Self {
        let dispatcher = Dispatcher::new(registry.clone(), registry.prefix());
        Self {
            config,
            registry,
            dispatcher,
            link: Link::new(),
        }
    }

    /// The link shared with the poll timer.
    pub fn link(&self) -> Link {
        self.link.clone()
    }

    /// Build the poll timer for this supervisor's session.
    pub fn poller(&self) -> Poller {
        Poller::new(
            self.link.clone(),
            self.registry.clone(),
            self.config.poll_interval(),
        )
    }

    /// Run until shutdown or a fatal error.
    ///
    /// Failing to reach gpsd on the very first attempt is fatal; once a
    /// session has been established, transport errors only trigger a redial.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut backoff = Backoff::new(
            Duration::from_millis(self.config.reconnect_initial_ms),
            Duration::from_millis(self.config.reconnect_max_ms),
        );
        let mut connected_once = false;

        loop {
            info!(addr = %self.config.address, "Connecting to gpsd");

            let dialed = tokio::select! {
                dialed = self.dial() => dialed,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };

            match dialed {
                Ok(stream) => {
                    connected_once = true;
                    let ended = self.session(stream, &mut backoff, &mut shutdown).await;
                    self.link.close().await;
                    self.registry.update_stats(|s| s.connected = false);

                    match ended {
                        Ok(SessionEnd::Shutdown) => break,
                        Ok(SessionEnd::Closed) => {
                            warn!(addr = %self.config.address, "gpsd closed the connection");
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            warn!(addr = %self.config.address, error = %e, "Lost connection to gpsd");
                        }
                    }
                }
                Err(e) if !connected_once => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Reconnect to gpsd failed");
                }
            }

            let delay = backoff.next_delay();
            if !delay.is_zero() {
                debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnecting");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wait_for_shutdown(&mut shutdown) => break,
                }
            }
        }

        info!("gpsd supervisor stopped");
        Ok(())
    }

    async fn dial(&self) -> Result<TcpStream> {
        let addr = &self.config.address;
        let connect = TcpStream::connect(addr.as_str());

        let stream = match self.config.connect_timeout() {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| ExporterError::ConnectTimeout(addr.clone()))?,
            None => connect.await,
        }
        .map_err(|source| ExporterError::Connect {
            addr: addr.clone(),
            source,
        })?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        Ok(stream)
    }

    async fn session(
        &self,
        stream: TcpStream,
        backoff: &mut Backoff,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd> {
        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let broken = Arc::new(Notify::new());

        self.link.open(writer, broken.clone()).await?;
        backoff.reset();
        self.registry.update_stats(|s| {
            s.connections += 1;
            s.commands_sent += 1;
            s.connected = true;
        });
        info!(addr = %self.config.address, ?peer, "Connected to gpsd, watch enabled");

        let mut lines = LineReader::new(reader);
        loop {
            let next = tokio::select! {
                next = lines.next_line_within(self.config.read_timeout()) => next?,
                _ = broken.notified() => {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "poll command could not be written",
                    )
                    .into());
                }
                _ = wait_for_shutdown(shutdown) => return Ok(SessionEnd::Shutdown),
            };

            match next {
                Some(line) => self.handle_line(&line)?,
                None => return Ok(SessionEnd::Closed),
            }
        }
    }

    fn handle_line(&self, line: &str) -> Result<()> {
        trace!(line, "Received line");
        let outcome = self.dispatcher.handle_line(line)?;

        self.registry.update_stats(|s| {
            s.lines_received += 1;
            match &outcome {
                Outcome::TooShort => s.lines_short += 1,
                Outcome::Poll(summary) => {
                    s.records_projected += summary.records as u64;
                    s.decode_failures += summary.decode_failures as u64;
                }
                Outcome::Version(_) | Outcome::Ignored => {}
            }
        });
        Ok(())
    }
}

/// Periodically re-sends the watch/poll command while connected.
pub struct Poller {
    link: Link,
    registry: SharedRegistry,
    interval: Duration,
}

impl Poller {
    pub fn new(link: Link, registry: SharedRegistry, interval: Duration) -> Self {
        Self {
            link,
            registry,
            interval,
        }
    }

    /// Run the poll timer until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!(interval_ms = self.interval.as_millis() as u64, "Starting poll ticker");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately and the handshake already polled.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        debug!("Poll ticker stopped");
    }

    /// Send one watch/poll command. Returns whether it was written.
    pub async fn poll_once(&self) -> bool {
        match self.link.send_command().await {
            Ok(true) => {
                debug!("Sent POLL command");
                self.registry.mark_polled();
                self.registry.update_stats(|s| s.commands_sent += 1);
                true
            }
            Ok(false) => {
                debug!("Not connected, not sending POLL command");
                false
            }
            Err(e) => {
                warn!(error = %e, "Error sending POLL command");
                false
            }
        }
    }
}

/// Newline-delimited reader with a bounded line length.
///
/// Partial lines stay buffered across calls, so a pending read can be
/// dropped by `select!` without losing data.
struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::new(),
        }
    }

    /// Next line without its `\n` or `\r\n` terminator, `None` at end of stream.
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            let room = (MAX_LINE_LEN + 2).saturating_sub(self.buf.len()) as u64;
            let read = (&mut self.inner)
                .take(room)
                .read_until(b'\n', &mut self.buf)
                .await?;

            if self.buf.last() == Some(&b'\n') {
                break;
            }
            if self.buf.len() > MAX_LINE_LEN + 1 {
                self.buf.clear();
                return Err(ExporterError::LineTooLong {
                    limit: MAX_LINE_LEN,
                });
            }
            if read == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                // Unterminated last line before end of stream
                break;
            }
        }

        let mut line = std::mem::take(&mut self.buf);
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        if line.len() > MAX_LINE_LEN {
            return Err(ExporterError::LineTooLong {
                limit: MAX_LINE_LEN,
            });
        }

        Ok(Some(match String::from_utf8(line) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e.utf8_error(), "Invalid UTF-8 from gpsd, replacing bad bytes");
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        }))
    }

    async fn next_line_within(&mut self, limit: Option<Duration>) -> Result<Option<String>> {
        match limit {
            Some(limit) => tokio::time::timeout(limit, self.next_line())
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no data from gpsd"))?,
            None => self.next_line().await,
        }
    }
}

/// Resolve once shutdown is requested or the sender is gone.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
