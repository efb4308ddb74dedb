//! Serial temperature collector.
//!
//! `SerialCollector` owns the serial port for its whole lifetime. Every call
//! to [`SerialCollector::poll`] is one scheduler tick:
//!
//! ```text
//!   Disconnected ──poll──▶ Connecting ──open ok──▶ Connected
//!        ▲                     │                       │
//!        └──────open failed────┘                       │
//!        └──────────────read failed────────────────────┘
//! ```
//!
//! A tick that connects never reads. Failures after initialization are
//! logged and retried on the next tick; `poll` itself never fails.

use std::fmt;
use std::io;

use chrono::Utc;
use tracing::{debug, error, info, trace, warn};

use crate::collector::frame::FrameDecoder;
use crate::collector::traits::{SerialDriver, SerialHandle};
use crate::config::{ConfigError, PortSettings, SerialConfig};
use crate::metrics::{Accumulator, Fields};

/// Measurement name of emitted samples.
pub const MEASUREMENT: &str = "serial";

/// Field carrying the decoded temperature.
pub const TEMP_FIELD: &str = "temp";

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for a failed connection attempt.
#[derive(Debug)]
pub enum ConnectError {
    /// Port enumeration failed.
    Enumerate(io::Error),
    /// Enumeration returned no ports.
    NoPorts,
    /// The selected port could not be opened.
    Open { port: String, source: io::Error },
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::Enumerate(e) => write!(f, "cannot list serial ports: {}", e),
            ConnectError::NoPorts => write!(f, "no serial ports found"),
            ConnectError::Open { port, source } => write!(f, "cannot open {}: {}", port, source),
        }
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectError::Enumerate(e) => Some(e),
            ConnectError::NoPorts => None,
            ConnectError::Open { source, .. } => Some(source),
        }
    }
}

/// What a single poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The collector was disconnected and attempted to connect.
    Connect { connected: bool },
    /// The port was read; `samples` gauges were emitted.
    Read { samples: usize },
    /// The read failed and the port was released.
    ReadFailed,
}

/// Counters accumulated over the collector's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollStats {
    pub polls: u64,
    pub connect_attempts: u64,
    pub connects: u64,
    pub read_errors: u64,
    pub samples: u64,
    pub decode_errors: u64,
    /// Bytes dropped by the frame decoder as noise.
    pub discarded_bytes: u64,
}

struct OpenPort<P> {
    path: String,
    handle: P,
}

/// Collector that polls a serial thermometer.
///
/// Generic over the driver so tests can substitute
/// [`MockSerial`](crate::collector::mock::MockSerial).
pub struct SerialCollector<D: SerialDriver> {
    driver: D,
    config: SerialConfig,
    settings: PortSettings,
    /// Present iff `state` is `Connected`.
    port: Option<OpenPort<D::Port>>,
    state: ConnectionState,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
    stats: PollStats,
    last_error: Option<String>,
}

impl<D: SerialDriver> SerialCollector<D> {
    /// Creates a disconnected collector.
    ///
    /// Fails if the configuration is invalid.
    /// No port is touched until the first connection attempt.
    pub fn new(driver: D, config: SerialConfig) -> Result<Self, ConfigError> {
        let settings = config.port_settings()?;
        debug!(
            line = %config.describe(),
            rts = config.rts,
            dtr = config.dtr,
            "serial collector initialized"
        );

        Ok(Self {
            driver,
            read_buf: vec![0; config.buffer_size],
            config,
            settings,
            port: None,
            state: ConnectionState::Disconnected,
            decoder: FrameDecoder::new(),
            stats: PollStats::default(),
            last_error: None,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    /// Device path of the open port, if connected.
    pub fn port_name(&self) -> Option<&str> {
        self.port.as_ref().map(|p| p.path.as_str())
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    pub fn stats(&self) -> &PollStats {
        &self.stats
    }

    /// Returns the last connection or read error message, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Attempts to connect if not already connected.
    ///
    /// Failures are logged here and leave the collector disconnected; the
    /// returned error is informational.
    pub fn try_connect(&mut self) -> Result<(), ConnectError> {
        if self.port.is_some() {
            return Ok(());
        }

        self.stats.connect_attempts += 1;
        self.set_state(ConnectionState::Connecting);

        match self.open_port() {
            Ok(port) => {
                info!(
                    port = %port.path,
                    line = %self.config.describe(),
                    "serial port connected"
                );
                self.decoder.clear();
                self.port = Some(port);
                self.stats.connects += 1;
                self.last_error = None;
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Runs one collection tick, emitting decoded samples into `acc`.
    pub fn poll<A: Accumulator + ?Sized>(&mut self, acc: &mut A) -> PollOutcome {
        self.stats.polls += 1;

        let Some(port) = self.port.as_mut() else {
            let connected = self.try_connect().is_ok();
            return PollOutcome::Connect { connected };
        };

        match port.handle.read(&mut self.read_buf) {
            Ok(n) => {
                trace!(bytes = n, "serial read");
                self.decoder.push(&self.read_buf[..n]);
                let samples = self.drain_frames(acc);
                PollOutcome::Read { samples }
            }
            Err(e) if is_idle(&e) => {
                trace!("serial read timed out");
                PollOutcome::Read { samples: 0 }
            }
            Err(e) => {
                warn!(port = %port.path, error = %e, "serial read failed, will reconnect");
                self.stats.read_errors += 1;
                self.last_error = Some(format!("read failed: {}", e));
                self.release_port();
                PollOutcome::ReadFailed
            }
        }
    }

    /// Closes the port if one is open. Safe to call at any time.
    pub fn shutdown(&mut self) {
        if let Some(path) = self.port_name() {
            info!(port = %path, "closing serial port");
        }
        self.release_port();
    }

    fn open_port(&mut self) -> Result<OpenPort<D::Port>, ConnectError> {
        let path = match &self.config.port {
            Some(path) => path.clone(),
            None => self.discover_port()?,
        };

        let mut handle = match self.driver.open(&path, &self.settings) {
            Ok(handle) => handle,
            Err(source) => {
                warn!(port = %path, error = %source, "cannot open serial port");
                return Err(ConnectError::Open { port: path, source });
            }
        };

        prepare_lines(&mut handle, &path, &self.config);
        Ok(OpenPort { path, handle })
    }

    /// Picks the first enumerated port.
    fn discover_port(&self) -> Result<String, ConnectError> {
        let ports = match self.driver.available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                error!(error = %e, "failed to enumerate serial ports");
                return Err(ConnectError::Enumerate(e));
            }
        };

        for port in &ports {
            info!(port = %port, "found serial port");
        }

        match ports.into_iter().next() {
            Some(port) => Ok(port),
            None => {
                warn!("no serial ports found");
                Err(ConnectError::NoPorts)
            }
        }
    }

    fn drain_frames<A: Accumulator + ?Sized>(&mut self, acc: &mut A) -> usize {
        let mut samples = 0;
        while let Some(frame) = self.decoder.next_frame() {
            match frame {
                Ok(temp) => {
                    let fields = Fields::from([(TEMP_FIELD.to_string(), temp)]);
                    acc.add_gauge(MEASUREMENT, fields, self.config.tags.clone(), Utc::now());
                    debug!(temp, "sample emitted");
                    samples += 1;
                }
                Err(e) => {
                    self.stats.decode_errors += 1;
                    warn!(error = %e, "skipping undecodable frame");
                }
            }
        }
        self.stats.samples += samples as u64;
        self.stats.discarded_bytes = self.decoder.discarded();
        samples
    }

    fn release_port(&mut self) {
        if let Some(port) = self.port.take() {
            debug!(port = %port.path, "serial port released");
        }
        self.decoder.clear();
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "connection state changed");
            self.state = next;
        }
    }
}

/// Sets the control lines and logs the modem status of a freshly opened port.
///
/// Every step is best effort.
fn prepare_lines<P: SerialHandle>(handle: &mut P, path: &str, config: &SerialConfig) {
    if let Err(e) = handle.clear_input() {
        debug!(port = %path, error = %e, "cannot clear input buffer");
    }
    if let Err(e) = handle.set_dtr(config.dtr) {
        debug!(port = %path, level = config.dtr, error = %e, "cannot set DTR");
    }
    if let Err(e) = handle.set_rts(config.rts) {
        debug!(port = %path, level = config.rts, error = %e, "cannot set RTS");
    }
    match handle.modem_status() {
        Ok(status) => debug!(
            port = %path,
            cts = status.cts,
            dsr = status.dsr,
            ri = status.ri,
            dcd = status.dcd,
            "modem status"
        ),
        Err(e) => debug!(port = %path, error = %e, "cannot read modem status"),
    }
}

/// Read errors that mean "no data yet" rather than a broken port.
fn is_idle(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
