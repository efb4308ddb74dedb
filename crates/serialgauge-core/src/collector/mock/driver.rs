//! Scripted in-memory serial driver for testing collectors without hardware.
//!
//! `MockSerial` is cheap to clone: clones share state, so a test can keep one
//! handle for scripting and inspection while the collector owns another.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::collector::traits::{ModemStatus, SerialDriver, SerialHandle};
use crate::config::PortSettings;

/// One scripted response to a `read` call.
#[derive(Debug)]
enum ReadStep {
    Data(Vec<u8>),
    Error(io::ErrorKind),
}

#[derive(Debug, Default)]
struct MockState {
    ports: Vec<String>,
    enumerate_error: Option<io::ErrorKind>,
    open_error: Option<io::ErrorKind>,
    control_error: bool,
    modem_status: Option<ModemStatus>,
    reads: VecDeque<ReadStep>,

    enumerate_calls: usize,
    open_calls: usize,
    read_calls: usize,
    opened: Vec<(String, PortSettings)>,
    is_open: bool,
    input_cleared: usize,
    dtr: Option<bool>,
    rts: Option<bool>,
}

/// In-memory serial driver for tests.
#[derive(Debug, Clone, Default)]
pub struct MockSerial {
    state: Arc<Mutex<MockState>>,
}

impl MockSerial {
    /// Creates a driver with no ports.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a port to the enumeration list.
    pub fn add_port(&self, path: impl Into<String>) {
        self.state().ports.push(path.into());
    }

    /// Makes enumeration fail with `kind` (`None` restores success).
    pub fn set_enumerate_error(&self, kind: Option<io::ErrorKind>) {
        self.state().enumerate_error = kind;
    }

    /// Makes `open` fail with `kind` (`None` restores success).
    pub fn set_open_error(&self, kind: Option<io::ErrorKind>) {
        self.state().open_error = kind;
    }

    /// Makes input clearing and control line writes fail.
    pub fn set_control_error(&self, fail: bool) {
        self.state().control_error = fail;
    }

    /// Sets the modem status reported by ports (`None` makes the query fail).
    pub fn set_modem_status(&self, status: Option<ModemStatus>) {
        self.state().modem_status = status;
    }

    /// Queues bytes for the next read.
    pub fn push_read(&self, bytes: impl AsRef<[u8]>) {
        self.state()
            .reads
            .push_back(ReadStep::Data(bytes.as_ref().to_vec()));
    }

    /// Queues a read failure.
    pub fn push_read_error(&self, kind: io::ErrorKind) {
        self.state().reads.push_back(ReadStep::Error(kind));
    }

    pub fn enumerate_calls(&self) -> usize {
        self.state().enumerate_calls
    }

    pub fn open_calls(&self) -> usize {
        self.state().open_calls
    }

    pub fn read_calls(&self) -> usize {
        self.state().read_calls
    }

    /// Paths and settings of every successful open, in order.
    pub fn opened(&self) -> Vec<(String, PortSettings)> {
        self.state().opened.clone()
    }

    /// Whether a port handle is currently alive.
    pub fn is_open(&self) -> bool {
        self.state().is_open
    }

    pub fn input_cleared(&self) -> usize {
        self.state().input_cleared
    }

    /// Last DTR level written, if any.
    pub fn dtr(&self) -> Option<bool> {
        self.state().dtr
    }

    /// Last RTS level written, if any.
    pub fn rts(&self) -> Option<bool> {
        self.state().rts
    }
}

impl SerialDriver for MockSerial {
    type Port = MockPort;

    fn available_ports(&self) -> io::Result<Vec<String>> {
        let mut state = self.state();
        state.enumerate_calls += 1;
        if let Some(kind) = state.enumerate_error {
            return Err(io::Error::new(kind, "mock enumeration failure"));
        }
        Ok(state.ports.clone())
    }

    fn open(&self, path: &str, settings: &PortSettings) -> io::Result<MockPort> {
        let mut state = self.state();
        state.open_calls += 1;
        if let Some(kind) = state.open_error {
            return Err(io::Error::new(kind, format!("mock open failure for {}", path)));
        }
        state.opened.push((path.to_string(), settings.clone()));
        state.is_open = true;
        Ok(MockPort {
            state: Arc::clone(&self.state),
        })
    }
}

/// Port handle returned by [`MockSerial`].
#[derive(Debug)]
pub struct MockPort {
    state: Arc<Mutex<MockState>>,
}

impl MockPort {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn control(&self, apply: impl FnOnce(&mut MockState)) -> io::Result<()> {
        let mut state = self.state();
        if state.control_error {
            return Err(io::Error::other("mock control line failure"));
        }
        apply(&mut state);
        Ok(())
    }
}

impl SerialHandle for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        state.read_calls += 1;
        let step = state.reads.pop_front();
        match step {
            Some(ReadStep::Data(mut bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    // Leftover goes back to the front, like bytes still in the UART.
                    let rest = bytes.split_off(n);
                    state.reads.push_front(ReadStep::Data(rest));
                }
                Ok(n)
            }
            Some(ReadStep::Error(kind)) => Err(io::Error::new(kind, "mock read failure")),
            None => Err(io::Error::new(io::ErrorKind::TimedOut, "mock read timeout")),
        }
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.control(|state| state.input_cleared += 1)
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.control(|state| state.dtr = Some(level))
    }

    fn set_rts(&mut self, level: bool) -> io::Result<()> {
        self.control(|state| state.rts = Some(level))
    }

    fn modem_status(&mut self) -> io::Result<ModemStatus> {
        self.state()
            .modem_status
            .ok_or_else(|| io::Error::other("mock modem status failure"))
    }
}

impl Drop for MockPort {
    fn drop(&mut self) {
        self.state().is_open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SerialConfig;

    #[test]
    fn test_mock_serial_scripts_reads() {
        let driver = MockSerial::new();
        driver.add_port("/dev/ttyMOCK0");
        driver.push_read(b"abcdef");
        driver.push_read_error(io::ErrorKind::BrokenPipe);

        let settings = SerialConfig::default().port_settings().unwrap();
        let mut port = driver.open("/dev/ttyMOCK0", &settings).unwrap();
        assert!(driver.is_open());

        let mut buf = [0u8; 4];
        assert_eq!(port.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(port.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(
            port.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
        assert_eq!(
            port.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::TimedOut
        );

        drop(port);
        assert!(!driver.is_open());
        assert_eq!(driver.read_calls(), 4);
    }

    #[test]
    fn test_mock_serial_failures() {
        let driver = MockSerial::new();
        driver.set_enumerate_error(Some(io::ErrorKind::PermissionDenied));
        assert!(driver.available_ports().is_err());

        driver.set_open_error(Some(io::ErrorKind::NotFound));
        let settings = SerialConfig::default().port_settings().unwrap();
        assert!(driver.open("/dev/ttyMOCK0", &settings).is_err());
        assert!(driver.opened().is_empty());
        assert_eq!(driver.open_calls(), 1);
    }
}
