//! Pre-built mock serial scenarios for testing.
//!
//! These scenarios model the devices and failure modes the collector is
//! expected to survive.

use std::io;

use super::driver::MockSerial;
use crate::collector::traits::ModemStatus;

/// Device path used by the scenarios.
pub const MOCK_PORT: &str = "/dev/ttyMOCK0";

impl MockSerial {
    /// A single enumerated port with the usual lines asserted and nothing to read.
    pub fn single_port() -> Self {
        let driver = Self::new();
        driver.add_port(MOCK_PORT);
        driver.set_modem_status(Some(ModemStatus {
            cts: true,
            dsr: true,
            ri: false,
            dcd: true,
        }));
        driver
    }

    /// A thermometer that sends one CRLF-terminated frame per reading.
    pub fn thermometer(readings: &[i64]) -> Self {
        let driver = Self::single_port();
        for reading in readings {
            driver.push_read(format!("000{:02}\r\n", reading));
        }
        driver
    }

    /// A thermometer that is unplugged after its first reading.
    pub fn unplugged_after_first(reading: i64) -> Self {
        let driver = Self::thermometer(&[reading]);
        driver.push_read_error(io::ErrorKind::BrokenPipe);
        driver
    }

    /// A device sending line noise with no frames in it.
    pub fn noisy_line() -> Self {
        let driver = Self::single_port();
        driver.push_read(b"\xff\xfe garbage 12 34 \r\n");
        driver.push_read(b"more noise 0");
        driver
    }
}
