//! Abstractions over the serial port driver to enable testing and mocking.
//!
//! The `SerialDriver` trait allows the collector to work with real hardware
//! through the `serialport` crate or with a scripted mock in tests.

use std::io;

use crate::config::{DataBits, Parity, PortSettings, StopBits};

/// Modem status lines reported by an open port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModemStatus {
    /// Clear To Send.
    pub cts: bool,
    /// Data Set Ready.
    pub dsr: bool,
    /// Ring Indicator.
    pub ri: bool,
    /// Data Carrier Detect.
    pub dcd: bool,
}

/// An open serial port.
///
/// Dropping the handle closes the port.
pub trait SerialHandle {
    /// Reads available bytes into `buf`, returning the number of bytes read.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Discards any bytes waiting in the input buffer.
    fn clear_input(&mut self) -> io::Result<()>;

    /// Sets the DTR control line.
    fn set_dtr(&mut self, level: bool) -> io::Result<()>;

    /// Sets the RTS control line.
    fn set_rts(&mut self, level: bool) -> io::Result<()>;

    /// Reads the modem status lines.
    fn modem_status(&mut self) -> io::Result<ModemStatus>;
}

/// Port discovery and opening.
pub trait SerialDriver {
    type Port: SerialHandle;

    /// Lists the device paths of available ports, in driver order.
    fn available_ports(&self) -> io::Result<Vec<String>>;

    /// Opens `path` with the given line settings.
    fn open(&self, path: &str, settings: &PortSettings) -> io::Result<Self::Port>;
}

/// Serial driver backed by the `serialport` crate.
///
/// Use this in production to talk to real hardware. Mark and space parity
/// are set through termios `CMSPAR` and need Linux. 1.5 stop bits cannot be
/// expressed through termios, so opening with them fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSerial;

impl SystemSerial {
    pub fn new() -> Self {
        Self
    }
}

/// Port opened by [`SystemSerial`].
pub struct SystemPort {
    inner: Box<dyn serialport::SerialPort>,
}

impl SerialDriver for SystemSerial {
    type Port = SystemPort;

    fn available_ports(&self) -> io::Result<Vec<String>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    fn open(&self, path: &str, settings: &PortSettings) -> io::Result<SystemPort> {
        let stop_bits = match settings.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
            StopBits::OnePointFive => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "1.5 stop bits are not supported by the serial backend",
                ));
            }
        };
        // Mark and space start out without parity and are patched after open.
        let parity = match settings.parity {
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
            Parity::None | Parity::Mark | Parity::Space => serialport::Parity::None,
        };
        let data_bits = match settings.data_bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        };

        let builder = serialport::new(path, settings.baud_rate)
            .parity(parity)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .flow_control(serialport::FlowControl::None)
            .timeout(settings.read_timeout);

        let inner = match settings.parity {
            Parity::Mark | Parity::Space => open_sticky_parity(builder, settings.parity)?,
            Parity::None | Parity::Odd | Parity::Even => builder.open()?,
        };

        Ok(SystemPort { inner })
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn open_sticky_parity(
    builder: serialport::SerialPortBuilder,
    parity: Parity,
) -> io::Result<Box<dyn serialport::SerialPort>> {
    use std::os::fd::{AsRawFd, BorrowedFd};

    use nix::sys::termios::{self, SetArg};

    let port = builder.open_native()?;
    // SAFETY: the descriptor is owned by `port`, which outlives `fd`.
    let fd = unsafe { BorrowedFd::borrow_raw(port.as_raw_fd()) };
    let mut attrs = termios::tcgetattr(fd)?;
    attrs.control_flags = sticky_parity_flags(attrs.control_flags, parity);
    termios::tcsetattr(fd, SetArg::TCSANOW, &attrs)?;
    Ok(Box::new(port))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn open_sticky_parity(
    _builder: serialport::SerialPortBuilder,
    parity: Parity,
) -> io::Result<Box<dyn serialport::SerialPort>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("parity {} requires CMSPAR, which this platform lacks", parity),
    ))
}

/// Control flags for mark (`PARODD` set) or space parity.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn sticky_parity_flags(
    flags: nix::sys::termios::ControlFlags,
    parity: Parity,
) -> nix::sys::termios::ControlFlags {
    use nix::sys::termios::ControlFlags;

    let mut flags = flags | ControlFlags::PARENB | ControlFlags::CMSPAR;
    flags.set(ControlFlags::PARODD, parity == Parity::Mark);
    flags
}

impl SerialHandle for SystemPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut self.inner, buf)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.inner.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.inner.write_data_terminal_ready(level)?;
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> io::Result<()> {
        self.inner.write_request_to_send(level)?;
        Ok(())
    }

    fn modem_status(&mut self) -> io::Result<ModemStatus> {
        Ok(ModemStatus {
            cts: self.inner.read_clear_to_send()?,
            dsr: self.inner.read_data_set_ready()?,
            ri: self.inner.read_ring_indicator()?,
            dcd: self.inner.read_carrier_detect()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{ConnectError, ConnectionState, SerialCollector};
    use crate::config::SerialConfig;

    fn settings(parity: Parity, stop_bits: StopBits) -> PortSettings {
        SerialConfig {
            parity,
            stopbits: stop_bits,
            ..SerialConfig::default()
        }
        .port_settings()
        .unwrap()
    }

    #[test]
    fn test_system_serial_accepts_every_parity_and_stop_bits_at_init() {
        for parity in [
            Parity::None,
            Parity::Odd,
            Parity::Even,
            Parity::Mark,
            Parity::Space,
        ] {
            for stopbits in [StopBits::One, StopBits::OnePointFive, StopBits::Two] {
                let config = SerialConfig {
                    parity,
                    stopbits,
                    ..SerialConfig::default()
                };
                assert!(SerialCollector::new(SystemSerial::new(), config).is_ok());
            }
        }
    }

    #[test]
    fn test_one_and_a_half_stop_bits_fails_open() {
        let driver = SystemSerial::new();
        let err = driver
            .open("/dev/null", &settings(Parity::None, StopBits::OnePointFive))
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn test_one_and_a_half_stop_bits_is_not_fatal() {
        let config = SerialConfig {
            stopbits: StopBits::OnePointFive,
            port: Some("/dev/ttyS0".to_string()),
            ..SerialConfig::default()
        };
        let mut c = SerialCollector::new(SystemSerial::new(), config).unwrap();
        match c.try_connect() {
            Err(ConnectError::Open { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::Unsupported)
            }
            other => panic!("expected open error, got {:?}", other),
        }
        assert_eq!(c.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_system_serial_open_missing_device_fails() {
        let driver = SystemSerial::new();
        for parity in [Parity::None, Parity::Mark, Parity::Space] {
            let result = driver.open("/nonexistent/tty12345", &settings(parity, StopBits::One));
            assert!(result.is_err());
        }
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[test]
    fn test_sticky_parity_flags() {
        use nix::sys::termios::ControlFlags;

        let mark = sticky_parity_flags(ControlFlags::CS8, Parity::Mark);
        assert_eq!(
            mark,
            ControlFlags::CS8 | ControlFlags::PARENB | ControlFlags::CMSPAR | ControlFlags::PARODD
        );

        let space = sticky_parity_flags(ControlFlags::CS8 | ControlFlags::PARODD, Parity::Space);
        assert_eq!(
            space,
            ControlFlags::CS8 | ControlFlags::PARENB | ControlFlags::CMSPAR
        );
    }
}
