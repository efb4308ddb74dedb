//! Serial line configuration and its mapping to driver settings.
//!
//! `SerialConfig` is the human-facing configuration (parity letters, stop-bit
//! strings, control line flags). `SerialConfig::port_settings` validates it and
//! produces the `PortSettings` handed to a [`SerialDriver`](crate::collector::SerialDriver).

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Default read timeout in milliseconds.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Default number of bytes requested per read.
pub const DEFAULT_BUFFER_SIZE: usize = 100;

/// Error type for configuration loading and validation.
#[derive(Debug)]
pub enum ConfigError {
    /// Parity letter outside `N`, `O`, `E`, `M`, `S`.
    InvalidParity(String),
    /// Stop bits outside `1`, `1.5`, `2`.
    InvalidStopBits(String),
    /// Data bits outside 5..=8.
    InvalidDataBits(u8),
    /// Baud rate of zero.
    InvalidBaudRate(u32),
    /// Read buffer of zero bytes.
    InvalidBufferSize(usize),
    /// Config file could not be read.
    Io(std::io::Error),
    /// Config file is not valid TOML or has unknown keys.
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidParity(v) => {
                write!(f, "invalid parity '{}' (expected N, O, E, M or S)", v)
            }
            ConfigError::InvalidStopBits(v) => {
                write!(f, "invalid stop bits '{}' (expected 1, 1.5 or 2)", v)
            }
            ConfigError::InvalidDataBits(v) => {
                write!(f, "invalid data bits {} (expected 5 to 8)", v)
            }
            ConfigError::InvalidBaudRate(v) => write!(f, "invalid baud rate {}", v),
            ConfigError::InvalidBufferSize(v) => write!(f, "invalid buffer size {}", v),
            ConfigError::Io(e) => write!(f, "cannot read config: {}", e),
            ConfigError::Parse(msg) => write!(f, "config parse error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl Parity {
    /// Returns the single-letter form used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Parity::None => "N",
            Parity::Odd => "O",
            Parity::Even => "E",
            Parity::Mark => "M",
            Parity::Space => "S",
        }
    }
}

impl FromStr for Parity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "N" => Ok(Parity::None),
            "O" => Ok(Parity::Odd),
            "E" => Ok(Parity::Even),
            "M" => Ok(Parity::Mark),
            "S" => Ok(Parity::Space),
            other => Err(ConfigError::InvalidParity(other.to_string())),
        }
    }
}

impl TryFrom<String> for Parity {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum StopBits {
    #[default]
    One,
    OnePointFive,
    Two,
}

impl StopBits {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopBits::One => "1",
            StopBits::OnePointFive => "1.5",
            StopBits::Two => "2",
        }
    }
}

impl FromStr for StopBits {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(StopBits::One),
            "1.5" => Ok(StopBits::OnePointFive),
            "2" => Ok(StopBits::Two),
            other => Err(ConfigError::InvalidStopBits(other.to_string())),
        }
    }
}

impl TryFrom<String> for StopBits {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(ConfigError::InvalidDataBits(other)),
        }
    }
}

/// Driver-level line settings produced from a [`SerialConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSettings {
    pub baud_rate: u32,
    pub parity: Parity,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    /// Upper bound for a single blocking read.
    pub read_timeout: Duration,
}

/// Serial collector configuration.
///
/// Field names follow the TOML keys (`baudrate`, `databits`, `stopbits`).
/// Missing fields take the defaults of [`SerialConfig::default`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialConfig {
    pub parity: Parity,
    pub baudrate: u32,
    pub databits: u8,
    pub stopbits: StopBits,
    pub rts: bool,
    pub dtr: bool,
    /// Explicit device path. When unset the first enumerated port is used.
    pub port: Option<String>,
    pub read_timeout_ms: u64,
    pub buffer_size: usize,
    /// Tags attached to every emitted sample.
    pub tags: BTreeMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            parity: Parity::None,
            baudrate: 9600,
            databits: 8,
            stopbits: StopBits::One,
            rts: false,
            dtr: false,
            port: None,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            tags: BTreeMap::new(),
        }
    }
}

impl SerialConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.message().to_string()))
    }

    /// Loads a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validates the configuration and maps it to driver settings.
    pub fn port_settings(&self) -> Result<PortSettings, ConfigError> {
        if self.baudrate == 0 {
            return Err(ConfigError::InvalidBaudRate(self.baudrate));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize(self.buffer_size));
        }
        Ok(PortSettings {
            baud_rate: self.baudrate,
            parity: self.parity,
            data_bits: DataBits::try_from(self.databits)?,
            stop_bits: self.stopbits,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        })
    }

    /// Short line description, e.g. `9600 8N1`.
    pub fn describe(&self) -> String {
        format!(
            "{} {}{}{}",
            self.baudrate, self.databits, self.parity, self.stopbits
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parity_table() {
        let cases = [
            ("N", Parity::None),
            ("O", Parity::Odd),
            ("E", Parity::Even),
            ("M", Parity::Mark),
            ("S", Parity::Space),
        ];
        for (input, expected) in cases {
            assert_eq!(input.parse::<Parity>().unwrap(), expected, "parity {input}");
            assert_eq!(expected.as_str(), input);
        }
    }

    #[test]
    fn test_stop_bits_table() {
        let cases = [
            ("1", StopBits::One),
            ("1.5", StopBits::OnePointFive),
            ("2", StopBits::Two),
        ];
        for (input, expected) in cases {
            assert_eq!(input.parse::<StopBits>().unwrap(), expected, "stop bits {input}");
            assert_eq!(expected.as_str(), input);
        }
    }

    #[test]
    fn test_unrecognized_values_rejected() {
        for bad in ["", "n", "X", "None", "EE"] {
            assert!(matches!(
                bad.parse::<Parity>(),
                Err(ConfigError::InvalidParity(v)) if v == bad
            ));
        }
        for bad in ["", "0", "1.0", "3", "one"] {
            assert!(matches!(
                bad.parse::<StopBits>(),
                Err(ConfigError::InvalidStopBits(v)) if v == bad
            ));
        }
    }

    #[test]
    fn test_absent_fields_use_zero_value_defaults() {
        let config = SerialConfig::from_toml_str("baudrate = 2400").unwrap();
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stopbits, StopBits::One);
        assert_eq!(config.databits, 8);
        assert!(!config.rts);
        assert!(!config.dtr);
    }

    #[test]
    fn test_even_parity_one_and_a_half_stop_bits() {
        let config = SerialConfig::from_toml_str(
            r#"
parity = "E"
stopbits = "1.5"
"#,
        )
        .unwrap();
        let settings = config.port_settings().unwrap();
        assert_eq!(settings.parity, Parity::Even);
        assert_eq!(settings.stop_bits, StopBits::OnePointFive);
    }

    #[test]
    fn test_full_config_maps_to_settings() {
        let config = SerialConfig::from_toml_str(
            r#"
parity = "O"
baudrate = 2400
databits = 7
stopbits = "2"
rts = true
dtr = true
port = "/dev/ttyUSB0"
read_timeout_ms = 250

[tags]
room = "lab"
"#,
        )
        .unwrap();
        assert!(config.rts && config.dtr);
        assert_eq!(config.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.tags.get("room").map(String::as_str), Some("lab"));
        assert_eq!(config.describe(), "2400 7O2");

        let settings = config.port_settings().unwrap();
        assert_eq!(
            settings,
            PortSettings {
                baud_rate: 2400,
                parity: Parity::Odd,
                data_bits: DataBits::Seven,
                stop_bits: StopBits::Two,
                read_timeout: Duration::from_millis(250),
            }
        );
    }

    #[test]
    fn test_invalid_parity_in_file_is_parse_error() {
        let err = SerialConfig::from_toml_str(r#"parity = "Q""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(ref msg) if msg.contains("'Q'")));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = SerialConfig::from_toml_str("speed = 9600").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_data_bits_and_baud_validation() {
        let config = SerialConfig {
            databits: 9,
            ..SerialConfig::default()
        };
        assert!(matches!(
            config.port_settings(),
            Err(ConfigError::InvalidDataBits(9))
        ));

        let config = SerialConfig {
            baudrate: 0,
            ..SerialConfig::default()
        };
        assert!(matches!(
            config.port_settings(),
            Err(ConfigError::InvalidBaudRate(0))
        ));

        let config = SerialConfig {
            buffer_size: 0,
            ..SerialConfig::default()
        };
        assert!(matches!(
            config.port_settings(),
            Err(ConfigError::InvalidBufferSize(0))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("serial.toml");
        std::fs::write(&path, "parity = \"M\"\ndatabits = 5\n").unwrap();

        let config = SerialConfig::load(&path).unwrap();
        assert_eq!(config.parity, Parity::Mark);
        assert_eq!(config.databits, 5);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            SerialConfig::load(&missing),
            Err(ConfigError::Io(_))
        ));
    }
}
