//! Mock serial driver for testing.
//!
//! This module provides `MockSerial` and pre-built scenarios for testing
//! the collector without a physical serial device.

mod driver;
mod scenarios;

pub use driver::{MockPort, MockSerial};
pub use scenarios::MOCK_PORT;
