//! Serial thermometer collector.
//!
//! This module turns bytes from a serial port into gauge samples, with the
//! driver abstracted so the whole pipeline runs against a mock in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     SerialCollector                      │
//! │  Disconnected / Connecting / Connected                   │
//! │  ┌────────────────────┐      ┌─────────────────────────┐ │
//! │  │   FrameDecoder     │      │      PortSettings       │ │
//! │  │ - marker "000"     │      │ - from SerialConfig     │ │
//! │  │ - 2-digit field    │      └─────────────────────────┘ │
//! │  └─────────┬──────────┘                                  │
//! │            │                                             │
//! │     ┌──────▼──────┐                ┌─────────────┐       │
//! │     │ SerialDriver│ (trait)        │ Accumulator │ (sink)│
//! │     └──────┬──────┘                └─────────────┘       │
//! └────────────┼─────────────────────────────────────────────┘
//!              │
//!       ┌──────┴────────┐
//!       │               │
//! ┌─────▼──────┐ ┌──────▼─────┐
//! │SystemSerial│ │ MockSerial │
//! │(serialport)│ │ (Testing)  │
//! └────────────┘ └────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use serialgauge_core::collector::{MockSerial, PollOutcome, SerialCollector};
//! use serialgauge_core::config::SerialConfig;
//! use serialgauge_core::metrics::MemoryAccumulator;
//!
//! let driver = MockSerial::thermometer(&[21]);
//! let mut collector = SerialCollector::new(driver, SerialConfig::default()).unwrap();
//! let mut acc = MemoryAccumulator::new();
//!
//! // First tick connects, second tick reads.
//! assert_eq!(collector.poll(&mut acc), PollOutcome::Connect { connected: true });
//! assert_eq!(collector.poll(&mut acc), PollOutcome::Read { samples: 1 });
//! assert_eq!(acc.metrics()[0].fields["temp"], 21);
//! ```

#[allow(clippy::module_inception)]
mod collector;
pub mod frame;
pub mod mock;
pub mod traits;

pub use collector::{
    ConnectError, ConnectionState, MEASUREMENT, PollOutcome, PollStats, SerialCollector,
    TEMP_FIELD,
};
pub use frame::{DecodeError, FrameDecoder};
pub use mock::MockSerial;
pub use traits::{ModemStatus, SerialDriver, SerialHandle, SystemSerial};
