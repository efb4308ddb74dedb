//! serialgauge-core — serial thermometer collection library.
//!
//! Provides:
//! - `config` — serial line configuration, validation and TOML loading
//! - `collector` — connection management, frame decoding and polling
//! - `metrics` — metric sink abstraction and writers
//!
//! Used by the `serialgauged` daemon.

pub mod collector;
pub mod config;
pub mod metrics;
