//! Common utilities for the UVC host driver
//!
//! This crate provides the pieces shared by the driver and its tools: the
//! error taxonomy surfaced to the device-function owner, logging setup,
//! configuration loading, quirk flags and synthetic descriptor builders for
//! tests.

pub mod config;
pub mod error;
pub mod logging;
pub mod quirks;
pub mod test_utils;

pub use config::{DriverConfig, load_config};
pub use error::{Error, ErrorCode, Result};
pub use logging::setup_logging;
pub use quirks::{Quirks, UsbId};
