//! Common infrastructure for the gsmd stack
//!
//! Everything here is process-wide and set up once at startup: the tracing
//! subscriber and the typed configuration file. The modem crates never read
//! files or environment variables themselves; they receive the parsed
//! configuration by reference.

pub mod config;
pub mod errors;
pub mod logging;

pub use errors::types::{Error, Result};
pub use logging::setup::{log_welcome, parse_log_level, setup_logging, LoggingConfig};
