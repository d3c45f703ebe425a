//! # hindcast-utils
//!
//! Shared utilities for hindcast: the `tracing` logging bootstrap used by
//! the command-line binary.

pub mod logging;

pub use logging::{init_logging, init_logging_with_level, LogFormat, LogLevel, LoggingError};
