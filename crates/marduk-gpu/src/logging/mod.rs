//! Logging utilities.
//!
//! The crate logs through the `log` facade only. Binaries and tests that want
//! output call [`init_logging`] early; libraries embedding the crate can
//! install any other `log` backend instead.

mod init;

pub use init::{LoggingConfig, init_logging};
