//! pistat - Common Library
//!
//! Logging and configuration plumbing shared by the pistat crates.

#![forbid(unsafe_code)]

pub mod config;
pub mod logging;

pub use config::{ConfigSource, EnvError, EnvParser, Sourced};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
