//! Configuration support shared by pistat components.
//!
//! - Environment variable parsing with type safety
//! - Source tracking for debugging

pub mod env;
pub mod source;

pub use env::{ENV_PREFIX, EnvError, EnvParser};
pub use source::{ConfigSource, Sourced};
