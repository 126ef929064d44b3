//! Environment variable parsing with type safety.
//!
//! Provides a type-safe parser for `PISTAT_*` environment variables with
//! validation, error collection, and source tracking.

use super::source::Sourced;
use crate::logging::is_valid_level;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default prefix for every pistat environment variable.
pub const ENV_PREFIX: &str = "PISTAT_";

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    /// Invalid log level.
    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Type-safe environment variable parser.
///
/// Collects errors during parsing so all issues can be reported at once.
/// Values are read through a lookup function so tests can parse a fixed map
/// instead of the live process environment.
pub struct EnvParser {
    prefix: &'static str,
    lookup: Lookup,
    errors: Vec<EnvError>,
}

impl fmt::Debug for EnvParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvParser")
            .field("prefix", &self.prefix)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

impl EnvParser {
    /// Create a parser over the process environment with the `PISTAT_` prefix.
    pub fn new() -> Self {
        Self::with_lookup(ENV_PREFIX, |name| std::env::var(name).ok())
    }

    /// Create a parser over a fixed set of variables (full names, prefix included).
    pub fn from_map(vars: HashMap<String, String>) -> Self {
        Self::with_lookup(ENV_PREFIX, move |name| vars.get(name).cloned())
    }

    /// Create a parser with a custom prefix and lookup function.
    pub fn with_lookup<F>(prefix: &'static str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            prefix,
            lookup: Box::new(lookup),
            errors: Vec::new(),
        }
    }

    /// Get all accumulated errors.
    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    /// Check if any errors occurred.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take ownership of errors.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// Record an error found by a caller-side validation.
    pub fn push_error(&mut self, error: EnvError) {
        self.errors.push(error);
    }

    /// Get the full variable name with prefix.
    pub fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn raw(&self, var_name: &str) -> Option<String> {
        (self.lookup)(var_name)
    }

    /// Get a string value with default.
    pub fn get_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        let var_name = self.var_name(name);
        match self.raw(&var_name) {
            Some(value) => Sourced::from_env(value, var_name),
            None => Sourced::default_value(default.to_string()),
        }
    }

    /// Get an optional string (None if not set or empty).
    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        let var_name = self.var_name(name);
        match self.raw(&var_name) {
            Some(value) if value.is_empty() => Sourced::from_env(None, var_name),
            Some(value) => Sourced::from_env(Some(value), var_name),
            None => Sourced::default_value(None),
        }
    }

    /// Get a boolean value with default.
    ///
    /// Accepts: 1, true, yes, on (for true)
    ///          0, false, no, off, "" (for false)
    pub fn get_bool(&mut self, name: &str, default: bool) -> Sourced<bool> {
        let var_name = self.var_name(name);
        let Some(value) = self.raw(&var_name) else {
            return Sourced::default_value(default);
        };

        let parsed = match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" | "" => false,
            _ => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "boolean (true/false/1/0/yes/no)".to_string(),
                    value,
                });
                return Sourced::default_value(default);
            }
        };
        Sourced::from_env(parsed, var_name)
    }

    /// Get a u64 value with default and range validation.
    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> Sourced<u64> {
        self.get_in_range(name, default, min, max, "unsigned 64-bit integer")
    }

    fn get_in_range<T>(
        &mut self,
        name: &str,
        default: T,
        min: T,
        max: T,
        expected: &str,
    ) -> Sourced<T>
    where
        T: FromStr + PartialOrd + ToString,
    {
        let var_name = self.var_name(name);
        let Some(value) = self.raw(&var_name) else {
            return Sourced::default_value(default);
        };

        match value.trim().parse::<T>() {
            Ok(n) if n >= min && n <= max => Sourced::from_env(n, var_name),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var: var_name,
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                Sourced::default_value(default)
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: expected.to_string(),
                    value,
                });
                Sourced::default_value(default)
            }
        }
    }

    /// Get a log level value with validation.
    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let var_name = self.var_name(name);
        let Some(value) = self.raw(&var_name) else {
            return Sourced::default_value(default.to_string());
        };

        let lower = value.to_lowercase();
        if is_valid_level(&lower) {
            Sourced::from_env(lower, var_name)
        } else {
            self.errors.push(EnvError::InvalidLogLevel {
                var: var_name,
                value,
            });
            Sourced::default_value(default.to_string())
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSource;

    fn parser_with(vars: &[(&str, &str)]) -> EnvParser {
        EnvParser::from_map(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_get_bool_true_values() {
        for val in &["1", "true", "yes", "on", "TRUE", "Yes"] {
            let mut parser = parser_with(&[("PISTAT_TEST_BOOL", val)]);
            let result = parser.get_bool("TEST_BOOL", false);
            assert!(result.value, "Expected true for '{}'", val);
            assert!(!parser.has_errors());
        }
    }

    #[test]
    fn test_get_bool_false_values() {
        for val in &["0", "false", "no", "off", "FALSE", ""] {
            let mut parser = parser_with(&[("PISTAT_TEST_BOOL", val)]);
            let result = parser.get_bool("TEST_BOOL", true);
            assert!(!result.value, "Expected false for '{}'", val);
            assert!(!parser.has_errors());
        }
    }

    #[test]
    fn test_get_bool_invalid_uses_default() {
        let mut parser = parser_with(&[("PISTAT_BAD_BOOL", "maybe")]);
        let result = parser.get_bool("BAD_BOOL", false);
        assert!(!result.value);
        assert_eq!(result.source, ConfigSource::Default);
        assert!(parser.has_errors());
    }

    #[test]
    fn test_get_u64_range_valid() {
        let mut parser = parser_with(&[("PISTAT_TEST_U64", " 50 ")]);
        let result = parser.get_u64_range("TEST_U64", 10, 0, 100);
        assert_eq!(result.value, 50);
        assert!(!parser.has_errors());
    }

    #[test]
    fn test_get_u64_range_out_of_range() {
        let mut parser = parser_with(&[("PISTAT_TEST_U64", "200")]);
        let result = parser.get_u64_range("TEST_U64", 10, 0, 100);
        assert_eq!(result.value, 10);
        assert!(matches!(
            parser.errors(),
            [EnvError::OutOfRange { var, .. }] if var == "PISTAT_TEST_U64"
        ));
    }

    #[test]
    fn test_get_u64_not_a_number() {
        let mut parser = parser_with(&[("PISTAT_TEST_U64", "fast")]);
        let result = parser.get_u64_range("TEST_U64", 10, 0, 100);
        assert_eq!(result.value, 10);
        assert!(matches!(
            parser.take_errors().as_slice(),
            [EnvError::InvalidValue { .. }]
        ));
        assert!(!parser.has_errors());
    }

    #[test]
    fn test_get_log_level() {
        let mut parser = parser_with(&[("PISTAT_LOG_LEVEL", "DEBUG")]);
        assert_eq!(parser.get_log_level("LOG_LEVEL", "info").value, "debug");

        let mut parser = parser_with(&[("PISTAT_LOG_LEVEL", "verbose")]);
        assert_eq!(parser.get_log_level("LOG_LEVEL", "info").value, "info");
        assert!(parser.has_errors());
    }

    #[test]
    fn test_get_optional_string() {
        let mut parser = parser_with(&[]);
        assert!(parser.get_optional_string("TEST_OPT").value.is_none());

        let mut parser = parser_with(&[("PISTAT_TEST_OPT", "")]);
        assert!(parser.get_optional_string("TEST_OPT").value.is_none());

        let mut parser = parser_with(&[("PISTAT_TEST_OPT", "value")]);
        assert_eq!(
            parser.get_optional_string("TEST_OPT").value,
            Some("value".to_string())
        );
    }

    #[test]
    fn test_source_tracking() {
        let mut parser = parser_with(&[]);
        let result = parser.get_string("TEST_SRC", "default");
        assert_eq!(result.source, ConfigSource::Default);
        assert!(result.env_var.is_none());

        let mut parser = parser_with(&[("PISTAT_TEST_SRC", "from_env")]);
        let result = parser.get_string("TEST_SRC", "default");
        assert_eq!(result.source, ConfigSource::Environment);
        assert_eq!(result.env_var.as_deref(), Some("PISTAT_TEST_SRC"));
    }

    #[test]
    fn test_custom_prefix() {
        let mut parser = EnvParser::with_lookup("SUPERVISOR_", |name| {
            (name == "SUPERVISOR_TOKEN").then(|| "abc".to_string())
        });
        assert_eq!(
            parser.get_optional_string("TOKEN").value.as_deref(),
            Some("abc")
        );
    }
}
