//! Provenance of configuration values.
//!
//! `pistat config` prints each setting next to the layer that supplied it.
//! Layers are ordered: a value from a later layer replaces one from an
//! earlier layer, never the other way round.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration layer, lowest first.
///
/// The derived ordering is the override order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    Default,
    ConfigFile,
    Environment,
    CommandLine,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfigSource::Default => "default",
            ConfigSource::ConfigFile => "config file",
            ConfigSource::Environment => "environment",
            ConfigSource::CommandLine => "command line",
        })
    }
}

/// A setting together with the layer it was taken from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
    /// Variable name, set only for [`ConfigSource::Environment`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
}

impl<T> Sourced<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self {
            value,
            source,
            env_var: None,
        }
    }

    /// Value read from the variable `var_name`.
    pub fn from_env(value: T, var_name: impl Into<String>) -> Self {
        Self {
            env_var: Some(var_name.into()),
            ..Self::new(value, ConfigSource::Environment)
        }
    }

    pub fn default_value(value: T) -> Self {
        Self::new(value, ConfigSource::Default)
    }

    /// Convert the value, keeping its provenance.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sourced<U> {
        Sourced {
            value: f(self.value),
            source: self.source,
            env_var: self.env_var,
        }
    }

    /// Keep whichever of the two comes from the later layer.
    ///
    /// On a tie `other` wins, so merging a fresh default over a default
    /// picks up the newer value.
    pub fn merge(self, other: Self) -> Self {
        if other.source >= self.source { other } else { self }
    }

    /// [`merge`](Self::merge) with an optional value from `source`.
    pub fn override_with(self, other: Option<T>, source: ConfigSource) -> Self {
        match other {
            Some(value) => self.merge(Sourced::new(value, source)),
            None => self,
        }
    }
}

impl<T: Default> Default for Sourced<T> {
    fn default() -> Self {
        Self::default_value(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layers_are_ordered() {
        let mut layers = vec![
            ConfigSource::CommandLine,
            ConfigSource::Default,
            ConfigSource::Environment,
            ConfigSource::ConfigFile,
        ];
        layers.sort();
        assert_eq!(
            layers,
            vec![
                ConfigSource::Default,
                ConfigSource::ConfigFile,
                ConfigSource::Environment,
                ConfigSource::CommandLine,
            ]
        );
    }

    #[test]
    fn test_env_beats_file_in_either_order() {
        let file = || Sourced::new(300_u64, ConfigSource::ConfigFile);
        let env = || Sourced::from_env(750_u64, "PISTAT_CPU_SAMPLE_MS");

        for merged in [file().merge(env()), env().merge(file())] {
            assert_eq!(merged.value, 750);
            assert_eq!(merged.env_var.as_deref(), Some("PISTAT_CPU_SAMPLE_MS"));
        }
    }

    #[test]
    fn test_absent_flag_keeps_lower_layer() {
        let from_file = Sourced::new(false, ConfigSource::ConfigFile);

        let kept = from_file.clone().override_with(None, ConfigSource::CommandLine);
        assert_eq!(kept, from_file);

        let flagged = from_file.override_with(Some(true), ConfigSource::CommandLine);
        assert!(flagged.value);
        assert_eq!(flagged.source, ConfigSource::CommandLine);
        assert_eq!(flagged.env_var, None);
    }

    #[test]
    fn test_map_keeps_variable_name() {
        let root = Sourced::from_env("/host/proc".to_string(), "PISTAT_PROC_ROOT")
            .map(std::path::PathBuf::from);

        assert_eq!(root.value, std::path::PathBuf::from("/host/proc"));
        assert_eq!(root.source, ConfigSource::Environment);
        assert_eq!(root.env_var.as_deref(), Some("PISTAT_PROC_ROOT"));
    }

    #[test]
    fn test_serialized_form() {
        let json = serde_json::to_value(Sourced::default_value(200_u64)).unwrap();
        assert_eq!(json, serde_json::json!({"value": 200, "source": "default"}));
        assert_eq!(ConfigSource::ConfigFile.to_string(), "config file");
    }
}
