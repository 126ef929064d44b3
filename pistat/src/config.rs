//! Configuration loading for pistat.
//!
//! Values are layered: built-in defaults, then `config.toml`, then
//! `PISTAT_*` environment variables, then command-line flags. Every resolved
//! value remembers which layer it came from.

use anyhow::{Context, Result};
use pistat_common::{ConfigSource, EnvError, EnvParser, Sourced};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::collect::HostPaths;
use crate::supervisor::DEFAULT_SUPERVISOR_URL;

/// Default config directory name.
const CONFIG_DIR_NAME: &str = "pistat";

/// Default config file name.
const CONFIG_FILE_NAME: &str = "config.toml";

const DEFAULT_CPU_SAMPLE_MS: u64 = 200;
const DEFAULT_SUPERVISOR_TIMEOUT_SECS: u64 = 5;

/// Settings as written in `config.toml`. Absent keys keep lower layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Sampling window for CPU load in milliseconds.
    pub cpu_sample_ms: Option<u64>,
    /// Collect per-disk usage.
    pub include_disks: Option<bool>,
    /// Collect IPs, MACs, interfaces and network speed.
    pub include_network: Option<bool>,
    /// Report per-core CPU load.
    pub percpu: Option<bool>,
    /// procfs mount point.
    pub proc_root: Option<PathBuf>,
    /// sysfs mount point.
    pub sys_root: Option<PathBuf>,
    /// Home Assistant Supervisor base URL.
    pub supervisor_url: Option<String>,
    /// Supervisor request timeout in seconds.
    pub supervisor_timeout_secs: Option<u64>,
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub cpu_sample_ms: Option<u64>,
    pub include_disks: Option<bool>,
    pub include_network: Option<bool>,
    pub percpu: Option<bool>,
}

/// Fully resolved configuration with per-value sources.
#[derive(Debug, Clone, Serialize)]
pub struct StatusConfig {
    pub cpu_sample_ms: Sourced<u64>,
    pub include_disks: Sourced<bool>,
    pub include_network: Sourced<bool>,
    pub percpu: Sourced<bool>,
    pub proc_root: Sourced<PathBuf>,
    pub sys_root: Sourced<PathBuf>,
    pub supervisor_url: Sourced<String>,
    pub supervisor_timeout_secs: Sourced<u64>,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self::resolve(
            FileConfig::default(),
            &mut EnvParser::from_map(Default::default()),
            CliOverrides::default(),
        )
    }
}

fn layer<T>(default: T, file: Option<T>, env: Sourced<T>) -> Sourced<T> {
    Sourced::default_value(default)
        .override_with(file, ConfigSource::ConfigFile)
        .merge(env)
}

impl StatusConfig {
    /// Combine the layers. Invalid environment values are recorded in `env`.
    pub fn resolve(file: FileConfig, env: &mut EnvParser, cli: CliOverrides) -> Self {
        let cpu_sample_ms = layer(
            DEFAULT_CPU_SAMPLE_MS,
            file.cpu_sample_ms,
            env.get_u64_range("CPU_SAMPLE_MS", DEFAULT_CPU_SAMPLE_MS, 10, 60_000),
        )
        .override_with(cli.cpu_sample_ms, ConfigSource::CommandLine);

        let include_disks = layer(true, file.include_disks, env.get_bool("INCLUDE_DISKS", true))
            .override_with(cli.include_disks, ConfigSource::CommandLine);

        let include_network = layer(
            true,
            file.include_network,
            env.get_bool("INCLUDE_NETWORK", true),
        )
        .override_with(cli.include_network, ConfigSource::CommandLine);

        let percpu = layer(false, file.percpu, env.get_bool("PERCPU", false))
            .override_with(cli.percpu, ConfigSource::CommandLine);

        let defaults = HostPaths::default();
        let proc_root = layer(
            defaults.proc_root.clone(),
            file.proc_root,
            env.get_string("PROC_ROOT", &defaults.proc_root.to_string_lossy())
                .map(PathBuf::from),
        );
        let sys_root = layer(
            defaults.sys_root.clone(),
            file.sys_root,
            env.get_string("SYS_ROOT", &defaults.sys_root.to_string_lossy())
                .map(PathBuf::from),
        );

        let supervisor_url = layer(
            DEFAULT_SUPERVISOR_URL.to_string(),
            file.supervisor_url,
            env.get_string("SUPERVISOR_URL", DEFAULT_SUPERVISOR_URL),
        );

        let supervisor_timeout_secs = layer(
            DEFAULT_SUPERVISOR_TIMEOUT_SECS,
            file.supervisor_timeout_secs,
            env.get_u64_range(
                "SUPERVISOR_TIMEOUT_SECS",
                DEFAULT_SUPERVISOR_TIMEOUT_SECS,
                1,
                300,
            ),
        );

        Self {
            cpu_sample_ms,
            include_disks,
            include_network,
            percpu,
            proc_root,
            sys_root,
            supervisor_url,
            supervisor_timeout_secs,
        }
    }

    /// Filesystem roots for the collectors.
    pub fn host_paths(&self) -> HostPaths {
        HostPaths {
            proc_root: self.proc_root.value.clone(),
            sys_root: self.sys_root.value.clone(),
        }
    }
}

/// Get the configuration directory path.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "pistat", CONFIG_DIR_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Load `config.toml` from `path` or the default location.
///
/// A missing file yields empty settings; an unreadable or malformed one is an error.
pub fn load_file_config(path: Option<&Path>) -> Result<FileConfig> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => match config_dir() {
            Some(dir) => dir.join(CONFIG_FILE_NAME),
            None => {
                debug!("No config directory available, using defaults");
                return Ok(FileConfig::default());
            }
        },
    };

    if !config_path.exists() {
        if path.is_some() {
            anyhow::bail!("Config file not found: {}", config_path.display());
        }
        debug!("Config not found at {:?}, using defaults", config_path);
        return Ok(FileConfig::default());
    }

    info!("Loading config from {:?}", config_path);
    let contents = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config from {:?}", config_path))?;

    toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config from {:?}", config_path))
}

/// Load every layer and resolve the configuration.
///
/// Returns the environment errors alongside so the caller can report them
/// after logging is set up.
pub fn load_config(
    path: Option<&Path>,
    cli: CliOverrides,
) -> Result<(StatusConfig, Vec<EnvError>)> {
    let file = load_file_config(path)?;
    let mut env = EnvParser::new();
    let config = StatusConfig::resolve(file, &mut env, cli);
    Ok((config, env.take_errors()))
}

/// Generate an example config.toml.
pub fn example_config() -> String {
    r#"# pistat configuration
# Place this file at ~/.config/pistat/config.toml

# CPU load sampling window in milliseconds
cpu_sample_ms = 200

# Per-disk usage (runs lsblk)
include_disks = true

# IP/MAC addresses, interfaces and network speed
include_network = true

# Per-core CPU load
percpu = false

# Home Assistant Supervisor (only used inside an add-on)
supervisor_url = "http://supervisor"
supervisor_timeout_secs = 5
"#
    .to_string()
}
