//! pistat: host status for single-board computers.
#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pistat::collect::address::{Ifconfig, get_ips};
use pistat::collect::cpu::{self, CpuSampler};
use pistat::config::{CliOverrides, example_config, load_config};
use pistat::{
    Collectors, DiskCollector, LogConfig, MemoryInfo, ProcNetDev, RateSampler, StatusConfig,
    SysNet, collect_status, init_logging,
};
use pistat_common::EnvParser;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "pistat", version, about = "Host status for single-board computers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to <config dir>/pistat/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect a full status snapshot
    Status {
        #[arg(long, default_value = "json")]
        format: OutputFormat,

        /// Sampling window in milliseconds for CPU load and network speed
        #[arg(long)]
        sample_ms: Option<u64>,

        /// Skip disk usage
        #[arg(long)]
        no_disks: bool,

        /// Skip addresses, interfaces and network speed
        #[arg(long)]
        no_network: bool,

        /// Report per-core CPU load
        #[arg(long)]
        percpu: bool,
    },
    /// Print network throughput repeatedly
    Speed {
        /// Time between samples in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Stop after this many samples (runs until interrupted otherwise)
        #[arg(long)]
        count: Option<u64>,
    },
    /// CPU load, temperature and frequency
    Cpu {
        #[arg(long)]
        sample_ms: Option<u64>,

        #[arg(long)]
        percpu: bool,
    },
    /// Memory usage
    Memory,
    /// Root filesystem and per-disk usage
    Disks,
    /// IP address per interface
    Ips,
    /// MAC address per interface
    Macs,
    /// Interface names, link state and connection kind
    Interfaces,
    /// Show the effective configuration and where each value came from
    Config {
        /// Print an example config.toml instead
        #[arg(long)]
        example: bool,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Serialize)]
struct CpuReport {
    count: usize,
    usage: pistat::CpuUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature_celsius: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency: Option<pistat::CpuFreq>,
}

#[derive(Serialize)]
struct DiskReport {
    root: pistat::DiskInfo,
    disks: std::collections::BTreeMap<String, pistat::DiskInfo>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn overrides(command: &Commands) -> CliOverrides {
    match command {
        Commands::Status {
            sample_ms,
            no_disks,
            no_network,
            percpu,
            ..
        } => CliOverrides {
            cpu_sample_ms: *sample_ms,
            include_disks: no_disks.then_some(false),
            include_network: no_network.then_some(false),
            percpu: percpu.then_some(true),
        },
        Commands::Cpu { sample_ms, percpu } => CliOverrides {
            cpu_sample_ms: *sample_ms,
            percpu: percpu.then_some(true),
            ..Default::default()
        },
        _ => CliOverrides::default(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut env = EnvParser::new();
    let mut log_config = LogConfig::from_parser(&mut env, "info");
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;
    for err in env.take_errors() {
        warn!(error = %err, "Ignoring invalid logging setting");
    }

    let (config, env_errors) = load_config(cli.config.as_deref(), overrides(&cli.command))?;
    for err in env_errors {
        warn!(error = %err, "Ignoring invalid environment setting");
    }
    debug!(?config, "Effective configuration");

    run(cli.command, &config)
}

fn run(command: Commands, config: &StatusConfig) -> Result<()> {
    let paths = config.host_paths();

    match command {
        Commands::Status { format, .. } => {
            let mut collectors = Collectors::from_config(config);
            let status = collect_status(&mut collectors, config)?;
            let output = match format {
                OutputFormat::Json => status.to_json()?,
                OutputFormat::Pretty => status.to_json_pretty()?,
            };
            println!("{}", output);
        }
        Commands::Speed { interval_ms, count } => {
            let mut sampler = RateSampler::new(ProcNetDev::with_path(paths.net_dev()));
            sampler.sample().context("Failed to read network counters")?;
            let interval = Duration::from_millis(interval_ms);
            let mut printed = 0;
            while count.is_none_or(|limit| printed < limit) {
                std::thread::sleep(interval);
                let rate = sampler.sample().context("Failed to read network counters")?;
                println!("{}", serde_json::to_string(&rate)?);
                printed += 1;
            }
        }
        Commands::Cpu { .. } => {
            let mut sampler = CpuSampler::new(paths.clone());
            let usage = sampler
                .sample_over(
                    Duration::from_millis(config.cpu_sample_ms.value),
                    config.percpu.value,
                )
                .context("Failed to sample CPU load")?;
            print_json(&CpuReport {
                count: cpu::cpu_count(&paths)?,
                usage,
                temperature_celsius: cpu::cpu_temperature(&paths)?,
                frequency: cpu::cpu_freq(&paths)?,
            })?;
        }
        Commands::Memory => print_json(&MemoryInfo::read(&paths)?)?,
        Commands::Disks => {
            let disks = DiskCollector::system();
            print_json(&DiskReport {
                root: disks.root_disk_info()?,
                disks: disks.disks_info()?,
            })?;
        }
        Commands::Ips => {
            let collectors = Collectors::from_config(config);
            let ips = get_ips(collectors.supervisor.as_ref(), &collectors.net, &Ifconfig)?;
            print_json(&ips)?;
        }
        Commands::Macs => print_json(&SysNet::new(paths.sys_class_net()).macs()?)?,
        Commands::Interfaces => {
            print_json(&SysNet::new(paths.sys_class_net()).interfaces()?)?
        }
        Commands::Config { example } => {
            if example {
                print!("{}", example_config());
            } else {
                print_json(config)?;
            }
        }
    }

    Ok(())
}
