//! Heartbeat watchdog daemon entry point.
//!
//! Loads configuration, starts the producer and watchdog threads, and blocks
//! until they conclude. In normal operation neither does: the only planned
//! exit is the emergency stop taking the process down.

use anyhow::{Context, Result};
use clap::Parser;
use hbw_common::config::{MonitorConfig, StopAction};
use hbw_runtime::{lock_process_memory, spawn_monitor, stop_for_action, MonotonicClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable that enables producer fault injection.
const SIMULATE_HANG_ENV: &str = "HBW_SIMULATE_HANG";
/// Environment variable naming a configuration file.
const CONFIG_PATH_ENV: &str = "HBW_CONFIG_PATH";

/// Heartbeat watchdog command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "hbw-daemon",
    about = "Heartbeat watchdog - aborts the process when the control thread stops beating",
    version,
    long_about = None
)]
struct Args {
    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Make the producer hang (fault injection).
    #[arg(long)]
    simulate_hang: bool,

    /// Run the producer normally for this long, then hang (e.g. "2s").
    ///
    /// Implies `--simulate-hang`.
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    hang_after: Option<Duration>,

    /// Heartbeat timeout (e.g. "500ms").
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Emergency stop action: abort or exit.
    #[arg(long, value_name = "ACTION")]
    stop_action: Option<StopAction>,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        let config = effective_config(&args)?;
        print!("{}", config.to_toml().context("Failed to render configuration")?);
        return Ok(());
    }

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting heartbeat watchdog");

    let config = effective_config(&args)?;

    info!(
        timeout = %humantime::format_duration(config.heartbeat_timeout),
        stop_action = %config.stop_action,
        simulate_hang = config.fault_injection.simulate_hang,
        "Configuration loaded"
    );

    lock_process_memory(&config.realtime).context("Failed to lock memory")?;

    let estop = stop_for_action(config.stop_action, config.exit_code);
    let handles = spawn_monitor(&config, Arc::new(MonotonicClock::new()), estop)
        .context("Failed to start monitor")?;

    // Only reachable if both loops return, which production stop actions never allow.
    let (exit, report) = handles.join().context("Monitor thread failed")?;
    warn!(?exit, %report, "Monitor loops returned");
    Ok(())
}

/// Load, override and validate the configuration.
fn effective_config(args: &Args) -> Result<MonitorConfig> {
    let mut config = load_config(args)?;
    let env_hang = std::env::var(SIMULATE_HANG_ENV).ok();
    apply_overrides(&mut config, args, env_hang.as_deref());
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("hbw_daemon={level},hbw_runtime={level},hbw_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `HBW_CONFIG_PATH` environment variable
/// 3. `/etc/hbw/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<MonitorConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return MonitorConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()));
    }

    if let Ok(env_path) = std::env::var(CONFIG_PATH_ENV) {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from {}", CONFIG_PATH_ENV);
            return MonitorConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from {CONFIG_PATH_ENV}={env_path}")
            });
        }
        warn!(
            path = %env_path,
            "{} set but file does not exist, checking other locations", CONFIG_PATH_ENV
        );
    }

    for candidate in ["/etc/hbw/config.toml", "config/default.toml"] {
        let config_path = PathBuf::from(candidate);
        if config_path.exists() {
            info!(?config_path, "Loading config file");
            return MonitorConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {candidate}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(MonitorConfig::default())
}

/// Apply command-line and environment overrides on top of the file config.
fn apply_overrides(config: &mut MonitorConfig, args: &Args, env_hang: Option<&str>) {
    if let Some(raw) = env_hang {
        match parse_flag(raw) {
            Some(enabled) => config.fault_injection.simulate_hang = enabled,
            None => warn!(value = raw, "Ignoring unrecognized {}", SIMULATE_HANG_ENV),
        }
    }
    if args.simulate_hang {
        config.fault_injection.simulate_hang = true;
    }
    if let Some(after) = args.hang_after {
        config.fault_injection.simulate_hang = true;
        config.fault_injection.hang_after = after;
    }
    if let Some(timeout) = args.timeout {
        config.heartbeat_timeout = timeout;
    }
    if let Some(action) = args.stop_action {
        config.stop_action = action;
    }
}

/// Parse a boolean environment flag.
fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
