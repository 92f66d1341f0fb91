/*
 * This file is part of Chowfan.
 *
 * Copyright (C) 2025 Chowfan contributors
 *
 * Chowfan is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Chowfan is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Chowfan. If not, see <https://www.gnu.org/licenses/>.
 */

//! chowfand - hysteresis fan control daemon

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};

use chowfan::config::{resolve_config, ConfigOverrides, SensorBackend};
use chowfan::control_loop::{ControlLoop, ShutdownSignal};
use chowfan::fan::{FanDevice, ProcfsFan};
use chowfan::hwmon::HwmonSource;
use chowfan::logger::EventLog;
use chowfan::sensors::{LmSensorsSource, SensorSource};
use chowfan::{AggregationMode, ControllerConfig, ResyncMode};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Max,
    Mean,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    LmSensors,
    Hwmon,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ResyncArg {
    Never,
    Startup,
    EveryTick,
}

#[derive(Debug, Parser)]
#[command(name = "chowfand", version, about = "Hysteresis fan control for ThinkPads")]
struct Cli {
    /// Config file (default: $CHOWFAN_CONFIG or /etc/chowfan/config.json)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Temperature in °C above which a rising trend steps the fan up
    #[arg(long, value_name = "C", allow_negative_numbers = true)]
    threshold: Option<f64>,

    #[arg(long, value_name = "N")]
    min_level: Option<u8>,

    #[arg(long, value_name = "N")]
    max_level: Option<u8>,

    #[arg(long, value_name = "N")]
    initial_level: Option<u8>,

    #[arg(long, value_name = "MS")]
    interval_ms: Option<u64>,

    /// Sensor (`chip:label`) or whole chip to ignore; repeatable
    #[arg(long, value_name = "NAME")]
    exclude: Vec<String>,

    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    #[arg(long, value_name = "PATH")]
    fan_device: Option<PathBuf>,

    #[arg(long, value_enum)]
    resync: Option<ResyncArg>,

    /// Append JSON-lines control events to this file
    #[arg(long, value_name = "PATH")]
    event_log: Option<PathBuf>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,

    /// Skip the root check (for testing against fake device files)
    #[arg(long)]
    allow_non_root: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            max_temp_threshold: self.threshold,
            min_fan_level: self.min_level,
            max_fan_level: self.max_level,
            initial_fan_level: self.initial_level,
            poll_interval_ms: self.interval_ms,
            excluded_sensors: self.exclude.clone(),
            aggregation_mode: self.mode.map(|m| match m {
                ModeArg::Max => AggregationMode::Max,
                ModeArg::Mean => AggregationMode::Mean,
            }),
            sensor_backend: self.backend.map(|b| match b {
                BackendArg::LmSensors => SensorBackend::LmSensors,
                BackendArg::Hwmon => SensorBackend::Hwmon,
            }),
            fan_device: self.fan_device.clone(),
            resync: self.resync.map(|r| match r {
                ResyncArg::Never => ResyncMode::Never,
                ResyncArg::Startup => ResyncMode::Startup,
                ResyncArg::EveryTick => ResyncMode::EveryTick,
            }),
            event_log: self.event_log.clone(),
        }
    }
}

fn init_tracing() {
    let log_level = std::env::var("CHOWFAN_LOG").unwrap_or_else(|_| "info".to_string());

    // Journal when running under systemd, stdout otherwise
    let mut use_journald = std::path::Path::new("/run/systemd/journal/socket").exists();

    if use_journald {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
                use_journald = false;
                tracing_subscriber::fmt()
                    .with_target(false)
                    .with_level(true)
                    .with_env_filter(&log_level)
                    .init();
            }
        }
    } else {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_level(true)
            .with_env_filter(&log_level)
            .init();
    }

    info!("STARTUP: Logging to {}", if use_journald { "systemd journal" } else { "stdout" });
}

fn verify_privileges() -> anyhow::Result<()> {
    // SAFETY: geteuid only returns the process's effective user ID.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        anyhow::bail!("chowfand must run as root (euid=0) to write the fan device; got euid={}", euid);
    }
    Ok(())
}

fn build_source(cfg: &ControllerConfig) -> anyhow::Result<Arc<dyn SensorSource>> {
    let source: Arc<dyn SensorSource> = match cfg.sensor_backend {
        SensorBackend::LmSensors => Arc::new(
            LmSensorsSource::new(cfg.sensors_command.clone(), cfg.fan_label.clone())
                .context("building lm-sensors source")?,
        ),
        SensorBackend::Hwmon => Arc::new(HwmonSource::new(cfg.hwmon_root.clone(), cfg.fan_label.clone())),
    };
    Ok(source)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = resolve_config(cli.config.as_deref(), &cli.overrides()).context("loading configuration")?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&cfg)?);
        return Ok(());
    }

    if cli.allow_non_root {
        warn!("Root check disabled by --allow-non-root");
    } else {
        verify_privileges()?;
    }

    let source = build_source(&cfg)?;
    let device: Arc<dyn FanDevice> = Arc::new(ProcfsFan::new(cfg.fan_device.clone()));

    let events = match &cfg.event_log {
        Some(path) => {
            let log = EventLog::open(path)?;
            info!("STARTUP: Recording control events to {}", path.display());
            log
        }
        None => EventLog::disabled(),
    };

    info!(
        "STARTUP: {} -> {}, threshold {:.1}°C, levels {}..={}",
        source.describe(),
        device.describe(),
        cfg.max_temp_threshold,
        cfg.min_fan_level,
        cfg.max_fan_level
    );

    let shutdown = Arc::new(ShutdownSignal::new());
    let handler_shutdown = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT/SIGTERM - initiating shutdown");
        handler_shutdown.trigger();
    }) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not revert the fan.", e);
    }

    let mut control = ControlLoop::new(&cfg, source, device).with_event_log(events);
    control.run(&shutdown).await?;

    info!("SHUTDOWN: chowfand stopped");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_tracing();
    info!("STARTUP: chowfand {} starting", VERSION);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("chowfand: {:#}", e);
        std::process::exit(1);
    }
}
