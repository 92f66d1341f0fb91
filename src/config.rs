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

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cf_error::{ChowfanError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregate::{AggregationMode, ExclusionSet};
use crate::calibration::{CalibrationTable, ResyncMode};
use crate::controller::HysteresisSettings;
use crate::fan::{DEFAULT_FAN_DEVICE, PROCFS_MAX_LEVEL};
use crate::hwmon::DEFAULT_HWMON_ROOT;

pub const CONFIG_ENV: &str = "CHOWFAN_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/chowfan/config.json";

const MIN_POLL_INTERVAL_MS: u64 = 100;
const MIN_IO_TIMEOUT_MS: u64 = 10;
const THRESHOLD_RANGE: std::ops::RangeInclusive<f64> = -50.0..=150.0;

#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SensorBackend {
    /// Parse the output of the `sensors` command
    #[default]
    LmSensors,
    /// Read /sys/class/hwmon directly
    Hwmon,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct ControllerConfig {
    pub max_temp_threshold: f64,
    pub min_fan_level: u8,
    pub max_fan_level: u8,
    pub initial_fan_level: u8,
    pub poll_interval_ms: u64,
    /// Upper bound for a single sensor read or device write
    pub io_timeout_ms: u64,
    pub excluded_sensors: ExclusionSet,
    pub aggregation_mode: AggregationMode,
    pub sensor_backend: SensorBackend,
    pub sensors_command: String,
    pub hwmon_root: PathBuf,
    /// Label of the controlled fan in the sensor output
    pub fan_label: String,
    pub fan_device: PathBuf,
    pub calibration: Option<CalibrationTable>,
    pub resync: ResyncMode,
    /// Consecutive failed level writes before the loop gives up
    pub max_device_failures: u32,
    /// Consecutive failed reads before the loop gives up (never when unset)
    pub max_sensor_failures: Option<u32>,
    pub event_log: Option<PathBuf>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_temp_threshold: 55.0,
            min_fan_level: 0,
            max_fan_level: 7,
            initial_fan_level: 7,
            poll_interval_ms: 5000,
            io_timeout_ms: 3000,
            excluded_sensors: ExclusionSet::new(),
            aggregation_mode: AggregationMode::Max,
            sensor_backend: SensorBackend::LmSensors,
            sensors_command: "sensors".to_string(),
            hwmon_root: PathBuf::from(DEFAULT_HWMON_ROOT),
            fan_label: "fan1".to_string(),
            fan_device: PathBuf::from(DEFAULT_FAN_DEVICE),
            calibration: Some(CalibrationTable::thinkpad_default()),
            resync: ResyncMode::Never,
            max_device_failures: 5,
            max_sensor_failures: None,
            event_log: None,
        }
    }
}

/// Command-line values that win over the config file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub max_temp_threshold: Option<f64>,
    pub min_fan_level: Option<u8>,
    pub max_fan_level: Option<u8>,
    pub initial_fan_level: Option<u8>,
    pub poll_interval_ms: Option<u64>,
    pub excluded_sensors: Vec<String>,
    pub aggregation_mode: Option<AggregationMode>,
    pub sensor_backend: Option<SensorBackend>,
    pub fan_device: Option<PathBuf>,
    pub resync: Option<ResyncMode>,
    pub event_log: Option<PathBuf>,
}

impl ControllerConfig {
    pub fn hysteresis(&self) -> HysteresisSettings {
        HysteresisSettings {
            max_temp_threshold: self.max_temp_threshold,
            min_level: self.min_fan_level,
            max_level: self.max_fan_level,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn apply_overrides(&mut self, o: &ConfigOverrides) {
        if let Some(v) = o.max_temp_threshold { self.max_temp_threshold = v; }
        if let Some(v) = o.min_fan_level { self.min_fan_level = v; }
        if let Some(v) = o.max_fan_level { self.max_fan_level = v; }
        if let Some(v) = o.initial_fan_level { self.initial_fan_level = v; }
        if let Some(v) = o.poll_interval_ms { self.poll_interval_ms = v; }
        if let Some(v) = o.aggregation_mode { self.aggregation_mode = v; }
        if let Some(v) = o.sensor_backend { self.sensor_backend = v; }
        if let Some(v) = &o.fan_device { self.fan_device = v.clone(); }
        if let Some(v) = o.resync { self.resync = v; }
        if let Some(v) = &o.event_log { self.event_log = Some(v.clone()); }
        self.excluded_sensors.extend(o.excluded_sensors.iter().cloned());
    }

    pub fn validate(&self) -> Result<()> {
        if !self.max_temp_threshold.is_finite() || !THRESHOLD_RANGE.contains(&self.max_temp_threshold) {
            return Err(ChowfanError::invalid_config(
                "max_temp_threshold",
                format!("{} is outside {:?}", self.max_temp_threshold, THRESHOLD_RANGE),
            ));
        }
        if self.max_fan_level > PROCFS_MAX_LEVEL {
            return Err(ChowfanError::invalid_config(
                "max_fan_level",
                format!("{} exceeds the highest device level {}", self.max_fan_level, PROCFS_MAX_LEVEL),
            ));
        }
        if self.min_fan_level > self.max_fan_level {
            return Err(ChowfanError::invalid_config(
                "min_fan_level",
                format!("{} is above max_fan_level {}", self.min_fan_level, self.max_fan_level),
            ));
        }
        if !(self.min_fan_level..=self.max_fan_level).contains(&self.initial_fan_level) {
            return Err(ChowfanError::invalid_config(
                "initial_fan_level",
                format!(
                    "{} is outside {}..={}",
                    self.initial_fan_level, self.min_fan_level, self.max_fan_level
                ),
            ));
        }
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(ChowfanError::invalid_config(
                "poll_interval_ms",
                format!("must be at least {}", MIN_POLL_INTERVAL_MS),
            ));
        }
        if self.io_timeout_ms < MIN_IO_TIMEOUT_MS {
            return Err(ChowfanError::invalid_config(
                "io_timeout_ms",
                format!("must be at least {}", MIN_IO_TIMEOUT_MS),
            ));
        }
        if self.max_device_failures == 0 {
            return Err(ChowfanError::invalid_config("max_device_failures", "must be at least 1"));
        }
        if self.max_sensor_failures == Some(0) {
            return Err(ChowfanError::invalid_config("max_sensor_failures", "must be at least 1 when set"));
        }
        if self.excluded_sensors.iter().any(|s| s.trim().is_empty()) {
            return Err(ChowfanError::invalid_config("excluded_sensors", "empty sensor name"));
        }
        if self.sensors_command.trim().is_empty() {
            return Err(ChowfanError::invalid_config("sensors_command", "must not be empty"));
        }
        if let Some(table) = &self.calibration {
            table
                .validate()
                .map_err(|reason| ChowfanError::invalid_config("calibration", reason))?;
            // Only consulted when resyncing
            if let Some(top) = table.highest_level().filter(|_| self.resync != ResyncMode::Never) {
                if top > self.max_fan_level {
                    return Err(ChowfanError::invalid_config(
                        "calibration",
                        format!("level {} is above max_fan_level {}", top, self.max_fan_level),
                    ));
                }
            }
        }
        if self.resync != ResyncMode::Never && self.calibration.as_ref().map_or(true, |t| t.is_empty()) {
            return Err(ChowfanError::invalid_config("resync", "requires a non-empty calibration table"));
        }
        Ok(())
    }
}

/// `--config` wins, then `$CHOWFAN_CONFIG`, then the system default
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Ok(p) = env::var(CONFIG_ENV) {
        if !p.is_empty() {
            return PathBuf::from(p);
        }
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

pub fn load_config(path: &Path) -> Result<ControllerConfig> {
    let data = fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ChowfanError::FileNotFound(path.to_path_buf()),
        _ => ChowfanError::FileRead { path: path.to_path_buf(), source: e },
    })?;
    let cfg: ControllerConfig = serde_json::from_str(&data)?;
    Ok(cfg)
}

/// Load the config the daemon should run with.
///
/// A missing file is only tolerated at the implicit default location; a path
/// given on the command line or through the environment has to exist.
pub fn resolve_config(explicit: Option<&Path>, overrides: &ConfigOverrides) -> Result<ControllerConfig> {
    let path = config_path(explicit);
    let implicit = explicit.is_none() && path == Path::new(DEFAULT_CONFIG_PATH);

    let mut cfg = match load_config(&path) {
        Ok(cfg) => {
            info!("Loaded config from {}", path.display());
            cfg
        }
        Err(ChowfanError::FileNotFound(_)) if implicit => {
            info!("No config at {}, using defaults", path.display());
            ControllerConfig::default()
        }
        Err(e) => return Err(e),
    };

    cfg.apply_overrides(overrides);
    cfg.validate()?;
    Ok(cfg)
}
