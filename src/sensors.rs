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

//! Sensor sources
//!
//! The controller only sees [`SensorSnapshot`]s. Two sources ship with the
//! daemon: [`LmSensorsSource`] parses the text output of lm-sensors'
//! `sensors` command, and [`crate::hwmon::HwmonSource`] reads sysfs directly.

use std::process::Command;

use cf_error::{ChowfanError, Result};
use regex::Regex;
use tracing::debug;

use crate::aggregate::SensorReading;

/// One poll worth of readings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorSnapshot {
    pub readings: Vec<SensorReading>,
    /// RPM of the controlled fan, when the source reports one
    pub fan_rpm: Option<u32>,
}

/// Anything that can be polled for temperatures.
///
/// Implementations may block; the control loop calls them off the async
/// executor with a timeout.
#[cfg_attr(test, mockall::automock)]
pub trait SensorSource: Send + Sync {
    fn read(&self) -> Result<SensorSnapshot>;

    fn describe(&self) -> String {
        "sensor source".to_string()
    }
}

/// Runs `sensors` and parses its human-readable output.
///
/// ```text
/// coretemp-isa-0000
/// Adapter: ISA adapter
/// Core 0:        +45.0°C  (high = +100.0°C, crit = +100.0°C)
///
/// thinkpad-isa-0000
/// Adapter: ISA adapter
/// fan1:        2355 RPM
/// CPU:          +52.0°C
/// ```
pub struct LmSensorsSource {
    command: String,
    fan_label: String,
    temp_re: Regex,
    fan_re: Regex,
}

impl LmSensorsSource {
    pub fn new(command: impl Into<String>, fan_label: impl Into<String>) -> Result<Self> {
        let temp_re = Regex::new(r"^\s*([^:]+):\s*([+-]?[0-9]+(?:\.[0-9]+)?)\s?°?C")
            .map_err(|e| ChowfanError::generic(format!("temperature pattern: {}", e)))?;
        let fan_re = Regex::new(r"^\s*([^:]+):\s*([0-9]+)\s+RPM")
            .map_err(|e| ChowfanError::generic(format!("fan pattern: {}", e)))?;
        Ok(Self {
            command: command.into(),
            fan_label: fan_label.into(),
            temp_re,
            fan_re,
        })
    }

    /// Parse one `sensors` dump. Lines that match neither pattern are skipped.
    pub fn parse(&self, output: &str) -> SensorSnapshot {
        let mut snapshot = SensorSnapshot::default();
        let mut chip: Option<&str> = None;

        for line in output.lines() {
            if line.trim().is_empty() {
                chip = None;
                continue;
            }
            // Chip headers are the only unindented lines without a colon
            if !line.starts_with(char::is_whitespace) && !line.contains(':') {
                chip = Some(line.trim());
                continue;
            }

            if let Some(caps) = self.fan_re.captures(line) {
                let label = caps[1].trim();
                if snapshot.fan_rpm.is_none() && label == self.fan_label {
                    snapshot.fan_rpm = caps[2].parse().ok();
                }
                continue;
            }

            if let Some(caps) = self.temp_re.captures(line) {
                let label = caps[1].trim();
                let Ok(temperature) = caps[2].parse::<f64>() else { continue };
                let name = match chip {
                    Some(c) => format!("{}:{}", c, label),
                    None => label.to_string(),
                };
                snapshot.readings.push(SensorReading { name, temperature });
            }
        }

        snapshot
    }
}

impl SensorSource for LmSensorsSource {
    fn read(&self) -> Result<SensorSnapshot> {
        let output = Command::new(&self.command)
            .output()
            .map_err(|e| ChowfanError::sensor_unavailable(format!("failed to run {}: {}", self.command, e)))?;

        if !output.status.success() {
            return Err(ChowfanError::sensor_unavailable(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let snapshot = self.parse(&String::from_utf8_lossy(&output.stdout));
        debug!(
            readings = snapshot.readings.len(),
            fan_rpm = ?snapshot.fan_rpm,
            "READ: {}",
            self.command
        );
        Ok(snapshot)
    }

    fn describe(&self) -> String {
        format!("lm-sensors ({})", self.command)
    }
}
