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

//! Chowfan - closed-loop thermal fan control for ThinkPads
//!
//! This library polls temperature sensors, reduces them to one aggregate
//! value and steps a discrete fan level up or down with hysteresis, handing
//! the fan back to firmware control when it stops.

pub mod aggregate;
pub mod calibration;
pub mod config;
pub mod control_loop;
pub mod controller;
pub mod fan;
pub mod hwmon;
pub mod logger;
pub mod sensors;

pub use cf_error::{ChowfanError, Result};

pub use aggregate::{aggregate, AggregationMode, ExclusionSet, SensorReading};
pub use calibration::{level_for_rpm, CalibrationBand, CalibrationTable, ResyncMode};
pub use config::{ConfigOverrides, ControllerConfig, SensorBackend};
pub use control_loop::{ControlLoop, ShutdownSignal, TickReport};
pub use controller::{Decision, HysteresisController, HysteresisSettings, Step};
pub use fan::{FanDevice, ProcfsFan};
pub use sensors::{SensorSnapshot, SensorSource};

#[cfg(test)]
pub mod test_utils;
