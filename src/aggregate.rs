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

//! Reduction of one poll's sensor readings to the single temperature the
//! controller acts on.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Sensor names dropped before aggregation. Entries are either a full
/// `chip:label` name or a bare chip name, which drops every reading of that chip.
pub type ExclusionSet = HashSet<String>;

#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub name: String,
    pub temperature: f64,
}

impl SensorReading {
    pub fn new(name: impl Into<String>, temperature: f64) -> Self {
        Self { name: name.into(), temperature }
    }

    /// Chip part of a `chip:label` name (the whole name when there is no label)
    pub fn chip(&self) -> &str {
        self.name.split_once(':').map(|(chip, _)| chip).unwrap_or(&self.name)
    }
}

#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    /// Follow the hottest sensor
    #[default]
    Max,
    /// Arithmetic mean, smooths out a single spiking sensor
    Mean,
}

pub fn is_excluded(reading: &SensorReading, exclusions: &ExclusionSet) -> bool {
    exclusions.contains(&reading.name) || exclusions.contains(reading.chip())
}

/// Aggregate the usable readings of one poll.
///
/// Returns `None` when nothing is left after exclusion (no usable signal this
/// tick). Non-finite temperatures are dropped like excluded sensors.
pub fn aggregate(
    readings: &[SensorReading],
    exclusions: &ExclusionSet,
    mode: AggregationMode,
) -> Option<f64> {
    let mut usable = readings
        .iter()
        .filter(|r| r.temperature.is_finite() && !is_excluded(r, exclusions))
        .map(|r| r.temperature);

    let first = usable.next()?;
    match mode {
        AggregationMode::Max => Some(usable.fold(first, f64::max)),
        AggregationMode::Mean => {
            let (sum, count) = usable.fold((first, 1usize), |(sum, n), t| (sum + t, n + 1));
            Some(sum / count as f64)
        }
    }
}
