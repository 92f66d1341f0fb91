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

//! Hysteresis level controller
//!
//! # How It Works
//!
//! 1. **Seeding**: the first temperature only records a baseline. A trend
//!    needs two samples.
//!
//! 2. **Stepping up**: above the threshold *and* hotter than last tick, the
//!    level goes up by one.
//!
//! 3. **Stepping down**: below the threshold *and* not hotter than last tick
//!    (equal counts as cooling), the level goes down by one.
//!
//! 4. **Holding**: anything else, including a temperature exactly at the
//!    threshold, keeps the level.
//!
//! The level moves at most one step per tick, so reaching a target `n` levels
//! away takes `n` ticks. The controller does no I/O: it reports the level that
//! still has to be written and the caller confirms the write with
//! [`HysteresisController::mark_written`].

use serde::Serialize;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct HysteresisSettings {
    /// Temperature in °C above which a rising trend steps the fan up
    pub max_temp_threshold: f64,
    pub min_level: u8,
    pub max_level: u8,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ControllerState {
    pub current_level: u8,
    pub previous_temperature: Option<f64>,
}

#[derive(Debug, Copy, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Seeded,
    Raised,
    Lowered,
    Held,
}

/// Outcome of one controller step
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Step {
    pub temperature: f64,
    pub previous_temperature: Option<f64>,
    pub old_level: u8,
    pub new_level: u8,
    pub decision: Decision,
    /// Level to write to the device, if it differs from the last written one
    pub pending_write: Option<u8>,
}

impl Step {
    pub fn changed(&self) -> bool {
        self.old_level != self.new_level
    }
}

#[derive(Debug, Clone)]
pub struct HysteresisController {
    settings: HysteresisSettings,
    state: ControllerState,
    last_written: Option<u8>,
}

impl HysteresisController {
    /// `initial_level` is clamped into the configured bounds
    pub fn new(settings: HysteresisSettings, initial_level: u8) -> Self {
        let mut controller = Self {
            settings,
            state: ControllerState { current_level: 0, previous_temperature: None },
            last_written: None,
        };
        controller.state.current_level = controller.clamp(initial_level);
        controller
    }

    pub fn settings(&self) -> &HysteresisSettings {
        &self.settings
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn current_level(&self) -> u8 {
        self.state.current_level
    }

    pub fn previous_temperature(&self) -> Option<f64> {
        self.state.previous_temperature
    }

    pub fn last_written(&self) -> Option<u8> {
        self.last_written
    }

    /// Never panics; with inverted bounds `max_level` wins
    pub fn clamp(&self, level: u8) -> u8 {
        level.max(self.settings.min_level).min(self.settings.max_level)
    }

    /// Level the device still has to receive, `None` when it is up to date
    pub fn pending_write(&self) -> Option<u8> {
        let level = self.clamp(self.state.current_level);
        if self.last_written == Some(level) {
            None
        } else {
            Some(level)
        }
    }

    /// Record a successful device write
    pub fn mark_written(&mut self, level: u8) {
        self.last_written = Some(self.clamp(level));
    }

    /// Force the next step to rewrite the current level
    pub fn forget_written(&mut self) {
        self.last_written = None;
    }

    /// Adopt a level observed on the hardware (e.g. from a calibrated RPM).
    /// The observed level is what the device is already running at, so it is
    /// also recorded as written. Returns the adopted level.
    pub fn resync(&mut self, observed_level: u8) -> u8 {
        let level = self.clamp(observed_level);
        self.state.current_level = level;
        self.last_written = Some(level);
        level
    }

    /// Feed one aggregate temperature. A non-finite value leaves the state
    /// untouched and holds, like a tick without data.
    pub fn step(&mut self, temperature: f64) -> Step {
        let old_level = self.state.current_level;
        let previous = self.state.previous_temperature;

        if !temperature.is_finite() {
            return Step {
                temperature,
                previous_temperature: previous,
                old_level,
                new_level: old_level,
                decision: Decision::Held,
                pending_write: None,
            };
        }

        let Some(prev) = previous else {
            self.state.previous_temperature = Some(temperature);
            return Step {
                temperature,
                previous_temperature: None,
                old_level,
                new_level: old_level,
                decision: Decision::Seeded,
                pending_write: None,
            };
        };

        let threshold = self.settings.max_temp_threshold;
        let decision = if temperature > threshold && temperature > prev && old_level < self.settings.max_level {
            self.state.current_level = old_level + 1;
            Decision::Raised
        } else if temperature < threshold && temperature <= prev && old_level > self.settings.min_level {
            self.state.current_level = old_level - 1;
            Decision::Lowered
        } else {
            Decision::Held
        };

        self.state.previous_temperature = Some(temperature);

        Step {
            temperature,
            previous_temperature: previous,
            old_level,
            new_level: self.state.current_level,
            decision,
            pending_write: self.pending_write(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(threshold: f64) -> HysteresisSettings {
        HysteresisSettings { max_temp_threshold: threshold, min_level: 0, max_level: 7 }
    }

    fn seeded(initial: u8, previous: f64) -> HysteresisController {
        let mut c = HysteresisController::new(settings(55.0), initial);
        let step = c.step(previous);
        assert_eq!(step.decision, Decision::Seeded);
        c
    }

    #[test]
    fn test_first_step_only_seeds() {
        let mut c = HysteresisController::new(settings(55.0), 4);
        let step = c.step(90.0);
        assert_eq!(step.decision, Decision::Seeded);
        assert_eq!(step.new_level, 4);
        assert_eq!(step.pending_write, None);
        assert_eq!(c.previous_temperature(), Some(90.0));
        assert_eq!(c.current_level(), 4);
    }

    #[test]
    fn test_hot_and_rising_at_max_stays_at_max() {
        let mut c = seeded(7, 60.0);
        let step = c.step(65.0);
        assert_eq!(step.decision, Decision::Held);
        assert_eq!(c.current_level(), 7);
        assert_eq!(c.previous_temperature(), Some(65.0));

        let step = c.step(70.0);
        assert_eq!(step.new_level, 7);
        assert_eq!(c.previous_temperature(), Some(70.0));
    }

    #[test]
    fn test_cool_and_falling_steps_down() {
        let mut c = seeded(4, 70.0);
        let step = c.step(50.0);
        assert_eq!(step.decision, Decision::Lowered);
        assert_eq!(step.old_level, 4);
        assert_eq!(step.new_level, 3);
        assert_eq!(step.previous_temperature, Some(70.0));
    }

    #[test]
    fn test_exactly_at_threshold_holds() {
        let mut c = seeded(4, 50.0);
        let step = c.step(55.0);
        assert_eq!(step.decision, Decision::Held);
        assert_eq!(c.current_level(), 4);
        assert_eq!(c.previous_temperature(), Some(55.0));

        // At the threshold after cooling from above: still holds
        let mut c = seeded(4, 60.0);
        assert_eq!(c.step(55.0).decision, Decision::Held);
    }

    #[test]
    fn test_hot_and_rising_steps_up() {
        let mut c = seeded(2, 56.0);
        let step = c.step(58.0);
        assert_eq!(step.decision, Decision::Raised);
        assert_eq!(step.new_level, 3);
    }

    #[test]
    fn test_hot_but_flat_or_falling_holds() {
        let mut c = seeded(2, 60.0);
        assert_eq!(c.step(60.0).decision, Decision::Held);
        assert_eq!(c.step(58.0).decision, Decision::Held);
        assert_eq!(c.current_level(), 2);
    }

    #[test]
    fn test_cool_plateau_keeps_stepping_down() {
        let mut c = seeded(3, 40.0);
        assert_eq!(c.step(40.0).decision, Decision::Lowered);
        assert_eq!(c.step(40.0).decision, Decision::Lowered);
        assert_eq!(c.step(40.0).decision, Decision::Lowered);
        assert_eq!(c.current_level(), 0);
        // Already at the floor
        assert_eq!(c.step(40.0).decision, Decision::Held);
        assert_eq!(c.current_level(), 0);
    }

    #[test]
    fn test_cool_but_rising_holds() {
        let mut c = seeded(3, 40.0);
        assert_eq!(c.step(45.0).decision, Decision::Held);
        assert_eq!(c.current_level(), 3);
    }

    #[test]
    fn test_level_moves_one_step_and_stays_in_bounds() {
        let s = HysteresisSettings { max_temp_threshold: 55.0, min_level: 1, max_level: 5 };
        let temps = [
            50.0, 60.0, 70.0, 80.0, 90.0, 95.0, 99.0, 100.0, 101.0, 30.0, 29.0, 29.0, 28.0, 27.0, 26.0,
            56.0, 57.0, 55.0, 54.0, 90.0, 20.0, 20.0,
        ];
        let mut c = HysteresisController::new(s, 3);
        for t in temps {
            let step = c.step(t);
            assert!(step.old_level.abs_diff(step.new_level) <= 1);
            assert!((1..=5).contains(&step.new_level));
        }
    }

    #[test]
    fn test_non_finite_temperature_leaves_state_untouched() {
        let mut c = HysteresisController::new(settings(55.0), 4);
        let step = c.step(f64::NAN);
        assert_eq!(step.decision, Decision::Held);
        assert_eq!(step.pending_write, None);
        assert_eq!(c.previous_temperature(), None);

        assert_eq!(c.step(60.0).decision, Decision::Seeded);
        assert_eq!(c.step(f64::INFINITY).decision, Decision::Held);
        assert_eq!(c.step(f64::NAN).decision, Decision::Held);
        assert_eq!(c.previous_temperature(), Some(60.0));
        assert_eq!(c.current_level(), 4);

        let step = c.step(65.0);
        assert_eq!(step.decision, Decision::Raised);
        assert_eq!(step.previous_temperature, Some(60.0));
        assert_eq!(c.current_level(), 5);
    }

    #[test]
    fn test_inverted_bounds_do_not_panic() {
        let inverted = HysteresisSettings { max_temp_threshold: 55.0, min_level: 6, max_level: 2 };
        let c = HysteresisController::new(inverted, 7);
        assert_eq!(c.current_level(), 2);
        assert_eq!(c.clamp(0), 2);
    }

    #[test]
    fn test_initial_level_is_clamped() {
        let s = HysteresisSettings { max_temp_threshold: 55.0, min_level: 2, max_level: 5 };
        assert_eq!(HysteresisController::new(s, 7).current_level(), 5);
        assert_eq!(HysteresisController::new(s, 0).current_level(), 2);
    }

    #[test]
    fn test_pending_write_tracks_last_written() {
        let mut c = HysteresisController::new(settings(55.0), 4);
        assert_eq!(c.pending_write(), Some(4));
        c.mark_written(4);
        assert_eq!(c.pending_write(), None);

        c.step(70.0);
        let step = c.step(50.0);
        assert_eq!(step.pending_write, Some(3));

        // Write failed: nothing marked, the next held step still asks for it
        let step = c.step(55.0);
        assert_eq!(step.decision, Decision::Held);
        assert_eq!(step.pending_write, Some(3));
        c.mark_written(3);

        let step = c.step(55.0);
        assert_eq!(step.pending_write, None);
    }

    #[test]
    fn test_forget_written_forces_rewrite() {
        let mut c = HysteresisController::new(settings(55.0), 4);
        c.mark_written(4);
        c.forget_written();
        assert_eq!(c.pending_write(), Some(4));
    }

    #[test]
    fn test_resync_adopts_observed_level_without_write() {
        let mut c = HysteresisController::new(settings(55.0), 7);
        c.mark_written(7);
        assert_eq!(c.resync(2), 2);
        assert_eq!(c.current_level(), 2);
        assert_eq!(c.pending_write(), None);

        let s = HysteresisSettings { max_temp_threshold: 55.0, min_level: 1, max_level: 5 };
        let mut c = HysteresisController::new(s, 3);
        assert_eq!(c.resync(7), 5);
        assert_eq!(c.resync(0), 1);
    }

    #[test]
    fn test_convergence_takes_one_tick_per_level() {
        let mut c = HysteresisController::new(settings(55.0), 0);
        c.step(56.0);
        let mut ticks = 0;
        let mut t = 56.0;
        while c.current_level() < 7 {
            t += 1.0;
            c.step(t);
            ticks += 1;
        }
        assert_eq!(ticks, 7);
    }
}
