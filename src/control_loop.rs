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

//! Fan Control Loop
//!
//! Polls the sensor source, runs the hysteresis controller and writes levels
//! to the fan device, one tick per poll interval.
//!
//! # Lifecycle
//! - **Start**: write the initial level, then seed the controller from an
//!   immediate reading so the first trend comparison happens on the next tick
//! - **Ticks**: a failed read skips the tick; a failed write is retried on the
//!   next tick until `max_device_failures` consecutive failures end the run
//! - **Shutdown**: the fan is handed back to automatic control exactly once on
//!   every exit path (signal, error, dropped future or panic)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use cf_error::{ChowfanError, Result};
use serde_json::json;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::aggregate::{aggregate, AggregationMode, ExclusionSet};
use crate::calibration::{level_for_rpm, CalibrationTable, ResyncMode};
use crate::config::ControllerConfig;
use crate::controller::{Decision, HysteresisController, Step};
use crate::fan::FanDevice;
use crate::logger::EventLog;
use crate::sensors::{SensorSnapshot, SensorSource};

/// Consecutive sensor failures between repeated error logs
const SENSOR_ERROR_LOG_EVERY: u32 = 10;

/// Cooperative shutdown request, safe to trigger from a signal handler thread
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    triggered: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        // notify_one keeps a permit when nobody is waiting yet
        self.notify.notify_one();
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        while !self.is_triggered() {
            self.notify.notified().await;
        }
    }
}

/// What one tick amounted to
#[derive(Debug, Clone, PartialEq)]
pub enum TickReport {
    /// The sensor source failed or timed out; state untouched
    SensorUnavailable,
    /// Nothing usable left after exclusion; state untouched
    NoData,
    Stepped {
        step: Step,
        /// Level written to the device this tick, if any
        written: Option<u8>,
        /// A pending write was attempted and failed
        write_failed: bool,
    },
}

/// Serializes every call into the fan device.
///
/// A level write that outlived `io_timeout` keeps running on the blocking
/// pool. Holding the lock across each call orders `set_automatic` after it, and
/// once shutdown has begun level writes still waiting for the lock are dropped.
struct DeviceGate {
    device: Arc<dyn FanDevice>,
    lock: Mutex<()>,
    closing: AtomicBool,
}

impl DeviceGate {
    fn new(device: Arc<dyn FanDevice>) -> Self {
        Self { device, lock: Mutex::new(()), closing: AtomicBool::new(false) }
    }

    fn set_level(&self, level: u8) -> Result<()> {
        let _held = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.closing.load(Ordering::SeqCst) {
            return Err(ChowfanError::generic(format!(
                "fan level {} not sent: reverting to automatic",
                level
            )));
        }
        self.device.set_level(level)
    }

    /// Stop accepting level writes
    fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    fn set_automatic(&self) -> Result<()> {
        self.close();
        let _held = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.device.set_automatic()
    }
}

/// Reverts the fan to automatic if the loop is left without reaching the
/// explicit reversion (future dropped mid-await, or a panic unwinding).
///
/// The reversion runs on its own thread; dropping waits at most `timeout` for
/// it and leaves it running in the background past that.
struct AutomaticGuard {
    gate: Arc<DeviceGate>,
    timeout: Duration,
    armed: bool,
}

impl AutomaticGuard {
    fn arm(gate: Arc<DeviceGate>, timeout: Duration) -> Self {
        Self { gate, timeout, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AutomaticGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("SHUTDOWN: Control loop left abruptly - reverting fan to automatic");
        self.gate.close();

        let gate = self.gate.clone();
        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("chowfan-revert".to_string())
            .spawn(move || {
                let _ = tx.send(gate.set_automatic());
            });
        if let Err(e) = spawned {
            error!("SHUTDOWN: Could not start reversion thread: {}", e);
            return;
        }

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(())) => info!("SHUTDOWN: Fan is back under automatic control"),
            Ok(Err(e)) => error!("SHUTDOWN: Failed to revert fan to automatic: {}", e),
            Err(_) => error!(
                "SHUTDOWN: Reverting fan to automatic took longer than {:?}, still pending",
                self.timeout
            ),
        }
    }
}

pub struct ControlLoop {
    controller: HysteresisController,
    source: Arc<dyn SensorSource>,
    gate: Arc<DeviceGate>,
    /// Level write that outlived `io_timeout` and is still running
    in_flight: Option<JoinHandle<Result<()>>>,
    exclusions: ExclusionSet,
    mode: AggregationMode,
    calibration: Option<CalibrationTable>,
    resync: ResyncMode,
    poll_interval: Duration,
    io_timeout: Duration,
    max_device_failures: u32,
    max_sensor_failures: Option<u32>,
    sensor_failures: u32,
    device_failures: u32,
    events: EventLog,
}

impl ControlLoop {
    /// `config` is expected to have passed `ControllerConfig::validate`.
    /// Inverted level bounds do not panic but pin the fan at `max_fan_level`.
    pub fn new(config: &ControllerConfig, source: Arc<dyn SensorSource>, device: Arc<dyn FanDevice>) -> Self {
        Self {
            controller: HysteresisController::new(config.hysteresis(), config.initial_fan_level),
            source,
            gate: Arc::new(DeviceGate::new(device)),
            in_flight: None,
            exclusions: config.excluded_sensors.clone(),
            mode: config.aggregation_mode,
            calibration: config.calibration.clone(),
            resync: config.resync,
            poll_interval: config.poll_interval(),
            io_timeout: config.io_timeout(),
            max_device_failures: config.max_device_failures.max(1),
            max_sensor_failures: config.max_sensor_failures,
            sensor_failures: 0,
            device_failures: 0,
            events: EventLog::disabled(),
        }
    }

    pub fn with_event_log(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    pub fn controller(&self) -> &HysteresisController {
        &self.controller
    }

    pub fn exclusions(&self) -> &ExclusionSet {
        &self.exclusions
    }

    /// Exclude another sensor from the next tick on
    pub fn exclude_sensor(&mut self, name: impl Into<String>) {
        self.exclusions.insert(name.into());
    }

    /// Run until `shutdown` fires or an unrecoverable error occurs, then hand
    /// the fan back to automatic control.
    ///
    /// Returns the loop error if there was one. When the loop ended cleanly
    /// but the reversion failed, the reversion error is returned.
    pub async fn run(&mut self, shutdown: &ShutdownSignal) -> Result<()> {
        let mut guard = AutomaticGuard::arm(self.gate.clone(), self.io_timeout);

        let outcome = self.drive(shutdown).await;
        if let Err(e) = &outcome {
            error!("Control loop stopped: {}", e);
        }

        guard.disarm();
        let reverted = self.revert_to_automatic().await;

        match (outcome, reverted) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) => Err(e),
            (Ok(()), Err(r)) => Err(r),
            // Already logged the loop error above; the reversion failure is the
            // one that leaves the hardware in a bad state
            (Err(_), Err(r)) => Err(r),
        }
    }

    async fn drive(&mut self, shutdown: &ShutdownSignal) -> Result<()> {
        if shutdown.is_triggered() {
            info!("Shutdown requested before start");
            return Ok(());
        }

        self.start().await?;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.wait() => {
                    info!("SIGNAL: Shutdown requested - leaving control loop");
                    return Ok(());
                }
            }
            self.tick().await?;
        }
    }

    /// Write the initial level and seed the controller from an immediate reading
    pub async fn start(&mut self) -> Result<()> {
        info!(
            level = self.controller.current_level(),
            interval_ms = self.poll_interval.as_millis() as u64,
            "Fan control loop starting"
        );

        if let Some(level) = self.controller.pending_write() {
            match self.write_level(level).await {
                Ok(()) => info!("ACTION: Set initial fan level {}", level),
                Err(e) => self.device_failed(level, e)?,
            }
        }

        self.tick().await.map(|_| ())
    }

    /// One poll-decide-act iteration. Errors only when a failure limit is hit.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let snapshot = match self.read_sensors().await {
            Ok(s) => {
                if self.sensor_failures > 0 {
                    debug!("Sensor source recovered after {} failures", self.sensor_failures);
                    self.sensor_failures = 0;
                }
                s
            }
            Err(e) => return self.sensor_failed(e),
        };

        let seeding = self.controller.previous_temperature().is_none();
        let wants_resync = match self.resync {
            ResyncMode::Never => false,
            ResyncMode::Startup => seeding,
            ResyncMode::EveryTick => true,
        };
        if wants_resync {
            self.resync_from(&snapshot);
        }

        let Some(temperature) = aggregate(&snapshot.readings, &self.exclusions, self.mode) else {
            info!(level = self.controller.current_level(), "No usable temperature this tick - holding");
            self.events.record("no_data", json!({
                "level": self.controller.current_level(),
                "readings": snapshot.readings.len(),
            }));
            return Ok(TickReport::NoData);
        };

        let step = self.controller.step(temperature);
        let mut written = None;
        let mut write_failed = false;

        if let Some(level) = step.pending_write {
            match self.write_level(level).await {
                Ok(()) => {
                    written = Some(level);
                }
                Err(e) => {
                    write_failed = true;
                    self.device_failed(level, e)?;
                }
            }
        }

        self.report(&step, write_failed);
        Ok(TickReport::Stepped { step, written, write_failed })
    }

    fn resync_from(&mut self, snapshot: &SensorSnapshot) {
        let (Some(table), Some(rpm)) = (&self.calibration, snapshot.fan_rpm) else {
            debug!("Resync skipped: no calibration table or no fan RPM in this reading");
            return;
        };
        let before = self.controller.current_level();
        let observed = level_for_rpm(rpm, table, self.controller.settings().max_level);
        let level = self.controller.resync(observed);
        if level != before {
            info!(rpm, from = before, to = level, "Resynced fan level from measured RPM");
        }
        self.events.record("resynced", json!({ "rpm": rpm, "old_level": before, "new_level": level }));
    }

    fn report(&mut self, step: &Step, write_failed: bool) {
        let event = match step.decision {
            Decision::Seeded => "seeded",
            Decision::Held => "level_held",
            Decision::Raised | Decision::Lowered => "level_changed",
        };
        match step.decision {
            Decision::Seeded => info!(
                temperature = step.temperature,
                level = step.new_level,
                "Seeded controller with {:.1}°C",
                step.temperature
            ),
            Decision::Held => info!(
                temperature = step.temperature,
                level = step.new_level,
                "Temp {:.1}°C - holding fan level {}",
                step.temperature,
                step.new_level
            ),
            Decision::Raised | Decision::Lowered => info!(
                temperature = step.temperature,
                old_level = step.old_level,
                new_level = step.new_level,
                "Temp {:.1}°C - fan level {} -> {}",
                step.temperature,
                step.old_level,
                step.new_level
            ),
        }
        self.events.record(event, json!({
            "temperature": step.temperature,
            "previous_temperature": step.previous_temperature,
            "old_level": step.old_level,
            "new_level": step.new_level,
            "decision": step.decision,
            "write_failed": write_failed,
        }));
    }

    fn sensor_failed(&mut self, e: ChowfanError) -> Result<TickReport> {
        self.sensor_failures += 1;
        let failures = self.sensor_failures;

        if failures == 1 {
            warn!("READ: Sensor source unavailable, skipping tick: {}", e);
        } else if failures % SENSOR_ERROR_LOG_EVERY == 0 {
            error!("READ: Sensor source unavailable ({} consecutive failures): {}", failures, e);
        } else {
            debug!("READ: Sensor source unavailable ({} consecutive): {}", failures, e);
        }
        self.events.record("sensor_unavailable", json!({
            "consecutive": failures,
            "error": e.to_string(),
        }));

        match self.max_sensor_failures {
            Some(limit) if failures >= limit => Err(e),
            _ => Ok(TickReport::SensorUnavailable),
        }
    }

    fn device_failed(&mut self, level: u8, e: ChowfanError) -> Result<()> {
        self.device_failures += 1;
        error!(
            "ACTION: Failed to set fan level {} (attempt {}/{}): {}",
            level, self.device_failures, self.max_device_failures, e
        );
        self.events.record("device_write_failed", json!({
            "level": level,
            "consecutive": self.device_failures,
            "error": e.to_string(),
        }));
        if self.device_failures >= self.max_device_failures {
            return Err(e);
        }
        Ok(())
    }

    async fn read_sensors(&self) -> Result<SensorSnapshot> {
        let source = self.source.clone();
        match self.blocking("sensor read", move || source.read()).await {
            Ok(s) => Ok(s),
            Err(e @ ChowfanError::SensorUnavailable(_)) => Err(e),
            Err(e) => Err(ChowfanError::sensor_unavailable(e.to_string())),
        }
    }

    /// At most one level write is outstanding: while a timed-out write is still
    /// running, new levels are refused and count as device failures.
    async fn write_level(&mut self, level: u8) -> Result<()> {
        if let Some(pending) = &self.in_flight {
            if !pending.is_finished() {
                return Err(ChowfanError::timeout(format!(
                    "previous fan write still running, level {} not sent",
                    level
                )));
            }
            self.in_flight = None;
        }

        let gate = self.gate.clone();
        let mut handle = tokio::task::spawn_blocking(move || gate.set_level(level));
        match tokio::time::timeout(self.io_timeout, &mut handle).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join)) => {
                return Err(ChowfanError::generic(format!("fan level write task failed: {}", join)));
            }
            Err(_) => {
                self.in_flight = Some(handle);
                return Err(ChowfanError::timeout(format!(
                    "fan level write took longer than {:?}",
                    self.io_timeout
                )));
            }
        }

        self.controller.mark_written(level);
        self.device_failures = 0;
        Ok(())
    }

    async fn revert_to_automatic(&mut self) -> Result<()> {
        info!("SHUTDOWN: Reverting fan to automatic control");
        self.gate.close();
        if let Some(pending) = self.in_flight.take() {
            info!("SHUTDOWN: Waiting for an unfinished fan level write");
            if tokio::time::timeout(self.io_timeout, pending).await.is_err() {
                warn!("SHUTDOWN: Fan level write still running after {:?}", self.io_timeout);
            }
        }

        let gate = self.gate.clone();
        let result = self.blocking("revert to automatic", move || gate.set_automatic()).await;
        match &result {
            Ok(()) => {
                self.controller.forget_written();
                info!("SHUTDOWN: Fan is back under automatic control");
                self.events.record("reverted_to_automatic", json!({ "ok": true }));
            }
            Err(e) => {
                error!("SHUTDOWN: Failed to revert fan to automatic: {}", e);
                self.events.record("reverted_to_automatic", json!({ "ok": false, "error": e.to_string() }));
            }
        }
        result
    }

    /// Run a blocking call off the executor, bounded by `io_timeout`. A call that
    /// times out is not cancelled.
    async fn blocking<T, F>(&self, what: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        match tokio::time::timeout(self.io_timeout, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(ChowfanError::generic(format!("{} task failed: {}", what, join))),
            Err(_) => Err(ChowfanError::timeout(format!("{} took longer than {:?}", what, self.io_timeout))),
        }
    }
}
