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

//! Fan device sinks

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use cf_error::{ChowfanError, Result};
use tracing::debug;

/// thinkpad_acpi fan control file
pub const DEFAULT_FAN_DEVICE: &str = "/proc/acpi/ibm/fan";

/// Highest manual level thinkpad_acpi accepts
pub const PROCFS_MAX_LEVEL: u8 = 7;

/// What gets written to the device
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FanCommand {
    Level(u8),
    Automatic,
}

impl fmt::Display for FanCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FanCommand::Level(level) => write!(f, "level {}", level),
            FanCommand::Automatic => write!(f, "level auto"),
        }
    }
}

/// Anything that can apply a fan level.
///
/// Implementations may block; the control loop calls them off the async
/// executor with a timeout.
#[cfg_attr(test, mockall::automock)]
pub trait FanDevice: Send + Sync {
    fn set_level(&self, level: u8) -> Result<()>;

    /// Hand the fan back to firmware control
    fn set_automatic(&self) -> Result<()>;

    fn describe(&self) -> String {
        "fan device".to_string()
    }
}

/// Writes `level N` / `level auto` to a thinkpad_acpi style control file.
/// The file must already exist; it is never created.
pub struct ProcfsFan {
    path: PathBuf,
}

impl ProcfsFan {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_command(&self, command: FanCommand) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| ChowfanError::device_write(&self.path, e.to_string()))?;
        file.write_all(command.to_string().as_bytes())
            .map_err(|e| ChowfanError::device_write(&self.path, e.to_string()))?;
        debug!("WRITE: '{}' -> {}", command, self.path.display());
        Ok(())
    }
}

impl FanDevice for ProcfsFan {
    fn set_level(&self, level: u8) -> Result<()> {
        if level > PROCFS_MAX_LEVEL {
            return Err(ChowfanError::device_write(
                &self.path,
                format!("level {} out of range (0..={})", level, PROCFS_MAX_LEVEL),
            ));
        }
        self.write_command(FanCommand::Level(level))
    }

    fn set_automatic(&self) -> Result<()> {
        self.write_command(FanCommand::Automatic)
    }

    fn describe(&self) -> String {
        format!("procfs fan ({})", self.path.display())
    }
}
