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

//! Optional JSON-lines event journal, one object per control event:
//! `{"ts_ms": 1700000000000, "event": "level_changed", "data": {...}}`

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use cf_error::{ChowfanError, Result};
use serde_json::{json, Value};

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[derive(Debug, Default)]
pub struct EventLog {
    file: Option<File>,
}

impl EventLog {
    /// Journal that drops everything
    pub fn disabled() -> Self {
        Self { file: None }
    }

    /// Open `path` for appending, creating it and its parent directory
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ChowfanError::config(format!("cannot open event log {}: {}", path.display(), e)))?;
        Ok(Self { file: Some(file) })
    }

    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    /// Best effort: a failed write never disturbs the control loop
    pub fn record(&mut self, event: &str, data: Value) {
        let Some(f) = self.file.as_mut() else { return };
        let line = json!({
            "ts_ms": now_millis(),
            "event": event,
            "data": data,
        })
        .to_string();
        let _ = writeln!(f, "{}", line);
    }
}
