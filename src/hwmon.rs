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

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use cf_error::ChowfanError;
use thiserror::Error;
use tracing::debug;

use crate::aggregate::SensorReading;
use crate::sensors::{SensorSnapshot, SensorSource};

pub const DEFAULT_HWMON_ROOT: &str = "/sys/class/hwmon";

#[derive(Debug, Clone)]
pub struct ChipReadings {
    pub name: String,
    pub temps: Vec<(String, f64)>, // Celsius
    pub fans: Vec<(String, u64)>,  // RPM
}

#[derive(Error, Debug)]
pub enum HwmonError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("hwmon root {0} does not exist")]
    MissingRoot(PathBuf),
}

impl From<HwmonError> for ChowfanError {
    fn from(e: HwmonError) -> Self {
        ChowfanError::sensor_unavailable(e.to_string())
    }
}

pub fn read_all(root: &Path) -> Result<Vec<ChipReadings>, HwmonError> {
    let mut out: Vec<ChipReadings> = Vec::new();

    let entries = match fs::read_dir(root) {
        Ok(it) => it,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(HwmonError::MissingRoot(root.to_path_buf())),
        Err(e) => return Err(e.into()),
    };

    for ent in entries.flatten() {
        let path = ent.path();
        // Resolve to the actual device dir in case of symlink
        let dir = match fs::canonicalize(&path) {
            Ok(p) => p,
            Err(_) => path.clone(),
        };
        if !dir.is_dir() { continue; }

        let name = read_trimmed(dir.join("name")).unwrap_or_else(|_| "unknown".into());

        let mut temps: Vec<(String, f64)> = Vec::new();
        let mut fans: Vec<(String, u64)> = Vec::new();

        let Ok(dir_iter) = fs::read_dir(&dir) else { continue };
        for file in dir_iter.flatten() {
            let fname = file.file_name();
            let fname = fname.to_string_lossy();
            let fpath = file.path();

            if let Some(idx) = extract_index(&fname, "temp", "_input") {
                let label = read_trimmed(dir.join(format!("temp{}_label", idx)))
                    .unwrap_or_else(|_| format!("temp{}", idx));
                if let Ok(raw) = read_trimmed(&fpath) {
                    if let Ok(mc) = raw.parse::<i64>() { // millidegree C
                        temps.push((label, (mc as f64) / 1000.0));
                    }
                }
            } else if let Some(idx) = extract_index(&fname, "fan", "_input") {
                let label = read_trimmed(dir.join(format!("fan{}_label", idx)))
                    .unwrap_or_else(|_| format!("fan{}", idx));
                if let Ok(raw) = read_trimmed(&fpath) {
                    if let Ok(rpm) = raw.parse::<u64>() {
                        fans.push((label, rpm));
                    }
                }
            }
        }

        temps.sort_by(|a, b| a.0.cmp(&b.0));
        fans.sort_by(|a, b| a.0.cmp(&b.0));
        out.push(ChipReadings { name, temps, fans });
    }

    // Sort by name for stable output
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

fn read_trimmed<P: AsRef<Path>>(p: P) -> io::Result<String> {
    let mut s = String::new();
    fs::File::open(p)?.read_to_string(&mut s)?;
    Ok(s.trim().to_string())
}

pub fn extract_index(fname: &str, prefix: &str, suffix: &str) -> Option<usize> {
    if fname.len() > prefix.len() + suffix.len() && fname.starts_with(prefix) && fname.ends_with(suffix) {
        let mid = &fname[prefix.len()..fname.len() - suffix.len()];
        mid.parse().ok()
    } else {
        None
    }
}

/// Reads temperatures and the controlled fan's RPM straight from sysfs
pub struct HwmonSource {
    root: PathBuf,
    fan_label: String,
}

impl HwmonSource {
    pub fn new(root: impl Into<PathBuf>, fan_label: impl Into<String>) -> Self {
        Self { root: root.into(), fan_label: fan_label.into() }
    }
}

impl SensorSource for HwmonSource {
    fn read(&self) -> cf_error::Result<SensorSnapshot> {
        let chips = read_all(&self.root)?;
        let mut snapshot = SensorSnapshot::default();

        for chip in &chips {
            for (label, c) in &chip.temps {
                snapshot.readings.push(SensorReading::new(format!("{}:{}", chip.name, label), *c));
            }
            if snapshot.fan_rpm.is_none() {
                if let Some((_, rpm)) = chip.fans.iter().find(|(label, _)| *label == self.fan_label) {
                    snapshot.fan_rpm = u32::try_from(*rpm).ok();
                }
            }
        }

        debug!(chips = chips.len(), readings = snapshot.readings.len(), "READ: {}", self.root.display());
        Ok(snapshot)
    }

    fn describe(&self) -> String {
        format!("hwmon ({})", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_utils::create_mock_hwmon_tree;
    use tempfile::TempDir;
    use std::io::Write;

    #[test]
    fn test_extract_index_valid() {
        assert_eq!(extract_index("temp1_input", "temp", "_input"), Some(1));
        assert_eq!(extract_index("fan12_input", "fan", "_input"), Some(12));
    }

    #[test]
    fn test_extract_index_invalid() {
        assert_eq!(extract_index("temp1_label", "temp", "_input"), None);
        assert_eq!(extract_index("tempX_input", "temp", "_input"), None);
        assert_eq!(extract_index("temp_input", "temp", "_input"), None);
        assert_eq!(extract_index("pwm1", "fan", "_input"), None);
    }

    #[test]
    fn test_read_trimmed_mock() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("test.txt");

        let mut file = fs::File::create(&test_file).unwrap();
        writeln!(file, "  test content  ").unwrap();

        assert_eq!(read_trimmed(&test_file).unwrap(), "test content");
    }

    #[test]
    fn test_read_trimmed_nonexistent_file() {
        let temp_dir = TempDir::new().unwrap();
        assert!(read_trimmed(temp_dir.path().join("nonexistent.txt")).is_err());
    }

    #[test]
    fn test_read_all_labels_and_millidegrees() {
        let tree = create_mock_hwmon_tree();
        let chips = read_all(tree.path()).unwrap();
        assert_eq!(chips.len(), 2);

        let core = &chips[0];
        assert_eq!(core.name, "coretemp");
        assert_eq!(core.temps, vec![("Core 0".to_string(), 45.5), ("Package id 0".to_string(), 51.0)]);

        let tp = &chips[1];
        assert_eq!(tp.name, "thinkpad");
        // temp2 has no label file
        assert_eq!(tp.temps, vec![("CPU".to_string(), 52.0), ("temp2".to_string(), -3.25)]);
        assert_eq!(tp.fans, vec![("fan1".to_string(), 2355)]);
    }

    #[test]
    fn test_source_snapshot() {
        let tree = create_mock_hwmon_tree();
        let source = HwmonSource::new(tree.path(), "fan1");
        let snap = source.read().unwrap();

        let names: Vec<&str> = snap.readings.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["coretemp:Core 0", "coretemp:Package id 0", "thinkpad:CPU", "thinkpad:temp2"]);
        assert_eq!(snap.fan_rpm, Some(2355));

        let other = HwmonSource::new(tree.path(), "fan2");
        assert_eq!(other.read().unwrap().fan_rpm, None);
    }

    #[test]
    fn test_missing_root_is_sensor_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let source = HwmonSource::new(temp_dir.path().join("missing"), "fan1");
        let err = source.read().unwrap_err();
        assert!(err.is_sensor_failure());
    }

    #[test]
    fn test_hwmon_error_display() {
        let err = HwmonError::MissingRoot(PathBuf::from("/sys/class/hwmon"));
        assert_eq!(err.to_string(), "hwmon root /sys/class/hwmon does not exist");
    }
}
