/*
 * Test utilities and fixtures for Chowfan
 *
 * Sample sensor dumps, a fake hwmon tree and ready-made configurations
 * shared by the unit test modules.
 */

#[cfg(test)]
pub mod test_utils {
    use crate::aggregate::SensorReading;
    use crate::config::ControllerConfig;
    use crate::sensors::SensorSnapshot;
    use std::fs;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    /// `sensors` output from a ThinkPad with the fan running at level 1
    pub const SAMPLE_SENSORS_OUTPUT: &str = "\
acpitz-acpi-0
Adapter: ACPI interface
temp1:        +47.0°C  (crit = +99.0°C)

coretemp-isa-0000
Adapter: ISA adapter
Package id 0:  +48.0°C  (high = +100.0°C, crit = +100.0°C)
Core 0:        +45.0°C  (high = +100.0°C, crit = +100.0°C)
Core 1:        +46.0°C  (high = +100.0°C, crit = +100.0°C)

thinkpad-isa-0000
Adapter: ISA adapter
fan1:        2355 RPM
CPU:          +47.0°C
GPU:          +41.0°C
temp3:            N/A
";

    /// Builds a snapshot from `(name, °C)` pairs
    pub fn snapshot(readings: &[(&str, f64)], fan_rpm: Option<u32>) -> SensorSnapshot {
        SensorSnapshot {
            readings: readings.iter().map(|(n, t)| SensorReading::new(*n, *t)).collect(),
            fan_rpm,
        }
    }

    /// Default configuration with timings short enough for tests
    pub fn create_test_config() -> ControllerConfig {
        ControllerConfig {
            poll_interval_ms: 100,
            io_timeout_ms: 2000,
            max_sensor_failures: None,
            ..ControllerConfig::default()
        }
    }

    /// Creates a temporary hwmon root with a coretemp and a thinkpad chip
    pub fn create_mock_hwmon_tree() -> TempDir {
        let temp_dir = TempDir::new().unwrap();

        let hwmon0 = temp_dir.path().join("hwmon0");
        fs::create_dir_all(&hwmon0).unwrap();
        fs::write(hwmon0.join("name"), "coretemp\n").unwrap();
        fs::write(hwmon0.join("temp1_input"), "45500\n").unwrap();
        fs::write(hwmon0.join("temp1_label"), "Core 0\n").unwrap();
        fs::write(hwmon0.join("temp2_input"), "51000\n").unwrap();
        fs::write(hwmon0.join("temp2_label"), "Package id 0\n").unwrap();

        let hwmon1 = temp_dir.path().join("hwmon1");
        fs::create_dir_all(&hwmon1).unwrap();
        fs::write(hwmon1.join("name"), "thinkpad\n").unwrap();
        fs::write(hwmon1.join("temp1_input"), "52000\n").unwrap();
        fs::write(hwmon1.join("temp1_label"), "CPU\n").unwrap();
        fs::write(hwmon1.join("temp2_input"), "-3250\n").unwrap();
        fs::write(hwmon1.join("fan1_input"), "2355\n").unwrap();

        temp_dir
    }

    /// Creates a temporary file with JSON content
    pub fn create_temp_json_file<T: serde::Serialize>(data: &T) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        let json = serde_json::to_string_pretty(data).unwrap();
        temp_file.write_all(json.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    /// Asserts that two floating point numbers are approximately equal
    pub fn assert_approx_eq(a: f64, b: f64, tolerance: f64) {
        assert!(
            (a - b).abs() < tolerance,
            "Values {} and {} are not approximately equal (tolerance: {})",
            a, b, tolerance
        );
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;

    #[test]
    fn test_snapshot_helper() {
        let snap = snapshot(&[("cpu:Core 0", 50.0), ("gpu:edge", 41.5)], Some(3200));
        assert_eq!(snap.readings.len(), 2);
        assert_eq!(snap.readings[1].chip(), "gpu");
        assert_eq!(snap.fan_rpm, Some(3200));
    }

    #[test]
    fn test_test_config_is_valid() {
        let cfg = create_test_config();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.poll_interval_ms, 100);
    }

    #[test]
    fn test_temp_json_file_holds_pretty_json() {
        let file = create_temp_json_file(&serde_json::json!({ "max_temp_threshold": 60.0 }));
        let text = std::fs::read_to_string(file.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_approx_eq(value["max_temp_threshold"].as_f64().unwrap(), 60.0, 1e-9);
    }

    #[test]
    #[should_panic]
    fn test_assert_approx_eq_fails() {
        assert_approx_eq(1.0, 1.1, 0.01);
    }
}
