//! One-wire temperature sensor access.
//!
//! The `w1_therm` kernel driver registers every DS18B20 on the bus as a
//! directory under `/sys/bus/w1/devices/`. Reading `<id>/w1_slave` triggers a
//! conversion and returns two lines of text:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
//!
//! `YES` means the driver validated the CRC; `t=` is the temperature in
//! millidegrees Celsius.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::ser::{Serialize, SerializeStruct, Serializer};
use tracing::{debug, warn};

/// Name of the per-device data file exposed by the driver.
const DATA_FILE: &str = "w1_slave";

/// Marker the driver prints after a successful CRC check.
const CRC_OK_MARKER: &str = "YES";

/// Separator in front of the millidegree reading.
const TEMPERATURE_SEPARATOR: &str = " t=";

/// Why a device did not yield a temperature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// The device directory has no `w1_slave` file
    FileNotFound,

    /// The driver did not confirm the CRC
    NoYesFlag,

    /// The file could not be read or its contents could not be parsed
    Parse(String),
}

impl std::fmt::Display for SensorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorError::FileNotFound => write!(f, "w1_slave file not found"),
            SensorError::NoYesFlag => write!(f, "No YES flag: bad data."),
            SensorError::Parse(detail) => write!(f, "Exception during file parsing: {}", detail),
        }
    }
}

impl std::error::Error for SensorError {}

impl From<io::Error> for SensorError {
    fn from(err: io::Error) -> Self {
        SensorError::Parse(err.to_string())
    }
}

/// Outcome of reading a single one-wire device.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Device id, e.g. `28-3c01b5563c0c`
    pub device_id: String,

    /// Temperature in degrees Celsius, or the reason there is none
    pub result: Result<f64, SensorError>,
}

impl SensorReading {
    pub fn new(device_id: impl Into<String>, result: Result<f64, SensorError>) -> Self {
        Self {
            device_id: device_id.into(),
            result,
        }
    }

    pub fn temperature_celsius(&self) -> Option<f64> {
        self.result.as_ref().ok().copied()
    }

    pub fn error(&self) -> Option<&SensorError> {
        self.result.as_ref().err()
    }
}

// Flattened so a reading logs as {device_id, temperature_celsius, error}.
impl Serialize for SensorReading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("SensorReading", 3)?;
        state.serialize_field("device_id", &self.device_id)?;
        state.serialize_field("temperature_celsius", &self.temperature_celsius())?;
        state.serialize_field("error", &self.error().map(|e| e.to_string()))?;
        state.end()
    }
}

/// Source of per-device readings.
///
/// `SensorReader` is the sysfs implementation; the poll loop only depends on
/// this trait.
pub trait SensorSource {
    /// Read every device currently on the bus, keyed by device id.
    ///
    /// Never fails as a whole: per-device problems are reported inside the
    /// individual readings.
    fn read_all(&self) -> BTreeMap<String, SensorReading>;
}

/// Reads DS18B20 probes through the `w1_therm` sysfs interface.
#[derive(Debug, Clone)]
pub struct SensorReader {
    devices_dir: PathBuf,
}

impl SensorReader {
    /// Create a reader rooted at the given device registry directory.
    pub fn new(devices_dir: impl Into<PathBuf>) -> Self {
        Self {
            devices_dir: devices_dir.into(),
        }
    }

    pub fn devices_dir(&self) -> &Path {
        &self.devices_dir
    }

    /// List the device ids registered under the devices directory.
    ///
    /// Returns an empty list (and logs a warning) when the directory itself
    /// cannot be read, e.g. when the w1 overlay is not loaded.
    pub fn device_ids(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.devices_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    dir = %self.devices_dir.display(),
                    error = %e,
                    "Cannot list one-wire devices"
                );
                return Vec::new();
            }
        };

        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        ids.sort();
        ids
    }

    /// Read and parse a single device.
    pub fn read_device(&self, device_id: &str) -> SensorReading {
        let data_file = self.devices_dir.join(device_id).join(DATA_FILE);

        let result = if data_file.is_file() {
            fs::read_to_string(&data_file)
                .map_err(SensorError::from)
                .and_then(|text| Self::parse(&text))
        } else {
            Err(SensorError::FileNotFound)
        };

        debug!(device_id = device_id, result = ?result, "Read one-wire device");
        SensorReading::new(device_id, result)
    }

    /// Parse the text of a `w1_slave` file into degrees Celsius.
    ///
    /// The text must contain the `YES` CRC marker; the temperature is the
    /// integer after the first ` t=`, in millidegrees.
    pub fn parse(text: &str) -> Result<f64, SensorError> {
        if !text.contains(CRC_OK_MARKER) {
            return Err(SensorError::NoYesFlag);
        }

        let (_, reading) = text.split_once(TEMPERATURE_SEPARATOR).ok_or_else(|| {
            SensorError::Parse(format!("no '{}' field in sensor data", TEMPERATURE_SEPARATOR.trim()))
        })?;

        let reading = reading.trim();
        let millidegrees: i64 = reading.parse().map_err(|_| {
            SensorError::Parse(format!("expected integer millidegrees, got '{}'", reading))
        })?;

        Ok(millidegrees as f64 / 1000.0)
    }
}

impl SensorSource for SensorReader {
    fn read_all(&self) -> BTreeMap<String, SensorReading> {
        self.device_ids()
            .into_iter()
            .map(|id| {
                let reading = self.read_device(&id);
                (id, reading)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GOOD: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n\
                        72 01 4b 46 7f ff 0e 10 57 t=23125\n";
    const BAD_CRC: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 NO\n\
                           72 01 4b 46 7f ff 0e 10 57 t=23125\n";

    fn add_device(dir: &TempDir, id: &str, contents: Option<&str>) {
        let device = dir.path().join(id);
        fs::create_dir_all(&device).unwrap();
        if let Some(text) = contents {
            fs::write(device.join(DATA_FILE), text).unwrap();
        }
    }

    #[test]
    fn test_parse_valid_reading() {
        assert_eq!(SensorReader::parse(GOOD), Ok(23.125));
    }

    #[test]
    fn test_parse_is_exact_division() {
        for millis in [0i64, 1, -1250, 85000, 19937, -55000, 125000] {
            let text = format!("aa bb : crc=aa YES\naa bb t={}\n", millis);
            assert_eq!(SensorReader::parse(&text), Ok(millis as f64 / 1000.0));
        }
    }

    #[test]
    fn test_parse_without_yes_flag() {
        assert_eq!(SensorReader::parse(BAD_CRC), Err(SensorError::NoYesFlag));
        assert_eq!(SensorReader::parse(""), Err(SensorError::NoYesFlag));
    }

    #[test]
    fn test_parse_missing_temperature_field() {
        let err = SensorReader::parse("aa : crc=aa YES\n").unwrap_err();
        assert!(matches!(err, SensorError::Parse(_)));
        assert!(err.to_string().starts_with("Exception during file parsing: "));
    }

    #[test]
    fn test_parse_non_integer_temperature() {
        let err = SensorReader::parse("aa : crc=aa YES\naa t=23.5\n").unwrap_err();
        assert!(matches!(err, SensorError::Parse(ref detail) if detail.contains("23.5")));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(SensorError::FileNotFound.to_string(), "w1_slave file not found");
        assert_eq!(SensorError::NoYesFlag.to_string(), "No YES flag: bad data.");
        assert_eq!(
            SensorError::Parse("boom".to_string()).to_string(),
            "Exception during file parsing: boom"
        );
    }

    #[test]
    fn test_read_all_mixed_devices() {
        let dir = TempDir::new().unwrap();
        add_device(&dir, "28-000000000001", Some(GOOD));
        add_device(&dir, "28-000000000002", Some(BAD_CRC));
        add_device(&dir, "w1_bus_master1", None);

        let reader = SensorReader::new(dir.path());
        let readings = reader.read_all();

        assert_eq!(readings.len(), 3);
        assert_eq!(readings["28-000000000001"].temperature_celsius(), Some(23.125));
        assert!(readings["28-000000000001"].error().is_none());
        assert_eq!(readings["28-000000000002"].error(), Some(&SensorError::NoYesFlag));
        assert_eq!(readings["28-000000000002"].temperature_celsius(), None);
        assert_eq!(readings["w1_bus_master1"].error(), Some(&SensorError::FileNotFound));
    }

    #[test]
    fn test_read_device_unreadable_contents() {
        let dir = TempDir::new().unwrap();
        let device = dir.path().join("28-000000000003");
        fs::create_dir_all(&device).unwrap();
        fs::write(device.join(DATA_FILE), [0xff, 0xfe, 0x00, 0x59, 0x45, 0x53]).unwrap();

        let reading = SensorReader::new(dir.path()).read_device("28-000000000003");
        assert_eq!(reading.temperature_celsius(), None);
        assert!(matches!(reading.error(), Some(SensorError::Parse(_))));
        assert!(reading
            .error()
            .unwrap()
            .to_string()
            .starts_with("Exception during file parsing: "));
    }

    #[test]
    fn test_read_all_missing_directory() {
        let reader = SensorReader::new("/nonexistent/w1/devices");
        assert!(reader.read_all().is_empty());
    }

    #[test]
    fn test_device_ids_sorted() {
        let dir = TempDir::new().unwrap();
        add_device(&dir, "28-b", Some(GOOD));
        add_device(&dir, "28-a", Some(GOOD));

        let reader = SensorReader::new(dir.path());
        assert_eq!(reader.device_ids(), vec!["28-a".to_string(), "28-b".to_string()]);
    }

    #[test]
    fn test_reading_serialization() {
        let ok = SensorReading::new("28-a", Ok(21.5));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["device_id"], "28-a");
        assert_eq!(json["temperature_celsius"], 21.5);
        assert!(json["error"].is_null());

        let bad = SensorReading::new("28-b", Err(SensorError::NoYesFlag));
        let json = serde_json::to_value(&bad).unwrap();
        assert!(json["temperature_celsius"].is_null());
        assert_eq!(json["error"], "No YES flag: bad data.");
    }
}
