use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::errors::DeviceError;
use crate::models::DeviceModel;

const BRIGHTNESS_CANDIDATES: [&str; 3] = [
    "/sys/devices/platform/leds-mt65xx/leds/lcd-backlight/brightness",
    "/sys/devices/platform/sprd_backlight/backlight/sprd_backlight/brightness",
    "/sys/devices/platform/backlight/backlight/backlight/brightness",
];

const RELAY_CANDIDATES: [[&str; 2]; 2] = [
    [
        "/sys/devices/platform/leds/green_enable",
        "/sys/class/strelay/relay1",
    ],
    [
        "/sys/devices/platform/leds/red_enable",
        "/sys/class/strelay/relay2",
    ],
];

const TEMP_HUM_CANDIDATE: &str = "/sys/devices/platform/sht3x-user/sht3x_access";

/// File-backed access to the panel hardware: backlight brightness, relays and
/// the combined temperature/humidity sensor. The first existing candidate path
/// per concern is selected at construction; a missing path degrades that
/// concern to a logged no-op. Single writer: nothing else touches these files.
pub struct DeviceService {
    model: DeviceModel,
    brightness_path: Option<PathBuf>,
    relay_paths: Vec<Vec<PathBuf>>,
    temp_hum_path: Option<PathBuf>,
    last_brightness: Mutex<Option<u8>>,
}

impl DeviceService {
    pub fn probe(model: DeviceModel) -> Self {
        let brightness_path = BRIGHTNESS_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_file());

        if brightness_path.is_none() {
            tracing::error!("no backlight brightness file found, brightness writes disabled");
        }

        let relay_paths = RELAY_CANDIDATES
            .iter()
            .take(model.profile().relays)
            .map(|group| {
                group
                    .iter()
                    .map(PathBuf::from)
                    .filter(|p| p.is_file())
                    .collect()
            })
            .collect();

        let temp_hum_path = Some(PathBuf::from(TEMP_HUM_CANDIDATE)).filter(|p| p.is_file());
        if temp_hum_path.is_none() {
            tracing::warn!("no temperature/humidity sensor file found");
        }

        Self {
            model,
            brightness_path,
            relay_paths,
            temp_hum_path,
            last_brightness: Mutex::new(None),
        }
    }

    /// Constructor with explicit backing files, used by tests and unusual
    /// platform layouts.
    pub fn with_paths(
        model: DeviceModel,
        brightness_path: Option<PathBuf>,
        relay_paths: Vec<Vec<PathBuf>>,
        temp_hum_path: Option<PathBuf>,
    ) -> Self {
        Self {
            model,
            brightness_path,
            relay_paths,
            temp_hum_path,
            last_brightness: Mutex::new(None),
        }
    }

    pub fn model(&self) -> DeviceModel {
        self.model
    }

    /// Writes the backlight brightness, clamped to 0..=255. Redundant writes
    /// (same value as last applied) are skipped to bound I/O during ramps.
    pub fn write_brightness(&self, value: u8) -> Result<(), DeviceError> {
        {
            let mut last = self.last_brightness.lock().unwrap();
            if *last == Some(value) {
                return Ok(());
            }
            *last = Some(value);
        }

        let Some(path) = &self.brightness_path else {
            tracing::debug!("brightness write skipped, no backing file");
            return Ok(());
        };

        tracing::debug!("set brightness to {}", value);
        fs::write(path, value.to_string())?;
        Ok(())
    }

    pub fn read_brightness(&self) -> Result<u8, DeviceError> {
        let path = self.brightness_path.as_ref().ok_or(DeviceError::Unavailable)?;
        let raw = fs::read_to_string(path)?;
        parse_digits(&raw)
    }

    /// Relay state is the OR of every backing file for that index; out of
    /// range indexes read as off.
    pub fn read_relay(&self, index: usize) -> bool {
        let Some(group) = self.relay_paths.get(index) else {
            return false;
        };

        group.iter().any(|path| {
            fs::read_to_string(path)
                .map(|raw| raw.contains('1'))
                .unwrap_or(false)
        })
    }

    pub fn write_relay(&self, index: usize, on: bool) -> Result<(), DeviceError> {
        let Some(group) = self.relay_paths.get(index) else {
            tracing::warn!("relay index {} out of range", index);
            return Ok(());
        };

        for path in group {
            fs::write(path, if on { "1" } else { "0" })?;
        }
        Ok(())
    }

    pub fn relay_count(&self) -> usize {
        self.relay_paths.len()
    }

    /// Temperature in °C with the per-model calibration offset applied,
    /// rounded to one decimal. `None` when the sensor is absent or unreadable.
    pub fn read_temperature(&self) -> Option<f32> {
        let raw = self.read_temp_hum_raw()?;
        let celsius = raw.1 * 175.0 / 65535.0 - 45.0 + self.model.profile().temperature_offset;
        Some((celsius * 10.0).round() / 10.0)
    }

    /// Relative humidity in percent, offset-corrected and rounded.
    pub fn read_humidity(&self) -> Option<f32> {
        let raw = self.read_temp_hum_raw()?;
        let percent = raw.0 * 100.0 / 65535.0 + self.model.profile().humidity_offset;
        Some(percent.round())
    }

    /// The sensor file carries `<raw humidity>:<raw temperature>`.
    fn read_temp_hum_raw(&self) -> Option<(f32, f32)> {
        let path = self.temp_hum_path.as_ref()?;
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!("error reading temperature/humidity: {}", e);
                return None;
            }
        };

        let mut parts = content.trim().split(':');
        let hum = parts.next()?.trim().parse::<f32>().ok()?;
        let temp = parts.next()?.trim().parse::<f32>().ok()?;
        Some((hum, temp))
    }
}

fn parse_digits(raw: &str) -> Result<u8, DeviceError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits
        .parse::<u16>()
        .map(|v| v.min(255) as u8)
        .map_err(|_| DeviceError::Parse(raw.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn service_with(dir: &Path, temp_hum: &str) -> DeviceService {
        let brightness = dir.join("brightness");
        let relay = dir.join("relay1");
        let sensor = dir.join("sht3x_access");

        fs::write(&brightness, "0\n").unwrap();
        fs::write(&relay, "0\n").unwrap();
        fs::write(&sensor, temp_hum).unwrap();

        DeviceService::with_paths(
            DeviceModel::Atlantis,
            Some(brightness),
            vec![vec![relay]],
            Some(sensor),
        )
    }

    #[test]
    fn test_brightness_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), "");

        service.write_brightness(200).unwrap();
        assert_eq!(service.read_brightness().unwrap(), 200);
    }

    #[test]
    fn test_redundant_brightness_write_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), "");

        service.write_brightness(100).unwrap();
        // Scribble over the file; a redundant write must not restore it.
        fs::write(dir.path().join("brightness"), "42").unwrap();
        service.write_brightness(100).unwrap();
        assert_eq!(service.read_brightness().unwrap(), 42);
    }

    #[test]
    fn test_relay_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), "");

        assert!(!service.read_relay(0));
        service.write_relay(0, true).unwrap();
        assert!(service.read_relay(0));
        service.write_relay(0, false).unwrap();
        assert!(!service.read_relay(0));
    }

    #[test]
    fn test_relay_out_of_range_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), "");

        assert!(!service.read_relay(7));
        service.write_relay(7, true).unwrap();
    }

    #[test]
    fn test_temperature_and_humidity_conversion() {
        let dir = tempfile::tempdir().unwrap();
        // Half scale on both channels: hum 50% + 3.0, temp 42.5 - 1.1.
        let service = service_with(dir.path(), "32767:32767\n");

        let temp = service.read_temperature().unwrap();
        assert!((temp - 41.4).abs() < 0.11, "temp {temp}");

        let hum = service.read_humidity().unwrap();
        assert_eq!(hum, 53.0);
    }

    #[test]
    fn test_unreadable_sensor_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), "garbage");

        assert_eq!(service.read_temperature(), None);
        assert_eq!(service.read_humidity(), None);
    }

    #[test]
    fn test_unavailable_device_is_noop() {
        let service = DeviceService::with_paths(DeviceModel::Stargate, None, vec![], None);

        service.write_brightness(10).unwrap();
        assert!(matches!(
            service.read_brightness(),
            Err(DeviceError::Unavailable)
        ));
        assert_eq!(service.read_temperature(), None);
    }
}
