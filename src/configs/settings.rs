use std::env;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Store {
    pub path: String,
}

/// Brightness controller tunables. The hysteresis and animation constants
/// drifted across firmware revisions, so they stay configurable with the
/// last-known-good values as defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Brightness {
    #[serde(default = "default_hysteresis_ms")]
    pub hysteresis_ms: u64,
    #[serde(default = "default_fade_ms")]
    pub fade_ms: u64,
    #[serde(default = "default_min_step")]
    pub min_step: u8,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
}

impl Default for Brightness {
    fn default() -> Self {
        Self {
            hysteresis_ms: default_hysteresis_ms(),
            fade_ms: default_fade_ms(),
            min_step: default_min_step(),
            frame_rate: default_frame_rate(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Screensaver {
    #[serde(default = "default_check_period_ms")]
    pub check_period_ms: u64,
}

impl Default for Screensaver {
    fn default() -> Self {
        Self {
            check_period_ms: default_check_period_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Telemetry {
    #[serde(default = "default_retry_floor_secs")]
    pub retry_floor_secs: u64,
    #[serde(default = "default_retry_cap_secs")]
    pub retry_cap_secs: u64,
    #[serde(default = "default_coalesce_window_ms")]
    pub coalesce_window_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_min_publish_interval_ms")]
    pub min_publish_interval_ms: u64,
    #[serde(default = "default_temp_hum_period_secs")]
    pub temp_hum_period_secs: u64,
    #[serde(default = "default_min_uptime_for_reboot_secs")]
    pub min_uptime_for_reboot_secs: u64,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            retry_floor_secs: default_retry_floor_secs(),
            retry_cap_secs: default_retry_cap_secs(),
            coalesce_window_ms: default_coalesce_window_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            min_publish_interval_ms: default_min_publish_interval_ms(),
            temp_hum_period_secs: default_temp_hum_period_secs(),
            min_uptime_for_reboot_secs: default_min_uptime_for_reboot_secs(),
        }
    }
}

/// Optional raw sensor files to poll when the platform does not push samples
/// into the daemon by other means.
#[derive(Debug, Clone, Deserialize)]
pub struct Sensor {
    pub light_path: Option<String>,
    pub proximity_path: Option<String>,
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub logger: Logger,
    pub store: Store,
    #[serde(default)]
    pub brightness: Brightness,
    #[serde(default)]
    pub screensaver: Screensaver,
    #[serde(default)]
    pub telemetry: Telemetry,
    pub sensor: Option<Sensor>,
    /// Reported model name or hardware code; detected from the platform when
    /// absent.
    pub model: Option<String>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or("production".into());

        Config::builder()
            .add_source(File::with_name("configs/default"))
            .add_source(File::with_name(&format!("configs/{run_mode}")).required(false))
            .add_source(Environment::default().separator("__"))
            .build()?
            .try_deserialize()
    }
}

fn default_hysteresis_ms() -> u64 {
    3000
}

fn default_fade_ms() -> u64 {
    1000
}

fn default_min_step() -> u8 {
    3
}

fn default_frame_rate() -> u32 {
    30
}

fn default_check_period_ms() -> u64 {
    1000
}

fn default_retry_floor_secs() -> u64 {
    5
}

fn default_retry_cap_secs() -> u64 {
    60
}

fn default_coalesce_window_ms() -> u64 {
    50
}

fn default_settle_delay_ms() -> u64 {
    150
}

fn default_min_publish_interval_ms() -> u64 {
    500
}

fn default_temp_hum_period_secs() -> u64 {
    5
}

fn default_min_uptime_for_reboot_secs() -> u64 {
    20
}

fn default_poll_ms() -> u64 {
    200
}
