mod settings;
mod store;

pub use settings::{
    Brightness, Logger, Screensaver, Sensor, Settings, Store, Telemetry,
};
pub use store::{DeviceSettings, SettingsStore};
