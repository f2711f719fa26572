pub mod device_service;
pub mod event_bus;
pub mod screen_service;
pub mod screensaver_service;
pub mod sensor_service;
pub mod telemetry;

pub use device_service::DeviceService;
pub use event_bus::{Event, EventBus};
pub use screen_service::ScreenService;
pub use screensaver_service::{ClockSaver, ScreenOffSaver, ScreenSaver, ScreenSaverService};
pub use sensor_service::SensorService;
pub use telemetry::TelemetryService;
