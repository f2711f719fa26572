mod connection;
mod device_model;
mod power;
mod reading;

pub use connection::ConnectionState;
pub use device_model::DeviceModel;
pub use power::{BrightnessTarget, PowerState, TargetReason};
pub use reading::{Reading, ReadingKind};
