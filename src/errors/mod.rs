#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no backing file present for this device")]
    Unavailable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unreadable value: {0}")]
    Parse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("telemetry disabled or broker credentials missing")]
    NotConfigured,

    #[error("not connected to broker")]
    NotConnected,

    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}
