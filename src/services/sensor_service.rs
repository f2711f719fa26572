use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::configs;
use crate::models::{Reading, ReadingKind};
use crate::services::event_bus::{Event, EventBus};
use crate::services::telemetry::TelemetryService;

/// Relative change a light reading needs before it is republished.
const LIGHT_CHANGE_RATIO: f32 = 0.15;
/// Minimum spacing between light events on the bus.
const LIGHT_MIN_INTERVAL: Duration = Duration::from_millis(1000);
/// Absolute change a proximity reading needs before it is republished.
const PROXIMITY_CHANGE_DELTA: f32 = 0.2;
const PROXIMITY_MIN_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Default)]
struct SamplerState {
    last_published_light: Option<f32>,
    last_light_event: Option<Instant>,
    last_published_proximity: Option<f32>,
    last_proximity_event: Option<Instant>,
    last_raw_light: f32,
    last_raw_proximity: f32,
}

/// Debounces raw platform samples before they hit the bus. Filtering
/// (relative/absolute change) and rate limiting are independent gates; both
/// must pass, except the very first reading of a kind, which always fires.
/// Telemetry gets every raw sample regardless, on its own cadence.
pub struct SensorService {
    bus: Arc<EventBus>,
    telemetry: Arc<TelemetryService>,
    state: Mutex<SamplerState>,
}

impl SensorService {
    pub fn new(bus: Arc<EventBus>, telemetry: Arc<TelemetryService>) -> Self {
        Self {
            bus,
            telemetry,
            state: Mutex::new(SamplerState::default()),
        }
    }

    pub fn last_lux(&self) -> f32 {
        self.state.lock().unwrap().last_raw_light
    }

    pub fn last_distance(&self) -> f32 {
        self.state.lock().unwrap().last_raw_proximity
    }

    /// Entry point for the platform sensor feed. Absent sensors simply never
    /// call this; that is not an error.
    pub async fn on_reading(&self, reading: Reading) {
        match reading.kind {
            ReadingKind::Light => self.on_light(reading.value).await,
            ReadingKind::Proximity => self.on_proximity(reading.value).await,
        }
    }

    async fn on_light(&self, lux: f32) {
        let publish = {
            let mut state = self.state.lock().unwrap();
            state.last_raw_light = lux;

            let accepted = match state.last_published_light {
                None => true,
                Some(prev) => {
                    let changed = (lux - prev).abs() / prev.max(1.0) >= LIGHT_CHANGE_RATIO;
                    let spaced = state
                        .last_light_event
                        .is_none_or(|at| at.elapsed() >= LIGHT_MIN_INTERVAL);
                    changed && spaced
                }
            };

            if accepted {
                state.last_published_light = Some(lux);
                state.last_light_event = Some(Instant::now());
            }
            accepted
        };

        if self.telemetry.should_send().await {
            self.telemetry.publish_lux(lux).await;
        }

        if publish {
            self.bus.publish(Event::LightUpdated { lux });
        }
    }

    async fn on_proximity(&self, distance: f32) {
        let publish = {
            let mut state = self.state.lock().unwrap();
            state.last_raw_proximity = distance;

            let accepted = match state.last_published_proximity {
                None => true,
                Some(prev) => {
                    let changed = (distance - prev).abs() >= PROXIMITY_CHANGE_DELTA;
                    let spaced = state
                        .last_proximity_event
                        .is_none_or(|at| at.elapsed() >= PROXIMITY_MIN_INTERVAL);
                    changed && spaced
                }
            };

            if accepted {
                state.last_published_proximity = Some(distance);
                state.last_proximity_event = Some(Instant::now());
            }
            accepted
        };

        if self.telemetry.should_send().await {
            self.telemetry.publish_proximity(distance).await;
        }

        if publish {
            self.bus.publish(Event::ProximityUpdated { distance });
        }
    }

    /// Polls raw sensor values from configured files for platforms that do
    /// not push samples into the daemon. Missing files are skipped silently.
    pub fn spawn_poller(self: &Arc<Self>, cfg: configs::Sensor) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(cfg.poll_ms));
            loop {
                ticker.tick().await;

                if let Some(path) = &cfg.light_path {
                    if let Some(value) = read_sensor_file(path) {
                        service.on_reading(Reading::light(value)).await;
                    }
                }
                if let Some(path) = &cfg.proximity_path {
                    if let Some(value) = read_sensor_file(path) {
                        service.on_reading(Reading::proximity(value)).await;
                    }
                }
            }
        })
    }
}

fn read_sensor_file(path: &str) -> Option<f32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| raw.trim().parse::<f32>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::configs::SettingsStore;
    use crate::models::DeviceModel;
    use crate::services::device_service::DeviceService;

    fn sampler() -> (SensorService, Arc<EventBus>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(SettingsStore::load(dir.path().join("settings.toml")));
        let device = Arc::new(DeviceService::with_paths(
            DeviceModel::Atlantis,
            None,
            vec![],
            None,
        ));
        let telemetry = Arc::new(TelemetryService::new(
            crate::configs::Telemetry::default(),
            store,
            device,
            Arc::clone(&bus),
            DeviceModel::Atlantis,
        ));
        (SensorService::new(Arc::clone(&bus), telemetry), bus, dir)
    }

    #[tokio::test]
    async fn test_first_light_reading_always_fires() {
        let (sampler, bus, _dir) = sampler();
        let mut receiver = bus.subscribe();

        sampler.on_reading(Reading::light(0.0)).await;
        assert_eq!(receiver.recv().await.unwrap(), Event::LightUpdated { lux: 0.0 });
    }

    #[tokio::test]
    async fn test_small_light_change_suppressed() {
        let (sampler, bus, _dir) = sampler();
        let mut receiver = bus.subscribe();

        sampler.on_reading(Reading::light(100.0)).await;
        sampler.on_reading(Reading::light(110.0)).await;

        assert_eq!(
            receiver.recv().await.unwrap(),
            Event::LightUpdated { lux: 100.0 }
        );
        assert!(receiver.try_recv().is_err());
        assert_eq!(sampler.last_lux(), 110.0);
    }

    #[tokio::test]
    async fn test_large_light_change_rate_limited() {
        let (sampler, bus, _dir) = sampler();
        let mut receiver = bus.subscribe();

        sampler.on_reading(Reading::light(100.0)).await;
        // Well past the 15% filter, but inside the 1s rate window.
        sampler.on_reading(Reading::light(500.0)).await;

        assert_eq!(
            receiver.recv().await.unwrap(),
            Event::LightUpdated { lux: 100.0 }
        );
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_proximity_absolute_delta_gate() {
        let (sampler, bus, _dir) = sampler();
        let mut receiver = bus.subscribe();

        sampler.on_reading(Reading::proximity(8.0)).await;
        sampler.on_reading(Reading::proximity(7.9)).await;

        assert_eq!(
            receiver.recv().await.unwrap(),
            Event::ProximityUpdated { distance: 8.0 }
        );
        assert!(receiver.try_recv().is_err());
        assert_eq!(sampler.last_distance(), 7.9);
    }
}
