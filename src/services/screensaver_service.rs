use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::configs::{self, SettingsStore};
use crate::models::DeviceModel;
use crate::services::event_bus::{Event, EventBus};
use crate::services::telemetry::TelemetryService;

/// How much closer than the sensor's maximum range something has to be before
/// it counts as presence rather than noise at the edge of detection.
const PROXIMITY_WAKE_MARGIN: f32 = 0.5;

/// A display takeover mode. Activation and deactivation talk to the rest of
/// the system purely through the bus.
pub trait ScreenSaver: Send + Sync {
    fn id(&self) -> usize;
    fn name(&self) -> &'static str;
    fn activate(&self, bus: &EventBus);
    fn deactivate(&self, bus: &EventBus);
}

/// Powers the panel down entirely while saving.
pub struct ScreenOffSaver;

impl ScreenSaver for ScreenOffSaver {
    fn id(&self) -> usize {
        0
    }

    fn name(&self) -> &'static str {
        "screen_off"
    }

    fn activate(&self, bus: &EventBus) {
        bus.publish(Event::TurnScreenOff);
    }

    fn deactivate(&self, bus: &EventBus) {
        bus.publish(Event::TurnScreenOn);
    }
}

/// Keeps the panel on showing a dimmed clock; the brightness floor comes from
/// the saver-specific minimum, so there is nothing to do on the power side.
pub struct ClockSaver;

impl ScreenSaver for ClockSaver {
    fn id(&self) -> usize {
        1
    }

    fn name(&self) -> &'static str {
        "clock"
    }

    fn activate(&self, _bus: &EventBus) {}

    fn deactivate(&self, _bus: &EventBus) {}
}

static SCREEN_OFF: ScreenOffSaver = ScreenOffSaver;
static CLOCK: ClockSaver = ClockSaver;

struct SaverState {
    last_interaction: Instant,
    running: bool,
    keep_alive: bool,
}

/// Idle tracking and screensaver lifecycle. A periodic check starts the
/// configured saver once the idle delay elapses; interactions, wake commands
/// and close-range proximity stop it.
pub struct ScreenSaverService {
    cfg: configs::Screensaver,
    store: Arc<SettingsStore>,
    bus: Arc<EventBus>,
    telemetry: Arc<TelemetryService>,
    model: DeviceModel,
    state: Mutex<SaverState>,
}

impl ScreenSaverService {
    pub fn new(
        cfg: configs::Screensaver,
        store: Arc<SettingsStore>,
        bus: Arc<EventBus>,
        telemetry: Arc<TelemetryService>,
        model: DeviceModel,
    ) -> Self {
        Self {
            cfg,
            store,
            bus,
            telemetry,
            model,
            state: Mutex::new(SaverState {
                last_interaction: Instant::now(),
                running: false,
                keep_alive: false,
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    /// Resets the idle clock; stops a running saver, since any interaction
    /// means someone is in front of the panel.
    pub async fn note_interaction(&self) {
        let was_running = {
            let mut state = self.state.lock().unwrap();
            state.last_interaction = Instant::now();
            state.running
        };

        if was_running {
            self.stop().await;
        }
    }

    /// Pins the display awake. The idle check is suppressed while set, and a
    /// running saver ends immediately. Releasing the pin restarts the idle
    /// clock from now rather than from the last real interaction.
    pub async fn keep_alive(&self, keep: bool) {
        let was_running = {
            let mut state = self.state.lock().unwrap();
            state.keep_alive = keep;
            if !keep {
                state.last_interaction = Instant::now();
            }
            state.running
        };

        if keep && was_running {
            self.stop().await;
        }
    }

    pub async fn start(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.running {
                return;
            }
            state.running = true;
        }

        let saver = self.active_saver();
        tracing::info!("starting screensaver {}", saver.name());
        saver.activate(&self.bus);
        self.bus.publish(Event::ScreenSaverStarted);
        self.telemetry.publish_sleeping(true).await;
    }

    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if !state.running {
                return;
            }
            state.running = false;
            state.last_interaction = Instant::now();
        }

        let saver = self.active_saver();
        tracing::info!("stopping screensaver {}", saver.name());
        saver.deactivate(&self.bus);
        self.bus.publish(Event::EndScreensaver);
        self.bus.publish(Event::ScreenSaverStopped);
        self.telemetry.publish_sleeping(false).await;
    }

    fn active_saver(&self) -> &'static dyn ScreenSaver {
        match self.store.snapshot().screen_saver_id {
            1 => &CLOCK,
            _ => &SCREEN_OFF,
        }
    }

    /// Periodic idle check. Skipped entirely while pinned awake, disabled in
    /// settings, or already saving.
    pub fn spawn_idle_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_millis(service.cfg.check_period_ms));
            loop {
                ticker.tick().await;

                let settings = service.store.snapshot();
                let idle_for = {
                    let state = service.state.lock().unwrap();
                    if state.keep_alive || state.running || !settings.screen_saver_enabled {
                        continue;
                    }
                    state.last_interaction.elapsed()
                };

                if idle_for >= Duration::from_secs(settings.screen_saver_delay_secs) {
                    service.start().await;
                }
            }
        })
    }

    /// Ends the saver when something comes within wake range of the panel.
    /// Inert on models without a proximity sensor.
    pub fn spawn_proximity_wake(self: &Arc<Self>) -> JoinHandle<()> {
        let profile = self.model.profile();
        if !profile.has_proximity_sensor {
            return tokio::spawn(async {});
        }
        let threshold = profile.proximity_range - PROXIMITY_WAKE_MARGIN;

        let service = Arc::clone(self);
        let mut receiver = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                let event = match receiver.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("wake listener lagged, skipped {} events", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let Event::ProximityUpdated { distance } = event else {
                    continue;
                };
                if distance >= threshold {
                    continue;
                }
                if !service.store.snapshot().wake_on_proximity {
                    continue;
                }
                if service.is_running() {
                    tracing::debug!("proximity {} below wake threshold {}", distance, threshold);
                    service.note_interaction().await;
                }
            }
        })
    }
}
