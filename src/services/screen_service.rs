use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};

use crate::configs::{self, DeviceSettings, SettingsStore};
use crate::models::{BrightnessTarget, PowerState, TargetReason};
use crate::services::device_service::DeviceService;
use crate::services::event_bus::{Event, EventBus};
use crate::services::telemetry::TelemetryService;

struct ScreenState {
    lux: f32,
    power: PowerState,
    /// Last applied brightness; `None` until the first write (or after the
    /// screen comes back on), which makes the next application direct instead
    /// of animated.
    current: Option<u8>,
    target: Option<BrightnessTarget>,
    hysteresis_task: Option<JoinHandle<()>>,
    fade_task: Option<JoinHandle<()>>,
}

/// Drives the backlight from filtered light readings and power state.
/// A changed target sits out a hysteresis window before being applied with a
/// bounded linear ramp; forcing the screen dark (off or screensaver) bypasses
/// both and cancels any in-flight transition.
pub struct ScreenService {
    cfg: configs::Brightness,
    store: Arc<SettingsStore>,
    device: Arc<DeviceService>,
    telemetry: Arc<TelemetryService>,
    bus: Arc<EventBus>,
    state: Mutex<ScreenState>,
}

impl ScreenService {
    pub fn new(
        cfg: configs::Brightness,
        store: Arc<SettingsStore>,
        device: Arc<DeviceService>,
        telemetry: Arc<TelemetryService>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            cfg,
            store,
            device,
            telemetry,
            bus,
            state: Mutex::new(ScreenState {
                lux: 0.0,
                power: PowerState::default(),
                current: None,
                target: None,
                hysteresis_task: None,
                fade_task: None,
            }),
        }
    }

    pub async fn on_light_updated(self: &Arc<Self>, lux: f32) {
        let mut state = self.state.lock().await;
        state.lux = lux;
        self.evaluate(&mut state).await;
    }

    pub async fn set_screen_on(self: &Arc<Self>, on: bool) {
        let mut state = self.state.lock().await;
        state.power.screen_on = on;
        state.current = if on { None } else { Some(0) };
        self.evaluate(&mut state).await;
    }

    pub async fn set_screensaver(self: &Arc<Self>, active: bool) {
        let mut state = self.state.lock().await;
        state.power.in_screen_saver = active;

        if active {
            self.evaluate(&mut state).await;
            return;
        }

        // Leaving the screensaver must not show a slow fade: recompute and
        // apply right away, dropping any pending hysteresis or animation.
        self.cancel_pending(&mut state);
        let prefs = self.store.snapshot();
        let desired = compute_desired(state.lux, state.power, &prefs);
        state.target = Some(desired);
        self.apply(&mut state, desired.value).await;
    }

    /// Changes the fixed brightness preference; takes effect on the next
    /// evaluation, it does not write anything itself.
    pub fn set_fixed_brightness(&self, value: u8) {
        self.store.update(|s| s.brightness = value);
    }

    pub fn set_automatic_mode(&self, automatic: bool) {
        self.store.update(|s| s.automatic_brightness = automatic);
    }

    pub async fn current_brightness(&self) -> Option<u8> {
        self.state.lock().await.current
    }

    pub async fn target(&self) -> Option<BrightnessTarget> {
        self.state.lock().await.target
    }

    async fn reevaluate(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        self.evaluate(&mut state).await;
    }

    async fn evaluate(self: &Arc<Self>, state: &mut ScreenState) {
        let prefs = self.store.snapshot();
        let desired = compute_desired(state.lux, state.power, &prefs);

        if matches!(
            desired.reason,
            TargetReason::ScreenOff | TargetReason::Screensaver
        ) {
            self.cancel_pending(state);
            state.target = Some(desired);
            tracing::debug!("screen off or screensaver, forcing brightness 0");
            self.apply(state, 0).await;
            return;
        }

        // Anti-churn: ignore targets within the minimum step of the latched
        // one.
        if state
            .target
            .is_some_and(|t| t.value.abs_diff(desired.value) < self.cfg.min_step)
        {
            return;
        }

        tracing::debug!(
            "desired brightness {} ({:?}), current {:?}",
            desired.value,
            desired.reason,
            state.current
        );
        state.target = Some(desired);

        if let Some(task) = state.hysteresis_task.take() {
            task.abort();
        }
        let service = Arc::clone(self);
        let delay = Duration::from_millis(self.cfg.hysteresis_ms);
        state.hysteresis_task = Some(tokio::spawn(async move {
            sleep(delay).await;
            service.check_and_apply().await;
        }));
    }

    async fn check_and_apply(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        let Some(target) = state.target else { return };

        match state.current {
            None => self.apply(&mut state, target.value).await,
            Some(current) if current != target.value => {
                self.start_fade(&mut state, current, target.value);
            }
            _ => tracing::debug!("no brightness change needed"),
        }
    }

    async fn apply(&self, state: &mut ScreenState, value: u8) {
        state.current = Some(value);
        if let Err(e) = self.device.write_brightness(value) {
            tracing::error!("brightness write failed: {}", e);
        }
        self.telemetry.publish_brightness(value).await;
    }

    /// Linear ramp from `from` to `to` over the fade duration, frames capped
    /// at the configured rate. The applied value advances with every frame,
    /// so canceling mid-ramp leaves the last frame on screen.
    fn start_fade(self: &Arc<Self>, state: &mut ScreenState, from: u8, to: u8) {
        if let Some(task) = state.fade_task.take() {
            task.abort();
        }

        let service = Arc::clone(self);
        let duration = Duration::from_millis(self.cfg.fade_ms);
        let frame_interval = Duration::from_millis(1000 / u64::from(self.cfg.frame_rate.max(1)));
        state.fade_task = Some(tokio::spawn(async move {
            let started = Instant::now();
            loop {
                sleep(frame_interval).await;
                let progress =
                    (started.elapsed().as_secs_f32() / duration.as_secs_f32()).min(1.0);
                let value = lerp(from, to, progress);

                {
                    let mut state = service.state.lock().await;
                    if state.current != Some(value) {
                        state.current = Some(value);
                        if let Err(e) = service.device.write_brightness(value) {
                            tracing::error!("brightness write failed: {}", e);
                        }
                    }
                }
                service.telemetry.publish_brightness(value).await;

                if progress >= 1.0 {
                    break;
                }
            }
        }));
    }

    fn cancel_pending(&self, state: &mut ScreenState) {
        if let Some(task) = state.hysteresis_task.take() {
            task.abort();
        }
        if let Some(task) = state.fade_task.take() {
            task.abort();
        }
    }

    /// Reacts to bus traffic until the process exits. Falling behind the bus
    /// loses old events but never the subscription itself.
    pub fn run(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let mut receiver = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                let event = match receiver.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("brightness listener lagged, skipped {} events", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                match event {
                    Event::LightUpdated { lux } => service.on_light_updated(lux).await,
                    Event::ScreenSaverStarted => service.set_screensaver(true).await,
                    Event::ScreenSaverStopped => service.set_screensaver(false).await,
                    Event::TurnScreenOn => service.set_screen_on(true).await,
                    Event::TurnScreenOff => service.set_screen_on(false).await,
                    Event::SettingsChanged => service.reevaluate().await,
                    _ => {}
                }
            }
        })
    }
}

/// Piecewise-linear lux curve: saturated above 500 lx, floored below 30 lx,
/// linear in between. The floor differs between normal and screensaver mode.
pub fn brightness_from_lux(lux: f32, min_brightness: u8) -> u8 {
    if lux >= 500.0 {
        return 255;
    }
    if lux <= 30.0 {
        return min_brightness;
    }

    let slope = (255.0 - f32::from(min_brightness)) / (500.0 - 30.0);
    (f32::from(min_brightness) + slope * (lux - 30.0)) as u8
}

pub fn compute_desired(lux: f32, power: PowerState, prefs: &DeviceSettings) -> BrightnessTarget {
    if !power.screen_on {
        return BrightnessTarget {
            value: 0,
            reason: TargetReason::ScreenOff,
        };
    }
    if power.in_screen_saver {
        return BrightnessTarget {
            value: 0,
            reason: TargetReason::Screensaver,
        };
    }

    if prefs.automatic_brightness {
        let floor = if power.in_screen_saver {
            prefs.screen_saver_min_brightness
        } else {
            prefs.min_brightness
        };
        BrightnessTarget {
            value: brightness_from_lux(lux, floor),
            reason: TargetReason::AutomaticLux,
        }
    } else {
        BrightnessTarget {
            value: prefs.brightness,
            reason: TargetReason::FixedPreference,
        }
    }
}

fn lerp(from: u8, to: u8, progress: f32) -> u8 {
    (f32::from(from) + (f32::from(to) - f32::from(from)) * progress).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::models::DeviceModel;

    fn fast_cfg() -> configs::Brightness {
        configs::Brightness {
            hysteresis_ms: 20,
            fade_ms: 40,
            min_step: 3,
            frame_rate: 100,
        }
    }

    fn service(cfg: configs::Brightness) -> (Arc<ScreenService>, Arc<DeviceService>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let brightness_path = dir.path().join("brightness");
        std::fs::write(&brightness_path, "0").unwrap();

        let bus = Arc::new(EventBus::new());
        let store = Arc::new(SettingsStore::load(dir.path().join("settings.toml")));
        let device = Arc::new(DeviceService::with_paths(
            DeviceModel::Atlantis,
            Some(brightness_path),
            vec![],
            None,
        ));
        let telemetry = Arc::new(TelemetryService::new(
            configs::Telemetry::default(),
            Arc::clone(&store),
            Arc::clone(&device),
            Arc::clone(&bus),
            DeviceModel::Atlantis,
        ));
        let screen = Arc::new(ScreenService::new(
            cfg,
            store,
            Arc::clone(&device),
            telemetry,
            bus,
        ));
        (screen, device, dir)
    }

    #[test]
    fn test_lux_curve_saturates_and_floors() {
        assert_eq!(brightness_from_lux(500.0, 48), 255);
        assert_eq!(brightness_from_lux(10_000.0, 48), 255);
        assert_eq!(brightness_from_lux(30.0, 48), 48);
        assert_eq!(brightness_from_lux(0.0, 48), 48);
        assert_eq!(brightness_from_lux(-5.0, 48), 48);
    }

    #[test]
    fn test_lux_curve_is_monotone() {
        let mut previous = 0;
        for lux in 0..=600 {
            let value = brightness_from_lux(lux as f32, 48);
            assert!(value >= previous, "curve dipped at {} lx", lux);
            previous = value;
        }
    }

    #[test]
    fn test_compute_desired_reasons() {
        let prefs = DeviceSettings::default();

        let off = PowerState {
            screen_on: false,
            ..Default::default()
        };
        let desired = compute_desired(300.0, off, &prefs);
        assert_eq!(desired.value, 0);
        assert_eq!(desired.reason, TargetReason::ScreenOff);

        let saving = PowerState {
            in_screen_saver: true,
            ..Default::default()
        };
        let desired = compute_desired(300.0, saving, &prefs);
        assert_eq!(desired.value, 0);
        assert_eq!(desired.reason, TargetReason::Screensaver);

        let mut fixed = prefs.clone();
        fixed.automatic_brightness = false;
        fixed.brightness = 180;
        let desired = compute_desired(300.0, PowerState::default(), &fixed);
        assert_eq!(desired.value, 180);
        assert_eq!(desired.reason, TargetReason::FixedPreference);
    }

    #[tokio::test]
    async fn test_bright_room_reaches_full_brightness() {
        let (screen, device, _dir) = service(fast_cfg());

        screen.on_light_updated(20.0).await;
        sleep(Duration::from_millis(60)).await;
        assert_eq!(screen.current_brightness().await, Some(48));

        screen.on_light_updated(600.0).await;
        sleep(Duration::from_millis(150)).await;
        assert_eq!(screen.current_brightness().await, Some(255));
        assert_eq!(device.read_brightness().unwrap(), 255);
    }

    #[tokio::test]
    async fn test_hysteresis_window_defers_apply() {
        let (screen, _device, _dir) = service(configs::Brightness {
            hysteresis_ms: 80,
            ..fast_cfg()
        });

        screen.on_light_updated(600.0).await;
        sleep(Duration::from_millis(30)).await;
        assert_eq!(screen.current_brightness().await, None);

        sleep(Duration::from_millis(120)).await;
        assert_eq!(screen.current_brightness().await, Some(255));
    }

    #[tokio::test]
    async fn test_screensaver_cancels_animation() {
        let (screen, device, _dir) = service(configs::Brightness {
            hysteresis_ms: 10,
            fade_ms: 300,
            ..fast_cfg()
        });

        screen.on_light_updated(20.0).await;
        sleep(Duration::from_millis(30)).await;
        screen.on_light_updated(600.0).await;
        sleep(Duration::from_millis(60)).await;

        screen.set_screensaver(true).await;
        assert_eq!(screen.current_brightness().await, Some(0));

        // The canceled ramp must not resurface after its would-be end.
        sleep(Duration::from_millis(350)).await;
        assert_eq!(screen.current_brightness().await, Some(0));
        assert_eq!(device.read_brightness().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_controller_recovers_after_bus_lag() {
        let (screen, _device, _dir) = service(fast_cfg());
        let _listener = screen.run();

        // Flood well past the bus capacity so the listener observes a lagged
        // receiver, then check it still reacts to fresh events.
        for _ in 0..150 {
            screen.bus.publish(Event::SettingsChanged);
        }
        screen.bus.publish(Event::LightUpdated { lux: 600.0 });

        sleep(Duration::from_millis(200)).await;
        assert_eq!(screen.current_brightness().await, Some(255));
    }

    #[tokio::test]
    async fn test_screensaver_exit_applies_without_fade() {
        let (screen, device, _dir) = service(configs::Brightness {
            hysteresis_ms: 500,
            fade_ms: 500,
            ..fast_cfg()
        });

        screen.on_light_updated(600.0).await;
        screen.set_screensaver(true).await;
        assert_eq!(screen.current_brightness().await, Some(0));

        screen.set_screensaver(false).await;
        // No hysteresis or ramp on the way out.
        assert_eq!(screen.current_brightness().await, Some(255));
        assert_eq!(device.read_brightness().unwrap(), 255);
    }
}
