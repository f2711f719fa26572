mod backoff;
mod coalesce;
mod commands;
mod discovery;

pub use backoff::Backoff;
pub use coalesce::{CoalesceQueue, OutboundUpdate};
pub use commands::CommandContext;
pub use discovery::discovery_document;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rumqttc::{AsyncClient, Event as MqttEvent, LastWill, MqttOptions, Packet, QoS};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};

use crate::configs::{self, DeviceSettings, SettingsStore};
use crate::errors::TelemetryError;
use crate::models::{ConnectionState, DeviceModel};
use crate::services::device_service::DeviceService;
use crate::services::event_bus::{Event, EventBus};

use discovery::relay_suffix;

/// Broker-side availability topic; a consumer announcing itself here triggers
/// a full status republish.
pub const CONSUMER_STATUS_TOPIC: &str = "homeassistant/status";

/// Topic namespace for one panel, parameterized by its client identity.
#[derive(Clone, Debug)]
pub struct Topics {
    client_id: String,
}

impl Topics {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn scoped(&self, leaf: &str) -> String {
        format!("lumipanel/{}/{leaf}", self.client_id)
    }

    pub fn command_root(&self) -> String {
        self.scoped("#")
    }

    pub fn status(&self) -> String {
        self.scoped("status")
    }

    pub fn hello(&self) -> String {
        self.scoped("hello")
    }

    pub fn update(&self) -> String {
        self.scoped("update")
    }

    pub fn temperature(&self) -> String {
        self.scoped("temp")
    }

    pub fn humidity(&self) -> String {
        self.scoped("hum")
    }

    pub fn lux(&self) -> String {
        self.scoped("lux")
    }

    pub fn proximity(&self) -> String {
        self.scoped("proximity")
    }

    pub fn brightness(&self) -> String {
        self.scoped("brightness")
    }

    pub fn sleeping(&self) -> String {
        self.scoped("sleeping")
    }

    pub fn relay_state(&self, num: usize) -> String {
        self.scoped(&format!("relay_state{}", relay_suffix(num)))
    }

    pub fn relay_command(&self, num: usize) -> String {
        self.scoped(&format!("relay_command{}", relay_suffix(num)))
    }

    pub fn switch_state(&self, num: usize) -> String {
        self.scoped(&format!("switch_state{}", relay_suffix(num)))
    }

    pub fn sleep(&self) -> String {
        self.scoped("sleep")
    }

    pub fn wake(&self) -> String {
        self.scoped("wake")
    }

    pub fn refresh(&self) -> String {
        self.scoped("refresh")
    }

    pub fn reboot(&self) -> String {
        self.scoped("reboot")
    }

    pub fn discovery(&self) -> String {
        format!("homeassistant/device/{}/config", self.client_id)
    }
}

/// The subset of preferences an active broker connection is built from.
#[derive(Clone, Debug, PartialEq)]
struct BrokerSettings {
    enabled: bool,
    broker: String,
    port: u16,
    username: String,
    password: String,
    client_id: String,
}

impl BrokerSettings {
    fn of(prefs: &DeviceSettings) -> Self {
        Self {
            enabled: prefs.mqtt_enabled,
            broker: prefs.mqtt_broker.clone(),
            port: prefs.mqtt_port,
            username: prefs.mqtt_username.clone(),
            password: prefs.mqtt_password.clone(),
            client_id: prefs.mqtt_client_id.clone(),
        }
    }
}

struct TelemetryState {
    connection: ConnectionState,
    client: Option<AsyncClient>,
    topics: Topics,
    backoff: Backoff,
    queue: CoalesceQueue,
    broker_settings: Option<BrokerSettings>,
    last_brightness: Option<(u8, Instant)>,
    poll_task: Option<JoinHandle<()>>,
    retry_task: Option<JoinHandle<()>>,
    background_tasks: Vec<JoinHandle<()>>,
}

/// Owns the broker connection lifecycle: connect/authenticate/subscribe with
/// a retained last-will, exponential-backoff reconnects, discovery-document
/// publication and coalesced outbound updates. Telemetry is best-effort:
/// publishes while disconnected are dropped, not queued.
pub struct TelemetryService {
    cfg: configs::Telemetry,
    store: Arc<SettingsStore>,
    device: Arc<DeviceService>,
    bus: Arc<EventBus>,
    model: DeviceModel,
    started_at: Instant,
    state: Mutex<TelemetryState>,
    commands: RwLock<Option<Arc<CommandContext>>>,
}

impl TelemetryService {
    pub fn new(
        cfg: configs::Telemetry,
        store: Arc<SettingsStore>,
        device: Arc<DeviceService>,
        bus: Arc<EventBus>,
        model: DeviceModel,
    ) -> Self {
        let backoff = Backoff::new(
            Duration::from_secs(cfg.retry_floor_secs),
            Duration::from_secs(cfg.retry_cap_secs),
        );

        Self {
            cfg,
            store,
            device,
            bus,
            model,
            started_at: Instant::now(),
            state: Mutex::new(TelemetryState {
                connection: ConnectionState::Disconnected,
                client: None,
                topics: Topics::new(""),
                backoff,
                queue: CoalesceQueue::new(),
                broker_settings: None,
                last_brightness: None,
                poll_task: None,
                retry_task: None,
                background_tasks: Vec::new(),
            }),
            commands: RwLock::new(None),
        }
    }

    /// Wires the collaborators inbound commands need. Called once during
    /// application assembly, after all services exist.
    pub fn attach_commands(&self, context: CommandContext) {
        *self.commands.write().unwrap() = Some(Arc::new(context));
    }

    fn command_context(&self) -> Option<Arc<CommandContext>> {
        self.commands.read().unwrap().clone()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn min_uptime_for_reboot(&self) -> Duration {
        Duration::from_secs(self.cfg.min_uptime_for_reboot_secs)
    }

    async fn topics(&self) -> Topics {
        self.state.lock().await.topics.clone()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.state.lock().await.connection
    }

    /// True when telemetry is enabled and the broker link is up; gates every
    /// publish path.
    pub async fn should_send(&self) -> bool {
        self.store.snapshot().mqtt_enabled
            && self.connection_state().await == ConnectionState::Connected
    }

    /// Starts the connection attempt when enabled and fully configured.
    /// Incomplete configuration leaves the service idle with no retry loop;
    /// a later settings change calls back in here.
    pub async fn connect(self: &Arc<Self>) {
        let prefs = self.store.snapshot();
        if !prefs.mqtt_enabled {
            tracing::debug!("telemetry disabled");
            return;
        }
        if prefs.mqtt_broker.is_empty()
            || prefs.mqtt_username.is_empty()
            || prefs.mqtt_password.is_empty()
        {
            tracing::info!("broker credentials incomplete, telemetry stays idle");
            return;
        }

        let mut state = self.state.lock().await;
        if state.connection != ConnectionState::Disconnected {
            return;
        }
        state.connection = ConnectionState::Connecting;

        let client_id = self.store.ensure_client_id();
        state.topics = Topics::new(&client_id);
        state.broker_settings = Some(BrokerSettings {
            client_id: client_id.clone(),
            ..BrokerSettings::of(&prefs)
        });

        let mut options = MqttOptions::new(&client_id, &prefs.mqtt_broker, prefs.mqtt_port);
        options.set_keep_alive(Duration::from_secs(5));
        options.set_credentials(&prefs.mqtt_username, &prefs.mqtt_password);
        options.set_last_will(LastWill::new(
            state.topics.status(),
            "offline",
            QoS::AtLeastOnce,
            true,
        ));

        tracing::info!(
            "connecting to broker {}:{} as {}",
            prefs.mqtt_broker,
            prefs.mqtt_port,
            client_id
        );

        let (client, mut event_loop) = AsyncClient::new(options, 10);
        state.client = Some(client);

        if let Some(task) = state.poll_task.take() {
            task.abort();
        }

        let service = Arc::clone(self);
        state.poll_task = Some(tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => {
                        service.on_connected().await;
                    }
                    Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                        commands::dispatch(&service, &publish.topic, &publish.payload).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("mqtt connection error: {}", e);
                        service.on_connection_lost().await;
                        break;
                    }
                }
            }
        }));
    }

    async fn on_connected(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            state.connection = ConnectionState::Connected;
            state.backoff.reset();
        }
        tracing::info!("connected to broker");

        let service = Arc::clone(self);
        let settle = Duration::from_millis(self.cfg.settle_delay_ms);
        tokio::spawn(async move {
            sleep(settle).await;

            let (client, topics) = {
                let state = service.state.lock().await;
                (state.client.clone(), state.topics.clone())
            };
            let Some(client) = client else { return };

            for target in [topics.command_root(), CONSUMER_STATUS_TOPIC.to_string()] {
                if let Err(e) = client.subscribe(&target, QoS::AtLeastOnce).await {
                    tracing::error!("subscribe to {} failed: {}", target, e);
                }
            }

            service.publish_status().await;
        });
    }

    async fn on_connection_lost(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        state.connection = ConnectionState::Disconnected;
        state.client = None;

        if let Some(task) = state.retry_task.take() {
            task.abort();
        }

        let delay = state.backoff.next_delay();
        tracing::warn!("retrying broker connection in {:?}", delay);

        let service = Arc::clone(self);
        state.retry_task = Some(tokio::spawn(async move {
            sleep(delay).await;
            service.reconnect().await;
        }));
    }

    /// Type-erased `connect`: the retry task would otherwise embed the
    /// connect future inside the poll task it spawns, which is infinitely
    /// recursive.
    fn reconnect(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move { self.connect().await })
    }

    /// Publishes identity, discovery document and online marker, then a
    /// staggered burst of current values so a freshly-subscribed consumer
    /// sees the full state without saturating the broker.
    pub async fn publish_status(self: &Arc<Self>) {
        if !self.should_send().await {
            return;
        }

        let topics = self.topics().await;
        self.publish_hello(&topics).await;
        self.publish_discovery(&topics).await;
        self.publish_direct(topics.status(), "online", QoS::AtLeastOnce, true)
            .await;

        let service = Arc::clone(self);
        tokio::spawn(async move {
            let step = Duration::from_millis(50);
            let Some(ctx) = service.command_context() else {
                return;
            };

            sleep(step).await;
            service.publish_temp_and_hum().await;

            sleep(step).await;
            for num in 0..service.device.relay_count() {
                service.publish_relay(num, service.device.read_relay(num)).await;
            }

            sleep(step).await;
            service.publish_lux(ctx.sensors.last_lux()).await;

            sleep(step).await;
            if let Ok(brightness) = service.device.read_brightness() {
                service.publish_brightness(brightness).await;
            }

            if service.model.profile().has_proximity_sensor {
                sleep(step).await;
                service.publish_proximity(ctx.sensors.last_distance()).await;
            }

            sleep(step).await;
            service.publish_sleeping(ctx.saver.is_running()).await;
        });
    }

    async fn publish_hello(&self, topics: &Topics) {
        let profile = self.model.profile();
        let hello = json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "modelName": profile.name,
            "proximity": profile.has_proximity_sensor,
        });
        self.publish_direct(topics.hello(), hello.to_string(), QoS::AtLeastOnce, false)
            .await;
    }

    async fn publish_discovery(&self, topics: &Topics) {
        let document = discovery_document(self.model, topics);
        self.publish_direct(
            topics.discovery(),
            document.to_string(),
            QoS::AtLeastOnce,
            true,
        )
        .await;
    }

    async fn retract_discovery(&self) {
        let topics = self.topics().await;
        self.publish_direct(topics.discovery(), "", QoS::AtLeastOnce, false)
            .await;
    }

    /// Immediate publish when connected; silently dropped otherwise.
    pub async fn publish_direct(
        &self,
        topic: String,
        payload: impl Into<Vec<u8>>,
        qos: QoS,
        retained: bool,
    ) {
        match self.try_publish(&topic, payload.into(), qos, retained).await {
            Ok(()) => {}
            Err(e @ TelemetryError::Client(_)) => {
                tracing::error!("failed to publish to {}: {}", topic, e);
            }
            Err(e) => tracing::debug!("publish to {} dropped: {}", topic, e),
        }
    }

    async fn try_publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retained: bool,
    ) -> Result<(), TelemetryError> {
        if !self.store.snapshot().mqtt_enabled {
            return Err(TelemetryError::NotConfigured);
        }

        let client = {
            let state = self.state.lock().await;
            if state.connection != ConnectionState::Connected {
                return Err(TelemetryError::NotConnected);
            }
            state.client.clone().ok_or(TelemetryError::NotConnected)?
        };

        client.publish(topic, qos, retained, payload).await?;
        Ok(())
    }

    /// Coalescing publish path: updates to the same topic within the window
    /// collapse to the latest value, flushed by a single scheduled task.
    pub async fn publish_coalesced(self: &Arc<Self>, update: OutboundUpdate) {
        let schedule = {
            let mut state = self.state.lock().await;
            state.queue.offer(update)
        };

        if !schedule {
            return;
        }

        let service = Arc::clone(self);
        let window = Duration::from_millis(self.cfg.coalesce_window_ms);
        tokio::spawn(async move {
            sleep(window).await;

            let updates = {
                let mut state = service.state.lock().await;
                state.queue.drain()
            };
            for update in updates {
                service
                    .publish_direct(update.topic, update.payload, update.qos, update.retained)
                    .await;
            }
        });
    }

    pub async fn publish_lux(&self, lux: f32) {
        let topics = self.topics().await;
        self.publish_direct(topics.lux(), lux.to_string(), QoS::AtLeastOnce, false)
            .await;
    }

    pub async fn publish_proximity(&self, distance: f32) {
        let topics = self.topics().await;
        self.publish_direct(
            topics.proximity(),
            distance.to_string(),
            QoS::AtLeastOnce,
            false,
        )
        .await;
    }

    pub async fn publish_temp_and_hum(&self) {
        let topics = self.topics().await;
        if let Some(temp) = self.device.read_temperature() {
            self.publish_direct(topics.temperature(), temp.to_string(), QoS::AtLeastOnce, false)
                .await;
        }
        if let Some(hum) = self.device.read_humidity() {
            self.publish_direct(topics.humidity(), hum.to_string(), QoS::AtLeastOnce, false)
                .await;
        }
    }

    /// Brightness self-throttles: an identical value within the minimum
    /// interval is suppressed even on this direct path, since animation
    /// frames can hammer it.
    pub async fn publish_brightness(&self, value: u8) {
        let min_interval = Duration::from_millis(self.cfg.min_publish_interval_ms);
        {
            let mut state = self.state.lock().await;
            if let Some((last, at)) = state.last_brightness {
                if last == value && at.elapsed() < min_interval {
                    return;
                }
            }
            state.last_brightness = Some((value, Instant::now()));
        }

        let topics = self.topics().await;
        self.publish_direct(topics.brightness(), value.to_string(), QoS::AtLeastOnce, false)
            .await;
    }

    pub async fn publish_relay(self: &Arc<Self>, num: usize, on: bool) {
        let topics = self.topics().await;
        self.publish_coalesced(OutboundUpdate::new(
            topics.relay_state(num),
            if on { "ON" } else { "OFF" },
        ))
        .await;
    }

    pub async fn publish_sleeping(&self, sleeping: bool) {
        let topics = self.topics().await;
        self.publish_direct(
            topics.sleeping(),
            if sleeping { "ON" } else { "OFF" },
            QoS::AtLeastOnce,
            false,
        )
        .await;
    }

    /// Settings changed: never mutate a live connection's credentials in
    /// place. Retract discovery, mark offline, tear the client down, then
    /// reconnect from scratch after a short pause.
    pub async fn reconfigure(self: &Arc<Self>) {
        let current = BrokerSettings::of(&self.store.snapshot());
        let was_up = {
            let state = self.state.lock().await;
            // Unrelated preference changes must not drop a healthy link.
            if state.connection == ConnectionState::Connected
                && state.broker_settings.as_ref() == Some(&current)
            {
                tracing::debug!("broker settings unchanged, keeping connection");
                return;
            }
            state.connection != ConnectionState::Disconnected
        };

        if was_up {
            tracing::info!("settings changed, recycling broker connection");
            self.retract_discovery().await;
            let topics = self.topics().await;
            self.publish_direct(topics.status(), "offline", QoS::AtLeastOnce, true)
                .await;
            self.teardown_client().await;
            sleep(Duration::from_millis(250)).await;
        }

        self.connect().await;
    }

    async fn teardown_client(&self) {
        let mut state = self.state.lock().await;
        if let Some(task) = state.poll_task.take() {
            task.abort();
        }
        if let Some(task) = state.retry_task.take() {
            task.abort();
        }
        if let Some(client) = state.client.take() {
            let _ = client.disconnect().await;
        }
        state.connection = ConnectionState::Disconnected;
    }

    /// Spawns the reactive listeners: settings changes recycle the
    /// connection, and temperature/humidity go out on a fixed period.
    pub async fn run(self: &Arc<Self>) {
        let service = Arc::clone(self);
        let mut receiver = self.bus.subscribe();
        let settings_listener = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(Event::SettingsChanged) => service.reconfigure().await,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("telemetry listener lagged, skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let service = Arc::clone(self);
        let period = Duration::from_secs(self.cfg.temp_hum_period_secs);
        let temp_hum_publisher = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if service.should_send().await {
                    service.publish_temp_and_hum().await;
                }
            }
        });

        let mut state = self.state.lock().await;
        state.background_tasks.push(settings_listener);
        state.background_tasks.push(temp_hum_publisher);
    }

    /// Graceful teardown: retract the discovery document, mark the panel
    /// offline, then drop the connection and all scheduled work.
    pub async fn shutdown(self: &Arc<Self>) {
        if self.should_send().await {
            self.retract_discovery().await;
            let topics = self.topics().await;
            self.publish_direct(topics.status(), "offline", QoS::AtLeastOnce, true)
                .await;
        }
        self.teardown_client().await;

        let mut state = self.state.lock().await;
        for task in state.background_tasks.drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::services::device_service::DeviceService;

    fn service_in(dir: &tempfile::TempDir) -> Arc<TelemetryService> {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(SettingsStore::load(dir.path().join("settings.toml")));
        let device = Arc::new(DeviceService::with_paths(
            DeviceModel::Atlantis,
            None,
            vec![],
            None,
        ));
        Arc::new(TelemetryService::new(
            configs::Telemetry::default(),
            store,
            device,
            bus,
            DeviceModel::Atlantis,
        ))
    }

    #[test]
    fn test_unrelated_preferences_share_broker_settings() {
        let base = DeviceSettings::default();
        let mut tweaked = base.clone();
        tweaked.brightness = 10;
        tweaked.screen_saver_delay_secs = 90;
        assert_eq!(BrokerSettings::of(&base), BrokerSettings::of(&tweaked));

        tweaked.mqtt_broker = "broker.local".into();
        assert_ne!(BrokerSettings::of(&base), BrokerSettings::of(&tweaked));
    }

    #[tokio::test]
    async fn test_failed_connect_backs_off_and_stays_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(&dir);
        service.store.update(|s| {
            s.mqtt_enabled = true;
            s.mqtt_broker = "127.0.0.1".into();
            // Nothing listens on port 1, so the first poll fails fast.
            s.mqtt_port = 1;
            s.mqtt_username = "panel".into();
            s.mqtt_password = "panel".into();
            s.mqtt_client_id = "lumipanel-test".into();
        });

        service.connect().await;
        sleep(Duration::from_millis(300)).await;

        assert_eq!(
            service.connection_state().await,
            ConnectionState::Disconnected
        );
        let state = service.state.lock().await;
        assert!(state.retry_task.is_some());
    }

    #[tokio::test]
    async fn test_reconfigure_without_credentials_stays_idle() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(&dir);
        service.store.update(|s| s.mqtt_enabled = true);

        service.reconfigure().await;
        assert_eq!(
            service.connection_state().await,
            ConnectionState::Disconnected
        );
    }
}
