use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::configs::{Settings, SettingsStore};
use crate::models::DeviceModel;
use crate::services::telemetry::CommandContext;
use crate::services::{
    DeviceService, Event, EventBus, ScreenSaverService, ScreenService, SensorService,
    TelemetryService,
};

pub struct App {
    pub settings: Arc<Settings>,
    pub bus: Arc<EventBus>,
    pub store: Arc<SettingsStore>,
    pub device: Arc<DeviceService>,
    pub telemetry: Arc<TelemetryService>,
    pub sensors: Arc<SensorService>,
    pub saver: Arc<ScreenSaverService>,
    pub screen: Arc<ScreenService>,
    tasks: Vec<JoinHandle<()>>,
}

pub async fn create_app(settings: &Arc<Settings>) -> App {
    let bus = Arc::new(EventBus::new());
    let store = Arc::new(SettingsStore::load(&settings.store.path));

    let model = DeviceModel::detect(settings.model.as_deref());
    tracing::info!("running as model {}", model.profile().name);

    let device = Arc::new(DeviceService::probe(model));
    let telemetry = Arc::new(TelemetryService::new(
        settings.telemetry.clone(),
        store.clone(),
        device.clone(),
        bus.clone(),
        model,
    ));
    let sensors = Arc::new(SensorService::new(bus.clone(), telemetry.clone()));
    let saver = Arc::new(ScreenSaverService::new(
        settings.screensaver.clone(),
        store.clone(),
        bus.clone(),
        telemetry.clone(),
        model,
    ));
    let screen = Arc::new(ScreenService::new(
        settings.brightness.clone(),
        store.clone(),
        device.clone(),
        telemetry.clone(),
        bus.clone(),
    ));

    // Inbound broker commands fan out to the rest of the system; wired last
    // so every collaborator already exists.
    telemetry.attach_commands(CommandContext {
        device: device.clone(),
        bus: bus.clone(),
        saver: saver.clone(),
        sensors: sensors.clone(),
    });

    App {
        settings: settings.clone(),
        bus,
        store,
        device,
        telemetry,
        sensors,
        saver,
        screen,
        tasks: Vec::new(),
    }
}

impl App {
    pub async fn start(&mut self) {
        self.tasks.push(self.screen.run());
        self.tasks.push(self.saver.spawn_idle_watcher());
        self.tasks.push(self.saver.spawn_proximity_wake());

        // Persisted preference changes become bus traffic so every service
        // picks them up the same way.
        let mut watcher = self.store.watch();
        let bus = self.bus.clone();
        self.tasks.push(tokio::spawn(async move {
            while watcher.changed().await.is_ok() {
                bus.publish(Event::SettingsChanged);
            }
        }));

        if let Some(sensor) = self.settings.sensor.clone() {
            self.tasks.push(self.sensors.spawn_poller(sensor));
        }

        self.telemetry.run().await;
        self.telemetry.connect().await;
    }

    pub async fn shutdown(&mut self) {
        self.telemetry.shutdown().await;
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
