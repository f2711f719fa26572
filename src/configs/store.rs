use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::{fs, io};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

/// Legacy factory client ids that must be replaced by a generated one.
const PLACEHOLDER_CLIENT_IDS: [&str; 2] = ["shellywalldisplay", "shellyelevate"];

/// User-tunable device preferences. The single source of truth for everything
/// the control loop reads reactively.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceSettings {
    pub automatic_brightness: bool,
    pub brightness: u8,
    pub min_brightness: u8,
    pub screen_saver_min_brightness: u8,
    pub screen_saver_enabled: bool,
    pub screen_saver_delay_secs: u64,
    pub screen_saver_id: usize,
    pub wake_on_proximity: bool,
    pub mqtt_enabled: bool,
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_username: String,
    pub mqtt_password: String,
    pub mqtt_client_id: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            automatic_brightness: true,
            brightness: 255,
            min_brightness: 48,
            screen_saver_min_brightness: 48,
            screen_saver_enabled: true,
            screen_saver_delay_secs: 45,
            screen_saver_id: 0,
            wake_on_proximity: false,
            mqtt_enabled: false,
            mqtt_broker: String::new(),
            mqtt_port: 1883,
            mqtt_username: String::new(),
            mqtt_password: String::new(),
            mqtt_client_id: String::new(),
        }
    }
}

/// Persistent key-value store for device preferences, with change
/// notification. Reads come from an in-memory snapshot; every mutation is
/// written back to disk and bumps the revision watch channel so subscribers
/// can refresh reactively instead of re-reading per tick.
pub struct SettingsStore {
    path: PathBuf,
    inner: RwLock<DeviceSettings>,
    revision: watch::Sender<u64>,
}

impl SettingsStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match fs::read_to_string(&path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!("invalid settings file {:?}, using defaults: {}", path, e);
                    DeviceSettings::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => DeviceSettings::default(),
            Err(e) => {
                tracing::warn!("cannot read settings file {:?}: {}", path, e);
                DeviceSettings::default()
            }
        };

        let (revision, _) = watch::channel(0);

        Self {
            path,
            inner: RwLock::new(settings),
            revision,
        }
    }

    pub fn snapshot(&self) -> DeviceSettings {
        self.inner.read().unwrap().clone()
    }

    /// Applies a mutation, persists the result and notifies watchers. No-op
    /// (and no notification) when the mutation leaves the settings unchanged.
    pub fn update(&self, mutate: impl FnOnce(&mut DeviceSettings)) {
        let changed = {
            let mut settings = self.inner.write().unwrap();
            let before = settings.clone();
            mutate(&mut settings);

            if *settings == before {
                false
            } else {
                if let Err(e) = persist(&self.path, &settings) {
                    tracing::error!("failed to persist settings to {:?}: {}", self.path, e);
                }
                true
            }
        };

        if changed {
            self.revision.send_modify(|rev| *rev += 1);
        }
    }

    /// Subscribes to change notifications. The value is a revision counter;
    /// subscribers only care that it moved.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Returns the persisted broker client id, generating a fresh one when it
    /// is missing, too short, or one of the legacy factory placeholders.
    pub fn ensure_client_id(&self) -> String {
        let current = self.snapshot().mqtt_client_id;

        let legacy = PLACEHOLDER_CLIENT_IDS.contains(&current.as_str());
        if !legacy && current.len() > 2 {
            return current;
        }

        let suffix = &Uuid::new_v4().simple().to_string()[..4];
        let generated = format!("lumipanel-{suffix}");
        tracing::info!("generated new client id: {}", generated);

        self.update(|s| s.mqtt_client_id = generated.clone());
        generated
    }
}

fn persist(path: &Path, settings: &DeviceSettings) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, toml::to_string_pretty(settings)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> SettingsStore {
        SettingsStore::load(dir.path().join("settings.toml"))
    }

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let settings = store.snapshot();
        assert!(settings.automatic_brightness);
        assert_eq!(settings.min_brightness, 48);
        assert_eq!(settings.screen_saver_delay_secs, 45);
        assert!(!settings.mqtt_enabled);
    }

    #[test]
    fn test_update_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        let store = SettingsStore::load(&path);
        store.update(|s| {
            s.brightness = 128;
            s.wake_on_proximity = true;
        });

        let reloaded = SettingsStore::load(&path);
        assert_eq!(reloaded.snapshot().brightness, 128);
        assert!(reloaded.snapshot().wake_on_proximity);
    }

    #[test]
    fn test_update_notifies_watchers() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let watcher = store.watch();

        store.update(|s| s.screen_saver_delay_secs = 60);
        assert_eq!(*watcher.borrow(), 1);

        // Unchanged mutation must not notify.
        store.update(|s| s.screen_saver_delay_secs = 60);
        assert_eq!(*watcher.borrow(), 1);
    }

    #[test]
    fn test_client_id_kept_when_valid() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.update(|s| s.mqtt_client_id = "lumipanel-ab12".into());

        assert_eq!(store.ensure_client_id(), "lumipanel-ab12");
    }

    #[test]
    fn test_client_id_regenerated_for_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        for placeholder in ["", "ab", "shellywalldisplay", "shellyelevate"] {
            store.update(|s| s.mqtt_client_id = placeholder.into());
            let id = store.ensure_client_id();
            assert!(id.starts_with("lumipanel-"), "got {id}");
            assert_eq!(store.snapshot().mqtt_client_id, id);
        }
    }
}
