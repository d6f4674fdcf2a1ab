//! User preferences, saved records and theme, persisted through a
//! [`KeyValueStore`].
//!
//! Every mutation updates the in-memory value and notifies subscribers first,
//! then writes through. Writes issued before [`PreferencesStore::load`] has
//! completed stay in memory only.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::normalize::MediaRecord;
use crate::reddit::SortOption;
use crate::storage::KeyValueStore;

pub const SETTINGS_KEY: &str = "settings";
pub const SAVED_KEY: &str = "saved_gifs";
pub const THEME_KEY: &str = "theme";

pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage: failed to read {key}")]
    Load {
        key: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("storage: failed to persist {key}")]
    Persist {
        key: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("storage: failed to encode {key}")]
    Encode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::System => "system",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            "system" => Some(Theme::System),
            _ => None,
        }
    }

    /// Color scheme to force, or `None` to follow the system.
    pub fn color_attribute(&self) -> Option<&'static str> {
        match self {
            Theme::Light | Theme::Dark => Some(self.as_str()),
            Theme::System => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preferences {
    pub page_size: usize,
    pub sort: SortOption,
    pub theme: Theme,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            sort: SortOption::Hot,
            theme: Theme::System,
        }
    }
}

impl Preferences {
    /// Whether two values would fetch differently. Theme does not count.
    pub fn same_fetch_params(&self, other: &Preferences) -> bool {
        self.page_size == other.page_size && self.sort == other.sort
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSettings {
    #[serde(rename = "perPage")]
    per_page: usize,
    sort: SortOption,
}

struct Inner {
    prefs: Preferences,
    saved: Vec<MediaRecord>,
    loaded: bool,
}

pub struct PreferencesStore {
    kv: Arc<dyn KeyValueStore>,
    inner: RwLock<Inner>,
    subscribers: Mutex<Vec<Sender<Preferences>>>,
}

impl PreferencesStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            inner: RwLock::new(Inner {
                prefs: Preferences::default(),
                saved: Vec::new(),
                loaded: false,
            }),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Reads settings, saved records and theme once. Missing or malformed
    /// entries keep their defaults.
    pub fn load(&self) -> Result<Preferences, StorageError> {
        let settings: Option<StoredSettings> = self.read(SETTINGS_KEY)?;
        let saved: Option<Vec<MediaRecord>> = self.read(SAVED_KEY)?;
        let theme: Option<Theme> = self.read(THEME_KEY)?;

        let prefs = {
            let mut inner = self.inner.write();
            if let Some(settings) = settings {
                inner.prefs.page_size = settings.per_page;
                inner.prefs.sort = settings.sort;
            }
            if let Some(theme) = theme {
                inner.prefs.theme = theme;
            }
            if let Some(saved) = saved {
                inner.saved = saved;
            }
            inner.loaded = true;
            inner.prefs
        };
        debug!(?prefs, "preferences loaded");
        self.notify(prefs);
        Ok(prefs)
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.read().loaded
    }

    pub fn current(&self) -> Preferences {
        self.inner.read().prefs
    }

    /// Receives every subsequent preferences value.
    pub fn subscribe(&self) -> Receiver<Preferences> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn save(&self, prefs: Preferences) -> Result<(), StorageError> {
        let previous = {
            let mut inner = self.inner.write();
            std::mem::replace(&mut inner.prefs, prefs)
        };
        self.notify(prefs);

        self.persist(
            SETTINGS_KEY,
            &StoredSettings {
                per_page: prefs.page_size,
                sort: prefs.sort,
            },
        )?;
        if previous.theme != prefs.theme {
            self.persist(THEME_KEY, &prefs.theme)?;
        }
        Ok(())
    }

    pub fn theme(&self) -> Theme {
        self.inner.read().prefs.theme
    }

    pub fn set_theme(&self, theme: Theme) -> Result<(), StorageError> {
        let prefs = {
            let mut inner = self.inner.write();
            inner.prefs.theme = theme;
            inner.prefs
        };
        self.notify(prefs);
        self.persist(THEME_KEY, &theme)
    }

    /// Saved records in the order they were saved.
    pub fn saved_records(&self) -> Vec<MediaRecord> {
        self.inner.read().saved.clone()
    }

    pub fn is_saved(&self, permalink: &str) -> bool {
        self.inner
            .read()
            .saved
            .iter()
            .any(|record| record.permalink == permalink)
    }

    pub fn save_record(&self, record: MediaRecord) -> Result<(), StorageError> {
        let saved = {
            let mut inner = self.inner.write();
            inner.saved.push(record);
            inner.saved.clone()
        };
        self.persist(SAVED_KEY, &saved)
    }

    /// Removes every saved record sharing `permalink`.
    pub fn unsave_record(&self, permalink: &str) -> Result<(), StorageError> {
        let saved = {
            let mut inner = self.inner.write();
            inner.saved.retain(|record| record.permalink != permalink);
            inner.saved.clone()
        };
        self.persist(SAVED_KEY, &saved)
    }

    fn read<T>(&self, key: &'static str) -> Result<Option<T>, StorageError>
    where
        T: serde::de::DeserializeOwned,
    {
        let Some(raw) = self
            .kv
            .get(key)
            .map_err(|source| StorageError::Load { key, source })?
        else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(key, "ignoring malformed stored value: {err}");
                Ok(None)
            }
        }
    }

    fn persist<T: Serialize + ?Sized>(
        &self,
        key: &'static str,
        value: &T,
    ) -> Result<(), StorageError> {
        if !self.is_loaded() {
            debug!(key, "store not loaded yet, keeping change in memory");
            return Ok(());
        }
        let encoded =
            serde_json::to_string(value).map_err(|source| StorageError::Encode { key, source })?;
        self.kv.set(key, &encoded).map_err(|source| {
            warn!(key, "failed to persist: {source:#}");
            StorageError::Persist { key, source }
        })
    }

    fn notify(&self, prefs: Preferences) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(prefs).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::testing::record;
    use crate::storage::{Options, Store};
    use anyhow::bail;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[derive(Default)]
    struct MemoryStore {
        values: Mutex<HashMap<String, String>>,
        fail_reads: bool,
        fail_writes: bool,
    }

    impl KeyValueStore for MemoryStore {
        fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            if self.fail_reads {
                bail!("database is locked");
            }
            Ok(self.values.lock().get(key).cloned())
        }

        fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
            if self.fail_writes {
                bail!("disk full");
            }
            self.values.lock().insert(key.into(), value.into());
            Ok(())
        }
    }

    fn loaded(kv: Arc<dyn KeyValueStore>) -> PreferencesStore {
        let store = PreferencesStore::new(kv);
        store.load().unwrap();
        store
    }

    #[test]
    fn defaults_when_nothing_stored() {
        let store = loaded(Arc::new(MemoryStore::default()));
        let prefs = store.current();
        assert_eq!(prefs.page_size, 10);
        assert_eq!(prefs.sort, SortOption::Hot);
        assert_eq!(prefs.theme, Theme::System);
        assert!(store.saved_records().is_empty());
    }

    #[test]
    fn settings_use_stored_shape() {
        let kv = Arc::new(MemoryStore::default());
        let store = loaded(kv.clone());
        store
            .save(Preferences {
                page_size: 25,
                sort: SortOption::New,
                theme: Theme::System,
            })
            .unwrap();

        let raw = kv.values.lock().get(SETTINGS_KEY).cloned().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json, serde_json::json!({"perPage": 25, "sort": "new"}));
        assert!(kv.values.lock().get(THEME_KEY).is_none());
    }

    #[test]
    fn round_trips_through_sqlite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        {
            let kv = Arc::new(Store::open(Options { path: Some(path.clone()) }).unwrap());
            let store = loaded(kv);
            store.set_theme(Theme::Dark).unwrap();
            store.save_record(record("t3_a")).unwrap();
            store.save_record(record("t3_b")).unwrap();
            store
                .save(Preferences {
                    page_size: 5,
                    sort: SortOption::New,
                    theme: Theme::Dark,
                })
                .unwrap();
        }

        let kv = Arc::new(Store::open(Options { path: Some(path) }).unwrap());
        let store = loaded(kv);
        assert_eq!(
            store.current(),
            Preferences {
                page_size: 5,
                sort: SortOption::New,
                theme: Theme::Dark,
            }
        );
        let ids: Vec<_> = store.saved_records().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["t3_a", "t3_b"]);
    }

    #[test]
    fn unsave_matches_on_permalink() {
        let store = loaded(Arc::new(MemoryStore::default()));
        store.save_record(record("t3_a")).unwrap();
        store.save_record(record("t3_b")).unwrap();
        store.save_record(record("t3_a")).unwrap();
        assert!(store.is_saved("/r/test/comments/t3_a/"));

        store.unsave_record("/r/test/comments/t3_a/").unwrap();
        assert!(!store.is_saved("/r/test/comments/t3_a/"));
        assert_eq!(store.saved_records().len(), 1);
    }

    #[test]
    fn failed_write_still_updates_memory() {
        let kv = Arc::new(MemoryStore {
            fail_writes: true,
            ..Default::default()
        });
        let store = loaded(kv);
        let rx = store.subscribe();
        let prefs = Preferences {
            page_size: 30,
            ..Default::default()
        };

        let err = store.save(prefs).unwrap_err();
        assert!(matches!(err, StorageError::Persist { key: SETTINGS_KEY, .. }));
        assert_eq!(store.current().page_size, 30);
        assert_eq!(rx.try_recv().unwrap().page_size, 30);

        assert!(store.save_record(record("t3_z")).is_err());
        assert_eq!(store.saved_records().len(), 1);
    }

    #[test]
    fn unreadable_store_reports_load_error_and_keeps_defaults() {
        let kv = Arc::new(MemoryStore {
            fail_reads: true,
            ..Default::default()
        });
        let store = PreferencesStore::new(kv);
        let err = store.load().unwrap_err();
        assert!(matches!(err, StorageError::Load { key: SETTINGS_KEY, .. }));
        assert_eq!(store.current(), Preferences::default());
    }

    #[test]
    fn writes_before_load_are_memory_only() {
        let kv = Arc::new(MemoryStore::default());
        let store = PreferencesStore::new(kv.clone());
        store.set_theme(Theme::Light).unwrap();
        assert_eq!(store.theme(), Theme::Light);
        assert!(kv.values.lock().is_empty());
    }

    #[test]
    fn malformed_values_fall_back_to_defaults() {
        let kv = Arc::new(MemoryStore::default());
        kv.values
            .lock()
            .insert(SETTINGS_KEY.into(), "{\"perPage\": \"lots\"}".into());
        kv.values.lock().insert(THEME_KEY.into(), "\"dark\"".into());
        let store = loaded(kv);
        assert_eq!(store.current().page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(store.theme(), Theme::Dark);
    }

    #[test]
    fn theme_attribute() {
        assert_eq!(Theme::Dark.color_attribute(), Some("dark"));
        assert_eq!(Theme::Light.color_attribute(), Some("light"));
        assert_eq!(Theme::System.color_attribute(), None);
        assert_eq!(Theme::from_key("DARK"), Some(Theme::Dark));
    }
}
