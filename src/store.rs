//! The local store: settings, notification channels, product overrides and the notification log.
//!
//! Every collection lives in its own JSON file of the data directory. Secrets are encrypted at rest (see [`crate::crypto`]).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::{SecretBox, SENSITIVE_CHANNEL_KEYS};
use crate::error::SyncError;
use crate::mapper::SyncMap;
use crate::settings::Settings;

const SETTINGS_FILE: &str = "settings.json";
const CHANNELS_FILE: &str = "channels.json";
const OVERRIDES_FILE: &str = "product_overrides.json";
const LOG_FILE: &str = "notification_log.json";
const SYNC_MAP_FILE: &str = "sync_map.json";
const KEY_FILE: &str = ".encryption_key";

/// Older log entries are dropped past this count
pub const LOG_CAPACITY: usize = 1000;
/// Default number of entries returned by [`Store::log`]
pub const DEFAULT_LOG_LIMIT: usize = 100;


/// A configured notification channel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: i64,
    /// `pushover`, `telegram`, `slack`, `discord` or `gotify`
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
}

fn enabled_by_default() -> bool {
    true
}

/// A per-product replacement of the default expiry warning window
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductOverride {
    pub product_id: i64,
    pub product_name: String,
    pub custom_days_before_expiry: u32,
}

/// One line of the notification log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub product_name: Option<String>,
    /// `expiring`, `expired`, `missing`, `test` or `error`
    pub notification_type: String,
    pub channel_name: String,
    pub message: String,
    pub success: bool,
}


pub struct Store {
    data_dir: PathBuf,
    secrets: SecretBox,
    /// Serializes read-modify-write cycles on the files
    lock: Mutex<()>,
}

impl Store {
    /// Open (and create if needed) the store in `data_dir`.
    ///
    /// This also checks that the encryption key matches the stored secrets. A mismatch is logged, not returned:
    /// the process keeps running with unusable credentials until they are entered again.
    pub fn open(data_dir: &Path) -> Result<Self, SyncError> {
        std::fs::create_dir_all(data_dir)?;
        let secrets = SecretBox::load_or_create(&data_dir.join(KEY_FILE))?;
        let store = Self {
            data_dir: PathBuf::from(data_dir),
            secrets,
            lock: Mutex::new(()),
        };
        store.check_encryption_integrity();
        Ok(store)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Where the sync map of this store is persisted
    pub fn sync_map_path(&self) -> PathBuf {
        self.data_dir.join(SYNC_MAP_FILE)
    }

    pub fn open_sync_map(&self) -> Result<SyncMap, SyncError> {
        SyncMap::open(&self.sync_map_path())
    }

    /// Returns `false` when stored secrets cannot be decrypted with the current key
    pub fn encryption_key_matches(&self) -> bool {
        let raw: Settings = match self.read_file(SETTINGS_FILE) {
            Err(_) => return true,
            Ok(raw) => raw,
        };
        [&raw.grocy_api_key, &raw.caldav_password].iter()
            .filter(|value| SecretBox::is_encrypted(value))
            .all(|value| self.secrets.try_decrypt(value).is_some())
    }

    fn check_encryption_integrity(&self) {
        if self.encryption_key_matches() == false {
            log::error!("The encryption key does not match the stored data! Encrypted values (API keys, passwords, channel configurations) \
                         cannot be decrypted. Please enter every credential again.");
        }
        match self.channels() {
            Ok(channels) => log::info!("Store loaded: {} notification channel(s) configured", channels.len()),
            Err(err) => log::warn!("Integrity check failed: {}", err),
        }
    }


    fn path(&self, file_name: &str) -> PathBuf {
        self.data_dir.join(file_name)
    }

    fn read_file<T: DeserializeOwned + Default>(&self, file_name: &str) -> Result<T, SyncError> {
        let path = self.path(file_name);
        match std::fs::File::open(&path) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(err) => Err(SyncError::storage(format!("Unable to open file {:?}: {}", path, err))),
            Ok(file) => serde_json::from_reader(std::io::BufReader::new(file))
                .map_err(|err| SyncError::storage(format!("Invalid content in {:?}: {}", path, err))),
        }
    }

    fn write_file<T: Serialize>(&self, file_name: &str, data: &T) -> Result<(), SyncError> {
        let path = self.path(file_name);
        let tmp_path = path.with_extension("json.tmp");
        let file = std::fs::File::create(&tmp_path)
            .map_err(|err| SyncError::storage(format!("Unable to save file {:?}: {}", tmp_path, err)))?;
        serde_json::to_writer_pretty(file, data)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        // The guarded data is on disk, a poisoned lock does not make it inconsistent
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }


    /// The settings, with secrets decrypted
    pub fn settings(&self) -> Result<Settings, SyncError> {
        let mut settings: Settings = self.read_file(SETTINGS_FILE)?;
        settings.grocy_api_key = self.secrets.decrypt(&settings.grocy_api_key);
        settings.caldav_password = self.secrets.decrypt(&settings.caldav_password);
        Ok(settings)
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<(), SyncError> {
        let _guard = self.guard();
        let mut stored = settings.clone();
        stored.grocy_api_key = self.secrets.encrypt(&settings.grocy_api_key)?;
        stored.caldav_password = self.secrets.encrypt(&settings.caldav_password)?;
        self.write_file(SETTINGS_FILE, &stored)
    }


    /// Every channel, ordered by ID, with secrets decrypted
    pub fn channels(&self) -> Result<Vec<ChannelRecord>, SyncError> {
        let mut channels: Vec<ChannelRecord> = self.read_file(CHANNELS_FILE)?;
        for channel in channels.iter_mut() {
            self.map_channel_secrets(channel, |value| Ok(self.secrets.decrypt(value)))?;
        }
        channels.sort_by_key(|channel| channel.id);
        Ok(channels)
    }

    /// Insert a channel (when its `id` is 0) or replace the one with the same ID. Returns its ID
    pub fn save_channel(&self, channel: &ChannelRecord) -> Result<i64, SyncError> {
        let _guard = self.guard();
        let mut stored: Vec<ChannelRecord> = self.read_file(CHANNELS_FILE)?;

        let mut channel = channel.clone();
        self.map_channel_secrets(&mut channel, |value| self.secrets.encrypt(value))?;

        if channel.id == 0 {
            channel.id = stored.iter().map(|c| c.id).max().unwrap_or(0) + 1;
            stored.push(channel.clone());
        } else {
            match stored.iter_mut().find(|c| c.id == channel.id) {
                None => return Err(SyncError::storage(format!("No channel with id {}", channel.id))),
                Some(existing) => *existing = channel.clone(),
            }
        }
        self.write_file(CHANNELS_FILE, &stored)?;
        Ok(channel.id)
    }

    pub fn delete_channel(&self, channel_id: i64) -> Result<(), SyncError> {
        let _guard = self.guard();
        let mut stored: Vec<ChannelRecord> = self.read_file(CHANNELS_FILE)?;
        stored.retain(|c| c.id != channel_id);
        self.write_file(CHANNELS_FILE, &stored)
    }

    fn map_channel_secrets<F>(&self, channel: &mut ChannelRecord, f: F) -> Result<(), SyncError>
    where
        F: Fn(&str) -> Result<String, SyncError>,
    {
        for key in SENSITIVE_CHANNEL_KEYS {
            if let Some(Value::String(value)) = channel.config.get_mut(*key) {
                if value.is_empty() == false {
                    *value = f(value)?;
                }
            }
        }
        Ok(())
    }


    /// Every override, ordered by product name
    pub fn product_overrides(&self) -> Result<Vec<ProductOverride>, SyncError> {
        let mut overrides: Vec<ProductOverride> = self.read_file(OVERRIDES_FILE)?;
        overrides.sort_by(|a, b| a.product_name.cmp(&b.product_name));
        Ok(overrides)
    }

    /// Insert or replace the override of a product
    pub fn save_product_override(&self, product_id: i64, product_name: &str, days: u32) -> Result<(), SyncError> {
        let _guard = self.guard();
        let mut overrides: Vec<ProductOverride> = self.read_file(OVERRIDES_FILE)?;
        overrides.retain(|o| o.product_id != product_id);
        overrides.push(ProductOverride {
            product_id,
            product_name: product_name.to_string(),
            custom_days_before_expiry: days,
        });
        self.write_file(OVERRIDES_FILE, &overrides)
    }

    pub fn delete_product_override(&self, product_id: i64) -> Result<(), SyncError> {
        let _guard = self.guard();
        let mut overrides: Vec<ProductOverride> = self.read_file(OVERRIDES_FILE)?;
        overrides.retain(|o| o.product_id != product_id);
        self.write_file(OVERRIDES_FILE, &overrides)
    }


    pub fn add_log_entry(&self, product_name: Option<&str>, notification_type: &str, channel_name: &str,
                         message: &str, success: bool) -> Result<(), SyncError>
    {
        let _guard = self.guard();
        let mut entries: Vec<LogEntry> = self.read_file(LOG_FILE)?;
        let id = entries.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        entries.push(LogEntry {
            id,
            timestamp: Utc::now(),
            product_name: product_name.map(String::from),
            notification_type: notification_type.to_string(),
            channel_name: channel_name.to_string(),
            message: message.to_string(),
            success,
        });
        if entries.len() > LOG_CAPACITY {
            let excess = entries.len() - LOG_CAPACITY;
            entries.drain(..excess);
        }
        self.write_file(LOG_FILE, &entries)
    }

    /// The `limit` most recent log entries, newest first
    pub fn log(&self, limit: usize) -> Result<Vec<LogEntry>, SyncError> {
        let mut entries: Vec<LogEntry> = self.read_file(LOG_FILE)?;
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        entries.truncate(limit);
        Ok(entries)
    }

    pub fn clear_log(&self) -> Result<(), SyncError> {
        let _guard = self.guard();
        self.write_file(LOG_FILE, &Vec::<LogEntry>::new())
    }
}
