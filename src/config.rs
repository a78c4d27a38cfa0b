use crate::buffer::{DEFAULT_BUFFER_CAPACITY, MAX_BUFFER_CAPACITY};
use crate::excursion::DEFAULT_OVERRIDE_RANGE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_ROOT_TOPIC: &str = "vtc";
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = -6;
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(50);
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(8);
pub const DEFAULT_VOLTAGE_THRESHOLD: f32 = 0.0;
/// Largest MQTT packet the device sends or accepts.
pub const MAX_PACKET_SIZE: usize = 1024;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidField { key: ConfigKey, value: String },
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("stored configuration is not a JSON object of strings: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("configuration store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigKey {
    Ip,
    Dns,
    Gateway,
    Subnet,
    Mqtt,
    Ntp,
    Site,
    EquipmentId,
    ClientId,
    VoltageThreshold,
}

impl ConfigKey {
    /// Application order for updates.
    pub const ALL: [ConfigKey; 10] = [
        ConfigKey::Ip,
        ConfigKey::Dns,
        ConfigKey::Gateway,
        ConfigKey::Subnet,
        ConfigKey::Mqtt,
        ConfigKey::Ntp,
        ConfigKey::Site,
        ConfigKey::EquipmentId,
        ConfigKey::ClientId,
        ConfigKey::VoltageThreshold,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConfigKey::Ip => "IP",
            ConfigKey::Dns => "DNS",
            ConfigKey::Gateway => "GATEWAY",
            ConfigKey::Subnet => "SUBNET",
            ConfigKey::Mqtt => "MQTT",
            ConfigKey::Ntp => "NTP",
            ConfigKey::Site => "SITE",
            ConfigKey::EquipmentId => "EQUIPMENTID",
            ConfigKey::ClientId => "CLIENTID",
            ConfigKey::VoltageThreshold => "VTHRESHOLD",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == name)
    }
}

impl core::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an update came from. Serial updates confirm each field with the
/// operator; remote updates apply every recognised field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Serial,
    Remote,
}

/// The persisted key → string document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigDocument {
    fields: BTreeMap<String, String>,
}

impl ConfigDocument {
    pub fn get(&self, key: ConfigKey) -> Option<&str> {
        self.fields.get(key.as_str()).map(String::as_str)
    }

    pub fn set(&mut self, key: ConfigKey, value: impl Into<String>) {
        self.fields.insert(key.as_str().to_string(), value.into());
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Copies recognised string fields from `update` into this document.
    ///
    /// Fields are visited in [`ConfigKey::ALL`] order and each one is offered
    /// to `confirm` before it is written. Unknown keys and non-string values
    /// are skipped. Returns the keys that were written.
    pub fn apply_update<F>(&mut self, update: &serde_json::Map<String, Value>, mut confirm: F) -> Vec<ConfigKey>
    where
        F: FnMut(ConfigKey, &str) -> bool,
    {
        let mut applied = Vec::new();

        for key in ConfigKey::ALL {
            let Some(raw) = update.get(key.as_str()) else {
                continue;
            };
            let Some(value) = raw.as_str() else {
                warn!(%key, value = %raw, "ignoring non-string configuration value");
                continue;
            };
            if confirm(key, value) {
                self.set(key, value);
                applied.push(key);
            }
        }

        for name in update.keys().filter(|name| ConfigKey::parse(name).is_none()) {
            debug!(key = %name, "ignoring unknown configuration key");
        }

        applied
    }
}

/// Non-volatile storage for the configuration document.
pub trait ConfigStore: Send {
    fn load(&self) -> Result<ConfigDocument, ConfigError>;
    fn commit(&mut self, document: &ConfigDocument) -> Result<(), ConfigError>;
}

/// JSON document on disk, replaced atomically on commit.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<ConfigDocument, ConfigError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn commit(&mut self, document: &ConfigDocument) -> Result<(), ConfigError> {
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, serde_json::to_vec_pretty(document)?)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

/// In-memory store. Clones share the same document, so a test can keep a
/// handle while the device owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    document: ConfigDocument,
    commits: usize,
}

impl MemoryConfigStore {
    pub fn new(document: ConfigDocument) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryState { document, commits: 0 })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn document(&self) -> ConfigDocument {
        self.state().document.clone()
    }

    pub fn commits(&self) -> usize {
        self.state().commits
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<ConfigDocument, ConfigError> {
        Ok(self.document())
    }

    fn commit(&mut self, document: &ConfigDocument) -> Result<(), ConfigError> {
        let mut state = self.state();
        state.document = document.clone();
        state.commits += 1;
        Ok(())
    }
}

/// Parsed device configuration used at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub ip: Ipv4Addr,
    pub dns: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub subnet: Ipv4Addr,
    pub mqtt: Ipv4Addr,
    pub ntp: Ipv4Addr,
    pub site: String,
    pub equipment_id: String,
    pub client_id: String,
    pub voltage_threshold: f32,
}

impl DeviceConfig {
    /// Builds the runtime view of `document`.
    ///
    /// Malformed fields are logged and replaced by their defaults so that a
    /// bad store never prevents boot. `fallback_client_id` is used when no
    /// client id is stored.
    pub fn from_document(document: &ConfigDocument, fallback_client_id: &str) -> Self {
        let address = |key| match parse_field::<Ipv4Addr>(document, key) {
            Ok(value) => value.unwrap_or(Ipv4Addr::UNSPECIFIED),
            Err(e) => {
                warn!(error = %e, "using 0.0.0.0");
                Ipv4Addr::UNSPECIFIED
            }
        };
        let text = |key| document.get(key).unwrap_or_default().to_string();

        let voltage_threshold = match parse_field::<f32>(document, ConfigKey::VoltageThreshold) {
            Ok(value) => value.unwrap_or(DEFAULT_VOLTAGE_THRESHOLD),
            Err(e) => {
                warn!(error = %e, "using default voltage threshold");
                DEFAULT_VOLTAGE_THRESHOLD
            }
        };

        let client_id = match document.get(ConfigKey::ClientId) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => fallback_client_id.to_string(),
        };

        Self {
            ip: address(ConfigKey::Ip),
            dns: address(ConfigKey::Dns),
            gateway: address(ConfigKey::Gateway),
            subnet: address(ConfigKey::Subnet),
            mqtt: address(ConfigKey::Mqtt),
            ntp: address(ConfigKey::Ntp),
            site: text(ConfigKey::Site),
            equipment_id: text(ConfigKey::EquipmentId),
            client_id,
            voltage_threshold,
        }
    }
}

fn parse_field<T: std::str::FromStr>(document: &ConfigDocument, key: ConfigKey) -> Result<Option<T>, ConfigError> {
    let Some(raw) = document.get(key) else {
        return Ok(None);
    };
    raw.trim().parse::<T>().map(Some).map_err(|_| ConfigError::InvalidField {
        key,
        value: raw.to_string(),
    })
}

/// Identifier used when the store carries no client id.
pub fn default_client_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "device".to_string());
    format!("vtc-{host}")
}

/// Runtime settings that are not part of the persisted document.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub window_capacity: usize,
    pub delivery_capacity: usize,
    pub override_range: u16,
    pub reconnect_interval: Duration,
    pub reconnect_jitter: Duration,
    pub mqtt_port: u16,
    pub mqtt_credentials: Option<(String, String)>,
    pub root_topic: String,
    pub utc_offset_hours: i32,
    pub ntp_timeout: Duration,
    pub poll_timeout: Duration,
    pub restart_delay: Duration,
    pub prompt_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            window_capacity: DEFAULT_BUFFER_CAPACITY,
            delivery_capacity: DEFAULT_BUFFER_CAPACITY,
            override_range: DEFAULT_OVERRIDE_RANGE,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            reconnect_jitter: Duration::ZERO,
            mqtt_port: DEFAULT_MQTT_PORT,
            mqtt_credentials: None,
            root_topic: DEFAULT_ROOT_TOPIC.to_string(),
            utc_offset_hours: DEFAULT_UTC_OFFSET_HOURS,
            ntp_timeout: crate::ntp::DEFAULT_NTP_TIMEOUT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            restart_delay: DEFAULT_RESTART_DELAY,
            prompt_timeout: DEFAULT_PROMPT_TIMEOUT,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, capacity) in [
            ("window capacity", self.window_capacity),
            ("delivery capacity", self.delivery_capacity),
        ] {
            if capacity == 0 || capacity > MAX_BUFFER_CAPACITY {
                return Err(ConfigError::InvalidSettings(format!(
                    "{name} {capacity} outside 1..={MAX_BUFFER_CAPACITY}"
                )));
            }
        }

        if self.override_range == 0 {
            return Err(ConfigError::InvalidSettings("override range must be at least 1".into()));
        }
        if usize::from(self.override_range) >= self.window_capacity {
            return Err(ConfigError::InvalidSettings(format!(
                "override range {} must be less than window capacity {}",
                self.override_range, self.window_capacity
            )));
        }
        if !(-12..=14).contains(&self.utc_offset_hours) {
            return Err(ConfigError::InvalidSettings(format!(
                "UTC offset {} hours out of range",
                self.utc_offset_hours
            )));
        }
        if self.root_topic.is_empty() {
            return Err(ConfigError::InvalidSettings("root topic must not be empty".into()));
        }

        Ok(())
    }
}
