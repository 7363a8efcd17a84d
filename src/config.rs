//! Rewinder - Configuration
//!
//! `CaptureConfig` holds the three process-wide toggles and is persisted on
//! every mutation. `EngineSettings` are runtime knobs supplied at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::secure_fs::SecureFs;

/// File name of the persisted toggles inside the data directory
pub const CONFIG_FILE: &str = "config.json";

// ═══════════════════════════════════════════════════════════════════════════
// PERSISTED TOGGLES
// ═══════════════════════════════════════════════════════════════════════════

/// Process-wide capture toggles. All false on first run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub encryption_enabled: bool,
    #[serde(default)]
    pub periodic_capture_enabled: bool,
    #[serde(default)]
    pub click_event_enabled: bool,
}

/// One toggle in `CaptureConfig`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Encryption,
    PeriodicCapture,
    ClickEvent,
}

impl CaptureConfig {
    pub fn get(&self, toggle: Toggle) -> bool {
        match toggle {
            Toggle::Encryption => self.encryption_enabled,
            Toggle::PeriodicCapture => self.periodic_capture_enabled,
            Toggle::ClickEvent => self.click_event_enabled,
        }
    }

    fn set(&mut self, toggle: Toggle, value: bool) {
        match toggle {
            Toggle::Encryption => self.encryption_enabled = value,
            Toggle::PeriodicCapture => self.periodic_capture_enabled = value,
            Toggle::ClickEvent => self.click_event_enabled = value,
        }
    }
}

/// Persistent home of `CaptureConfig`
pub struct ConfigStore {
    fs: SecureFs,
    data: RwLock<CaptureConfig>,
}

impl ConfigStore {
    /// Load `config.json` from `root`, creating it with defaults if absent
    pub fn load_or_create(root: &Path) -> Result<Self, ConfigError> {
        let fs = SecureFs::new(root);

        let data = if fs.exists(CONFIG_FILE) {
            match fs.read_file(CONFIG_FILE) {
                Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                    log::warn!("Config at {} is unreadable ({e}), resetting to defaults", root.display());
                    CaptureConfig::default()
                }),
                Err(e) => {
                    log::warn!("Failed to read config ({e}), resetting to defaults");
                    CaptureConfig::default()
                }
            }
        } else {
            log::info!("No config found, creating {}", root.join(CONFIG_FILE).display());
            CaptureConfig::default()
        };

        let store = Self {
            fs,
            data: RwLock::new(data),
        };
        store.persist(&data)?;
        Ok(store)
    }

    /// Current snapshot of all toggles
    pub fn snapshot(&self) -> CaptureConfig {
        *self.data.read()
    }

    pub fn get(&self, toggle: Toggle) -> bool {
        self.data.read().get(toggle)
    }

    /// Update one toggle. The new value is visible only after it is on disk.
    pub fn set(&self, toggle: Toggle, value: bool) -> Result<(), ConfigError> {
        let mut guard = self.data.write();
        if guard.get(toggle) == value {
            return Ok(());
        }

        let mut next = *guard;
        next.set(toggle, value);
        self.persist(&next)?;
        *guard = next;

        log::info!("{toggle:?} set to {value}");
        Ok(())
    }

    pub fn path(&self) -> PathBuf {
        self.fs.path_of(CONFIG_FILE)
    }

    fn persist(&self, data: &CaptureConfig) -> Result<(), ConfigError> {
        let serialized = serde_json::to_vec_pretty(data)?;
        self.fs
            .write_file(CONFIG_FILE, &serialized)
            .map_err(|e| ConfigError::Persist {
                path: self.path().display().to_string(),
                reason: e.to_string(),
            })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RUNTIME SETTINGS
// ═══════════════════════════════════════════════════════════════════════════

/// Argon2id cost parameters for credential stretching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Time cost (iterations)
    pub iterations: u32,
    /// Parallelism lanes
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Minimal cost. Only for tests and throwaway demo data.
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Engine startup settings
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Root of config, index and blobs
    pub data_dir: PathBuf,
    /// Period of the periodic trigger source
    pub capture_interval: Duration,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Longest edge of stored thumbnails
    pub thumbnail_size: u32,
    /// Triggers that may wait behind an in-flight capture before new ones are coalesced
    pub queue_depth: usize,
    /// Credential stretching cost
    pub kdf: KdfParams,
    /// Keyring service name
    pub keyring_service: String,
    /// Keyring account name
    pub keyring_account: String,
    /// Arm trigger sources from persisted toggles at startup and on toggle
    pub arm_sources: bool,
}

impl EngineSettings {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./rewinder-data"),
            capture_interval: Duration::from_secs(10),
            jpeg_quality: 95,
            thumbnail_size: 200,
            queue_depth: 1,
            kdf: KdfParams::default(),
            keyring_service: "rewinder".into(),
            keyring_account: "encryption_key".into(),
            arm_sources: true,
        }
    }
}
