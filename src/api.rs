//! Rewinder - Engine API
//!
//! Single entry point wiring every component together.

use std::path::Path;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::capture::{
    CapturePipeline, CaptureScheduler, FrameSource, InputHook, SourceState, SubmitOutcome, TriggerKind,
};
use crate::codec::FrameEncoder;
use crate::config::{CaptureConfig, ConfigStore, EngineSettings, Toggle};
use crate::credentials::{CredentialManager, SecretVault};
use crate::encryption::EncryptionManager;
use crate::error::{EngineError, EngineResult, StorageError};
use crate::query::{ImageAnswer, PathAnswer, QueryService};
use crate::store::{ImageStore, StoreStats};

/// Capture-and-retrieval engine
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use rewinder::{EngineSettings, RewinderEngine, TestPattern, ManualHook, MemoryVault};
///
/// let engine = RewinderEngine::start(
///     EngineSettings::new("./rewinder-data"),
///     Arc::new(TestPattern::default()),
///     Arc::new(ManualHook::new()),
///     Arc::new(MemoryVault::new()),
/// )?;
///
/// engine.toggle_periodic_capture(true)?;
/// let ts = engine.capture_now().await?;
/// let jpeg = engine.image(ts).await?;
///
/// engine.shutdown().await?;
/// ```
pub struct RewinderEngine {
    settings: EngineSettings,
    config: Arc<ConfigStore>,
    encryption: Arc<EncryptionManager>,
    store: Arc<ImageStore>,
    scheduler: CaptureScheduler,
    query: Arc<QueryService>,
    /// Serializes source toggles so flag and source state move together
    toggles: Mutex<()>,
}

impl RewinderEngine {
    // ═══════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════

    /// Open the data directory and wire every component. Must be called
    /// from inside a tokio runtime.
    pub fn start(
        settings: EngineSettings,
        frames: Arc<dyn FrameSource>,
        hook: Arc<dyn InputHook>,
        vault: Arc<dyn SecretVault>,
    ) -> EngineResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| EngineError::Task(format!("engine must be started inside a tokio runtime: {e}")))?;

        std::fs::create_dir_all(&settings.data_dir).map_err(StorageError::from)?;

        let config = Arc::new(ConfigStore::load_or_create(&settings.data_dir)?);

        let encryption = Arc::new(EncryptionManager::new(
            Arc::clone(&config),
            CredentialManager::new(vault),
            settings.kdf,
            &settings.keyring_service,
            &settings.keyring_account,
        ));
        encryption.restore()?;

        let store = Arc::new(ImageStore::open(&settings.data_dir)?);

        let pipeline = Arc::new(CapturePipeline::new(
            frames,
            FrameEncoder::new(settings.jpeg_quality, settings.thumbnail_size),
            Arc::clone(&encryption),
            Arc::clone(&store),
        )?);

        let scheduler = CaptureScheduler::start(
            runtime,
            pipeline,
            hook,
            settings.capture_interval,
            settings.queue_depth,
        );

        let query = Arc::new(QueryService::new(Arc::clone(&store), Arc::clone(&encryption)));

        let engine = Self {
            settings,
            config,
            encryption,
            store,
            scheduler,
            query,
            toggles: Mutex::new(()),
        };

        if engine.settings.arm_sources {
            engine.arm_from_config()?;
        }

        log::info!(
            "Rewinder {} started at {} ({:?})",
            crate::VERSION,
            engine.settings.data_dir.display(),
            engine.config.snapshot()
        );
        Ok(engine)
    }

    fn arm_from_config(&self) -> EngineResult<()> {
        let _guard = self.toggles.lock();
        let config = self.config.snapshot();

        if config.periodic_capture_enabled {
            self.scheduler.arm_periodic();
        }

        if config.click_event_enabled {
            if let Err(e) = self.scheduler.arm_click() {
                log::warn!("{e}, click capture disabled");
                self.config.set(Toggle::ClickEvent, false)?;
            }
        }

        Ok(())
    }

    /// Stop both sources, let an in-flight capture finish, and shred
    /// decrypted view copies
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.scheduler.shutdown().await?;

        let query = Arc::clone(&self.query);
        let purged = tokio::task::spawn_blocking(move || query.purge_views()).await??;
        if purged > 0 {
            log::debug!("Shredded {purged} view copies");
        }

        log::info!("Rewinder engine stopped");
        Ok(())
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn data_dir(&self) -> &Path {
        &self.settings.data_dir
    }

    // ═══════════════════════════════════════════════════════════════════════
    // STATUS & TOGGLES
    // ═══════════════════════════════════════════════════════════════════════

    pub fn config(&self) -> CaptureConfig {
        self.config.snapshot()
    }

    pub fn encryption_status(&self) -> bool {
        self.encryption.status()
    }

    pub fn periodic_capture_status(&self) -> bool {
        self.config.get(Toggle::PeriodicCapture)
    }

    pub fn click_event_status(&self) -> bool {
        self.config.get(Toggle::ClickEvent)
    }

    pub fn periodic_source_state(&self) -> SourceState {
        self.scheduler.periodic_state()
    }

    pub fn click_source_state(&self) -> SourceState {
        self.scheduler.click_state()
    }

    /// Fails with `NoCredential` when enabling without stored credentials.
    /// The first enable derives keys, so it runs on a blocking thread.
    pub async fn toggle_encryption(&self, enable: bool) -> EngineResult<bool> {
        let encryption = Arc::clone(&self.encryption);
        Ok(tokio::task::spawn_blocking(move || encryption.toggle(enable)).await??)
    }

    pub fn toggle_periodic_capture(&self, enable: bool) -> EngineResult<bool> {
        let _guard = self.toggles.lock();

        self.config.set(Toggle::PeriodicCapture, enable)?;
        if self.settings.arm_sources {
            if enable {
                self.scheduler.arm_periodic();
            } else {
                self.scheduler.disarm_periodic();
            }
        }
        Ok(enable)
    }

    /// Registers with the input hook before persisting, so a failed
    /// registration leaves the flag off
    pub fn toggle_click_event(&self, enable: bool) -> EngineResult<bool> {
        let _guard = self.toggles.lock();

        if self.settings.arm_sources {
            if enable {
                self.scheduler.arm_click()?;
            } else {
                self.scheduler.disarm_click();
            }
        }

        if let Err(e) = self.config.set(Toggle::ClickEvent, enable) {
            if enable && self.settings.arm_sources {
                self.scheduler.disarm_click();
            }
            return Err(e.into());
        }
        Ok(enable)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CAPTURE
    // ═══════════════════════════════════════════════════════════════════════

    /// Queue a trigger behind the capture worker
    pub fn submit(&self, kind: TriggerKind) -> SubmitOutcome {
        self.scheduler.submit(kind)
    }

    /// Capture immediately and return the new timestamp. Serialized with
    /// scheduled captures; refused after shutdown.
    pub async fn capture_now(&self) -> EngineResult<i64> {
        self.scheduler.capture_now().await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn image(&self, timestamp: i64) -> EngineResult<ImageAnswer> {
        let query = Arc::clone(&self.query);
        Ok(tokio::task::spawn_blocking(move || query.lookup(timestamp)).await??)
    }

    pub async fn thumbnail(&self, timestamp: i64) -> EngineResult<ImageAnswer> {
        let query = Arc::clone(&self.query);
        Ok(tokio::task::spawn_blocking(move || query.lookup_thumbnail(timestamp)).await??)
    }

    /// Base64 (standard alphabet) of the JPEG at `timestamp`
    pub async fn image_base64(&self, timestamp: i64) -> EngineResult<Option<String>> {
        Ok(self
            .image(timestamp)
            .await?
            .into_option()
            .map(|bytes| STANDARD.encode(bytes)))
    }

    pub async fn thumbnail_base64(&self, timestamp: i64) -> EngineResult<Option<String>> {
        Ok(self
            .thumbnail(timestamp)
            .await?
            .into_option()
            .map(|bytes| STANDARD.encode(bytes)))
    }

    pub async fn image_path(&self, timestamp: i64) -> EngineResult<PathAnswer> {
        let query = Arc::clone(&self.query);
        Ok(tokio::task::spawn_blocking(move || query.lookup_path(timestamp)).await??)
    }

    pub async fn clear_image_history(&self) -> EngineResult<usize> {
        let query = Arc::clone(&self.query);
        Ok(tokio::task::spawn_blocking(move || query.clear_history()).await??)
    }

    /// Newest first
    pub async fn list_timestamps(&self, limit: usize) -> EngineResult<Vec<i64>> {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || store.timestamps(limit)).await??)
    }

    pub async fn stats(&self) -> EngineResult<StoreStats> {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || store.stats()).await??)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CREDENTIALS
    // ═══════════════════════════════════════════════════════════════════════

    /// Store a user secret. Returns the fingerprint of the derived key.
    pub async fn store_credentials(&self, secret: Vec<u8>) -> EngineResult<String> {
        let encryption = Arc::clone(&self.encryption);
        let secret = zeroize::Zeroizing::new(secret);
        Ok(tokio::task::spawn_blocking(move || encryption.install_secret(&secret)).await??)
    }

    /// Generate and store a random secret. Returns the key fingerprint.
    pub async fn generate_credentials(&self) -> EngineResult<String> {
        let encryption = Arc::clone(&self.encryption);
        Ok(tokio::task::spawn_blocking(move || encryption.install_generated()).await??)
    }

    /// Delete stored credentials and switch encryption off. Encrypted
    /// captures stay on disk but cannot be opened until the same secret
    /// is stored again.
    ///
    /// This is the one place `encryption_enabled` changes without an
    /// explicit toggle: leaving it on with no credential would make every
    /// later capture fail with `NoCredential`.
    pub async fn delete_credentials(&self) -> EngineResult<()> {
        let encryption = Arc::clone(&self.encryption);
        let query = Arc::clone(&self.query);

        tokio::task::spawn_blocking(move || -> EngineResult<()> {
            encryption.forget()?;
            query.purge_views()?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    /// Fingerprint of the currently loaded key
    pub fn key_id(&self) -> Option<String> {
        self.encryption.key_id()
    }
}
