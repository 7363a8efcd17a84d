//! Rewinder - Encryption Manager
//!
//! Derives sealing keys from the stored credential and owns the
//! encrypted-at-rest toggle. Every record carries its own `encrypted` flag,
//! so turning encryption off never touches history.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{ConfigStore, KdfParams, Toggle};
use crate::credentials::CredentialManager;
use crate::crypto::{
    credential_salt, decrypt_aes_gcm, decrypt_xchacha, encrypt_aes_gcm, encrypt_xchacha,
    EncryptedData, KeyManager,
};
use crate::error::EncryptionError;

/// Which stored blob of a capture is being sealed or opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Image,
    Thumbnail,
}

/// Mode a capture runs in, fixed when the capture starts
#[derive(Debug, Clone)]
pub enum SealMode {
    Plain,
    Sealed(Arc<KeyManager>),
}

impl SealMode {
    pub fn is_sealed(&self) -> bool {
        matches!(self, SealMode::Sealed(_))
    }
}

/// Encrypted-at-rest state machine
pub struct EncryptionManager {
    config: Arc<ConfigStore>,
    credentials: CredentialManager,
    kdf: KdfParams,
    salt: Vec<u8>,
    /// Cached key for the current credential. Toggles take the write side,
    /// captures snapshot under the read side.
    keys: RwLock<Option<Arc<KeyManager>>>,
}

impl EncryptionManager {
    pub fn new(
        config: Arc<ConfigStore>,
        credentials: CredentialManager,
        kdf: KdfParams,
        keyring_service: &str,
        keyring_account: &str,
    ) -> Self {
        Self {
            config,
            credentials,
            kdf,
            salt: credential_salt(keyring_service, keyring_account),
            keys: RwLock::new(None),
        }
    }

    /// Reconcile persisted state at startup. A persisted `encryption_enabled`
    /// is switched off when the credential is missing or cannot be read, so
    /// an unreachable keyring never blocks plaintext history.
    pub fn restore(&self) -> Result<(), EncryptionError> {
        if !self.status() {
            return Ok(());
        }

        let mut keys = self.keys.write();
        match self.derive_current() {
            Ok(Some(km)) => {
                log::info!("Encryption active with key {}", km.key_id());
                *keys = Some(km);
            }
            Ok(None) => {
                log::warn!("Encryption was enabled but no credential was found, disabling encryption");
                self.config.set(Toggle::Encryption, false)?;
            }
            Err(e) => {
                log::warn!("Encryption was enabled but the credential could not be loaded ({e}), disabling encryption");
                self.config.set(Toggle::Encryption, false)?;
            }
        }
        Ok(())
    }

    pub fn status(&self) -> bool {
        self.config.get(Toggle::Encryption)
    }

    /// Turn encryption on or off. Returns the resulting state.
    pub fn toggle(&self, enable: bool) -> Result<bool, EncryptionError> {
        let mut keys = self.keys.write();

        if enable && keys.is_none() {
            let km = self.derive_current()?.ok_or(EncryptionError::NoCredential)?;
            *keys = Some(km);
        }

        self.config.set(Toggle::Encryption, enable)?;
        Ok(enable)
    }

    /// Store a new credential and cache its key. Encryption state is unchanged.
    pub fn install_secret(&self, secret: &[u8]) -> Result<String, EncryptionError> {
        let mut keys = self.keys.write();

        let handle = self.credentials.store(secret)?;
        let km = Arc::new(KeyManager::from_secret(handle.secret(), &self.salt, &self.kdf)?);
        let key_id = km.key_id().to_string();
        *keys = Some(km);

        log::info!("Sealing key {key_id} installed");
        Ok(key_id)
    }

    /// Generate a random credential and cache its key
    pub fn install_generated(&self) -> Result<String, EncryptionError> {
        let mut keys = self.keys.write();

        let handle = self.credentials.generate()?;
        let km = Arc::new(KeyManager::from_secret(handle.secret(), &self.salt, &self.kdf)?);
        let key_id = km.key_id().to_string();
        *keys = Some(km);

        log::info!("Sealing key {key_id} generated");
        Ok(key_id)
    }

    /// Delete the credential, drop the cached key and switch encryption off.
    /// Encryption cannot stay on without a credential, so the flag is
    /// cleared here rather than by a separate toggle.
    pub fn forget(&self) -> Result<(), EncryptionError> {
        let mut keys = self.keys.write();

        self.credentials.delete()?;
        *keys = None;
        self.config.set(Toggle::Encryption, false)?;
        Ok(())
    }

    /// Snapshot of the mode a capture starting now must use
    pub fn seal_mode(&self) -> Result<SealMode, EncryptionError> {
        let keys = self.keys.read();

        if !self.status() {
            return Ok(SealMode::Plain);
        }

        keys.as_ref()
            .map(|km| SealMode::Sealed(Arc::clone(km)))
            .ok_or(EncryptionError::NoCredential)
    }

    /// Seal one blob of the capture at `timestamp`
    pub fn seal(
        keys: &KeyManager,
        kind: BlobKind,
        timestamp: i64,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, EncryptionError> {
        let sealed = match kind {
            BlobKind::Image => encrypt_aes_gcm(&keys.record_key(timestamp)?, timestamp, plaintext)?,
            BlobKind::Thumbnail => encrypt_xchacha(&keys.thumb_key(timestamp)?, timestamp, plaintext)?,
        };
        Ok(sealed.to_bytes())
    }

    /// Open a sealed blob. Fails with `DecryptFailed` when no credential is
    /// held or the blob was sealed under another one.
    pub fn unseal(
        &self,
        kind: BlobKind,
        timestamp: i64,
        key_id: Option<&str>,
        sealed: &[u8],
    ) -> Result<Vec<u8>, EncryptionError> {
        let keys = self.reading_key()?;

        if let Some(expected) = key_id {
            if expected != keys.key_id() {
                return Err(EncryptionError::DecryptFailed(format!(
                    "capture {timestamp} was sealed with key {expected}, current credential is {}",
                    keys.key_id()
                )));
            }
        }

        match kind {
            BlobKind::Image => {
                let encrypted = EncryptedData::from_bytes_aes(sealed)?;
                decrypt_aes_gcm(&keys.record_key(timestamp)?, timestamp, &encrypted)
            }
            BlobKind::Thumbnail => {
                let encrypted = EncryptedData::from_bytes_xchacha(sealed)?;
                decrypt_xchacha(&keys.thumb_key(timestamp)?, timestamp, &encrypted)
            }
        }
    }

    /// Fingerprint of the cached key, if any
    pub fn key_id(&self) -> Option<String> {
        self.keys.read().as_ref().map(|km| km.key_id().to_string())
    }

    /// Key for opening history. Encryption may be off while sealed records
    /// still exist, so the credential is loaded lazily.
    fn reading_key(&self) -> Result<Arc<KeyManager>, EncryptionError> {
        if let Some(km) = self.keys.read().as_ref() {
            return Ok(Arc::clone(km));
        }

        let mut keys = self.keys.write();
        if let Some(km) = keys.as_ref() {
            return Ok(Arc::clone(km));
        }

        let km = self
            .derive_current()
            .map_err(|e| EncryptionError::DecryptFailed(e.to_string()))?
            .ok_or_else(|| {
                EncryptionError::DecryptFailed("no credential available to open this capture".into())
            })?;
        *keys = Some(Arc::clone(&km));
        Ok(km)
    }

    fn derive_current(&self) -> Result<Option<Arc<KeyManager>>, EncryptionError> {
        match self.credentials.fetch()? {
            Some(handle) => {
                let km = KeyManager::from_secret(handle.secret(), &self.salt, &self.kdf)?;
                Ok(Some(Arc::new(km)))
            }
            None => Ok(None),
        }
    }
}
