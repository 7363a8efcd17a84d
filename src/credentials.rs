//! Rewinder - Credential Manager
//!
//! Owns the secret that sealing keys are derived from. The secret itself
//! lives in an external secure store behind [`SecretVault`].

use std::sync::Arc;

use parking_lot::Mutex;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretVec};
use zeroize::Zeroizing;

use crate::error::CredentialError;

/// Length of generated secrets
const GENERATED_SECRET_LEN: usize = 32;

/// External secure storage for a single secret
pub trait SecretVault: Send + Sync {
    /// Current secret, `None` when nothing is stored
    fn read(&self) -> Result<Option<Zeroizing<Vec<u8>>>, CredentialError>;

    /// Store or replace the secret
    fn write(&self, secret: &[u8]) -> Result<(), CredentialError>;

    /// Remove the secret. Removing nothing succeeds.
    fn erase(&self) -> Result<(), CredentialError>;
}

// ─── Platform keyring ────────────────────────────────────────────────────────

/// OS keyring entry (Keychain, Credential Manager, kernel keyutils or
/// Secret Service).
///
/// `os-keyring` is on by default. Without it the `keyring` crate falls back
/// to its in-process mock store, so secrets only live as long as this value.
pub struct KeyringVault {
    entry: keyring::Entry,
    service: String,
    account: String,
}

impl KeyringVault {
    /// Whether stored secrets outlive the process
    pub const PERSISTENT: bool = cfg!(feature = "os-keyring");

    pub fn new(service: &str, account: &str) -> Result<Self, CredentialError> {
        let entry = keyring::Entry::new(service, account)
            .map_err(|e| CredentialError::Vault(format!("failed to create keyring entry: {e}")))?;

        if !Self::PERSISTENT {
            log::warn!("Built without `os-keyring`: credentials are kept in memory only");
        }

        Ok(Self {
            entry,
            service: service.to_string(),
            account: account.to_string(),
        })
    }
}

impl SecretVault for KeyringVault {
    fn read(&self) -> Result<Option<Zeroizing<Vec<u8>>>, CredentialError> {
        match self.entry.get_secret() {
            Ok(secret) if secret.is_empty() => Ok(None),
            Ok(secret) => Ok(Some(Zeroizing::new(secret))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CredentialError::Vault(format!(
                "failed to read {}/{}: {e}",
                self.service, self.account
            ))),
        }
    }

    fn write(&self, secret: &[u8]) -> Result<(), CredentialError> {
        self.entry.set_secret(secret).map_err(|e| {
            CredentialError::Vault(format!("failed to store {}/{}: {e}", self.service, self.account))
        })
    }

    fn erase(&self) -> Result<(), CredentialError> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(CredentialError::Vault(format!(
                "failed to delete {}/{}: {e}",
                self.service, self.account
            ))),
        }
    }
}

// ─── In-memory ───────────────────────────────────────────────────────────────

/// Process-local vault for tests and demos
#[derive(Default)]
pub struct MemoryVault {
    secret: Mutex<Option<Zeroizing<Vec<u8>>>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vault pre-loaded with a known secret
    pub fn with_secret(secret: &[u8]) -> Self {
        Self {
            secret: Mutex::new(Some(Zeroizing::new(secret.to_vec()))),
        }
    }
}

impl SecretVault for MemoryVault {
    fn read(&self) -> Result<Option<Zeroizing<Vec<u8>>>, CredentialError> {
        Ok(self.secret.lock().clone())
    }

    fn write(&self, secret: &[u8]) -> Result<(), CredentialError> {
        *self.secret.lock() = Some(Zeroizing::new(secret.to_vec()));
        Ok(())
    }

    fn erase(&self) -> Result<(), CredentialError> {
        *self.secret.lock() = None;
        Ok(())
    }
}

// ─── Manager ─────────────────────────────────────────────────────────────────

/// Opaque reference to the stored secret
pub struct CredentialHandle {
    secret: SecretVec<u8>,
}

impl CredentialHandle {
    fn new(secret: Vec<u8>) -> Self {
        Self {
            secret: SecretVec::new(secret),
        }
    }

    pub(crate) fn secret(&self) -> &[u8] {
        self.secret.expose_secret()
    }
}

impl std::fmt::Debug for CredentialHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialHandle(..)")
    }
}

/// Store / fetch / delete lifecycle over a [`SecretVault`]
#[derive(Clone)]
pub struct CredentialManager {
    vault: Arc<dyn SecretVault>,
}

impl CredentialManager {
    pub fn new(vault: Arc<dyn SecretVault>) -> Self {
        Self { vault }
    }

    /// Store a user-supplied secret, replacing any previous one
    pub fn store(&self, secret: &[u8]) -> Result<CredentialHandle, CredentialError> {
        if secret.is_empty() {
            return Err(CredentialError::EmptySecret);
        }

        self.vault.write(secret)?;
        log::info!("Credentials stored");
        Ok(CredentialHandle::new(secret.to_vec()))
    }

    /// Generate and store a random secret
    pub fn generate(&self) -> Result<CredentialHandle, CredentialError> {
        let mut secret = Zeroizing::new(vec![0u8; GENERATED_SECRET_LEN]);
        rand::thread_rng().fill_bytes(&mut secret);
        self.store(&secret)
    }

    pub fn fetch(&self) -> Result<Option<CredentialHandle>, CredentialError> {
        Ok(self
            .vault
            .read()?
            .map(|secret| CredentialHandle::new(secret.to_vec())))
    }

    pub fn exists(&self) -> Result<bool, CredentialError> {
        Ok(self.vault.read()?.is_some())
    }

    /// Delete the stored secret. Records sealed with it become unreadable
    /// until the same secret is stored again.
    pub fn delete(&self) -> Result<(), CredentialError> {
        self.vault.erase()?;
        log::warn!("Credentials deleted - encrypted captures are unreadable until they are restored");
        Ok(())
    }
}
