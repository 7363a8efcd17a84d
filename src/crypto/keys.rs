//! Rewinder - Key Management
//!
//! Derives the sealing key hierarchy from credential material.
//!
//! ```text
//! secret ──Argon2id(salt)──► seed(64) ──HKDF──► master
//!                                               ├─► images_key ──HKDF(ts)──► per-record image key
//!                                               ├─► thumbs_key ──HKDF(ts)──► per-record thumbnail key
//!                                               └─► check_key  ──HMAC──────► key fingerprint
//! ```

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::config::KdfParams;
use crate::error::EncryptionError;

/// Key length for AES-256 / XChaCha20
pub const KEY_LEN: usize = 32;

/// Nonce length for AES-GCM
pub const NONCE_LEN: usize = 12;

/// Nonce length for XChaCha20
pub const XCHACHA_NONCE_LEN: usize = 24;

/// Length of the Argon2id output feeding HKDF
const SEED_LEN: usize = 64;

/// HKDF contexts for key derivation
pub mod contexts {
    /// Root of the hierarchy
    pub const MASTER: &[u8] = b"REWINDER:MASTER:v1";

    /// Full-size capture keys
    pub const IMAGES: &[u8] = b"REWINDER:IMAGES:v1";

    /// Thumbnail keys
    pub const THUMBS: &[u8] = b"REWINDER:THUMBS:v1";

    /// Fingerprint key
    pub const CHECK: &[u8] = b"REWINDER:CHECK:v1";

    /// Per-record derivation
    pub const RECORD: &[u8] = b"REWINDER:RECORD:v1";

    /// Label MACed to produce the key fingerprint
    pub const KEY_ID: &[u8] = b"REWINDER:KEY-ID:v1";
}

/// Secret key bytes, zeroized on drop
pub struct SealKey {
    inner: Secret<[u8; KEY_LEN]>,
}

impl SealKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: Secret::new(bytes),
        }
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.inner.expose_secret()
    }

    /// Generate a random key
    #[cfg(test)]
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(bytes)
    }
}

/// Derived keys for one credential
pub struct KeyManager {
    images_key: SealKey,
    thumbs_key: SealKey,
    key_id: String,
}

impl KeyManager {
    /// Stretch a credential secret with Argon2id and build the hierarchy from it
    pub fn from_secret(secret: &[u8], salt: &[u8], params: &KdfParams) -> Result<Self, EncryptionError> {
        let argon_params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            Some(SEED_LEN),
        )
        .map_err(|e| EncryptionError::KeyDerivation(e.to_string()))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

        let mut seed = Zeroizing::new([0u8; SEED_LEN]);
        argon2
            .hash_password_into(secret, salt, &mut *seed)
            .map_err(|e| EncryptionError::KeyDerivation(e.to_string()))?;

        Self::from_seed(&*seed)
    }

    /// Build the hierarchy from an already stretched seed
    pub fn from_seed(seed: &[u8]) -> Result<Self, EncryptionError> {
        if seed.len() < KEY_LEN {
            return Err(EncryptionError::KeyDerivation(format!(
                "seed too short: expected at least {KEY_LEN} bytes, got {}",
                seed.len()
            )));
        }

        let master = derive_key(seed, b"", contexts::MASTER)?;
        let images_key = derive_key(master.expose(), b"images", contexts::IMAGES)?;
        let thumbs_key = derive_key(master.expose(), b"thumbs", contexts::THUMBS)?;
        let check_key = derive_key(master.expose(), b"check", contexts::CHECK)?;
        let key_id = fingerprint(&check_key)?;

        Ok(Self {
            images_key,
            thumbs_key,
            key_id,
        })
    }

    /// Fingerprint recorded on every sealed capture
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Unique key for the full image captured at `timestamp`
    pub fn record_key(&self, timestamp: i64) -> Result<SealKey, EncryptionError> {
        derive_key(self.images_key.expose(), &timestamp.to_be_bytes(), contexts::RECORD)
    }

    /// Unique key for the thumbnail captured at `timestamp`
    pub fn thumb_key(&self, timestamp: i64) -> Result<SealKey, EncryptionError> {
        derive_key(self.thumbs_key.expose(), &timestamp.to_be_bytes(), contexts::RECORD)
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Derive a key using HKDF-SHA256
pub fn derive_key(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<SealKey, EncryptionError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; KEY_LEN];

    hk.expand(info, &mut okm)
        .map_err(|e| EncryptionError::KeyDerivation(e.to_string()))?;

    Ok(SealKey::new(okm))
}

/// Deterministic Argon2 salt for one keyring entry: SHA-256(service || "::" || account)
pub fn credential_salt(service: &str, account: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(service.as_bytes());
    hasher.update(b"::");
    hasher.update(account.as_bytes());
    hasher.finalize().to_vec()
}

fn fingerprint(check_key: &SealKey) -> Result<String, EncryptionError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(check_key.expose())
        .map_err(|e| EncryptionError::KeyDerivation(e.to_string()))?;
    mac.update(contexts::KEY_ID);
    let tag = mac.finalize().into_bytes();
    Ok(hex::encode(&tag[..8]))
}

/// Generate a random nonce for AES-GCM
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    use rand::RngCore;
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Generate a random nonce for XChaCha20
pub fn generate_xchacha_nonce() -> [u8; XCHACHA_NONCE_LEN] {
    use rand::RngCore;
    let mut nonce = [0u8; XCHACHA_NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}
