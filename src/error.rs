//! Rewinder - Error Types
//!
//! One enum per component. Not-found is never an error: lookups return
//! `Option`/`ImageAnswer` for absent timestamps.

use thiserror::Error;

/// Result type for engine-level operations
pub type EngineResult<T> = Result<T, EngineError>;

// ═══════════════════════════════════════════════════════════════
// STORAGE ERRORS
// ═══════════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("A capture is already stored at timestamp {0}")]
    DuplicateTimestamp(i64),

    #[error("Blob for timestamp {timestamp} is missing: {path}")]
    MissingBlob { timestamp: i64, path: String },

    #[error("Clear failed, history left unchanged: {0}")]
    ClearFailed(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════
// CREDENTIAL ERRORS
// ═══════════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Secret store error: {0}")]
    Vault(String),

    #[error("Refusing to store an empty secret")]
    EmptySecret,
}

// ═══════════════════════════════════════════════════════════════
// CONFIG ERRORS
// ═══════════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to persist config to {path}: {reason}")]
    Persist { path: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Serialization(e.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════
// ENCRYPTION ERRORS
// ═══════════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("No credential available - store credentials before enabling encryption")]
    NoCredential,

    #[error("Decryption failed: {0}")]
    DecryptFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EncryptionError {
    /// Errors that mean "this record cannot be opened with what we hold"
    pub fn is_decrypt_failure(&self) -> bool {
        matches!(self, EncryptionError::DecryptFailed(_))
    }
}

// ═══════════════════════════════════════════════════════════════
// CAPTURE ERRORS
// ═══════════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Frame encoding failed: {0}")]
    EncodeFailed(String),

    #[error("Storage write failed: {0}")]
    StorageWriteFailed(#[source] StorageError),

    #[error("Capture could not be sealed: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Capture engine has shut down")]
    Stopped,
}

impl From<image::ImageError> for CaptureError {
    fn from(e: image::ImageError) -> Self {
        CaptureError::EncodeFailed(e.to_string())
    }
}

/// The platform input hook refused a registration
#[derive(Error, Debug)]
#[error("Input hook registration failed: {0}")]
pub struct HookError(pub String);

// ═══════════════════════════════════════════════════════════════
// QUERY ERRORS
// ═══════════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("{0}")]
    DecryptFailed(#[source] EncryptionError),

    #[error("Storage read failed: {0}")]
    StorageReadFailed(#[from] StorageError),
}

impl From<EncryptionError> for QueryError {
    fn from(e: EncryptionError) -> Self {
        QueryError::DecryptFailed(e)
    }
}

// ═══════════════════════════════════════════════════════════════
// ENGINE ERRORS
// ═══════════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        EngineError::Task(e.to_string())
    }
}
