//! # Rewinder
//!
//! Capture-and-retrieval engine for a screen history app: periodic and
//! click-triggered screenshots, stored by timestamp, optionally encrypted
//! at rest.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                       REWINDER ENGINE                       │
//! │  ┌──────────────┐  ┌──────────────┐                         │
//! │  │  PERIODIC    │  │  CLICK HOOK  │   trigger sources       │
//! │  └──────┬───────┘  └──────┬───────┘                         │
//! │         └────────┬────────┘                                 │
//! │          bounded queue (coalescing)                         │
//! │                  │                                          │
//! │  ┌───────────────┴──────────────┐   ┌────────────────────┐  │
//! │  │  CAPTURE PIPELINE            │──▶│ ENCRYPTION MANAGER │  │
//! │  │  frame → JPEG → seal? → put  │   │ Argon2id → HKDF    │  │
//! │  └───────────────┬──────────────┘   │ AES-GCM / XChaCha  │  │
//! │                  │                  └─────────┬──────────┘  │
//! │  ┌───────────────┴──────────────┐             │             │
//! │  │  IMAGE STORE                 │   ┌─────────┴──────────┐  │
//! │  │  SQLite index + blob files   │◀──│  QUERY SERVICE     │  │
//! │  └──────────────────────────────┘   └────────────────────┘  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Captures taken while encryption is on are sealed with per-capture keys
//! - Keys derive from a credential kept in the OS keyring
//! - Each capture records whether it is sealed; toggling never rewrites history
//! - Deleting the credential makes sealed captures unreadable, not missing

pub mod api;
pub mod capture;
pub mod codec;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod encryption;
pub mod error;
pub mod query;
pub mod secure_fs;
pub mod store;

pub use api::RewinderEngine;
#[cfg(feature = "screen")]
pub use capture::PrimaryMonitor;
pub use capture::{FrameSource, InputHook, ManualHook, SourceState, SubmitOutcome, TestPattern, TriggerKind};
pub use config::{CaptureConfig, EngineSettings, KdfParams, Toggle};
pub use credentials::{KeyringVault, MemoryVault, SecretVault};
pub use error::{EngineError, EngineResult};
pub use query::{ImageAnswer, PathAnswer};
pub use store::StoreStats;

/// Rewinder version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
