//! Rewinder - Cryptographic Core
//!
//! Key hierarchy and AEAD primitives used to seal captures at rest.

pub mod keys;
pub mod aead;

pub use keys::*;
pub use aead::*;
