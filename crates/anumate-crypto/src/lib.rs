//! Anumate Crypto - Cryptographic primitives for the control plane
//!
//! This crate provides:
//! - Ed25519 key generation and management
//! - Digital signatures over canonical bytes
//! - SHA-256 hashing
//! - Canonical JSON serialization (deterministic key order, compact form)
//! - URL-safe base64 helpers
//!
//! # Security Invariant
//!
//! Signing keys are loaded once at startup and never serialized into logs,
//! events, or API responses.

pub mod keys;
pub mod signature;
pub mod hash;
pub mod canonical;

pub use keys::*;
pub use signature::*;
pub use hash::*;
pub use canonical::*;

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Canonicalization failed: {0}")]
    CanonicalizationFailed(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
