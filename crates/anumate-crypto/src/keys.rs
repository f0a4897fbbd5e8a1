//! Key management for Anumate
//!
//! All signing and verification uses Ed25519. Keys are carried as hex-encoded
//! strings in serialized form; the signing key itself never leaves this type.

use crate::{CryptoError, CryptoResult};
use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// A key pair for signing operations
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Create from a 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Create from a hex-encoded seed
    pub fn from_seed_hex(seed_hex: &str) -> CryptoResult<Self> {
        let bytes: [u8; 32] = hex::decode(seed_hex)
            .map_err(|e| CryptoError::InvalidKeyFormat(format!("invalid seed hex: {e}")))?
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyFormat("seed must be 32 bytes".to_string()))?;
        Ok(Self::from_seed(&bytes))
    }

    /// Get the signing key (private, crate-internal only)
    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Get the verifying key
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Get the public key as a hex string
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().as_bytes())
    }

    /// Get the raw public key bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Get the seed bytes (for secure storage only)
    pub fn seed_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// PKCS#8 DER encoding of the private key, for JWT signing backends
    pub fn pkcs8_der(&self) -> CryptoResult<Vec<u8>> {
        let doc = self
            .signing_key
            .to_pkcs8_der()
            .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

/// Public key reference (safe to share)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    /// Hex-encoded public key
    pub key: String,
    /// Key algorithm
    pub algorithm: KeyAlgorithm,
}

impl PublicKey {
    /// Create from a key pair
    pub fn from_keypair(keypair: &Keypair) -> Self {
        Self {
            key: keypair.public_key_hex(),
            algorithm: KeyAlgorithm::Ed25519,
        }
    }

    /// Parse the verifying key
    pub fn to_verifying_key(&self) -> CryptoResult<VerifyingKey> {
        verifying_key_from_hex(&self.key)
    }
}

/// Parse a hex-encoded Ed25519 public key
pub fn verifying_key_from_hex(key_hex: &str) -> CryptoResult<VerifyingKey> {
    let bytes: [u8; 32] = hex::decode(key_hex)
        .map_err(|e| CryptoError::InvalidKeyFormat(format!("invalid public key hex: {e}")))?
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyFormat("public key must be 32 bytes".to_string()))?;

    VerifyingKey::from_bytes(&bytes).map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))
}

/// Supported key algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    /// Ed25519 (default)
    Ed25519,
}

impl Default for KeyAlgorithm {
    fn default() -> Self {
        Self::Ed25519
    }
}
