//! Digital signatures for Anumate

use crate::{verifying_key_from_hex, CryptoError, CryptoResult, Keypair};
use ed25519_dalek::{Signature as Ed25519Signature, Signer, Verifier};

/// Sign a message, returning the 64-byte signature hex encoded
pub fn sign(keypair: &Keypair, message: &[u8]) -> String {
    let signature = keypair.signing_key().sign(message);
    hex::encode(signature.to_bytes())
}

/// Verify a hex-encoded signature against a hex-encoded public key
pub fn verify_signature(
    public_key_hex: &str,
    message: &[u8],
    signature_hex: &str,
) -> CryptoResult<()> {
    let verifying_key = verifying_key_from_hex(public_key_hex)?;

    let signature_bytes: [u8; 64] = hex::decode(signature_hex)
        .map_err(|e| CryptoError::VerificationFailed(format!("invalid signature hex: {e}")))?
        .try_into()
        .map_err(|_| CryptoError::VerificationFailed("signature must be 64 bytes".to_string()))?;

    let signature = Ed25519Signature::from_bytes(&signature_bytes);

    verifying_key
        .verify(message, &signature)
        .map_err(|e| CryptoError::VerificationFailed(e.to_string()))
}

/// Signable trait for types that expose deterministic bytes to sign
pub trait Signable {
    /// Get the bytes to sign
    fn signable_bytes(&self) -> CryptoResult<Vec<u8>>;
}

/// Sign any Signable type
pub fn sign_item<T: Signable>(keypair: &Keypair, item: &T) -> CryptoResult<String> {
    Ok(sign(keypair, &item.signable_bytes()?))
}

/// Verify a signature on any Signable type
pub fn verify_item<T: Signable>(
    public_key_hex: &str,
    item: &T,
    signature_hex: &str,
) -> CryptoResult<()> {
    verify_signature(public_key_hex, &item.signable_bytes()?, signature_hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let kp = Keypair::generate();
        let message = b"execution receipt";
        let sig = sign(&kp, message);
        assert!(verify_signature(&kp.public_key_hex(), message, &sig).is_ok());
    }

    #[test]
    fn test_wrong_message_fails() {
        let kp = Keypair::generate();
        let sig = sign(&kp, b"original");
        assert!(verify_signature(&kp.public_key_hex(), b"tampered", &sig).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let kp1 = Keypair::generate();
        let kp2 = Keypair::generate();
        let message = b"payload";
        let sig = sign(&kp1, message);
        assert!(verify_signature(&kp2.public_key_hex(), message, &sig).is_err());
    }

    #[test]
    fn test_flipped_byte_fails() {
        let kp = Keypair::generate();
        let message = b"payload";
        let sig = sign(&kp, message);

        let mut bytes = hex::decode(&sig).unwrap();
        bytes[0] ^= 0x01;
        let tampered = hex::encode(bytes);

        assert!(verify_signature(&kp.public_key_hex(), message, &tampered).is_err());
    }
}
