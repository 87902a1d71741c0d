//! Signing and verification pipeline stages
//!
//! The signed frame is `len(data) | data | len(signature) | signature`, an
//! Ed25519 signature over the data bytes. Verification recovers the data or
//! fails; a failure indicates corruption or spoofing and is fatal for the
//! connection that produced the frame.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use super::framing::{read_chunk, write_chunk};
use crate::errors::CryptoError;
use crate::Result;

/// Ed25519 signature length in bytes
pub const SIGNATURE_SIZE: usize = 64;

// ----------------------------------------------------------------------------
// Signature Generator
// ----------------------------------------------------------------------------

/// Outbound stage: wraps payload bytes in a signed frame
pub struct SignatureGenerator {
    signing_key: SigningKey,
}

impl SignatureGenerator {
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Produce a signed frame over `data`
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let signature = self.signing_key.sign(data).to_bytes();

        let mut frame = Vec::with_capacity(4 + data.len() + 4 + SIGNATURE_SIZE);
        write_chunk(&mut frame, data)?;
        write_chunk(&mut frame, &signature)?;
        Ok(frame)
    }
}

// ----------------------------------------------------------------------------
// Signature Checker
// ----------------------------------------------------------------------------

/// Inbound stage: verifies a signed frame and recovers the payload
pub struct SignatureChecker {
    verifying_key: VerifyingKey,
}

impl SignatureChecker {
    pub fn new(verifying_key: VerifyingKey) -> Self {
        Self { verifying_key }
    }

    /// Verify a signed frame, returning the payload bytes
    pub fn verify(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let mut cursor = frame;
        let data = read_chunk(&mut cursor)?;
        let signature_bytes = read_chunk(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(CryptoError::MalformedFrame {
                reason: "trailing bytes after signature".to_string(),
            }
            .into());
        }

        let signature_bytes: [u8; SIGNATURE_SIZE] =
            signature_bytes.try_into().map_err(|_| {
                CryptoError::MalformedFrame {
                    reason: "signature is not 64 bytes".to_string(),
                }
            })?;
        let signature = Signature::from_bytes(&signature_bytes);

        self.verifying_key
            .verify(data, &signature)
            .map_err(|_| CryptoError::SignatureVerificationFailed)?;

        Ok(data.to_vec())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::{OsRng, RngCore};

    fn keypair() -> (SignatureGenerator, SignatureChecker) {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        let signing_key = SigningKey::from_bytes(&secret);
        let verifying_key = signing_key.verifying_key();
        (
            SignatureGenerator::new(signing_key),
            SignatureChecker::new(verifying_key),
        )
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let (signer, checker) = keypair();
        let data = b"the cellar light is on";

        let frame = signer.sign(data).unwrap();
        assert_ne!(frame.as_slice(), data.as_slice());

        let recovered = checker.verify(&frame).unwrap();
        assert_eq!(recovered, data);
    }

    #[test]
    fn test_bit_flip_fails_verification() {
        let (signer, checker) = keypair();
        let frame = signer.sign(b"unlatch the front door").unwrap();

        for i in 0..frame.len() {
            let mut tampered = frame.clone();
            tampered[i] ^= 0x01;
            assert!(
                checker.verify(&tampered).is_err(),
                "bit flip at byte {i} went undetected"
            );
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let (signer, _) = keypair();
        let (_, wrong_checker) = keypair();

        let frame = signer.sign(b"payload").unwrap();
        assert!(wrong_checker.verify(&frame).is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let (signer, checker) = keypair();
        let mut frame = signer.sign(b"payload").unwrap();
        frame.push(0);
        assert!(checker.verify(&frame).is_err());
    }
}
