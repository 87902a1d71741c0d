//! Device certificates and identity derivation
//!
//! A certificate is the self-signed identity document of a device. It carries
//! two public keys: the Ed25519 verification key used to check message
//! signatures, and the X25519 sealing key other devices encrypt to. The
//! embedded Ed25519 key signs the canonical encoding of both keys plus the
//! issue timestamp.
//!
//! The stable [`DeviceId`] of a device is the SHA-256 digest of its
//! certificate's signature bytes: a pure function of the certificate, equal
//! across calls and across process restarts for byte-identical certificates.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{CryptoError, HandshakeError};
use crate::types::{DeviceId, Timestamp};
use crate::Result;

// ----------------------------------------------------------------------------
// Certificate
// ----------------------------------------------------------------------------

/// Self-signed identity certificate of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// Ed25519 verification key: checks signatures this device produces
    pub sign_key: [u8; 32],
    /// X25519 public key: peers seal message frames to this key
    pub seal_key: [u8; 32],
    /// Issue timestamp, diagnostics only
    pub issued_at: Timestamp,
    /// Ed25519 self-signature over the canonical encoding
    #[serde(with = "signature_serde")]
    signature: [u8; 64],
}

impl Certificate {
    /// Issue a new self-signed certificate from the device's signing key and
    /// sealing public key
    pub fn issue(signing_key: &SigningKey, seal_key: [u8; 32], issued_at: Timestamp) -> Self {
        let sign_key = signing_key.verifying_key().to_bytes();
        let canonical = Self::canonical_bytes(&sign_key, &seal_key, issued_at);
        let signature = signing_key.sign(&canonical).to_bytes();

        Self {
            sign_key,
            seal_key,
            issued_at,
            signature,
        }
    }

    /// Check the self-signature
    pub fn verify(&self) -> Result<()> {
        let verifying_key = VerifyingKey::from_bytes(&self.sign_key)
            .map_err(|_| CryptoError::InvalidKeyFormat)?;
        let canonical = Self::canonical_bytes(&self.sign_key, &self.seal_key, self.issued_at);
        let signature = Signature::from_bytes(&self.signature);

        verifying_key
            .verify(&canonical, &signature)
            .map_err(|_| HandshakeError::InvalidPeerCertificate)?;
        Ok(())
    }

    /// Derive the stable device identifier from the signature bytes
    pub fn device_id(&self) -> DeviceId {
        let mut hasher = Sha256::new();
        hasher.update(self.signature);
        let digest = hasher.finalize();

        let mut id = [0u8; 32];
        id.copy_from_slice(&digest);
        DeviceId::new(id)
    }

    /// The Ed25519 verification key as a dalek type
    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_bytes(&self.sign_key)
            .map_err(|_| CryptoError::InvalidKeyFormat.into())
    }

    /// Serialize to bytes for storage or the wire
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Raw signature bytes
    pub fn signature_bytes(&self) -> &[u8; 64] {
        &self.signature
    }

    fn canonical_bytes(sign_key: &[u8; 32], seal_key: &[u8; 32], issued_at: Timestamp) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(32 + 32 + 8);
        bytes.extend_from_slice(sign_key);
        bytes.extend_from_slice(seal_key);
        bytes.extend_from_slice(&issued_at.as_millis().to_be_bytes());
        bytes
    }
}

// ----------------------------------------------------------------------------
// Serde Helpers
// ----------------------------------------------------------------------------

/// Custom serde module for 64-byte signatures
mod signature_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(signature: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        signature.as_slice().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        let vec: Vec<u8> = Vec::deserialize(deserializer)?;
        if vec.len() != 64 {
            return Err(serde::de::Error::custom("signature must be 64 bytes"));
        }
        let mut array = [0u8; 64];
        array.copy_from_slice(&vec);
        Ok(array)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    fn test_certificate() -> Certificate {
        use rand_core::RngCore;

        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        let signing_key = SigningKey::from_bytes(&secret);

        let seal_secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
        let seal_key = x25519_dalek::PublicKey::from(&seal_secret).to_bytes();
        Certificate::issue(&signing_key, seal_key, Timestamp::new(1_700_000_000_000))
    }

    #[test]
    fn test_self_signature_verifies() {
        let cert = test_certificate();
        cert.verify().unwrap();
    }

    #[test]
    fn test_tampered_certificate_fails() {
        let mut cert = test_certificate();
        cert.seal_key[0] ^= 0x01;
        assert!(cert.verify().is_err());
    }

    #[test]
    fn test_device_id_deterministic() {
        let cert = test_certificate();
        let first = cert.device_id();
        let second = cert.device_id();
        assert_eq!(first, second);

        // Byte-identical certificates yield equal IDs after a round trip
        let reloaded = Certificate::from_bytes(&cert.to_bytes().unwrap()).unwrap();
        assert_eq!(reloaded.device_id(), first);
    }

    #[test]
    fn test_issue_is_deterministic_for_fixed_keys() {
        use rand_chacha::rand_core::SeedableRng;
        use rand_core::RngCore;

        let issue_from_seed = || {
            let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(42);
            let mut secret = [0u8; 32];
            rng.fill_bytes(&mut secret);
            let signing_key = SigningKey::from_bytes(&secret);
            let seal_secret = x25519_dalek::StaticSecret::random_from_rng(&mut rng);
            let seal_key = x25519_dalek::PublicKey::from(&seal_secret).to_bytes();
            Certificate::issue(&signing_key, seal_key, Timestamp::new(1_000))
        };

        let a = issue_from_seed();
        let b = issue_from_seed();
        assert_eq!(a, b);
        assert_eq!(a.device_id(), b.device_id());
    }

    #[test]
    fn test_distinct_certificates_distinct_ids() {
        let a = test_certificate();
        let b = test_certificate();
        assert_ne!(a.device_id(), b.device_id());
    }
}
