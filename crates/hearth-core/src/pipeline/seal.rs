//! Encryption and decryption pipeline stages
//!
//! The encrypted frame is the outermost wire layer: `len(cipher) | cipher`,
//! where `cipher` is an ephemeral X25519 public key followed by a
//! ChaCha20-Poly1305 sealed box over the signed frame. The box key is
//! derived per frame as SHA-256(shared secret ‖ ephemeral key ‖ recipient
//! key), so only the holder of the recipient's static secret can open it.
//! The key is fresh for every frame; the zero nonce is never reused.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use super::framing::{read_chunk, write_chunk};
use crate::errors::CryptoError;
use crate::Result;

/// X25519 public key length in bytes
const EPHEMERAL_KEY_SIZE: usize = 32;

fn derive_frame_key(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(shared);
    hasher.update(ephemeral);
    hasher.update(recipient);
    hasher.finalize().into()
}

// ----------------------------------------------------------------------------
// Encrypter
// ----------------------------------------------------------------------------

/// Outbound stage: seals a signed frame to the recipient's static key
pub struct Encrypter {
    recipient_key: PublicKey,
}

impl Encrypter {
    pub fn new(recipient_seal_key: [u8; 32]) -> Self {
        Self {
            recipient_key: PublicKey::from(recipient_seal_key),
        }
    }

    /// Produce an encrypted frame over `plaintext`
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral).to_bytes();

        let shared = ephemeral.diffie_hellman(&self.recipient_key);
        if !shared.was_contributory() {
            return Err(CryptoError::EncryptionFailed.into());
        }

        let key = derive_frame_key(
            shared.as_bytes(),
            &ephemeral_public,
            &self.recipient_key.to_bytes(),
        );
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let sealed = cipher
            .encrypt(Nonce::from_slice(&[0u8; 12]), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut body = Vec::with_capacity(EPHEMERAL_KEY_SIZE + sealed.len());
        body.extend_from_slice(&ephemeral_public);
        body.extend_from_slice(&sealed);

        let mut frame = Vec::with_capacity(4 + body.len());
        write_chunk(&mut frame, &body)?;
        Ok(frame)
    }
}

// ----------------------------------------------------------------------------
// Decrypter
// ----------------------------------------------------------------------------

/// Inbound stage: opens an encrypted frame with the local static secret
pub struct Decrypter {
    secret: StaticSecret,
}

impl Decrypter {
    pub fn new(sealing_secret: StaticSecret) -> Self {
        Self {
            secret: sealing_secret,
        }
    }

    /// Decrypt an encrypted frame, returning the signed frame inside
    pub fn decrypt(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let mut cursor = frame;
        let body = read_chunk(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(CryptoError::MalformedFrame {
                reason: "trailing bytes after ciphertext".to_string(),
            }
            .into());
        }
        if body.len() < EPHEMERAL_KEY_SIZE {
            return Err(CryptoError::MalformedFrame {
                reason: "ciphertext shorter than ephemeral key".to_string(),
            }
            .into());
        }

        let (ephemeral_bytes, sealed) = body.split_at(EPHEMERAL_KEY_SIZE);
        let ephemeral_public: [u8; 32] =
            ephemeral_bytes.try_into().expect("32-byte slice");

        let shared = self.secret.diffie_hellman(&PublicKey::from(ephemeral_public));
        if !shared.was_contributory() {
            return Err(CryptoError::DecryptionFailed.into());
        }

        let recipient_public = PublicKey::from(&self.secret).to_bytes();
        let key = derive_frame_key(shared.as_bytes(), &ephemeral_public, &recipient_public);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));

        cipher
            .decrypt(Nonce::from_slice(&[0u8; 12]), sealed)
            .map_err(|_| CryptoError::DecryptionFailed.into())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Encrypter, Decrypter) {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret).to_bytes();
        (Encrypter::new(public), Decrypter::new(secret))
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let (encrypter, decrypter) = pair();
        let plaintext = b"set thermostat to 21C";

        let frame = encrypter.encrypt(plaintext).unwrap();
        assert_ne!(frame.as_slice(), plaintext.as_slice());

        let recovered = decrypter.decrypt(&frame).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn test_wrong_recipient_cannot_decrypt() {
        let (encrypter, _) = pair();
        let (_, wrong_decrypter) = pair();

        let frame = encrypter.encrypt(b"secret").unwrap();
        assert!(wrong_decrypter.decrypt(&frame).is_err());
    }

    #[test]
    fn test_ciphertext_bit_flip_fails() {
        let (encrypter, decrypter) = pair();
        let frame = encrypter.encrypt(b"hallway motion detected").unwrap();

        // Flip one bit inside the sealed box (past prefix and ephemeral key)
        let mut tampered = frame.clone();
        let idx = 4 + EPHEMERAL_KEY_SIZE + 1;
        tampered[idx] ^= 0x80;
        assert!(decrypter.decrypt(&tampered).is_err());
    }

    #[test]
    fn test_fresh_ephemeral_per_frame() {
        let (encrypter, _) = pair();
        let a = encrypter.encrypt(b"same plaintext").unwrap();
        let b = encrypter.encrypt(b"same plaintext").unwrap();
        assert_ne!(a, b);
    }
}
