//! Channel crypto pipeline
//!
//! Four stream stages applied in a fixed order. Outbound, the serialized
//! envelope is signed and the signed frame becomes the plaintext of the
//! outermost encrypted frame; inbound runs the exact inverse,
//! outermost-first: decrypt, then verify.
//!
//! ```text
//! outbound: bytes -> [SignatureGenerator] -> [Encrypter] -> wire
//! inbound:  wire  -> [Decrypter] -> [SignatureChecker] -> bytes
//! ```
//!
//! Every stage is a pure function of its held key material. Verification
//! or decryption failure is fatal for the connection: either the frame was
//! corrupted in transit or someone is tampering, and the two cannot be told
//! apart.

pub mod framing;
pub mod seal;
pub mod sign;

pub use framing::MAX_FRAME_BYTES;
pub use seal::{Decrypter, Encrypter};
pub use sign::{SignatureChecker, SignatureGenerator};

use ed25519_dalek::{SigningKey, VerifyingKey};
use x25519_dalek::StaticSecret;

use crate::Result;

// ----------------------------------------------------------------------------
// Composed Pipelines
// ----------------------------------------------------------------------------

/// Send-side pipeline: sign with the local key, seal to one peer
pub struct OutboundPipeline {
    signer: SignatureGenerator,
    encrypter: Encrypter,
}

impl OutboundPipeline {
    /// Build the outbound stages for a channel to `recipient_seal_key`
    pub fn new(local_signing_key: SigningKey, recipient_seal_key: [u8; 32]) -> Self {
        Self {
            signer: SignatureGenerator::new(local_signing_key),
            encrypter: Encrypter::new(recipient_seal_key),
        }
    }

    /// Transform envelope bytes into a wire frame
    pub fn process(&self, data: &[u8]) -> Result<Vec<u8>> {
        let signed = self.signer.sign(data)?;
        self.encrypter.encrypt(&signed)
    }
}

/// Receive-side pipeline: open with the local secret, verify one peer
pub struct InboundPipeline {
    decrypter: Decrypter,
    checker: SignatureChecker,
}

impl InboundPipeline {
    /// Build the inbound stages for a channel from `peer_verifying_key`
    pub fn new(local_sealing_secret: StaticSecret, peer_verifying_key: VerifyingKey) -> Self {
        Self {
            decrypter: Decrypter::new(local_sealing_secret),
            checker: SignatureChecker::new(peer_verifying_key),
        }
    }

    /// Transform a wire frame back into envelope bytes
    pub fn process(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let signed = self.decrypter.decrypt(frame)?;
        self.checker.verify(&signed)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::{OsRng, RngCore};
    use x25519_dalek::PublicKey;

    struct Endpoint {
        signing_key: SigningKey,
        sealing_secret: StaticSecret,
    }

    impl Endpoint {
        fn new() -> Self {
            let mut secret = [0u8; 32];
            OsRng.fill_bytes(&mut secret);
            Self {
                signing_key: SigningKey::from_bytes(&secret),
                sealing_secret: StaticSecret::random_from_rng(OsRng),
            }
        }

        fn seal_key(&self) -> [u8; 32] {
            PublicKey::from(&self.sealing_secret).to_bytes()
        }
    }

    fn channel(sender: &Endpoint, receiver: &Endpoint) -> (OutboundPipeline, InboundPipeline) {
        (
            OutboundPipeline::new(sender.signing_key.clone(), receiver.seal_key()),
            InboundPipeline::new(
                receiver.sealing_secret.clone(),
                sender.signing_key.verifying_key(),
            ),
        )
    }

    #[test]
    fn test_full_pipeline_round_trip() {
        let alice = Endpoint::new();
        let bob = Endpoint::new();
        let (outbound, inbound) = channel(&alice, &bob);

        let payload = b"kitchen blind: half open";
        let wire = outbound.process(payload).unwrap();
        assert_ne!(wire.as_slice(), payload.as_slice());

        let recovered = inbound.process(&wire).unwrap();
        assert_eq!(recovered, payload);
    }

    #[test]
    fn test_signed_blob_is_the_encrypted_plaintext() {
        // Decrypting the wire frame must yield a valid signed frame, which
        // pins the layer order: sign first, encrypt outermost.
        let alice = Endpoint::new();
        let bob = Endpoint::new();
        let (outbound, _) = channel(&alice, &bob);

        let wire = outbound.process(b"layer order probe").unwrap();

        let decrypter = Decrypter::new(bob.sealing_secret.clone());
        let signed = decrypter.decrypt(&wire).unwrap();

        let checker = SignatureChecker::new(alice.signing_key.verifying_key());
        assert_eq!(checker.verify(&signed).unwrap(), b"layer order probe");
    }

    #[test]
    fn test_impersonation_fails_verification() {
        // Mallory seals to Bob but cannot produce Alice's signature.
        let alice = Endpoint::new();
        let bob = Endpoint::new();
        let mallory = Endpoint::new();

        let (mallory_out, _) = channel(&mallory, &bob);
        let wire = mallory_out.process(b"pretend to be alice").unwrap();

        let (_, inbound_from_alice) = channel(&alice, &bob);
        assert!(inbound_from_alice.process(&wire).is_err());
    }
}
