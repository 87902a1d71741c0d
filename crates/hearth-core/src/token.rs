//! Device-connect provisioning token
//!
//! An out-of-band payload, typically exchanged as a QR code, used once to
//! bootstrap trust between an unregistered slave or client and the master.
//! It names where to connect, which device identity to expect there, and a
//! single-use random secret the master checks on first contact. It plays no
//! part in the steady-state protocol.

use base64::{engine::general_purpose::STANDARD, Engine};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::types::DeviceId;
use crate::{HearthError, Result};

/// Length of the single-use provisioning secret
pub const CONNECT_TOKEN_SECRET_LEN: usize = 32;

// ----------------------------------------------------------------------------
// Device Connect Token
// ----------------------------------------------------------------------------

/// One-shot provisioning payload for QR exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConnectToken {
    /// Host the new device should connect to
    pub address: String,
    /// Port on that host
    pub port: u16,
    /// Identity of the device awaiting the connection
    pub device_id: DeviceId,
    /// Single-use random secret checked on first contact
    pub secret: [u8; CONNECT_TOKEN_SECRET_LEN],
}

impl DeviceConnectToken {
    /// Issue a fresh token for the device reachable at `address:port`
    pub fn issue(address: impl Into<String>, port: u16, device_id: DeviceId) -> Self {
        let mut secret = [0u8; CONNECT_TOKEN_SECRET_LEN];
        OsRng.fill_bytes(&mut secret);
        Self {
            address: address.into(),
            port,
            device_id,
            secret,
        }
    }

    /// Encode for QR display: bincode, then standard base64
    pub fn encode(&self) -> Result<String> {
        Ok(STANDARD.encode(bincode::serialize(self)?))
    }

    /// Decode a scanned token
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| HearthError::invalid_value(format!("invalid token encoding: {e}")))?;
        Ok(bincode::deserialize(&bytes)?)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let token = DeviceConnectToken::issue("192.168.1.10", 7420, DeviceId::new([4; 32]));
        let encoded = token.encode().unwrap();
        let decoded = DeviceConnectToken::decode(&encoded).unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn test_fresh_secret_per_token() {
        let id = DeviceId::new([4; 32]);
        let a = DeviceConnectToken::issue("host", 1, id);
        let b = DeviceConnectToken::issue("host", 1, id);
        assert_ne!(a.secret, b.secret);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(DeviceConnectToken::decode("not base64 !!!").is_err());
        assert!(DeviceConnectToken::decode("aGVsbG8=").is_err());
    }
}
