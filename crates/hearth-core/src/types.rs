//! Core types for the Hearth control plane
//!
//! This module defines the fundamental identifiers used throughout the
//! protocol, using newtype patterns for semantic validation and type safety.

use core::fmt;
use core::ops::Deref;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Device Identifier
// ----------------------------------------------------------------------------

/// Stable identifier for a device, derived from the SHA-256 digest of its
/// certificate's signature bytes.
///
/// Value-equal and hashable; used as a map key everywhere. Once computed for
/// a given certificate it never changes, including across process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId([u8; 32]);

impl DeviceId {
    /// Create a DeviceId from 32 raw bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short prefix for log output (first 4 bytes, hex)
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for DeviceId {
    type Err = crate::HearthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clean = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(clean)
            .map_err(|_| crate::HearthError::invalid_value("invalid hex in DeviceId"))?;
        if bytes.len() != 32 {
            return Err(crate::HearthError::invalid_value(
                "DeviceId must be exactly 32 bytes",
            ));
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(&bytes);
        Ok(Self(id))
    }
}

impl Deref for DeviceId {
    type Target = [u8; 32];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ----------------------------------------------------------------------------
// Device Role
// ----------------------------------------------------------------------------

/// The three device roles in the home-automation topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceRole {
    /// Central authority that owns the registry of devices
    Master,
    /// Field controller driving hardware
    Slave,
    /// User terminal
    Client,
}

impl DeviceRole {
    /// Whether this role acts as the trust anchor of the installation
    pub fn is_master(&self) -> bool {
        matches!(self, DeviceRole::Master)
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRole::Master => write!(f, "master"),
            DeviceRole::Slave => write!(f, "slave"),
            DeviceRole::Client => write!(f, "client"),
        }
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a timestamp from raw milliseconds
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Get the current wall-clock timestamp
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Duration elapsed since another timestamp (saturating)
    pub fn duration_since(&self, other: Self) -> core::time::Duration {
        core::time::Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_round_trip() {
        let id = DeviceId::new([7u8; 32]);
        let rendered = id.to_string();
        assert_eq!(rendered.len(), 64);

        let parsed: DeviceId = rendered.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_device_id_rejects_wrong_length() {
        assert!("abcd".parse::<DeviceId>().is_err());
        assert!("zz".repeat(32).parse::<DeviceId>().is_err());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(DeviceRole::Master.to_string(), "master");
        assert!(DeviceRole::Master.is_master());
        assert!(!DeviceRole::Client.is_master());
    }

    #[test]
    fn test_timestamp_duration_since() {
        let earlier = Timestamp::new(1_000);
        let later = Timestamp::new(3_500);
        assert_eq!(later.duration_since(earlier).as_millis(), 2_500);
        // Saturates instead of underflowing
        assert_eq!(earlier.duration_since(later).as_millis(), 0);
    }
}
