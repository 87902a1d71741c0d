//! Centralized configuration
//!
//! Plain data structures consumed at construction time; nothing here is
//! read from global state. Defaults suit a small installation on a LAN.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{DeviceId, DeviceRole};

// ----------------------------------------------------------------------------
// Node Configuration
// ----------------------------------------------------------------------------

/// Identity and topology configuration of one device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Role this device plays in the installation
    pub role: DeviceRole,
    /// Address the device listens on
    pub listen_address: String,
    /// Listen port (0 picks an ephemeral port)
    pub listen_port: u16,
    /// Where the master is reachable; ignored on the master itself
    pub master_address: Option<String>,
    /// Master identity from provisioning, if already known
    pub master_id: Option<DeviceId>,
    /// Directory of the file-backed key store
    pub keystore_path: PathBuf,
}

impl NodeConfig {
    /// Configuration for the central authority
    pub fn master(keystore_path: impl Into<PathBuf>) -> Self {
        Self {
            role: DeviceRole::Master,
            listen_address: "0.0.0.0".to_string(),
            listen_port: 7420,
            master_address: None,
            master_id: None,
            keystore_path: keystore_path.into(),
        }
    }

    /// Configuration for a field controller
    pub fn slave(keystore_path: impl Into<PathBuf>, master_address: impl Into<String>) -> Self {
        Self {
            role: DeviceRole::Slave,
            listen_address: "0.0.0.0".to_string(),
            listen_port: 0,
            master_address: Some(master_address.into()),
            master_id: None,
            keystore_path: keystore_path.into(),
        }
    }

    /// Configuration for a user terminal
    pub fn client(keystore_path: impl Into<PathBuf>, master_address: impl Into<String>) -> Self {
        Self {
            role: DeviceRole::Client,
            listen_address: "0.0.0.0".to_string(),
            listen_port: 0,
            master_address: Some(master_address.into()),
            master_id: None,
            keystore_path: keystore_path.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffering and timing knobs for secure channels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Outbound queue length per connection
    pub outbound_buffer_size: usize,
    /// How long a connection may sit in the handshake phase
    pub handshake_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            outbound_buffer_size: 64,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl ChannelConfig {
    /// Generous buffers for stress tests
    pub fn permissive() -> Self {
        Self {
            outbound_buffer_size: 1024,
            handshake_timeout: Duration::from_secs(60),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
