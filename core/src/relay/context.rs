// Relay context — everything one relay node owns, shared by its tasks

use super::table::CircuitTable;
use super::RelayError;
use crate::crypto::{HeaderScheme, RelayIdentity};
use crate::directory::{relay_key, Directory, RelayDescriptor, DEFAULT_LEASE_TTL};
use crate::privacy::cover::PaddingConfig;
use crate::transport::RelayTransport;
use serde::{Deserialize, Serialize};
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;

/// Relay tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Header sealing scheme for this relay's identity
    pub header_scheme: HeaderScheme,
    /// Modulus size when `header_scheme` is RSA
    pub rsa_bits: usize,
    /// How often the sweeper evicts expired circuits
    pub sweep_interval_ms: u64,
    /// Directory lease lifetime; refreshed every half lease
    pub lease_ttl_ms: u64,
    pub padding: PaddingConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            header_scheme: HeaderScheme::Rsa,
            rsa_bits: crate::crypto::header::DEFAULT_RSA_BITS,
            sweep_interval_ms: 1000,
            lease_ttl_ms: DEFAULT_LEASE_TTL.as_millis() as u64,
            padding: PaddingConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.sweep_interval_ms == 0 {
            return Err(RelayError::InvalidConfig(
                "sweep_interval_ms must be > 0".to_string(),
            ));
        }
        if self.lease_ttl_ms < 2 {
            return Err(RelayError::InvalidConfig(
                "lease_ttl_ms must be at least 2".to_string(),
            ));
        }
        if self.header_scheme == HeaderScheme::Rsa && self.rsa_bits < 1024 {
            return Err(RelayError::InvalidConfig(
                "rsa_bits must be at least 1024".to_string(),
            ));
        }
        self.padding
            .validate()
            .map_err(|e| RelayError::InvalidConfig(e.to_string()))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    /// Keep-alive period: half the lease
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms / 2)
    }

    /// Generate an identity matching the configured scheme
    pub fn generate_identity(&self) -> Result<RelayIdentity, RelayError> {
        let identity = match self.header_scheme {
            HeaderScheme::Rsa => RelayIdentity::generate_rsa(self.rsa_bits)?,
            HeaderScheme::X25519 => RelayIdentity::generate_x25519(),
        };
        Ok(identity)
    }
}

/// Identity, address, circuit state and collaborators of one relay
pub struct RelayContext {
    pub node_id: String,
    pub identity: RelayIdentity,
    /// Address advertised to the directory and named in other relays' headers
    pub address: SocketAddrV4,
    pub table: CircuitTable,
    pub directory: Arc<dyn Directory>,
    pub transport: Arc<dyn RelayTransport>,
    pub config: RelayConfig,
}

impl RelayContext {
    pub fn new(
        node_id: impl Into<String>,
        identity: RelayIdentity,
        address: SocketAddrV4,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn RelayTransport>,
        config: RelayConfig,
    ) -> Result<Self, RelayError> {
        config.validate()?;
        Ok(Self {
            node_id: node_id.into(),
            identity,
            address,
            table: CircuitTable::new(),
            directory,
            transport,
            config,
        })
    }

    /// Directory key this relay publishes under
    pub fn directory_key(&self) -> String {
        relay_key(&self.node_id)
    }

    /// Descriptor carrying the current load
    pub fn descriptor(&self) -> Result<RelayDescriptor, RelayError> {
        Ok(RelayDescriptor::new(
            self.address,
            self.identity.public_key(),
            self.table.load(),
        )?)
    }

    /// Publish or refresh this relay's lease
    pub async fn publish(&self) -> Result<(), RelayError> {
        let descriptor = self.descriptor()?;
        self.directory
            .publish(&self.directory_key(), &descriptor, self.config.lease_ttl())
            .await?;
        Ok(())
    }
}
