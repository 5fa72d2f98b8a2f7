// Relay directory — where relays advertise themselves and clients find them
//
// Entries are leases: a relay publishes its descriptor under "/relays/<node_id>"
// with a TTL and keeps refreshing it. A relay that stops refreshing drops out
// of `list()` once its lease runs out.

pub mod descriptor;
pub mod file;
pub mod memory;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use descriptor::RelayDescriptor;
pub use file::FileDirectory;
pub use memory::MemoryDirectory;

/// Key prefix under which relay descriptors live
pub const RELAY_KEY_PREFIX: &str = "/relays/";

/// Default lease lifetime for a published descriptor
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),
}

/// Directory key for a relay node
pub fn relay_key(node_id: &str) -> String {
    format!("{}{}", RELAY_KEY_PREFIX, node_id)
}

/// Lease-based registry of relay descriptors
#[async_trait]
pub trait Directory: Send + Sync {
    /// Insert or refresh `descriptor` under `key` for `ttl`
    async fn publish(
        &self,
        key: &str,
        descriptor: &RelayDescriptor,
        ttl: Duration,
    ) -> Result<(), DirectoryError>;

    /// All live relay descriptors
    async fn list(&self) -> Result<Vec<RelayDescriptor>, DirectoryError>;

    async fn remove(&self, key: &str) -> Result<(), DirectoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_key() {
        assert_eq!(relay_key("node-1"), "/relays/node-1");
    }
}
