// In-memory directory — lease map shared by every relay in one process

use super::{Directory, DirectoryError, RelayDescriptor, RELAY_KEY_PREFIX};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Lease {
    descriptor: RelayDescriptor,
    expires_at: Instant,
}

/// Cloning shares the underlying map
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    entries: Arc<Mutex<HashMap<String, Lease>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entry count (expired leases are not counted)
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|lease| lease.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn publish(
        &self,
        key: &str,
        descriptor: &RelayDescriptor,
        ttl: Duration,
    ) -> Result<(), DirectoryError> {
        if key.is_empty() {
            return Err(DirectoryError::InvalidKey("empty key".to_string()));
        }
        self.entries.lock().insert(
            key.to_string(),
            Lease {
                descriptor: descriptor.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RelayDescriptor>, DirectoryError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, lease| lease.expires_at > now);

        let mut listed: Vec<(&String, &Lease)> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(RELAY_KEY_PREFIX))
            .collect();
        listed.sort_by(|a, b| a.0.cmp(b.0));
        Ok(listed
            .into_iter()
            .map(|(_, lease)| lease.descriptor.clone())
            .collect())
    }

    async fn remove(&self, key: &str) -> Result<(), DirectoryError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
