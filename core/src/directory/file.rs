// File-backed directory — one JSON record per key in a shared folder
//
// Lets relays and clients running as separate processes on one host find each
// other. Each record carries its own expiry as unix milliseconds; readers skip
// stale records and the writer of a stale key overwrites it on the next publish.

use super::{Directory, DirectoryError, RelayDescriptor, RELAY_KEY_PREFIX};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseRecord {
    key: String,
    descriptor: RelayDescriptor,
    expires_at_ms: u64,
}

#[derive(Debug, Clone)]
pub struct FileDirectory {
    root: PathBuf,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl FileDirectory {
    /// Use `root` as the shared folder, creating it if needed
    pub fn open(root: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Record file for `key`: the hex-encoded key, so distinct keys never
    /// share a file
    fn path_for(&self, key: &str) -> Result<PathBuf, DirectoryError> {
        if key.trim_start_matches('/').is_empty() {
            return Err(DirectoryError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{}.json", hex::encode(key.as_bytes()))))
    }
}

#[async_trait]
impl Directory for FileDirectory {
    async fn publish(
        &self,
        key: &str,
        descriptor: &RelayDescriptor,
        ttl: Duration,
    ) -> Result<(), DirectoryError> {
        let path = self.path_for(key)?;
        let record = LeaseRecord {
            key: key.to_string(),
            descriptor: descriptor.clone(),
            expires_at_ms: now_ms() + ttl.as_millis() as u64,
        };
        let json = serde_json::to_vec_pretty(&record)?;

        // Write-then-rename so readers never see a half-written record
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Published {} to {}", key, path.display());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RelayDescriptor>, DirectoryError> {
        let now = now_ms();
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                // Removed between read_dir and read
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<LeaseRecord>(&bytes) {
                Ok(record) if record.expires_at_ms > now => records.push(record),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable directory record {}: {}", path.display(), e),
            }
        }

        records.retain(|r| r.key.starts_with(RELAY_KEY_PREFIX));
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records.into_iter().map(|r| r.descriptor).collect())
    }

    async fn remove(&self, key: &str) -> Result<(), DirectoryError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
