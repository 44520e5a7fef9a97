//! Storage usage estimation against the soft capacity.

use std::io;
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

use crate::config::USAGE_WARN_PERCENT;

/// Computes the storage usage ratio with a full walk on every call.
///
/// The walk is O(stored files) and runs on both the admission and scrape
/// paths, so callers must treat it as non-free. The result is never cached:
/// an admission decision can race with a concurrent write, meaning two
/// near-threshold uploads may both pass the gate and jointly exceed the soft
/// cap. That race is accepted; the cap is soft.
#[derive(Clone, Debug)]
pub struct UsageMeter {
    root: PathBuf,
    capacity_bytes: u64,
}

impl UsageMeter {
    pub fn new(root: PathBuf, capacity_bytes: u64) -> Self {
        Self {
            root,
            capacity_bytes,
        }
    }

    /// Current usage as a percentage of the soft capacity.
    ///
    /// A missing storage root is first-run bootstrap, not an error: it is
    /// created and usage reported as zero. An unreadable root fails.
    pub async fn percent(&self) -> io::Result<f64> {
        if fs::metadata(&self.root).await.is_err() {
            fs::create_dir_all(&self.root).await?;
            info!(root = %self.root.display(), "created storage root");
            return Ok(0.0);
        }

        let used_bytes = self.total_bytes().await?;
        let percent = used_bytes as f64 / self.capacity_bytes as f64 * 100.0;
        info!(
            used_bytes,
            capacity_bytes = self.capacity_bytes,
            "storage usage at {percent:.2}%"
        );
        if percent > USAGE_WARN_PERCENT {
            warn!("high storage usage: {percent:.2}%");
        }
        Ok(percent)
    }

    /// Sum the sizes of all regular files under the root.
    async fn total_bytes(&self) -> io::Result<u64> {
        let mut pending = vec![self.root.clone()];
        let mut total = 0u64;
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    pending.push(entry.path());
                } else if metadata.is_file() {
                    total += metadata.len();
                }
            }
        }
        Ok(total)
    }
}
