use crate::error::Result;
use crate::models::{Bucket, CrashEntry};
use crate::state::{BucketFilter, SignatureStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Portable dump of a store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub buckets: Vec<Bucket>,

    #[serde(default)]
    pub crashes: Vec<CrashEntry>,
}

/// Counts reported after an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub buckets: usize,
    pub crashes: usize,
}

impl StoreSnapshot {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Write buckets and crashes into `store`.
    ///
    /// Member counts are recomputed from the crashes' assigned states.
    pub async fn import_into(&self, store: &dyn SignatureStore) -> Result<ImportSummary> {
        let mut member_counts: HashMap<u64, u64> = HashMap::new();
        for crash in &self.crashes {
            if let Some(bucket_id) = crash.state.assigned_bucket() {
                *member_counts.entry(bucket_id).or_default() += 1;
            }
        }

        for bucket in &self.buckets {
            let mut bucket = bucket.clone();
            bucket.member_count = member_counts.get(&bucket.id).copied().unwrap_or(0);
            store.save_bucket(&bucket).await?;
        }

        for crash in &self.crashes {
            store.save_crash(crash).await?;
        }

        let summary = ImportSummary {
            buckets: self.buckets.len(),
            crashes: self.crashes.len(),
        };

        tracing::info!(
            buckets = summary.buckets,
            crashes = summary.crashes,
            "Snapshot imported"
        );

        Ok(summary)
    }

    /// Dump the full contents of `store`
    pub async fn export_from(store: &dyn SignatureStore) -> Result<Self> {
        Ok(Self {
            buckets: store.list_buckets(&BucketFilter::default()).await?,
            crashes: store.list_crashes().await?,
        })
    }
}
