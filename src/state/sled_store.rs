use crate::error::{AppError, Result};
use crate::models::{Bucket, CrashEntry, RawCrash, TriageState};
use crate::signature::Signature;
use crate::state::store::{id_after, validate_new_bucket, BucketLocks};
use crate::state::{BucketFilter, SignatureStore};
use async_trait::async_trait;
use sled::Db;
use std::path::Path;
use std::sync::Arc;
use validator::Validate;

const BUCKET_COUNTER: &[u8] = b"next_bucket_id";
const CRASH_COUNTER: &[u8] = b"next_crash_id";

/// Persistent bucket and crash store using Sled embedded database
///
/// Trees:
/// - `buckets`: bucket id -> bincode `Bucket`
/// - `crashes`: crash id -> bincode `CrashEntry`
/// - `members`: bucket id ++ crash id -> empty, ordered by crash id
/// - `meta`: id allocators
#[derive(Clone)]
pub struct SledStore {
    db: Arc<Db>,
    buckets_tree: sled::Tree,
    crashes_tree: sled::Tree,
    members_tree: sled::Tree,
    meta_tree: sled::Tree,
    locks: Arc<BucketLocks>,
}

impl SledStore {
    /// Create a new Sled store at the specified path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            AppError::Storage(format!("Failed to open Sled database: {}", e))
        })?;

        let buckets_tree = db.open_tree("buckets")?;
        let crashes_tree = db.open_tree("crashes")?;
        let members_tree = db.open_tree("members")?;
        let meta_tree = db.open_tree("meta")?;

        tracing::info!(path = ?path.as_ref(), "Initialized Sled store");

        Ok(Self {
            db: Arc::new(db),
            buckets_tree,
            crashes_tree,
            members_tree,
            meta_tree,
            locks: Arc::new(BucketLocks::default()),
        })
    }

    fn id_key(id: u64) -> [u8; 8] {
        id.to_be_bytes()
    }

    fn member_key(bucket_id: u64, crash_id: u64) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&bucket_id.to_be_bytes());
        key[8..].copy_from_slice(&crash_id.to_be_bytes());
        key
    }

    fn crash_id_from_member_key(key: &[u8]) -> Result<u64> {
        let bytes: [u8; 8] = key
            .get(8..16)
            .and_then(|slice| slice.try_into().ok())
            .ok_or_else(|| AppError::Storage("Malformed member index key".to_string()))?;
        Ok(u64::from_be_bytes(bytes))
    }

    fn decode_counter(bytes: Option<&[u8]>) -> u64 {
        bytes
            .and_then(|b| <[u8; 8]>::try_from(b).ok())
            .map(u64::from_be_bytes)
            .unwrap_or(1)
    }

    /// Allocate the next id from a counter
    fn next_id(&self, counter: &[u8]) -> Result<u64> {
        let previous = self.meta_tree.fetch_and_update(counter, |old| {
            let next = Self::decode_counter(old).saturating_add(1);
            Some(next.to_be_bytes().to_vec())
        })?;
        Ok(Self::decode_counter(previous.as_deref()))
    }

    /// Make sure future allocations stay above `id`
    fn reserve_id(&self, counter: &[u8], kind: &str, id: u64) -> Result<()> {
        let floor = id_after(kind, id)?;
        self.meta_tree.update_and_fetch(counter, |old| {
            let next = Self::decode_counter(old).max(floor);
            Some(next.to_be_bytes().to_vec())
        })?;
        Ok(())
    }

    fn read_bucket(&self, id: u64) -> Result<Option<Bucket>> {
        match self.buckets_tree.get(Self::id_key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_bucket(&self, bucket: &Bucket) -> Result<()> {
        let value = bincode::serialize(bucket)?;
        self.buckets_tree.insert(Self::id_key(bucket.id), value)?;
        Ok(())
    }

    fn read_crash(&self, id: u64) -> Result<Option<CrashEntry>> {
        match self.crashes_tree.get(Self::id_key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_crash(&self, crash: &CrashEntry) -> Result<()> {
        let value = bincode::serialize(crash)?;
        self.crashes_tree.insert(Self::id_key(crash.id), value)?;
        Ok(())
    }

    fn member_ids(&self, bucket_id: u64) -> Result<Vec<u64>> {
        self.members_tree
            .scan_prefix(Self::id_key(bucket_id))
            .keys()
            .map(|key| Self::crash_id_from_member_key(&key?))
            .collect()
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Get database size in bytes
    pub fn size_on_disk(&self) -> Result<u64> {
        Ok(self.db.size_on_disk()?)
    }
}

#[async_trait]
impl SignatureStore for SledStore {
    async fn create_bucket(
        &self,
        short_description: String,
        signature: Signature,
    ) -> Result<Bucket> {
        validate_new_bucket(&short_description, &signature)?;

        let id = self.next_id(BUCKET_COUNTER)?;
        let bucket = Bucket::new(id, short_description, signature);
        bucket.validate()?;
        self.write_bucket(&bucket)?;

        tracing::debug!(bucket_id = id, "Bucket saved to Sled");
        Ok(bucket)
    }

    async fn save_bucket(&self, bucket: &Bucket) -> Result<()> {
        bucket.validate()?;
        bucket.signature.validate()?;
        self.reserve_id(BUCKET_COUNTER, "bucket", bucket.id)?;
        self.write_bucket(bucket)?;
        tracing::debug!(bucket_id = bucket.id, "Bucket saved to Sled");
        Ok(())
    }

    async fn get_bucket(&self, id: u64) -> Result<Option<Bucket>> {
        self.read_bucket(id)
    }

    async fn update_bucket(&self, bucket: &Bucket) -> Result<()> {
        bucket.validate()?;
        bucket.signature.validate()?;

        let lock = self.locks.get(bucket.id);
        let _guard = lock.lock();

        let existing = self
            .read_bucket(bucket.id)?
            .ok_or_else(|| AppError::NotFound(format!("Bucket {} not found", bucket.id)))?;

        let mut updated = bucket.clone();
        updated.member_count = existing.member_count;
        self.write_bucket(&updated)?;

        tracing::debug!(bucket_id = bucket.id, "Bucket updated in Sled");
        Ok(())
    }

    async fn delete_bucket(&self, id: u64) -> Result<()> {
        let lock = self.locks.get(id);
        let _guard = lock.lock();

        let bucket = self
            .read_bucket(id)?
            .ok_or_else(|| AppError::NotFound(format!("Bucket {} not found", id)))?;

        if bucket.member_count > 0 {
            return Err(AppError::BucketInUse {
                bucket_id: id,
                member_count: bucket.member_count,
            });
        }

        self.buckets_tree.remove(Self::id_key(id))?;
        self.locks.forget(id);

        tracing::debug!(bucket_id = id, "Bucket deleted from Sled");
        Ok(())
    }

    async fn list_buckets(&self, filter: &BucketFilter) -> Result<Vec<Bucket>> {
        let mut buckets = Vec::new();

        if filter.ids.is_empty() {
            for item in self.buckets_tree.iter() {
                let (_, bytes) = item?;
                let bucket: Bucket = bincode::deserialize(&bytes)?;
                if filter.accepts(&bucket) {
                    buckets.push(bucket);
                }
            }
        } else {
            for id in &filter.ids {
                if let Some(bucket) = self.read_bucket(*id)? {
                    if filter.accepts(&bucket) {
                        buckets.push(bucket);
                    }
                }
            }
            buckets.sort_by_key(|b| b.id);
            buckets.dedup_by_key(|b| b.id);
        }

        Ok(buckets)
    }

    async fn create_crash(&self, raw: RawCrash) -> Result<CrashEntry> {
        let id = self.next_id(CRASH_COUNTER)?;
        let crash = CrashEntry::new(id, raw);
        self.write_crash(&crash)?;

        tracing::debug!(crash_id = id, "Crash saved to Sled");
        Ok(crash)
    }

    async fn save_crash(&self, crash: &CrashEntry) -> Result<()> {
        self.reserve_id(CRASH_COUNTER, "crash", crash.id)?;
        self.write_crash(crash)?;

        if let Some(bucket_id) = crash.state.assigned_bucket() {
            self.members_tree
                .insert(Self::member_key(bucket_id, crash.id), &[] as &[u8])?;
        }

        Ok(())
    }

    async fn get_crash(&self, id: u64) -> Result<Option<CrashEntry>> {
        self.read_crash(id)
    }

    async fn transition_crash(&self, id: u64, next: TriageState) -> Result<CrashEntry> {
        if next.is_assigned() {
            return Err(AppError::InvalidStateTransition(
                "assignment must go through assign_crash".to_string(),
            ));
        }

        let key = Self::id_key(id);
        loop {
            let current = self
                .crashes_tree
                .get(key)?
                .ok_or_else(|| AppError::NotFound(format!("Crash {} not found", id)))?;

            let mut crash: CrashEntry = bincode::deserialize(&current)?;
            crash.transition(next.clone())?;
            let updated = bincode::serialize(&crash)?;

            // Retry if another writer changed the crash in between
            match self
                .crashes_tree
                .compare_and_swap(key, Some(current), Some(updated))?
            {
                Ok(()) => return Ok(crash),
                Err(_) => continue,
            }
        }
    }

    async fn assign_crash(&self, crash_id: u64, bucket_id: u64) -> Result<Bucket> {
        let lock = self.locks.get(bucket_id);
        let _guard = lock.lock();

        let mut bucket = self
            .read_bucket(bucket_id)?
            .ok_or_else(|| AppError::NotFound(format!("Bucket {} not found", bucket_id)))?;

        let crash_key = Self::id_key(crash_id);
        let crash = loop {
            let current = self
                .crashes_tree
                .get(crash_key)?
                .ok_or_else(|| AppError::NotFound(format!("Crash {} not found", crash_id)))?;

            let mut crash: CrashEntry = bincode::deserialize(&current)?;
            crash.transition(TriageState::Assigned { bucket_id })?;
            let updated = bincode::serialize(&crash)?;

            if self
                .crashes_tree
                .compare_and_swap(crash_key, Some(current), Some(updated))?
                .is_ok()
            {
                break crash;
            }
        };

        bucket.add_member();
        self.write_bucket(&bucket)?;
        self.members_tree
            .insert(Self::member_key(bucket_id, crash.id), &[] as &[u8])?;

        tracing::info!(
            crash_id = crash_id,
            bucket_id = bucket_id,
            member_count = bucket.member_count,
            "Crash assigned to bucket"
        );

        Ok(bucket)
    }

    async fn representative_crash(&self, bucket_id: u64) -> Result<Option<CrashEntry>> {
        let first = match self.members_tree.scan_prefix(Self::id_key(bucket_id)).next() {
            Some(item) => {
                let (key, _) = item?;
                Self::crash_id_from_member_key(&key)?
            }
            None => return Ok(None),
        };

        self.read_crash(first)
    }

    async fn crashes_in_bucket(&self, bucket_id: u64) -> Result<Vec<CrashEntry>> {
        let mut crashes = Vec::new();
        for id in self.member_ids(bucket_id)? {
            if let Some(crash) = self.read_crash(id)? {
                crashes.push(crash);
            }
        }
        Ok(crashes)
    }

    async fn list_crashes(&self) -> Result<Vec<CrashEntry>> {
        self.crashes_tree
            .iter()
            .values()
            .map(|bytes| -> Result<CrashEntry> { Ok(bincode::deserialize(&bytes?)?) })
            .collect()
    }

    async fn count_crashes(&self) -> Result<u64> {
        Ok(self.crashes_tree.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bugs::{BugProvider, ExternalBug};
    use crate::signature::{FramePattern, Symptom};
    use tempfile::TempDir;

    fn signature(frames: &[&str]) -> Signature {
        Signature::new(vec![
            Symptom::StackFrames {
                function_names: frames.iter().map(|f| FramePattern::parse(f).unwrap()).collect(),
            },
            Symptom::CrashAddress { low: 0, high: 0x1000 },
        ])
    }

    #[tokio::test]
    async fn test_sled_bucket_roundtrip_with_regex_symptom() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledStore::new(temp_dir.path()).unwrap();

        let mut bucket = store
            .create_bucket("GC crash".to_string(), signature(&["js::gc::Mark", "?", "/^JS_/"]))
            .await
            .unwrap();
        bucket.link_bug(ExternalBug::new(
            "77",
            BugProvider {
                name: "bugzilla".to_string(),
                url_template: "https://bugzilla.example/show_bug.cgi?id=%s".to_string(),
            },
        ));
        store.update_bucket(&bucket).await.unwrap();

        let fetched = store.get_bucket(bucket.id).await.unwrap().unwrap();
        assert_eq!(fetched.signature, bucket.signature);
        assert_eq!(fetched.bug.unwrap().external_id, "77");
    }

    #[tokio::test]
    async fn test_sled_assignment_and_representative() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledStore::new(temp_dir.path()).unwrap();

        let bucket = store
            .create_bucket("crash".to_string(), signature(&["foo"]))
            .await
            .unwrap();

        for _ in 0..3 {
            let crash = store.create_crash(RawCrash::new("foo")).await.unwrap();
            store
                .transition_crash(crash.id, TriageState::Candidate { bucket_id: bucket.id })
                .await
                .unwrap();
            store.assign_crash(crash.id, bucket.id).await.unwrap();
        }

        let fetched = store.get_bucket(bucket.id).await.unwrap().unwrap();
        assert_eq!(fetched.member_count, 3);

        let members = store.crashes_in_bucket(bucket.id).await.unwrap();
        assert_eq!(members.len(), 3);

        let representative = store.representative_crash(bucket.id).await.unwrap().unwrap();
        assert_eq!(representative.id, members[0].id);
    }

    #[tokio::test]
    async fn test_sled_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let bucket_id = {
            let store = SledStore::new(temp_dir.path()).unwrap();
            let bucket = store
                .create_bucket("crash".to_string(), signature(&["foo"]))
                .await
                .unwrap();
            store.flush().await.unwrap();
            bucket.id
        };

        let store = SledStore::new(temp_dir.path()).unwrap();
        assert!(store.get_bucket(bucket_id).await.unwrap().is_some());

        let next = store
            .create_bucket("second".to_string(), signature(&["bar"]))
            .await
            .unwrap();
        assert!(next.id > bucket_id);
    }

    #[tokio::test]
    async fn test_sled_delete_bucket_in_use() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledStore::new(temp_dir.path()).unwrap();

        let bucket = store
            .create_bucket("crash".to_string(), signature(&["foo"]))
            .await
            .unwrap();
        let crash = store.create_crash(RawCrash::new("foo")).await.unwrap();
        store
            .transition_crash(crash.id, TriageState::NewBucketRequested)
            .await
            .unwrap();
        store.assign_crash(crash.id, bucket.id).await.unwrap();

        assert!(matches!(
            store.delete_bucket(bucket.id).await,
            Err(AppError::BucketInUse { .. })
        ));
    }
}
