use crate::error::{AppError, Result};
use crate::models::{Bucket, CrashEntry, RawCrash, TriageState};
use crate::signature::Signature;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use validator::Validate;

/// Trait for bucket and crash storage operations
///
/// Reads may run from any number of tasks concurrently. `assign_crash` is
/// the only operation touching member counts and is serialized per bucket.
#[async_trait]
pub trait SignatureStore: Send + Sync {
    /// Create a bucket with a freshly allocated id
    async fn create_bucket(&self, short_description: String, signature: Signature)
        -> Result<Bucket>;

    /// Insert or replace a bucket under its own id
    async fn save_bucket(&self, bucket: &Bucket) -> Result<()>;

    /// Get a bucket by ID
    async fn get_bucket(&self, id: u64) -> Result<Option<Bucket>>;

    /// Update an existing bucket
    async fn update_bucket(&self, bucket: &Bucket) -> Result<()>;

    /// Delete a bucket that no crash references
    async fn delete_bucket(&self, id: u64) -> Result<()>;

    /// List buckets with filtering, ordered by id
    async fn list_buckets(&self, filter: &BucketFilter) -> Result<Vec<Bucket>>;

    /// Store a new crash with a freshly allocated id
    async fn create_crash(&self, raw: RawCrash) -> Result<CrashEntry>;

    /// Insert or replace a crash under its own id
    async fn save_crash(&self, crash: &CrashEntry) -> Result<()>;

    /// Get a crash by ID
    async fn get_crash(&self, id: u64) -> Result<Option<CrashEntry>>;

    /// Apply a non-assigning lifecycle transition
    async fn transition_crash(&self, id: u64, next: TriageState) -> Result<CrashEntry>;

    /// Assign a crash to a bucket, returning the updated bucket
    async fn assign_crash(&self, crash_id: u64, bucket_id: u64) -> Result<Bucket>;

    /// Earliest (lowest id) crash assigned to a bucket
    async fn representative_crash(&self, bucket_id: u64) -> Result<Option<CrashEntry>>;

    /// All crashes assigned to a bucket, ordered by id
    async fn crashes_in_bucket(&self, bucket_id: u64) -> Result<Vec<CrashEntry>>;

    /// All stored crashes, ordered by id
    async fn list_crashes(&self) -> Result<Vec<CrashEntry>>;

    /// Count stored crashes
    async fn count_crashes(&self) -> Result<u64>;
}

/// Filter for querying buckets
#[derive(Debug, Clone, Default)]
pub struct BucketFilter {
    /// Restrict to these ids (empty = all)
    pub ids: Vec<u64>,

    /// Skip buckets without members
    pub non_empty_only: bool,
}

impl BucketFilter {
    pub fn by_ids(ids: Vec<u64>) -> Self {
        Self {
            ids,
            non_empty_only: false,
        }
    }

    pub fn accepts(&self, bucket: &Bucket) -> bool {
        let id_match = self.ids.is_empty() || self.ids.contains(&bucket.id);
        let size_match = !self.non_empty_only || !bucket.is_empty();
        id_match && size_match
    }
}

/// Per-bucket write locks
#[derive(Default)]
pub(crate) struct BucketLocks {
    locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl BucketLocks {
    pub(crate) fn get(&self, bucket_id: u64) -> Arc<Mutex<()>> {
        self.locks
            .entry(bucket_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub(crate) fn forget(&self, bucket_id: u64) {
        self.locks.remove(&bucket_id);
    }
}

/// First id the allocator may hand out after storing `id`
pub(crate) fn id_after(kind: &str, id: u64) -> Result<u64> {
    id.checked_add(1).ok_or_else(|| {
        AppError::Validation(format!("{} id {} leaves no room for new ids", kind, id))
    })
}

pub(crate) fn validate_new_bucket(short_description: &str, signature: &Signature) -> Result<()> {
    signature.validate()?;
    if short_description.trim().is_empty() {
        return Err(AppError::Validation(
            "bucket short description must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// In-memory store (for single-process use and testing)
#[derive(Clone)]
pub struct InMemoryStore {
    buckets: Arc<DashMap<u64, Bucket>>,
    crashes: Arc<DashMap<u64, CrashEntry>>,
    members: Arc<DashMap<u64, BTreeSet<u64>>>,
    locks: Arc<BucketLocks>,
    next_bucket_id: Arc<AtomicU64>,
    next_crash_id: Arc<AtomicU64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            crashes: Arc::new(DashMap::new()),
            members: Arc::new(DashMap::new()),
            locks: Arc::new(BucketLocks::default()),
            next_bucket_id: Arc::new(AtomicU64::new(1)),
            next_crash_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignatureStore for InMemoryStore {
    async fn create_bucket(
        &self,
        short_description: String,
        signature: Signature,
    ) -> Result<Bucket> {
        validate_new_bucket(&short_description, &signature)?;

        let id = self.next_bucket_id.fetch_add(1, Ordering::SeqCst);
        let bucket = Bucket::new(id, short_description, signature);
        bucket.validate()?;
        self.buckets.insert(id, bucket.clone());

        tracing::debug!(bucket_id = id, "Bucket created");
        Ok(bucket)
    }

    async fn save_bucket(&self, bucket: &Bucket) -> Result<()> {
        bucket.validate()?;
        bucket.signature.validate()?;
        let next = id_after("bucket", bucket.id)?;
        self.next_bucket_id.fetch_max(next, Ordering::SeqCst);
        self.buckets.insert(bucket.id, bucket.clone());
        tracing::debug!(bucket_id = bucket.id, "Bucket saved");
        Ok(())
    }

    async fn get_bucket(&self, id: u64) -> Result<Option<Bucket>> {
        Ok(self.buckets.get(&id).map(|entry| entry.clone()))
    }

    async fn update_bucket(&self, bucket: &Bucket) -> Result<()> {
        bucket.validate()?;
        bucket.signature.validate()?;

        let lock = self.locks.get(bucket.id);
        let _guard = lock.lock();

        match self.buckets.get_mut(&bucket.id) {
            Some(mut existing) => {
                // member_count is owned by assign_crash
                let member_count = existing.member_count;
                *existing = bucket.clone();
                existing.member_count = member_count;
                tracing::debug!(bucket_id = bucket.id, "Bucket updated");
                Ok(())
            }
            None => Err(AppError::NotFound(format!("Bucket {} not found", bucket.id))),
        }
    }

    async fn delete_bucket(&self, id: u64) -> Result<()> {
        let lock = self.locks.get(id);
        let _guard = lock.lock();

        let member_count = match self.buckets.get(&id) {
            Some(bucket) => bucket.member_count,
            None => return Err(AppError::NotFound(format!("Bucket {} not found", id))),
        };

        if member_count > 0 {
            return Err(AppError::BucketInUse {
                bucket_id: id,
                member_count,
            });
        }

        self.buckets.remove(&id);
        self.members.remove(&id);
        self.locks.forget(id);
        tracing::debug!(bucket_id = id, "Bucket deleted");
        Ok(())
    }

    async fn list_buckets(&self, filter: &BucketFilter) -> Result<Vec<Bucket>> {
        let mut buckets: Vec<Bucket> = self
            .buckets
            .iter()
            .filter(|entry| filter.accepts(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        buckets.sort_by_key(|b| b.id);
        Ok(buckets)
    }

    async fn create_crash(&self, raw: RawCrash) -> Result<CrashEntry> {
        let id = self.next_crash_id.fetch_add(1, Ordering::SeqCst);
        let crash = CrashEntry::new(id, raw);
        self.crashes.insert(id, crash.clone());
        tracing::debug!(crash_id = id, "Crash stored");
        Ok(crash)
    }

    async fn save_crash(&self, crash: &CrashEntry) -> Result<()> {
        let next = id_after("crash", crash.id)?;
        self.next_crash_id.fetch_max(next, Ordering::SeqCst);
        self.crashes.insert(crash.id, crash.clone());

        if let Some(bucket_id) = crash.state.assigned_bucket() {
            self.members.entry(bucket_id).or_default().insert(crash.id);
        }

        Ok(())
    }

    async fn get_crash(&self, id: u64) -> Result<Option<CrashEntry>> {
        Ok(self.crashes.get(&id).map(|entry| entry.clone()))
    }

    async fn transition_crash(&self, id: u64, next: TriageState) -> Result<CrashEntry> {
        if next.is_assigned() {
            return Err(AppError::InvalidStateTransition(
                "assignment must go through assign_crash".to_string(),
            ));
        }

        let mut crash = self
            .crashes
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Crash {} not found", id)))?;
        crash.transition(next)?;
        Ok(crash.clone())
    }

    async fn assign_crash(&self, crash_id: u64, bucket_id: u64) -> Result<Bucket> {
        let lock = self.locks.get(bucket_id);
        let _guard = lock.lock();

        if !self.buckets.contains_key(&bucket_id) {
            return Err(AppError::NotFound(format!("Bucket {} not found", bucket_id)));
        }

        {
            let mut crash = self
                .crashes
                .get_mut(&crash_id)
                .ok_or_else(|| AppError::NotFound(format!("Crash {} not found", crash_id)))?;
            crash.transition(TriageState::Assigned { bucket_id })?;
        }

        let bucket = {
            let mut bucket = self
                .buckets
                .get_mut(&bucket_id)
                .ok_or_else(|| AppError::NotFound(format!("Bucket {} not found", bucket_id)))?;
            bucket.add_member();
            bucket.clone()
        };

        self.members.entry(bucket_id).or_default().insert(crash_id);

        tracing::info!(
            crash_id = crash_id,
            bucket_id = bucket_id,
            member_count = bucket.member_count,
            "Crash assigned to bucket"
        );

        Ok(bucket)
    }

    async fn representative_crash(&self, bucket_id: u64) -> Result<Option<CrashEntry>> {
        let first = self
            .members
            .get(&bucket_id)
            .and_then(|ids| ids.iter().next().copied());

        Ok(first.and_then(|id| self.crashes.get(&id).map(|entry| entry.clone())))
    }

    async fn crashes_in_bucket(&self, bucket_id: u64) -> Result<Vec<CrashEntry>> {
        let ids: Vec<u64> = self
            .members
            .get(&bucket_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        Ok(ids
            .into_iter()
            .filter_map(|id| self.crashes.get(&id).map(|entry| entry.clone()))
            .collect())
    }

    async fn list_crashes(&self) -> Result<Vec<CrashEntry>> {
        let mut crashes: Vec<CrashEntry> =
            self.crashes.iter().map(|entry| entry.value().clone()).collect();
        crashes.sort_by_key(|c| c.id);
        Ok(crashes)
    }

    async fn count_crashes(&self) -> Result<u64> {
        Ok(self.crashes.len() as u64)
    }
}
