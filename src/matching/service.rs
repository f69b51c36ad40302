use crate::bugs::{validate_template, ExternalBug};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::matching::foreign::{ForeignMatchAnalyzer, Representative};
use crate::matching::matcher::Matcher;
use crate::matching::models::{FindSignaturesResult, MatchResult};
use crate::metrics::{
    ASSIGNMENTS_TOTAL, BUCKETS_CREATED_TOTAL, FOREIGN_LIMIT_EXCEEDED_TOTAL,
    MATCH_DURATION_SECONDS, MATCH_QUERIES_TOTAL, NORMALIZATION_FAILURES_TOTAL,
};
use crate::models::{Bucket, CrashEntry, RawCrash, TriageState};
use crate::normalizer::{CrashNormalizer, NormalizationError, NormalizedCrash};
use crate::presentation::FindSignaturesView;
use crate::signature::{Signature, SignatureDiff};
use crate::state::store::validate_new_bucket;
use crate::state::{BucketFilter, SignatureStore};
use dashmap::DashMap;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Coordinates store, normalizer, matcher and foreign-match analyzer
///
/// Searching is read-only. Every mutation goes through an explicit
/// operation (`triage_crash`, `assign`, `request_new_bucket`,
/// `create_bucket_from_crash`, `link_bug`).
pub struct TriageService {
    store: Arc<dyn SignatureStore>,
    normalizer: CrashNormalizer,
    matcher: Matcher,
    analyzer: ForeignMatchAnalyzer,
    signature_frames: usize,

    /// Normalized crashes by crash id; raw crash data never changes
    normalized: DashMap<u64, Option<NormalizedCrash>>,
}

impl TriageService {
    /// Create a new triage service
    pub fn new(store: Arc<dyn SignatureStore>, config: &Config) -> Result<Self> {
        config.validate_settings()?;

        Ok(Self {
            store,
            normalizer: CrashNormalizer::new(&config.normalizer)?,
            matcher: Matcher::new(config.matching.clone()),
            analyzer: ForeignMatchAnalyzer::new(config.foreign.clone()),
            signature_frames: config.matching.signature_frames,
            normalized: DashMap::new(),
        })
    }

    pub fn store(&self) -> &Arc<dyn SignatureStore> {
        &self.store
    }

    /// Store a new crash report
    pub async fn submit_crash(&self, raw: RawCrash) -> Result<CrashEntry> {
        let crash = self.store.create_crash(raw).await?;
        info!(crash_id = crash.id, "Crash submitted");
        Ok(crash)
    }

    /// Parse a crash into its comparable form
    pub fn normalize(
        &self,
        crash: &CrashEntry,
    ) -> std::result::Result<NormalizedCrash, NormalizationError> {
        self.normalizer.normalize(crash)
    }

    async fn load_crash(&self, crash_id: u64) -> Result<CrashEntry> {
        self.store
            .get_crash(crash_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Crash {} not found", crash_id)))
    }

    /// View a bucket by id
    pub async fn get_bucket(&self, bucket_id: u64) -> Result<Bucket> {
        self.store
            .get_bucket(bucket_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Bucket {} not found", bucket_id)))
    }

    /// Buckets by id set (empty = all)
    pub async fn list_buckets(&self, ids: &[u64]) -> Result<Vec<Bucket>> {
        self.store.list_buckets(&BucketFilter::by_ids(ids.to_vec())).await
    }

    /// Normalized representative of each non-empty bucket
    async fn representatives(&self, buckets: &[Bucket]) -> Result<Vec<Representative>> {
        let mut representatives = Vec::with_capacity(buckets.len());

        for bucket in buckets.iter().filter(|b| !b.is_empty()) {
            let Some(crash) = self.store.representative_crash(bucket.id).await? else {
                continue;
            };

            let normalized = self
                .normalized
                .entry(crash.id)
                .or_insert_with(|| match self.normalizer.normalize(&crash) {
                    Ok(normalized) => Some(normalized),
                    Err(e) => {
                        debug!(
                            bucket_id = bucket.id,
                            crash_id = crash.id,
                            error = %e,
                            "Representative crash cannot be normalized, bucket not considered"
                        );
                        None
                    }
                })
                .clone();

            if let Some(crash) = normalized {
                representatives.push(Representative {
                    bucket_id: bucket.id,
                    crash,
                });
            }
        }

        Ok(representatives)
    }

    /// Search buckets for a crash without changing anything
    pub async fn find_signatures(&self, crash_id: u64) -> Result<FindSignaturesResult> {
        let started = Instant::now();
        let crash = self.load_crash(crash_id).await?;

        let result = match self.normalizer.normalize(&crash) {
            Ok(normalized) => self.search(&normalized).await?,
            Err(e) => {
                NORMALIZATION_FAILURES_TOTAL
                    .with_label_values(&[normalization_failure_kind(&e)])
                    .inc();
                warn!(crash_id = crash_id, error = %e, "Crash is unbucketable");
                FindSignaturesResult::Unbucketable {
                    crash_id,
                    reason: e.to_string(),
                }
            }
        };

        MATCH_QUERIES_TOTAL
            .with_label_values(&[result.outcome()])
            .inc();
        MATCH_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());

        info!(
            crash_id = crash_id,
            outcome = result.outcome(),
            candidates = result.results().len(),
            "Signature search completed"
        );

        Ok(result)
    }

    /// Search and map the result onto display records
    pub async fn find_signatures_view(&self, crash_id: u64) -> Result<FindSignaturesView> {
        let result = self.find_signatures(crash_id).await?;
        let ids: Vec<u64> = result.results().iter().map(|r| r.bucket_id).collect();
        let buckets = if ids.is_empty() {
            Vec::new()
        } else {
            self.list_buckets(&ids).await?
        };
        Ok(FindSignaturesView::render(&result, &buckets))
    }

    /// Rank and analyze on the blocking pool; both fan out over rayon.
    async fn search(&self, crash: &NormalizedCrash) -> Result<FindSignaturesResult> {
        let crash_id = crash.crash_id;
        let buckets = self.store.list_buckets(&BucketFilter::default()).await?;

        let (buckets, candidates) = tokio::task::spawn_blocking({
            let matcher = self.matcher.clone();
            let crash = crash.clone();
            move || {
                let candidates = matcher.rank(&crash, &buckets);
                (buckets, candidates)
            }
        })
        .await
        .map_err(|e| AppError::Internal(format!("Ranking task failed: {}", e)))?;

        if candidates.is_empty() {
            return Ok(FindSignaturesResult::NoMatch { crash_id });
        }

        let representatives = self.representatives(&buckets).await?;
        let exact: HashSet<u64> = candidates
            .iter()
            .filter(|c| c.is_exact())
            .map(|c| c.bucket_id)
            .collect();
        let any_exact = !exact.is_empty();

        let results = tokio::task::spawn_blocking({
            let analyzer = self.analyzer.clone();
            let crash = crash.clone();
            move || {
                let by_id: HashMap<u64, &Bucket> = buckets.iter().map(|b| (b.id, b)).collect();
                candidates
                    .par_iter()
                    .filter_map(|candidate| {
                        let bucket = by_id.get(&candidate.bucket_id)?;
                        let foreign = analyzer.analyze(bucket, &crash, &representatives, &exact);
                        if foreign.limit_exceeded {
                            FOREIGN_LIMIT_EXCEEDED_TOTAL.inc();
                        }
                        Some(MatchResult {
                            bucket_id: candidate.bucket_id,
                            difference_count: candidate.difference_count,
                            foreign,
                        })
                    })
                    .collect::<Vec<MatchResult>>()
            }
        })
        .await
        .map_err(|e| AppError::Internal(format!("Foreign match task failed: {}", e)))?;

        Ok(if any_exact {
            FindSignaturesResult::Matched {
                crash_id,
                matches: results,
            }
        } else {
            FindSignaturesResult::Similar {
                crash_id,
                similar: results,
            }
        })
    }

    /// Search and record the outcome on the crash.
    ///
    /// The best bucket becomes the crash's candidate; unbucketable crashes
    /// go to manual triage. Assigned crashes are left untouched.
    pub async fn triage_crash(&self, crash_id: u64) -> Result<FindSignaturesResult> {
        let result = self.find_signatures(crash_id).await?;
        let crash = self.load_crash(crash_id).await?;

        let next = match &result {
            FindSignaturesResult::Matched { .. } | FindSignaturesResult::Similar { .. } => result
                .best()
                .map(|best| TriageState::Candidate {
                    bucket_id: best.bucket_id,
                }),
            FindSignaturesResult::Unbucketable { reason, .. } => Some(TriageState::ManualTriage {
                reason: reason.clone(),
            }),
            FindSignaturesResult::NoMatch { .. } => None,
        };

        if let Some(next) = next {
            if crash.state.can_transition_to(&next) {
                self.store.transition_crash(crash_id, next).await?;
            } else {
                debug!(
                    crash_id = crash_id,
                    state = %crash.state,
                    "Triage suggestion not recorded"
                );
            }
        }

        Ok(result)
    }

    /// Assign a crash to a bucket
    pub async fn assign(&self, crash_id: u64, bucket_id: u64) -> Result<Bucket> {
        let crash = self.load_crash(crash_id).await?;
        self.get_bucket(bucket_id).await?;

        // A direct assignment confirms the bucket as the crash's candidate
        if crash.state == TriageState::Unassigned {
            self.store
                .transition_crash(crash_id, TriageState::Candidate { bucket_id })
                .await?;
        }

        let bucket = self.store.assign_crash(crash_id, bucket_id).await?;
        ASSIGNMENTS_TOTAL.inc();
        Ok(bucket)
    }

    /// Mark a crash as needing a new bucket
    pub async fn request_new_bucket(&self, crash_id: u64) -> Result<CrashEntry> {
        let crash = self
            .store
            .transition_crash(crash_id, TriageState::NewBucketRequested)
            .await?;
        info!(crash_id = crash_id, "New bucket requested");
        Ok(crash)
    }

    /// Create a bucket whose signature is derived from the crash and
    /// assign the crash to it
    pub async fn create_bucket_from_crash(
        &self,
        crash_id: u64,
        short_description: Option<String>,
    ) -> Result<Bucket> {
        let crash = self.load_crash(crash_id).await?;
        let normalized = self.normalizer.normalize(&crash)?;
        let signature = Signature::from_crash(&normalized, self.signature_frames);

        let short_description = short_description.unwrap_or_else(|| {
            normalized
                .top_frame()
                .map(|frame| format!("Crash in {}", frame.function))
                .unwrap_or_else(|| format!("Crash {}", crash_id))
        });

        validate_new_bucket(&short_description, &signature)?;

        if !crash.state.can_transition_to(&TriageState::Assigned { bucket_id: 0 }) {
            self.store
                .transition_crash(crash_id, TriageState::NewBucketRequested)
                .await?;
        }

        let bucket = self.store.create_bucket(short_description, signature).await?;
        BUCKETS_CREATED_TOTAL.inc();
        info!(bucket_id = bucket.id, crash_id = crash_id, "Bucket created from crash");

        match self.store.assign_crash(crash_id, bucket.id).await {
            Ok(bucket) => {
                ASSIGNMENTS_TOTAL.inc();
                Ok(bucket)
            }
            Err(e) => {
                // Crash was assigned elsewhere in the meantime
                warn!(
                    bucket_id = bucket.id,
                    crash_id = crash_id,
                    error = %e,
                    "Removing unused bucket"
                );
                self.store.delete_bucket(bucket.id).await?;
                Err(e)
            }
        }
    }

    /// Replace a bucket's signature
    pub async fn update_signature(&self, bucket_id: u64, signature: Signature) -> Result<Bucket> {
        signature.validate()?;
        let mut bucket = self.get_bucket(bucket_id).await?;
        bucket.signature = signature;
        bucket.updated_at = chrono::Utc::now();
        self.store.update_bucket(&bucket).await?;
        self.get_bucket(bucket_id).await
    }

    /// Link a bucket to an external bug
    pub async fn link_bug(&self, bucket_id: u64, bug: ExternalBug) -> Result<Bucket> {
        validate_template(&bug.provider.url_template)?;

        let mut bucket = self.get_bucket(bucket_id).await?;
        bucket.link_bug(bug);
        self.store.update_bucket(&bucket).await?;

        info!(bucket_id = bucket_id, "Bug linked to bucket");
        self.get_bucket(bucket_id).await
    }

    /// Symptom by symptom comparison of a bucket's signature and a crash
    pub async fn signature_diff(&self, bucket_id: u64, crash_id: u64) -> Result<SignatureDiff> {
        let bucket = self.get_bucket(bucket_id).await?;
        let crash = self.load_crash(crash_id).await?;
        let normalized = self.normalizer.normalize(&crash)?;
        Ok(bucket.signature.diff(&normalized, self.matcher.config().metric))
    }

    /// Bucket signature generalized so it also matches the crash
    pub async fn propose_signature(
        &self,
        bucket_id: u64,
        crash_id: u64,
    ) -> Result<Option<Signature>> {
        let bucket = self.get_bucket(bucket_id).await?;
        let crash = self.load_crash(crash_id).await?;
        let normalized = self.normalizer.normalize(&crash)?;
        Ok(bucket.signature.fit(&normalized))
    }
}

fn normalization_failure_kind(error: &NormalizationError) -> &'static str {
    match error {
        NormalizationError::MissingTrace => "missing_trace",
        NormalizationError::CorruptTrace { .. } => "corrupt_trace",
        NormalizationError::NoUsableFrames => "no_usable_frames",
    }
}
