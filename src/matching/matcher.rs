use crate::matching::models::{Candidate, MatchingConfig};
use crate::models::Bucket;
use crate::normalizer::NormalizedCrash;
use crate::signature::DistanceMetric;
use rayon::prelude::*;
use std::cmp::Ordering;
use tracing::debug;

/// Ranks buckets by how closely their signature fits a crash
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    config: MatchingConfig,
}

impl Matcher {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Difference count between a bucket's signature and the crash
    pub fn difference_count(&self, bucket: &Bucket, crash: &NormalizedCrash) -> u32 {
        bucket.signature.distance(crash, self.config.metric)
    }

    /// Cheap checks that rule a bucket out without computing the distance
    fn passes_prefilter(&self, bucket: &Bucket, crash: &NormalizedCrash) -> bool {
        if self.config.metric == DistanceMetric::EditDistance
            && bucket.signature.distance_lower_bound(crash.frames.len()) > self.config.max_distance
        {
            return false;
        }

        if self.config.prefilter_top_frame {
            let first = bucket.signature.stack_frames().and_then(|p| p.first());
            if let (Some(pattern), Some(top)) = (first, crash.top_frame()) {
                if !pattern.is_wildcard() && !pattern.accepts(&top.function) {
                    return false;
                }
            }
        }

        true
    }

    /// Rank `buckets` against `crash`.
    ///
    /// Only buckets within `max_distance` are returned. When any bucket
    /// matches exactly, only the exact matches are returned. Order is
    /// difference ascending, most recently updated first, then id.
    pub fn rank(&self, crash: &NormalizedCrash, buckets: &[Bucket]) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = buckets
            .par_iter()
            .filter(|bucket| self.passes_prefilter(bucket, crash))
            .filter_map(|bucket| {
                let difference_count = self.difference_count(bucket, crash);
                (difference_count <= self.config.max_distance).then(|| Candidate {
                    bucket_id: bucket.id,
                    difference_count,
                    updated_at: bucket.updated_at,
                })
            })
            .collect();

        if candidates.iter().any(Candidate::is_exact) {
            candidates.retain(Candidate::is_exact);
        }

        candidates.sort_by(compare_candidates);

        if self.config.max_results > 0 {
            candidates.truncate(self.config.max_results);
        }

        debug!(
            crash_id = crash.crash_id,
            buckets = buckets.len(),
            candidates = candidates.len(),
            "Ranked buckets"
        );

        candidates
    }
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    a.difference_count
        .cmp(&b.difference_count)
        .then_with(|| b.updated_at.cmp(&a.updated_at))
        .then_with(|| a.bucket_id.cmp(&b.bucket_id))
}
