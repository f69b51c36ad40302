use crate::matching::models::{ForeignColor, ForeignMatchConfig, ForeignMatchStats};
use crate::models::Bucket;
use crate::normalizer::NormalizedCrash;
use std::collections::HashSet;
use tracing::debug;

/// Normalized earliest member of a bucket, computed once per query
#[derive(Debug, Clone)]
pub struct Representative {
    pub bucket_id: u64,
    pub crash: NormalizedCrash,
}

/// Share of foreign matches in percent, rounded to two decimals
pub fn percentage(count: usize, considered: usize) -> f64 {
    if considered == 0 {
        return 0.0;
    }
    let ratio = count.min(considered) as f64 / considered as f64;
    (ratio * 10_000.0).round() / 100.0
}

/// Map a percentage onto the traffic light.
///
/// Both watermarks belong to the yellow band.
pub fn classify(percentage: f64, config: &ForeignMatchConfig) -> ForeignColor {
    if percentage < config.low_watermark {
        ForeignColor::Green
    } else if percentage > config.high_watermark {
        ForeignColor::Red
    } else {
        ForeignColor::Yellow
    }
}

/// Measures how broadly a bucket's signature, fitted to the crash, would
/// also capture crashes that already live in other buckets
#[derive(Debug, Clone, Default)]
pub struct ForeignMatchAnalyzer {
    config: ForeignMatchConfig,
}

impl ForeignMatchAnalyzer {
    pub fn new(config: ForeignMatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ForeignMatchConfig {
        &self.config
    }

    /// Foreign-match statistics for `bucket`.
    ///
    /// `representatives` holds one normalized crash per non-empty bucket;
    /// `bucket` itself and every id in `exact_matches` are skipped.
    pub fn analyze(
        &self,
        bucket: &Bucket,
        crash: &NormalizedCrash,
        representatives: &[Representative],
        exact_matches: &HashSet<u64>,
    ) -> ForeignMatchStats {
        let proposed = bucket
            .signature
            .fit(crash)
            .unwrap_or_else(|| bucket.signature.clone());

        let others: Vec<&Representative> = representatives
            .iter()
            .filter(|r| r.bucket_id != bucket.id && !exact_matches.contains(&r.bucket_id))
            .collect();
        let considered = others.len();

        let mut sibling_ids = Vec::new();
        let mut limit_exceeded = false;

        for other in others {
            if proposed.matches(&other.crash) {
                sibling_ids.push(other.bucket_id);
                if sibling_ids.len() > self.config.display_cap {
                    limit_exceeded = true;
                    break;
                }
            }
        }

        let count = sibling_ids.len();
        let percentage = percentage(count, considered);
        let color = classify(percentage, &self.config);

        if limit_exceeded {
            sibling_ids.clear();
        }

        debug!(
            bucket_id = bucket.id,
            crash_id = crash.crash_id,
            foreign_matches = count,
            considered = considered,
            limit_exceeded = limit_exceeded,
            "Foreign matches analyzed"
        );

        ForeignMatchStats {
            count,
            considered,
            percentage,
            color,
            limit_exceeded,
            sibling_ids,
        }
    }
}
