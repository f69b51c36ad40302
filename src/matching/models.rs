use crate::signature::DistanceMetric;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use validator::Validate;

/// Candidate ranking configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MatchingConfig {
    /// Largest difference count accepted as similar
    #[serde(default = "default_max_distance")]
    #[validate(range(max = 64))]
    pub max_distance: u32,

    /// How frame symptoms are compared
    #[serde(default)]
    pub metric: DistanceMetric,

    /// Skip buckets whose first literal frame differs from the crash's top frame
    #[serde(default)]
    pub prefilter_top_frame: bool,

    /// Cap on returned candidates (0 = unlimited)
    #[serde(default)]
    pub max_results: usize,

    /// Frames copied into a signature created from a crash
    #[serde(default = "default_signature_frames")]
    #[validate(range(min = 1, max = 64))]
    pub signature_frames: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_distance: default_max_distance(),
            metric: DistanceMetric::default(),
            prefilter_top_frame: false,
            max_results: 0,
            signature_frames: default_signature_frames(),
        }
    }
}

/// Foreign-match analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ForeignMatchConfig {
    /// Percentages strictly below are green
    #[serde(default = "default_low_watermark")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub low_watermark: f64,

    /// Percentages strictly above are red
    #[serde(default = "default_high_watermark")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub high_watermark: f64,

    /// Foreign matches counted before scanning stops
    #[serde(default = "default_display_cap")]
    #[validate(range(min = 1))]
    pub display_cap: usize,
}

impl Default for ForeignMatchConfig {
    fn default() -> Self {
        Self {
            low_watermark: default_low_watermark(),
            high_watermark: default_high_watermark(),
            display_cap: default_display_cap(),
        }
    }
}

fn default_max_distance() -> u32 {
    5
}

fn default_signature_frames() -> usize {
    8
}

fn default_low_watermark() -> f64 {
    25.0
}

fn default_high_watermark() -> f64 {
    75.0
}

fn default_display_cap() -> usize {
    15
}

/// A bucket accepted by the matcher for one crash
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub bucket_id: u64,
    pub difference_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl Candidate {
    pub fn is_exact(&self) -> bool {
        self.difference_count == 0
    }
}

/// Traffic-light rating of a foreign-match percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ForeignColor {
    Green,
    Yellow,
    Red,
}

/// How broadly a proposed signature matches other buckets' crashes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForeignMatchStats {
    /// Foreign matches found (truncated when `limit_exceeded`)
    pub count: usize,

    /// Other buckets whose representative was evaluated
    pub considered: usize,

    /// `count / considered * 100`, rounded to two decimals
    pub percentage: f64,

    pub color: ForeignColor,

    /// Scanning stopped at the display cap
    pub limit_exceeded: bool,

    /// Buckets matched by the proposed signature (empty when `limit_exceeded`)
    pub sibling_ids: Vec<u64>,
}

/// One similar bucket with its foreign-match metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub bucket_id: u64,
    pub difference_count: u32,
    pub foreign: ForeignMatchStats,
}

/// Outcome of a signature search for one crash
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FindSignaturesResult {
    /// At least one bucket matches exactly
    Matched {
        crash_id: u64,
        matches: Vec<MatchResult>,
    },

    /// No exact match, but buckets within the distance threshold
    Similar {
        crash_id: u64,
        similar: Vec<MatchResult>,
    },

    /// Nothing within the threshold
    NoMatch { crash_id: u64 },

    /// Crash could not be normalized and needs manual triage
    Unbucketable { crash_id: u64, reason: String },
}

impl FindSignaturesResult {
    pub fn crash_id(&self) -> u64 {
        match self {
            FindSignaturesResult::Matched { crash_id, .. }
            | FindSignaturesResult::Similar { crash_id, .. }
            | FindSignaturesResult::NoMatch { crash_id }
            | FindSignaturesResult::Unbucketable { crash_id, .. } => *crash_id,
        }
    }

    /// Best-ranked bucket, if any
    pub fn best(&self) -> Option<&MatchResult> {
        self.results().first()
    }

    pub fn results(&self) -> &[MatchResult] {
        match self {
            FindSignaturesResult::Matched { matches, .. } => matches,
            FindSignaturesResult::Similar { similar, .. } => similar,
            _ => &[],
        }
    }

    /// Label used for metrics and logs
    pub fn outcome(&self) -> &'static str {
        match self {
            FindSignaturesResult::Matched { .. } => "matched",
            FindSignaturesResult::Similar { .. } => "similar",
            FindSignaturesResult::NoMatch { .. } => "no_match",
            FindSignaturesResult::Unbucketable { .. } => "unbucketable",
        }
    }
}
