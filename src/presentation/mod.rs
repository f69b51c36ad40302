//! Flat display records for the "find matching signature" page.
//!
//! Pure mapping from search results and bucket data. Field names follow the
//! camelCase contract the page template consumes.

use crate::bugs::ExternalBug;
use crate::matching::{FindSignaturesResult, ForeignColor, MatchResult};
use crate::models::Bucket;
use serde::Serialize;
use std::collections::HashMap;

/// Bug tracker type as rendered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalTypeDisplay {
    pub name: String,
    pub url_template: String,
}

/// Linked bug as rendered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BugDisplay {
    pub external_id: String,
    pub external_type: ExternalTypeDisplay,
    pub closed: bool,

    /// Absent when the provider's template is malformed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl From<&ExternalBug> for BugDisplay {
    fn from(bug: &ExternalBug) -> Self {
        let url = match bug.url() {
            Ok(url) => Some(url.to_string()),
            Err(e) => {
                tracing::debug!(
                    external_id = %bug.external_id,
                    provider = %bug.provider.name,
                    error = %e,
                    "Bug link not rendered"
                );
                None
            }
        };

        Self {
            external_id: bug.external_id.clone(),
            external_type: ExternalTypeDisplay {
                name: bug.provider.name.clone(),
                url_template: bug.provider.url_template.clone(),
            },
            closed: bug.closed,
            url,
        }
    }
}

/// One row of the bucket table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketDisplayRecord {
    pub id: u64,
    pub short_description: String,

    /// Difference count between the bucket's signature and the crash
    pub off_count: u32,

    pub foreign_match_percentage: f64,
    pub foreign_color: ForeignColor,
    pub foreign_match_count: usize,
    pub foreign_match_limit_exceeded: bool,

    /// Comma-joined ids of the other buckets the signature would capture
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_to_others: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bug: Option<BugDisplay>,
}

impl BucketDisplayRecord {
    pub fn new(result: &MatchResult, bucket: &Bucket) -> Self {
        let foreign = &result.foreign;
        let link_to_others = if foreign.limit_exceeded || foreign.sibling_ids.is_empty() {
            None
        } else {
            Some(
                foreign
                    .sibling_ids
                    .iter()
                    .map(u64::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
            )
        };

        Self {
            id: bucket.id,
            short_description: bucket.short_description.clone(),
            off_count: result.difference_count,
            foreign_match_percentage: foreign.percentage,
            foreign_color: foreign.color,
            foreign_match_count: foreign.count,
            foreign_match_limit_exceeded: foreign.limit_exceeded,
            link_to_others,
            bug: bucket.bug.as_ref().map(BugDisplay::from),
        }
    }
}

/// Whole page
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindSignaturesView {
    pub crash_id: u64,

    /// First exact match, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matching_bucket: Option<BucketDisplayRecord>,

    /// Remaining exact matches, or the similar buckets when nothing matched
    pub similar_buckets: Vec<BucketDisplayRecord>,

    /// Crash to seed a new bucket from when nothing matched exactly
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_bucket_seed: Option<u64>,

    /// Why the crash needs manual triage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_triage_reason: Option<String>,
}

impl FindSignaturesView {
    /// Build the page from a search result and the buckets it refers to.
    ///
    /// Results whose bucket is missing from `buckets` are left out.
    pub fn render(result: &FindSignaturesResult, buckets: &[Bucket]) -> Self {
        let by_id: HashMap<u64, &Bucket> = buckets.iter().map(|b| (b.id, b)).collect();
        let mut records = result
            .results()
            .iter()
            .filter_map(|r| by_id.get(&r.bucket_id).map(|b| BucketDisplayRecord::new(r, b)));

        let crash_id = result.crash_id();

        match result {
            FindSignaturesResult::Matched { .. } => {
                let matching_bucket = records.next();
                Self {
                    crash_id,
                    matching_bucket,
                    similar_buckets: records.collect(),
                    create_bucket_seed: None,
                    manual_triage_reason: None,
                }
            }
            FindSignaturesResult::Similar { .. } | FindSignaturesResult::NoMatch { .. } => Self {
                crash_id,
                matching_bucket: None,
                similar_buckets: records.collect(),
                create_bucket_seed: Some(crash_id),
                manual_triage_reason: None,
            },
            FindSignaturesResult::Unbucketable { reason, .. } => Self {
                crash_id,
                matching_bucket: None,
                similar_buckets: Vec::new(),
                create_bucket_seed: None,
                manual_triage_reason: Some(reason.clone()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bugs::BugProvider;
    use crate::matching::ForeignMatchStats;
    use crate::signature::{FramePattern, Signature, Symptom};

    fn bucket(id: u64) -> Bucket {
        Bucket::new(
            id,
            format!("Crash {}", id),
            Signature::new(vec![Symptom::StackFrames {
                function_names: vec![FramePattern::parse("main").unwrap()],
            }]),
        )
    }

    fn result(
        bucket_id: u64,
        difference_count: u32,
        siblings: Vec<u64>,
        limit: bool,
    ) -> MatchResult {
        MatchResult {
            bucket_id,
            difference_count,
            foreign: ForeignMatchStats {
                count: if limit { 16 } else { siblings.len() },
                considered: 40,
                percentage: 7.5,
                color: ForeignColor::Green,
                limit_exceeded: limit,
                sibling_ids: siblings,
            },
        }
    }

    #[test]
    fn test_matched_view() {
        let mut linked = bucket(5);
        linked.link_bug(ExternalBug::new(
            "1234",
            BugProvider {
                name: "bugzilla".to_string(),
                url_template: "https://bugzilla.example/show_bug.cgi?id=%s".to_string(),
            },
        ));

        let search = FindSignaturesResult::Matched {
            crash_id: 42,
            matches: vec![result(5, 0, vec![7, 9, 11], false)],
        };
        let view = FindSignaturesView::render(&search, &[linked]);

        let json = serde_json::to_value(&view).unwrap();
        let record = &json["matchingBucket"];
        assert_eq!(record["id"], 5);
        assert_eq!(record["offCount"], 0);
        assert_eq!(record["foreignColor"], "green");
        assert_eq!(record["linkToOthers"], "7,9,11");
        assert_eq!(
            record["bug"]["url"],
            "https://bugzilla.example/show_bug.cgi?id=1234"
        );
        assert_eq!(
            record["bug"]["externalType"]["urlTemplate"],
            "https://bugzilla.example/show_bug.cgi?id=%s"
        );
        assert!(json.get("createBucketSeed").is_none());
        assert_eq!(json["similarBuckets"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_limit_exceeded_has_no_link() {
        let record = BucketDisplayRecord::new(&result(3, 2, vec![], true), &bucket(3));
        assert!(record.foreign_match_limit_exceeded);
        assert_eq!(record.foreign_match_count, 16);
        assert!(record.link_to_others.is_none());
    }

    #[test]
    fn test_malformed_template_omits_url() {
        let mut broken = bucket(3);
        broken.link_bug(ExternalBug::new(
            "9",
            BugProvider {
                name: "tracker".to_string(),
                url_template: "https://tracker.example/issues".to_string(),
            },
        ));

        let record = BucketDisplayRecord::new(&result(3, 1, vec![], false), &broken);
        let bug = record.bug.unwrap();
        assert_eq!(bug.external_id, "9");
        assert!(bug.url.is_none());
    }

    #[test]
    fn test_no_match_offers_seed() {
        let view = FindSignaturesView::render(&FindSignaturesResult::NoMatch { crash_id: 8 }, &[]);
        assert!(view.matching_bucket.is_none());
        assert!(view.similar_buckets.is_empty());
        assert_eq!(view.create_bucket_seed, Some(8));
    }

    #[test]
    fn test_unbucketable_view() {
        let view = FindSignaturesView::render(
            &FindSignaturesResult::Unbucketable {
                crash_id: 8,
                reason: "crash has no trace data".to_string(),
            },
            &[],
        );
        assert_eq!(
            view.manual_triage_reason.as_deref(),
            Some("crash has no trace data")
        );
        assert!(view.create_bucket_seed.is_none());
    }
}
