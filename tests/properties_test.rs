//! Property tests for the matching primitives

use crash_triage::{
    matching::{classify, percentage, ForeignColor, ForeignMatchConfig, Matcher, MatchingConfig},
    models::Bucket,
    normalizer::{NormalizedCrash, StackFrame},
    signature::{DistanceMetric, Signature},
};
use proptest::prelude::*;

fn crash_strategy() -> impl Strategy<Value = NormalizedCrash> {
    (
        prop::collection::vec("fn_[a-d]", 1..10),
        prop::option::of(0u64..64),
    )
        .prop_map(|(names, crash_address)| NormalizedCrash {
            crash_id: 1,
            frames: names.into_iter().map(StackFrame::new).collect(),
            crash_address,
            output: Vec::new(),
        })
}

proptest! {
    #[test]
    fn test_percentage_stays_in_range(considered in 0usize..500, count in 0usize..600) {
        let pct = percentage(count, considered);
        prop_assert!((0.0..=100.0).contains(&pct));
    }

    #[test]
    fn test_percentage_is_monotone(considered in 1usize..500, a in 0usize..500, b in 0usize..500) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(percentage(low, considered) <= percentage(high, considered));
    }

    #[test]
    fn test_classification_follows_watermarks(pct in 0.0f64..=100.0) {
        let config = ForeignMatchConfig::default();
        let color = classify(pct, &config);
        let expected = if pct < config.low_watermark {
            ForeignColor::Green
        } else if pct > config.high_watermark {
            ForeignColor::Red
        } else {
            ForeignColor::Yellow
        };
        prop_assert_eq!(color, expected);
    }

    #[test]
    fn test_signature_from_crash_matches_it(crash in crash_strategy(), limit in 1usize..12) {
        let signature = Signature::from_crash(&crash, limit);
        prop_assert_eq!(signature.distance(&crash, DistanceMetric::EditDistance), 0);
        prop_assert!(signature.matches(&crash));
    }

    #[test]
    fn test_fitted_signature_matches_target(
        source in crash_strategy(),
        target in crash_strategy(),
    ) {
        let signature = Signature::from_crash(&source, 8);
        if let Some(fitted) = signature.fit(&target) {
            prop_assert!(fitted.matches(&target));
        }
    }

    #[test]
    fn test_full_signature_has_zero_set_difference(crash in crash_strategy()) {
        let signature = Signature::from_crash(&crash, crash.frames.len());
        prop_assert_eq!(signature.distance(&crash, DistanceMetric::SymmetricDifference), 0);
    }

    #[test]
    fn test_ranked_buckets_stay_under_threshold(
        crash in crash_strategy(),
        members in prop::collection::vec(crash_strategy(), 0..20),
        max_distance in 0u32..6,
    ) {
        let buckets: Vec<Bucket> = members
            .iter()
            .enumerate()
            .map(|(i, member)| {
                Bucket::new(i as u64 + 1, format!("Bucket {}", i), Signature::from_crash(member, 8))
            })
            .collect();
        let matcher = Matcher::new(MatchingConfig {
            max_distance,
            ..MatchingConfig::default()
        });

        let ranked = matcher.rank(&crash, &buckets);
        prop_assert!(ranked.iter().all(|c| c.difference_count <= max_distance));

        let exact = Bucket::new(999, "Exact".to_string(), Signature::from_crash(&crash, 8));
        let mut with_exact = buckets.clone();
        with_exact.push(exact);
        let ranked = matcher.rank(&crash, &with_exact);
        prop_assert!(ranked.iter().any(|c| c.bucket_id == 999));
        prop_assert!(ranked.iter().all(|c| c.difference_count == 0));
    }
}
