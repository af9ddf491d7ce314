//! Property-based tests for scoring and item invariants using proptest.
//!
//! - Importance always lands in [0, 1], whatever the caller passes
//! - Decay never raises importance and never leaves the unit interval
//! - Min-max normalization keeps order and pins the best result to 1.0
//! - Expiry is exact at the TTL boundary
//! - Triple identity ignores case and whitespace

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    use crate::memory::scoring::{
        boosted_importance, decayed_importance, keyword_score, min_max_normalize,
    };
    use crate::memory::types::{MemoryItem, ScoredMemory, Tier, Triple};

    fn importance() -> impl Strategy<Value = f64> {
        prop_oneof![
            Just(0.0),
            Just(1.0),
            Just(f64::NAN),
            -10.0f64..10.0f64,
            0.0f64..=1.0f64,
        ]
    }

    fn concept() -> impl Strategy<Value = String> {
        "[A-Za-z]{1,8}( [A-Za-z]{1,8}){0,2}"
    }

    proptest! {
        #[test]
        fn importance_is_clamped(value in importance()) {
            let item = MemoryItem::new(Tier::Working, "note").with_importance(value);
            prop_assert!((0.0..=1.0).contains(&item.importance));
        }

        #[test]
        fn boost_never_lowers_importance(value in 0.0f64..=1.0f64) {
            let boosted = boosted_importance(value);
            prop_assert!(boosted >= value);
            prop_assert!(boosted <= 1.0);
        }

        #[test]
        fn decay_is_monotone(
            base in 0.0f64..=1.0f64,
            hours in 0.0f64..10_000.0f64,
            extra in 0.0f64..1_000.0f64,
            factor in 0.01f64..=1.0f64
        ) {
            let sooner = decayed_importance(base, hours, factor);
            let later = decayed_importance(base, hours + extra, factor);
            prop_assert!(sooner <= base + 1e-12);
            prop_assert!(later <= sooner + 1e-12);
            prop_assert!(later >= 0.0);
        }

        #[test]
        fn keyword_score_is_bounded(query in ".{0,40}", content in ".{0,200}") {
            let score = keyword_score(&query, &content);
            prop_assert!((0.0..=1.0).contains(&score), "score {} out of range", score);
        }

        #[test]
        fn normalization_preserves_order(scores in prop::collection::vec(-5.0f64..5.0f64, 1..20)) {
            let mut results: Vec<ScoredMemory> = scores
                .iter()
                .map(|&s| ScoredMemory::new(MemoryItem::new(Tier::Semantic, "fact"), s))
                .collect();
            min_max_normalize(&mut results);

            for r in &results {
                prop_assert!((0.0..=1.0).contains(&r.score));
            }
            let best = results.iter().map(|r| r.score).fold(f64::MIN, f64::max);
            prop_assert_eq!(best, 1.0);

            for i in 0..scores.len() {
                for j in 0..scores.len() {
                    if scores[i] < scores[j] {
                        prop_assert!(results[i].score <= results[j].score);
                    }
                }
            }
        }

        #[test]
        fn expiry_is_exact_at_ttl(ttl_secs in 1i64..100_000, offset_secs in 0i64..200_000) {
            let created = Utc::now();
            let item = MemoryItem::new(Tier::Working, "scratch")
                .with_expires_at(created + Duration::seconds(ttl_secs));
            let now = created + Duration::seconds(offset_secs);
            prop_assert_eq!(item.is_expired_at(now), offset_secs >= ttl_secs);
        }

        #[test]
        fn triple_identity_ignores_case_and_spacing(
            subject in concept(),
            predicate in concept(),
            object in concept()
        ) {
            let plain = Triple::new(&subject, &predicate, &object);
            let noisy = Triple::new(
                format!("  {}  ", subject.to_uppercase()),
                predicate.replace(' ', "   "),
                format!("\t{}", object),
            );
            prop_assert_eq!(&plain, &noisy);
            prop_assert_eq!(plain.id(), noisy.id());
            prop_assert!(plain.is_valid());
        }
    }
}
