//! Deterministic listing order for public detective search.
//!
//! Ordering is a fixed pipeline: manual rank, then featured, then automatic score, then age and
//! id. Hidden records are dropped before any stage runs. Business filters (country, status,
//! search text) are the caller's concern.

mod stages;
mod weights;

pub use weights::ScoreWeights;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{BadgeKind, BadgeSet, DetectiveId, RatingAggregate, VisibilityOverride};

/// Everything the ranking stages read about one detective.
#[derive(Debug, Clone, PartialEq)]
pub struct RankCandidate {
    pub id: DetectiveId,
    pub created_at: DateTime<Utc>,
    pub visibility: VisibilityOverride,
    pub is_paid: bool,
    pub badges: BadgeSet,
    pub is_verified: bool,
    pub rating: RatingAggregate,
}

impl RankCandidate {
    pub fn automatic_score(&self, weights: &ScoreWeights) -> f64 {
        let mut score = weights.tier_weight(self.is_paid, &self.badges);
        if self.is_verified {
            score += weights.verified;
        }
        if self.badges.contains_key(&BadgeKind::BlueTick) {
            score += weights.blue_tick;
        }
        score + weights.rating_weight(&self.rating)
    }
}

/// A candidate with its automatic score computed once for the sort.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: RankCandidate,
    pub score: f64,
}

/// Position in the ranked output, 1-based.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPosition {
    pub detective_id: DetectiveId,
    pub position: usize,
    pub score: f64,
}

/// Order visible candidates. Stable and deterministic for a fixed input set.
pub fn rank_candidates(
    candidates: Vec<RankCandidate>,
    weights: &ScoreWeights,
) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = candidates
        .into_iter()
        .filter(|candidate| candidate.visibility.is_visible)
        .map(|candidate| {
            let score = candidate.automatic_score(weights);
            ScoredCandidate { candidate, score }
        })
        .collect();
    scored.sort_by(stages::compare);
    scored
}

pub fn rank(candidates: Vec<RankCandidate>, weights: &ScoreWeights) -> Vec<DetectiveId> {
    rank_candidates(candidates, weights)
        .into_iter()
        .map(|scored| scored.candidate.id)
        .collect()
}

pub fn positions(ranked: &[ScoredCandidate]) -> Vec<RankedPosition> {
    ranked
        .iter()
        .enumerate()
        .map(|(index, scored)| RankedPosition {
            detective_id: scored.candidate.id.clone(),
            position: index + 1,
            score: scored.score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn candidate(id: &str, age_days: i64) -> RankCandidate {
        RankCandidate {
            id: DetectiveId(id.to_string()),
            created_at: epoch() + Duration::days(age_days),
            visibility: VisibilityOverride::default(),
            is_paid: false,
            badges: BadgeSet::new(),
            is_verified: false,
            rating: RatingAggregate::default(),
        }
    }

    fn ids(values: &[&str]) -> Vec<DetectiveId> {
        values
            .iter()
            .map(|value| DetectiveId(value.to_string()))
            .collect()
    }

    fn superstar(id: &str) -> RankCandidate {
        let mut badges = BadgeSet::new();
        badges.insert(BadgeKind::Pro, true);
        badges.insert(BadgeKind::Recommended, true);
        badges.insert(BadgeKind::BlueTick, true);
        RankCandidate {
            is_paid: true,
            badges,
            is_verified: true,
            rating: RatingAggregate {
                avg: 5.0,
                count: 10_000,
            },
            ..candidate(id, 0)
        }
    }

    #[test]
    fn manual_rank_beats_any_score() {
        let mut pinned = candidate("pinned", 400);
        pinned.visibility.manual_rank = Some(1);
        let mut featured = superstar("featured");
        featured.visibility.is_featured = true;

        let order = rank(
            vec![superstar("star"), featured, pinned],
            &ScoreWeights::STANDARD,
        );
        assert_eq!(order, ids(&["pinned", "featured", "star"]));
    }

    #[test]
    fn manual_rank_ascending_with_age_tie_break() {
        let mut second = superstar("b-second");
        second.visibility.manual_rank = Some(2);
        let mut newer = candidate("a-newer", 1);
        newer.visibility.manual_rank = Some(2);
        let mut first = candidate("first", 5);
        first.visibility.manual_rank = Some(1);

        let order = rank(vec![newer, second, first], &ScoreWeights::STANDARD);
        assert_eq!(order, ids(&["first", "b-second", "a-newer"]));
    }

    #[test]
    fn featured_precedes_higher_score() {
        let mut featured = candidate("b", 10);
        featured.visibility.is_featured = true;
        featured.rating = RatingAggregate { avg: 3.0, count: 4 };
        let mut unfeatured = candidate("c", 0);
        unfeatured.rating = RatingAggregate { avg: 5.0, count: 40 };
        let mut pinned = candidate("a", 20);
        pinned.visibility.manual_rank = Some(1);

        let order = rank(vec![unfeatured, featured, pinned], &ScoreWeights::STANDARD);
        assert_eq!(order, ids(&["a", "b", "c"]));
    }

    #[test]
    fn score_orders_within_tier() {
        let mut verified = candidate("verified", 3);
        verified.is_verified = true;
        let mut paid = candidate("paid", 2);
        paid.is_paid = true;
        let plain = candidate("plain", 1);

        let order = rank(vec![plain, verified, paid], &ScoreWeights::STANDARD);
        assert_eq!(order, ids(&["paid", "verified", "plain"]));
    }

    #[test]
    fn equal_scores_fall_back_to_age_then_id() {
        let order = rank(
            vec![candidate("c", 1), candidate("b", 0), candidate("a", 1)],
            &ScoreWeights::STANDARD,
        );
        assert_eq!(order, ids(&["b", "a", "c"]));
    }

    #[test]
    fn hidden_records_are_excluded() {
        let mut hidden = superstar("hidden");
        hidden.visibility.is_visible = false;
        hidden.visibility.manual_rank = Some(1);

        let order = rank(vec![hidden, candidate("shown", 0)], &ScoreWeights::STANDARD);
        assert_eq!(order, ids(&["shown"]));
    }

    #[test]
    fn ordering_ignores_input_order() {
        let build = || {
            let mut pool = vec![
                superstar("s1"),
                candidate("c1", 3),
                candidate("c2", 3),
                superstar("s2"),
            ];
            pool[1].visibility.is_featured = true;
            pool
        };
        let forward = rank(build(), &ScoreWeights::STANDARD);
        let mut reversed_input = build();
        reversed_input.reverse();
        assert_eq!(forward, rank(reversed_input, &ScoreWeights::STANDARD));
        assert_eq!(forward, ids(&["c1", "s1", "s2", "c2"]));
    }

    #[test]
    fn positions_are_one_based() {
        let ranked = rank_candidates(
            vec![candidate("x", 0), candidate("y", 1)],
            &ScoreWeights::STANDARD,
        );
        let positions = positions(&ranked);
        assert_eq!(positions[0].position, 1);
        assert_eq!(positions[1].detective_id, DetectiveId("y".to_string()));
    }
}
