use serde::Serialize;

use crate::domain::{BadgeKind, BadgeSet, RatingAggregate};

/// Fixed constants for the automatic visibility score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreWeights {
    pub paid_tier: f64,
    pub pro_badge: f64,
    pub recommended_badge: f64,
    pub verified: f64,
    pub blue_tick: f64,
    /// Per star of average rating.
    pub rating: f64,
    /// Per natural-log unit of `1 + review_count`.
    pub reviews: f64,
}

impl ScoreWeights {
    pub const STANDARD: ScoreWeights = ScoreWeights {
        paid_tier: 300.0,
        pro_badge: 200.0,
        recommended_badge: 300.0,
        verified: 150.0,
        blue_tick: 100.0,
        rating: 40.0,
        reviews: 50.0,
    };

    pub fn tier_weight(&self, is_paid: bool, badges: &BadgeSet) -> f64 {
        if !is_paid {
            return 0.0;
        }
        let mut weight = self.paid_tier;
        if badges.contains_key(&BadgeKind::Pro) {
            weight += self.pro_badge;
        }
        if badges.contains_key(&BadgeKind::Recommended) {
            weight += self.recommended_badge;
        }
        weight
    }

    /// Missing or malformed aggregates contribute nothing.
    pub fn rating_weight(&self, rating: &RatingAggregate) -> f64 {
        let avg = if rating.avg.is_finite() {
            rating.avg.clamp(0.0, 5.0)
        } else {
            0.0
        };
        self.rating * avg + self.reviews * f64::from(rating.count).ln_1p()
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self::STANDARD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_tier_has_no_tier_weight_even_with_badges() {
        let mut badges = BadgeSet::new();
        badges.insert(BadgeKind::Pro, true);
        assert_eq!(ScoreWeights::STANDARD.tier_weight(false, &badges), 0.0);
        assert_eq!(ScoreWeights::STANDARD.tier_weight(true, &badges), 500.0);
    }

    #[test]
    fn malformed_ratings_contribute_zero() {
        let weights = ScoreWeights::STANDARD;
        let nan = RatingAggregate {
            avg: f64::NAN,
            count: 0,
        };
        let negative = RatingAggregate {
            avg: -3.0,
            count: 0,
        };
        assert_eq!(weights.rating_weight(&nan), 0.0);
        assert_eq!(weights.rating_weight(&negative), 0.0);
        assert_eq!(weights.rating_weight(&RatingAggregate::default()), 0.0);
    }

    #[test]
    fn review_volume_is_log_damped() {
        let weights = ScoreWeights::STANDARD;
        let few = weights.rating_weight(&RatingAggregate { avg: 0.0, count: 9 });
        let many = weights.rating_weight(&RatingAggregate { avg: 0.0, count: 99 });
        assert!(many > few);
        assert!(many < few * 3.0);
    }
}
