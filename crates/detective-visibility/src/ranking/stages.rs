//! Comparator stages composed left to right into the listing order.

use std::cmp::Ordering;

use super::ScoredCandidate;

pub(crate) type Stage = fn(&ScoredCandidate, &ScoredCandidate) -> Ordering;

pub(crate) const PIPELINE: [Stage; 4] = [
    by_manual_rank,
    by_featured,
    by_automatic_score,
    by_age_then_id,
];

pub(crate) fn compare(left: &ScoredCandidate, right: &ScoredCandidate) -> Ordering {
    PIPELINE
        .iter()
        .fold(Ordering::Equal, |ordering, stage| {
            ordering.then_with(|| stage(left, right))
        })
}

/// Manually ranked records first, lowest rank number first.
pub(crate) fn by_manual_rank(left: &ScoredCandidate, right: &ScoredCandidate) -> Ordering {
    match (
        left.candidate.visibility.manual_rank,
        right.candidate.visibility.manual_rank,
    ) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn manually_ranked(candidate: &ScoredCandidate) -> bool {
    candidate.candidate.visibility.manual_rank.is_some()
}

/// Featured before non-featured. Manually ranked ties skip straight to the final tie-break.
pub(crate) fn by_featured(left: &ScoredCandidate, right: &ScoredCandidate) -> Ordering {
    if manually_ranked(left) {
        return Ordering::Equal;
    }
    right
        .candidate
        .visibility
        .is_featured
        .cmp(&left.candidate.visibility.is_featured)
}

/// Higher automatic score first.
pub(crate) fn by_automatic_score(left: &ScoredCandidate, right: &ScoredCandidate) -> Ordering {
    if manually_ranked(left) {
        return Ordering::Equal;
    }
    right.score.total_cmp(&left.score)
}

/// Older records first, then id; makes the order total.
pub(crate) fn by_age_then_id(left: &ScoredCandidate, right: &ScoredCandidate) -> Ordering {
    left.candidate
        .created_at
        .cmp(&right.candidate.created_at)
        .then_with(|| left.candidate.id.cmp(&right.candidate.id))
}
