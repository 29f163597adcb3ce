// src/models/cluster.rs

use chrono::NaiveDateTime;
use std::cmp::Ordering;
use uuid::Uuid;

use crate::models::employer::{CanonicalEntity, SeenWindow};

/// One row of the blocking map: a derived key and the record that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockingEntry {
    pub block_key: String,
    pub record_id: i64,
}

impl BlockingEntry {
    pub fn new(block_key: impl Into<String>, record_id: i64) -> Self {
        Self {
            block_key: block_key.into(),
            record_id,
        }
    }
}

/// Two records sharing a block key, always stored as `low_id < high_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidatePair {
    pub low_id: i64,
    pub high_id: i64,
}

impl CandidatePair {
    /// Orders the ids; a record never pairs with itself.
    pub fn new(a: i64, b: i64) -> Option<Self> {
        match a.cmp(&b) {
            Ordering::Less => Some(Self { low_id: a, high_id: b }),
            Ordering::Greater => Some(Self { low_id: b, high_id: a }),
            Ordering::Equal => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredPair {
    pub pair: CandidatePair,
    pub score: f64,
}

/// Where a membership row sits in the review workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewState {
    NeedsReview,
    AutoApproved,
    ReviewedValid,
    ReviewedInvalid,
    /// Reviewed without a verdict. Neither presented again nor canonicalized.
    ReviewedUnsure,
}

/// A record's membership in a cluster, keyed by `record_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMembership {
    pub canon_id: i64,
    pub record_id: i64,
    pub cluster_score: f64,
    pub is_valid_cluster: Option<bool>,
    pub review_date: Option<NaiveDateTime>,
    pub processed: bool,
}

impl ClusterMembership {
    pub fn new(canon_id: i64, record_id: i64, cluster_score: f64) -> Self {
        Self {
            canon_id,
            record_id,
            cluster_score,
            is_valid_cluster: None,
            review_date: None,
            processed: false,
        }
    }

    /// An explicit verdict wins over the score; scores at or below the
    /// threshold wait for a human.
    pub fn review_state(&self, review_threshold: f64) -> ReviewState {
        match (self.is_valid_cluster, self.review_date) {
            (Some(true), _) => ReviewState::ReviewedValid,
            (Some(false), _) => ReviewState::ReviewedInvalid,
            (None, Some(_)) => ReviewState::ReviewedUnsure,
            (None, None) if self.cluster_score > review_threshold => ReviewState::AutoApproved,
            (None, None) => ReviewState::NeedsReview,
        }
    }

    pub fn is_eligible_for_canonicalization(&self, review_threshold: f64) -> bool {
        matches!(
            self.review_state(review_threshold),
            ReviewState::AutoApproved | ReviewState::ReviewedValid
        )
    }

    pub fn review_cursor(&self) -> ReviewCursor {
        ReviewCursor {
            cluster_score: self.cluster_score,
            record_id: self.record_id,
        }
    }
}

/// Keyset position in the review queue, ordered by `(cluster_score, record_id)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReviewCursor {
    pub cluster_score: f64,
    pub record_id: i64,
}

impl ReviewCursor {
    pub fn is_before(&self, row: &ClusterMembership) -> bool {
        match self.cluster_score.total_cmp(&row.cluster_score) {
            Ordering::Less => true,
            Ordering::Equal => self.record_id < row.record_id,
            Ordering::Greater => false,
        }
    }
}

/// A human verdict on one membership row.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewDecision {
    pub record_id: i64,
    pub is_valid_cluster: bool,
    pub review_date: NaiveDateTime,
}

/// The eligible rows of a cluster with at least one row not yet canonicalized.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCanonicalCluster {
    pub canon_id: i64,
    pub rows: Vec<ClusterMembership>,
}

impl PendingCanonicalCluster {
    pub fn record_ids(&self) -> Vec<i64> {
        self.rows.iter().map(|r| r.record_id).collect()
    }

    pub fn is_fully_unprocessed(&self) -> bool {
        self.rows.iter().all(|r| !r.processed)
    }
}

/// What a resolution does to the canonical employer table.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityTarget {
    Create(CanonicalEntity),
    Extend { entity_id: Uuid, window: SeenWindow },
}

/// A unit of canonicalization work committed atomically: create or widen one
/// canonical employer, link the records to it and optionally mark their
/// membership rows processed.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterResolution {
    pub target: EntityTarget,
    pub record_ids: Vec<i64>,
    pub mark_processed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_candidate_pair_orders_ids() {
        assert_eq!(
            CandidatePair::new(9, 4),
            Some(CandidatePair { low_id: 4, high_id: 9 })
        );
        assert_eq!(CandidatePair::new(4, 9), CandidatePair::new(9, 4));
        assert_eq!(CandidatePair::new(3, 3), None);
    }

    #[test]
    fn test_review_state_transitions() {
        let mut row = ClusterMembership::new(1, 2, 0.7);
        assert_eq!(row.review_state(0.8), ReviewState::NeedsReview);
        assert!(!row.is_eligible_for_canonicalization(0.8));

        row.cluster_score = 0.8;
        assert_eq!(row.review_state(0.8), ReviewState::NeedsReview);

        row.cluster_score = 0.81;
        assert_eq!(row.review_state(0.8), ReviewState::AutoApproved);
        assert!(row.is_eligible_for_canonicalization(0.8));

        row.cluster_score = 0.5;
        row.is_valid_cluster = Some(true);
        row.review_date = Some(Utc::now().naive_utc());
        assert_eq!(row.review_state(0.8), ReviewState::ReviewedValid);
        assert!(row.is_eligible_for_canonicalization(0.8));

        row.is_valid_cluster = Some(false);
        assert_eq!(row.review_state(0.8), ReviewState::ReviewedInvalid);
        assert!(!row.is_eligible_for_canonicalization(0.8));

        row.is_valid_cluster = None;
        assert_eq!(row.review_state(0.8), ReviewState::ReviewedUnsure);
    }

    #[test]
    fn test_review_cursor_ordering() {
        let cursor = ClusterMembership::new(1, 5, 0.6).review_cursor();
        assert!(cursor.is_before(&ClusterMembership::new(1, 6, 0.6)));
        assert!(cursor.is_before(&ClusterMembership::new(1, 2, 0.65)));
        assert!(!cursor.is_before(&ClusterMembership::new(1, 5, 0.6)));
        assert!(!cursor.is_before(&ClusterMembership::new(1, 9, 0.55)));
    }
}
