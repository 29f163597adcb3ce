// src/store/mod.rs
//
// Persistence seam for the resolution pipeline. Every stage talks to storage
// only through `ResolutionStore`, so the same code runs against Postgres and
// the in-process tables used by tests.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    BlockingEntry, CanonicalEntity, ClusterMembership, ClusterResolution, EmployerFields,
    EmployerRecord, PendingCanonicalCluster, ReviewCursor, ReviewDecision,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait ResolutionStore: Send + Sync {
    // --- employer records ---

    /// Records with `id > after_id` in ascending id order, at most `limit`.
    async fn fetch_records_after(
        &self,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<EmployerRecord>>;

    /// Records for `ids`, ordered by id. Unknown ids are skipped.
    async fn fetch_records_by_ids(&self, ids: &[i64]) -> Result<Vec<EmployerRecord>>;

    // --- blocking map ---

    async fn clear_blocking_entries(&self) -> Result<u64>;

    /// Writes one batch in a single transaction. Duplicate entries are ignored.
    async fn insert_blocking_entries(&self, entries: &[BlockingEntry]) -> Result<u64>;

    /// Entries ordered by `(block_key, record_id)` strictly after `after`.
    async fn fetch_blocking_entries_after(
        &self,
        after: Option<&BlockingEntry>,
        limit: usize,
    ) -> Result<Vec<BlockingEntry>>;

    async fn count_blocking_entries(&self) -> Result<u64>;

    // --- cluster memberships ---

    async fn clear_memberships(&self) -> Result<u64>;

    async fn fetch_memberships_for_records(
        &self,
        record_ids: &[i64],
    ) -> Result<Vec<ClusterMembership>>;

    /// Inserts rows whose `record_id` has no membership yet, in one
    /// transaction. Existing rows keep their review and processing state.
    /// Returns the number of rows actually inserted.
    async fn insert_memberships_if_absent(&self, rows: &[ClusterMembership]) -> Result<u64>;

    async fn count_memberships(&self) -> Result<u64>;

    // --- review ---

    /// Rows needing review, ordered by `(cluster_score, record_id)` and
    /// strictly after `after`.
    async fn fetch_pending_reviews(
        &self,
        review_threshold: f64,
        after: Option<ReviewCursor>,
        limit: usize,
    ) -> Result<Vec<ClusterMembership>>;

    async fn count_pending_reviews(&self, review_threshold: f64) -> Result<u64>;

    /// Every member record of cluster `canon_id`, ordered by id.
    async fn fetch_cluster_members(&self, canon_id: i64) -> Result<Vec<EmployerRecord>>;

    /// Applies all decisions in one transaction.
    async fn apply_review_decisions(&self, decisions: &[ReviewDecision]) -> Result<u64>;

    // --- canonicalization ---

    /// Up to `limit` clusters, ordered by canon_id, whose eligible rows are
    /// not all processed. Only eligible rows are returned.
    async fn fetch_pending_canonical_clusters(
        &self,
        review_threshold: f64,
        limit: usize,
    ) -> Result<Vec<PendingCanonicalCluster>>;

    /// Canonical employers whose identity tuple equals `fields`, null-safe.
    async fn find_canonical_entities(&self, fields: &EmployerFields)
        -> Result<Vec<CanonicalEntity>>;

    /// Commits every resolution in one transaction and returns the entity id
    /// each one resolved to. On error nothing is written.
    async fn commit_resolutions(&self, resolutions: &[ClusterResolution]) -> Result<Vec<Uuid>>;

    /// Records with no canonical link and either no membership or a
    /// reviewed-invalid one, ordered by id and strictly after `after_id`.
    async fn fetch_unresolved_singletons(
        &self,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<EmployerRecord>>;

    async fn fetch_canonical_entities(&self) -> Result<Vec<CanonicalEntity>>;

    async fn count_canonical_entities(&self) -> Result<u64>;
}
