// src/store/memory.rs

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::ResolutionError;
use crate::models::{
    BlockingEntry, CanonicalEntity, ClusterMembership, ClusterResolution, EmployerFields,
    EmployerRecord, EntityTarget, PendingCanonicalCluster, ReviewCursor, ReviewDecision,
    ReviewState,
};
use crate::store::ResolutionStore;

#[derive(Debug, Clone, Default)]
struct Tables {
    records: BTreeMap<i64, EmployerRecord>,
    blocking: BTreeSet<BlockingEntry>,
    memberships: BTreeMap<i64, ClusterMembership>,
    entities: Vec<CanonicalEntity>,
}

/// In-process tables behind a single async mutex.
///
/// Transactions are emulated by applying a batch to a copy of the tables and
/// swapping it in only when every step succeeded. `fail_nth_commit` makes a
/// later transactional write fail after its work is done, which is how tests
/// exercise rollback and resume.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    // 0 means no failure is armed.
    commits_until_failure: AtomicUsize,
    largest_id_lookup: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = EmployerRecord>) -> Self {
        let tables = Tables {
            records: records.into_iter().map(|r| (r.id, r)).collect(),
            ..Default::default()
        };
        Self {
            tables: Mutex::new(tables),
            ..Default::default()
        }
    }

    pub async fn insert_record(&self, record: EmployerRecord) {
        self.tables.lock().await.records.insert(record.id, record);
    }

    /// Seeds a canonical employer directly, bypassing the uniqueness check.
    pub async fn insert_canonical_entity(&self, entity: CanonicalEntity) {
        self.tables.lock().await.entities.push(entity);
    }

    pub async fn records(&self) -> Vec<EmployerRecord> {
        self.tables.lock().await.records.values().cloned().collect()
    }

    pub async fn memberships(&self) -> Vec<ClusterMembership> {
        self.tables.lock().await.memberships.values().cloned().collect()
    }

    pub async fn blocking_entries(&self) -> Vec<BlockingEntry> {
        self.tables.lock().await.blocking.iter().cloned().collect()
    }

    /// The next transactional write fails and leaves the tables untouched.
    pub fn fail_next_commit(&self) {
        self.fail_nth_commit(1);
    }

    /// The `n`th transactional write from now fails; the ones before it commit.
    pub fn fail_nth_commit(&self, n: usize) {
        self.commits_until_failure.store(n, Ordering::SeqCst);
    }

    /// Most ids asked for in a single `fetch_records_by_ids` call so far.
    pub fn largest_id_lookup(&self) -> usize {
        self.largest_id_lookup.load(Ordering::SeqCst)
    }

    fn check_commit(&self) -> Result<()> {
        let armed = self
            .commits_until_failure
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if armed == Ok(1) {
            return Err(ResolutionError::CommitFailed("injected commit failure".to_string()).into());
        }
        Ok(())
    }
}

fn apply_resolution(tables: &mut Tables, resolution: &ClusterResolution) -> Result<Uuid> {
    let entity_id = match &resolution.target {
        EntityTarget::Create(entity) => {
            if tables.entities.iter().any(|e| e.id == entity.id) {
                return Err(anyhow!("canonical employer {} already exists", entity.id));
            }
            tables.entities.push(entity.clone());
            entity.id
        }
        EntityTarget::Extend { entity_id, window } => {
            let entity = tables
                .entities
                .iter_mut()
                .find(|e| e.id == *entity_id)
                .ok_or_else(|| anyhow!("canonical employer {} not found", entity_id))?;
            entity.absorb(window);
            *entity_id
        }
    };

    let missing: Vec<i64> = resolution
        .record_ids
        .iter()
        .copied()
        .filter(|id| !tables.records.contains_key(id))
        .collect();
    if !missing.is_empty() {
        return Err(ResolutionError::MissingRecords(missing).into());
    }

    for id in &resolution.record_ids {
        if let Some(record) = tables.records.get_mut(id) {
            record.canonical_entity_id = Some(entity_id);
        }
        if resolution.mark_processed {
            if let Some(row) = tables.memberships.get_mut(id) {
                row.processed = true;
            }
        }
    }
    Ok(entity_id)
}

#[async_trait]
impl ResolutionStore for MemoryStore {
    async fn fetch_records_after(
        &self,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<EmployerRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .records
            .values()
            .filter(|r| after_id.map_or(true, |after| r.id > after))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_records_by_ids(&self, ids: &[i64]) -> Result<Vec<EmployerRecord>> {
        self.largest_id_lookup.fetch_max(ids.len(), Ordering::SeqCst);
        let tables = self.tables.lock().await;
        let wanted: BTreeSet<i64> = ids.iter().copied().collect();
        Ok(wanted
            .iter()
            .filter_map(|id| tables.records.get(id).cloned())
            .collect())
    }

    async fn clear_blocking_entries(&self) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let cleared = tables.blocking.len() as u64;
        tables.blocking.clear();
        Ok(cleared)
    }

    async fn insert_blocking_entries(&self, entries: &[BlockingEntry]) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let mut staged = tables.blocking.clone();
        let inserted = entries
            .iter()
            .filter(|e| staged.insert((*e).clone()))
            .count() as u64;
        self.check_commit()?;
        tables.blocking = staged;
        Ok(inserted)
    }

    async fn fetch_blocking_entries_after(
        &self,
        after: Option<&BlockingEntry>,
        limit: usize,
    ) -> Result<Vec<BlockingEntry>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .blocking
            .iter()
            .filter(|e| after.map_or(true, |a| *e > a))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_blocking_entries(&self) -> Result<u64> {
        Ok(self.tables.lock().await.blocking.len() as u64)
    }

    async fn clear_memberships(&self) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let cleared = tables.memberships.len() as u64;
        tables.memberships.clear();
        Ok(cleared)
    }

    async fn fetch_memberships_for_records(
        &self,
        record_ids: &[i64],
    ) -> Result<Vec<ClusterMembership>> {
        let tables = self.tables.lock().await;
        let wanted: BTreeSet<i64> = record_ids.iter().copied().collect();
        Ok(wanted
            .iter()
            .filter_map(|id| tables.memberships.get(id).cloned())
            .collect())
    }

    async fn insert_memberships_if_absent(&self, rows: &[ClusterMembership]) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let mut staged = tables.memberships.clone();
        let mut inserted = 0u64;
        for row in rows {
            if !staged.contains_key(&row.record_id) {
                staged.insert(row.record_id, row.clone());
                inserted += 1;
            }
        }
        self.check_commit()?;
        tables.memberships = staged;
        Ok(inserted)
    }

    async fn count_memberships(&self) -> Result<u64> {
        Ok(self.tables.lock().await.memberships.len() as u64)
    }

    async fn fetch_pending_reviews(
        &self,
        review_threshold: f64,
        after: Option<ReviewCursor>,
        limit: usize,
    ) -> Result<Vec<ClusterMembership>> {
        let tables = self.tables.lock().await;
        let mut pending: Vec<ClusterMembership> = tables
            .memberships
            .values()
            .filter(|row| row.review_state(review_threshold) == ReviewState::NeedsReview)
            .filter(|row| after.map_or(true, |cursor| cursor.is_before(row)))
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.cluster_score
                .total_cmp(&b.cluster_score)
                .then(a.record_id.cmp(&b.record_id))
        });
        pending.truncate(limit);
        Ok(pending)
    }

    async fn count_pending_reviews(&self, review_threshold: f64) -> Result<u64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .memberships
            .values()
            .filter(|row| row.review_state(review_threshold) == ReviewState::NeedsReview)
            .count() as u64)
    }

    async fn fetch_cluster_members(&self, canon_id: i64) -> Result<Vec<EmployerRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .memberships
            .values()
            .filter(|row| row.canon_id == canon_id)
            .filter_map(|row| tables.records.get(&row.record_id).cloned())
            .collect())
    }

    async fn apply_review_decisions(&self, decisions: &[ReviewDecision]) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let mut staged = tables.memberships.clone();
        let mut updated = 0u64;
        for decision in decisions {
            if let Some(row) = staged.get_mut(&decision.record_id) {
                row.is_valid_cluster = Some(decision.is_valid_cluster);
                row.review_date = Some(decision.review_date);
                updated += 1;
            }
        }
        self.check_commit()?;
        tables.memberships = staged;
        Ok(updated)
    }

    async fn fetch_pending_canonical_clusters(
        &self,
        review_threshold: f64,
        limit: usize,
    ) -> Result<Vec<PendingCanonicalCluster>> {
        let tables = self.tables.lock().await;
        let mut grouped: BTreeMap<i64, Vec<ClusterMembership>> = BTreeMap::new();
        for row in tables.memberships.values() {
            if row.is_eligible_for_canonicalization(review_threshold) {
                grouped.entry(row.canon_id).or_default().push(row.clone());
            }
        }
        Ok(grouped
            .into_iter()
            .filter(|(_, rows)| rows.iter().any(|r| !r.processed))
            .take(limit)
            .map(|(canon_id, rows)| PendingCanonicalCluster { canon_id, rows })
            .collect())
    }

    async fn find_canonical_entities(
        &self,
        fields: &EmployerFields,
    ) -> Result<Vec<CanonicalEntity>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .entities
            .iter()
            .filter(|e| e.fields == *fields)
            .cloned()
            .collect())
    }

    async fn commit_resolutions(&self, resolutions: &[ClusterResolution]) -> Result<Vec<Uuid>> {
        let mut tables = self.tables.lock().await;
        let mut staged = tables.clone();
        let mut ids = Vec::with_capacity(resolutions.len());
        for resolution in resolutions {
            ids.push(apply_resolution(&mut staged, resolution)?);
        }
        self.check_commit()?;
        *tables = staged;
        debug!("Committed {} cluster resolutions", resolutions.len());
        Ok(ids)
    }

    async fn fetch_unresolved_singletons(
        &self,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<EmployerRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .records
            .values()
            .filter(|r| after_id.map_or(true, |after| r.id > after))
            .filter(|r| r.canonical_entity_id.is_none())
            .filter(|r| match tables.memberships.get(&r.id) {
                None => true,
                Some(row) => row.is_valid_cluster == Some(false),
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_canonical_entities(&self) -> Result<Vec<CanonicalEntity>> {
        Ok(self.tables.lock().await.entities.clone())
    }

    async fn count_canonical_entities(&self) -> Result<u64> {
        Ok(self.tables.lock().await.entities.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecordSource, SeenWindow};
    use chrono::Utc;

    fn record(id: i64, name: &str) -> EmployerRecord {
        EmployerRecord::new(id, EmployerFields::named(name), RecordSource::Scraper)
    }

    #[tokio::test]
    async fn test_record_paging_uses_keyset() {
        let store = MemoryStore::with_records((1..=5).map(|i| record(i, "Acme")));
        let first = store.fetch_records_after(None, 2).await.unwrap();
        assert_eq!(first.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
        let next = store.fetch_records_after(Some(2), 10).await.unwrap();
        assert_eq!(next.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_memberships_insert_only_when_absent() {
        let store = MemoryStore::with_records([record(1, "A"), record(2, "A")]);
        let mut reviewed = ClusterMembership::new(1, 1, 0.7);
        reviewed.is_valid_cluster = Some(true);
        reviewed.review_date = Some(Utc::now().naive_utc());
        assert_eq!(store.insert_memberships_if_absent(&[reviewed]).await.unwrap(), 1);

        let fresh = vec![ClusterMembership::new(1, 1, 0.7), ClusterMembership::new(1, 2, 0.7)];
        assert_eq!(store.insert_memberships_if_absent(&fresh).await.unwrap(), 1);

        let rows = store.memberships().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].is_valid_cluster, Some(true));
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_tables_untouched() {
        let store = MemoryStore::with_records([record(1, "Acme"), record(2, "Acme")]);
        let entity = CanonicalEntity::mint(EmployerFields::named("Acme"), SeenWindow::default());
        let resolution = ClusterResolution {
            target: EntityTarget::Create(entity),
            record_ids: vec![1, 2],
            mark_processed: true,
        };

        store.fail_next_commit();
        let err = store.commit_resolutions(&[resolution.clone()]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ResolutionError>(),
            Some(ResolutionError::CommitFailed(_))
        ));
        assert_eq!(store.count_canonical_entities().await.unwrap(), 0);
        assert!(store.records().await.iter().all(|r| r.canonical_entity_id.is_none()));

        let ids = store.commit_resolutions(&[resolution]).await.unwrap();
        assert_eq!(ids.len(), 1);
        assert!(store
            .records()
            .await
            .iter()
            .all(|r| r.canonical_entity_id == Some(ids[0])));
    }

    #[tokio::test]
    async fn test_missing_records_abort_the_whole_commit() {
        let store = MemoryStore::with_records([record(1, "Acme")]);
        let entity = CanonicalEntity::mint(EmployerFields::named("Acme"), SeenWindow::default());
        let err = store
            .commit_resolutions(&[ClusterResolution {
                target: EntityTarget::Create(entity),
                record_ids: vec![1, 99],
                mark_processed: false,
            }])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ResolutionError>(),
            Some(ResolutionError::MissingRecords(ids)) if ids == &vec![99]
        ));
        assert_eq!(store.count_canonical_entities().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unresolved_singletons_include_rejected_members() {
        let store = MemoryStore::with_records((1..=4).map(|i| record(i, "Acme")));
        let mut rejected = ClusterMembership::new(2, 2, 0.7);
        rejected.is_valid_cluster = Some(false);
        rejected.review_date = Some(Utc::now().naive_utc());
        store
            .insert_memberships_if_absent(&[rejected, ClusterMembership::new(2, 3, 0.7)])
            .await
            .unwrap();

        let singles = store.fetch_unresolved_singletons(None, 10).await.unwrap();
        assert_eq!(singles.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2, 4]);
    }

    #[tokio::test]
    async fn test_nth_commit_failure_lets_earlier_writes_through() {
        let store = MemoryStore::new();
        store.fail_nth_commit(2);
        let first = [BlockingEntry::new("name:exact:acme", 1)];
        let second = [BlockingEntry::new("name:exact:acme", 2)];
        assert_eq!(store.insert_blocking_entries(&first).await.unwrap(), 1);
        assert!(store.insert_blocking_entries(&second).await.is_err());
        assert_eq!(store.insert_blocking_entries(&second).await.unwrap(), 1);
        assert_eq!(store.count_blocking_entries().await.unwrap(), 2);
    }
}
