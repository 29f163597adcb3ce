// src/canonical/canonical_employers.rs

use anyhow::{Context, Result};
use indicatif::MultiProgress;
use log::{debug, info, warn};

use crate::canonical::canonicalize::canonical_fields;
use crate::error::ResolutionError;
use crate::models::{
    CanonicalEntity, CanonicalizationStats, ClusterResolution, EmployerFields, EmployerRecord,
    EntityTarget, PendingCanonicalCluster, SeenWindow,
};
use crate::store::ResolutionStore;
use crate::utils::pipeline_config::PipelineConfig;
use crate::utils::progress_config::stage_bar;

/// Finds the canonical employer for `fields` or prepares a new one.
/// More than one existing match is a consistency failure that needs a human.
pub async fn resolve_entity_target(
    store: &dyn ResolutionStore,
    fields: EmployerFields,
    window: SeenWindow,
) -> Result<EntityTarget> {
    let matches = store
        .find_canonical_entities(&fields)
        .await
        .context("Failed to look up canonical employers")?;
    match matches.len() {
        0 => Ok(EntityTarget::Create(CanonicalEntity::mint(fields, window))),
        1 => Ok(EntityTarget::Extend {
            entity_id: matches[0].id,
            window,
        }),
        count => Err(ResolutionError::DuplicateCanonicalEntity { fields, count }.into()),
    }
}

/// Resolves up to `batch_limit` pending clusters, ordered by canon id, each
/// in its own transaction.
pub async fn generate_canonical_employers_from_clusters(
    store: &dyn ResolutionStore,
    config: &PipelineConfig,
    batch_limit: usize,
    multi_progress: Option<&MultiProgress>,
) -> Result<CanonicalizationStats> {
    let clusters = store
        .fetch_pending_canonical_clusters(config.review_threshold, batch_limit)
        .await
        .context("Failed to fetch clusters pending canonicalization")?;
    let mut stats = CanonicalizationStats {
        clusters_considered: clusters.len(),
        ..Default::default()
    };
    info!("{} clusters pending canonicalization", clusters.len());

    let pb = stage_bar(multi_progress, clusters.len() as u64, "Canonicalizing clusters...");
    for cluster in &clusters {
        let resolution = match linked_sibling_resolution(store, cluster).await? {
            Some(resolution) => {
                stats.clusters_extended += 1;
                resolution
            }
            None => fresh_resolution(store, cluster).await?,
        };

        match &resolution.target {
            EntityTarget::Create(_) => stats.entities_created += 1,
            EntityTarget::Extend { .. } => stats.entities_reused += 1,
        }
        stats.records_linked += resolution.record_ids.len();
        let entity_ids = store
            .commit_resolutions(std::slice::from_ref(&resolution))
            .await
            .with_context(|| format!("Failed to commit cluster {}", cluster.canon_id))?;
        stats.clusters_resolved += 1;
        debug!(
            "Cluster {} resolved to canonical employer {:?}",
            cluster.canon_id,
            entity_ids.first()
        );
        if let Some(pb) = &pb {
            pb.inc(1);
        }
    }
    if let Some(pb) = &pb {
        pb.finish_with_message(format!("{} clusters canonicalized", stats.clusters_resolved));
    }
    Ok(stats)
}

/// For a cluster where some rows are already processed, attaches the rest to
/// the entity a processed sibling links to. Returns None when nothing needs
/// attaching that way.
async fn linked_sibling_resolution(
    store: &dyn ResolutionStore,
    cluster: &PendingCanonicalCluster,
) -> Result<Option<ClusterResolution>> {
    if cluster.is_fully_unprocessed() {
        return Ok(None);
    }
    let processed_ids: Vec<i64> = cluster
        .rows
        .iter()
        .filter(|r| r.processed)
        .map(|r| r.record_id)
        .collect();
    let siblings = store
        .fetch_records_by_ids(&processed_ids)
        .await
        .context("Failed to load processed cluster members")?;
    let Some(entity_id) = siblings.iter().find_map(|r| r.canonical_entity_id) else {
        warn!(
            "Cluster {} has processed rows but no linked canonical employer; recomputing it",
            cluster.canon_id
        );
        return Ok(None);
    };

    let unprocessed_ids: Vec<i64> = cluster
        .rows
        .iter()
        .filter(|r| !r.processed)
        .map(|r| r.record_id)
        .collect();
    let newcomers = load_all(store, &unprocessed_ids).await?;
    Ok(Some(ClusterResolution {
        target: EntityTarget::Extend {
            entity_id,
            window: SeenWindow::from_records(&newcomers),
        },
        record_ids: unprocessed_ids,
        mark_processed: true,
    }))
}

async fn fresh_resolution(
    store: &dyn ResolutionStore,
    cluster: &PendingCanonicalCluster,
) -> Result<ClusterResolution> {
    let record_ids = cluster.record_ids();
    let records = load_all(store, &record_ids).await?;
    let fields = canonical_fields(&records);
    let window = SeenWindow::from_records(&records);
    let target = resolve_entity_target(store, fields, window).await?;
    Ok(ClusterResolution {
        target,
        record_ids,
        mark_processed: true,
    })
}

async fn load_all(store: &dyn ResolutionStore, ids: &[i64]) -> Result<Vec<EmployerRecord>> {
    let records = store
        .fetch_records_by_ids(ids)
        .await
        .context("Failed to load cluster members")?;
    if records.len() != ids.len() {
        let missing = ids
            .iter()
            .copied()
            .filter(|id| !records.iter().any(|r| r.id == *id))
            .collect();
        return Err(ResolutionError::MissingRecords(missing).into());
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClusterMembership, RecordSource};
    use crate::store::MemoryStore;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn record(id: i64, name: &str, source: RecordSource, first: u32, last: u32) -> EmployerRecord {
        EmployerRecord::new(id, EmployerFields::named(name), source).seen_between(at(first), at(last))
    }

    async fn acme_store(score: f64) -> MemoryStore {
        let store = MemoryStore::with_records([
            record(1, "Acme Farms", RecordSource::Scraper, 5, 9),
            record(2, "ACME FARMS", RecordSource::Disclosure, 2, 6),
        ]);
        store
            .insert_memberships_if_absent(&[
                ClusterMembership::new(1, 1, score),
                ClusterMembership::new(1, 2, score),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_auto_approved_cluster_creates_one_entity() {
        let store = acme_store(0.9).await;
        let config = PipelineConfig::default();
        let stats = generate_canonical_employers_from_clusters(&store, &config, 10, None)
            .await
            .unwrap();
        assert_eq!(stats.clusters_resolved, 1);
        assert_eq!(stats.entities_created, 1);
        assert_eq!(stats.records_linked, 2);

        let entities = store.fetch_canonical_entities().await.unwrap();
        assert_eq!(entities.len(), 1);
        let entity = &entities[0];
        assert_eq!(entity.fields.name.as_deref(), Some("Acme Farms"));
        assert_eq!(entity.first_seen, Some(at(2)));
        assert_eq!(entity.last_seen, Some(at(9)));
        assert_eq!(
            entity.sources,
            vec![RecordSource::Scraper, RecordSource::Disclosure]
        );
        assert!(store
            .records()
            .await
            .iter()
            .all(|r| r.canonical_entity_id == Some(entity.id)));
        assert!(store.memberships().await.iter().all(|m| m.processed));

        // idempotent
        let again = generate_canonical_employers_from_clusters(&store, &config, 10, None)
            .await
            .unwrap();
        assert_eq!(again.clusters_considered, 0);
        assert_eq!(store.count_canonical_entities().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_low_confidence_cluster_waits_for_review() {
        let store = acme_store(0.7).await;
        let stats =
            generate_canonical_employers_from_clusters(&store, &PipelineConfig::default(), 10, None)
                .await
                .unwrap();
        assert_eq!(stats.clusters_considered, 0);
        assert_eq!(store.count_canonical_entities().await.unwrap(), 0);
        assert!(store.memberships().await.iter().all(|m| !m.processed));
    }

    #[tokio::test]
    async fn test_existing_tuple_is_reused_and_widened() {
        let store = acme_store(0.9).await;
        let existing = CanonicalEntity::mint(
            EmployerFields::named("Acme Farms"),
            SeenWindow {
                first_seen: Some(at(4)),
                last_seen: Some(at(4)),
                sources: vec![RecordSource::Disclosure],
            },
        );
        store.insert_canonical_entity(existing.clone()).await;

        let stats =
            generate_canonical_employers_from_clusters(&store, &PipelineConfig::default(), 10, None)
                .await
                .unwrap();
        assert_eq!(stats.entities_reused, 1);
        assert_eq!(stats.entities_created, 0);

        let entities = store.fetch_canonical_entities().await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, existing.id);
        assert_eq!(entities[0].first_seen, Some(at(2)));
        assert_eq!(entities[0].last_seen, Some(at(9)));
        assert_eq!(
            entities[0].sources,
            vec![RecordSource::Disclosure, RecordSource::Scraper]
        );
    }

    #[tokio::test]
    async fn test_duplicate_canonical_entities_are_fatal() {
        let store = acme_store(0.9).await;
        for _ in 0..2 {
            store
                .insert_canonical_entity(CanonicalEntity::mint(
                    EmployerFields::named("Acme Farms"),
                    SeenWindow::default(),
                ))
                .await;
        }
        let err =
            generate_canonical_employers_from_clusters(&store, &PipelineConfig::default(), 10, None)
                .await
                .unwrap_err();
        let resolution_error = err.downcast_ref::<ResolutionError>().unwrap();
        assert!(resolution_error.is_fatal());
        assert!(matches!(
            resolution_error,
            ResolutionError::DuplicateCanonicalEntity { count: 2, .. }
        ));
        assert!(store.memberships().await.iter().all(|m| !m.processed));
    }

    #[tokio::test]
    async fn test_late_member_joins_sibling_entity() {
        let store = acme_store(0.9).await;
        let config = PipelineConfig::default();
        generate_canonical_employers_from_clusters(&store, &config, 10, None)
            .await
            .unwrap();
        let entity_id = store.fetch_canonical_entities().await.unwrap()[0].id;

        store
            .insert_record(record(3, "Acme Farms Inc", RecordSource::Scraper, 1, 20))
            .await;
        store
            .insert_memberships_if_absent(&[ClusterMembership::new(1, 3, 0.85)])
            .await
            .unwrap();

        let stats = generate_canonical_employers_from_clusters(&store, &config, 10, None)
            .await
            .unwrap();
        assert_eq!(stats.clusters_extended, 1);
        assert_eq!(stats.records_linked, 1);

        let entities = store.fetch_canonical_entities().await.unwrap();
        assert_eq!(entities.len(), 1);
        // identity fields stay frozen, the window widens
        assert_eq!(entities[0].fields.name.as_deref(), Some("Acme Farms"));
        assert_eq!(entities[0].first_seen, Some(at(1)));
        assert_eq!(entities[0].last_seen, Some(at(20)));
        let linked = store.records().await;
        assert_eq!(linked[2].canonical_entity_id, Some(entity_id));
    }

    #[tokio::test]
    async fn test_batch_limit_bounds_clusters() {
        let store = MemoryStore::with_records([
            record(1, "Acme", RecordSource::Scraper, 1, 1),
            record(2, "Acme", RecordSource::Scraper, 1, 1),
            record(3, "Zenith", RecordSource::Scraper, 1, 1),
            record(4, "Zenith", RecordSource::Scraper, 1, 1),
        ]);
        store
            .insert_memberships_if_absent(&[
                ClusterMembership::new(1, 1, 0.9),
                ClusterMembership::new(1, 2, 0.9),
                ClusterMembership::new(3, 3, 0.9),
                ClusterMembership::new(3, 4, 0.9),
            ])
            .await
            .unwrap();
        let config = PipelineConfig::default();

        let first = generate_canonical_employers_from_clusters(&store, &config, 1, None)
            .await
            .unwrap();
        assert_eq!(first.clusters_resolved, 1);
        let entities = store.fetch_canonical_entities().await.unwrap();
        assert_eq!(entities[0].fields.name.as_deref(), Some("Acme"));

        let second = generate_canonical_employers_from_clusters(&store, &config, 1, None)
            .await
            .unwrap();
        assert_eq!(second.clusters_resolved, 1);
        assert_eq!(store.count_canonical_entities().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_processed_rows_without_a_link_are_recomputed() {
        let store = MemoryStore::with_records([
            record(1, "Acme Farms", RecordSource::Scraper, 5, 9),
            record(2, "ACME FARMS", RecordSource::Disclosure, 2, 6),
        ]);
        let mut stale = ClusterMembership::new(1, 1, 0.9);
        stale.processed = true;
        store
            .insert_memberships_if_absent(&[stale, ClusterMembership::new(1, 2, 0.9)])
            .await
            .unwrap();

        let stats =
            generate_canonical_employers_from_clusters(&store, &PipelineConfig::default(), 10, None)
                .await
                .unwrap();
        assert_eq!(stats.clusters_extended, 0);
        assert_eq!(stats.entities_created, 1);
        assert_eq!(stats.records_linked, 2);

        let entities = store.fetch_canonical_entities().await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].fields.name.as_deref(), Some("Acme Farms"));
        assert!(store
            .records()
            .await
            .iter()
            .all(|r| r.canonical_entity_id == Some(entities[0].id)));
        assert!(store.memberships().await.iter().all(|m| m.processed));
    }
}
