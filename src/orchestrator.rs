// src/orchestrator.rs
//
// Sequences the resolution stages into the two kinds of run: a full rebuild
// of the blocking map and cluster memberships, and an incremental pass that
// turns approved clusters (and optionally leftover records) into canonical
// employers.

use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar};
use log::info;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::blocking::BlockingIndexer;
use crate::canonical::{
    generate_canonical_employers_from_clusters,
    generate_canonical_employers_from_unclustered_records,
};
use crate::clustering::run_clustering;
use crate::matching::PairScorer;
use crate::models::{IncrementalStats, RebuildStats};
use crate::store::ResolutionStore;
use crate::utils::get_memory_usage;
use crate::utils::pipeline_config::PipelineConfig;
use crate::utils::progress_config::{stage_bar, ProgressConfig};

/// Everything a run needs, built once per invocation and passed to each stage.
pub struct RunContext {
    pub store: Arc<dyn ResolutionStore>,
    pub scorer: Arc<dyn PairScorer>,
    pub config: PipelineConfig,
    pub run_id: Uuid,
    pub progress: ProgressConfig,
    pub multi_progress: Option<MultiProgress>,
}

impl RunContext {
    /// Validates `config` and starts a run with progress bars off.
    pub fn new(
        store: Arc<dyn ResolutionStore>,
        scorer: Arc<dyn PairScorer>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            scorer,
            config,
            run_id: Uuid::new_v4(),
            progress: ProgressConfig {
                enabled: false,
                ..Default::default()
            },
            multi_progress: None,
        })
    }

    pub fn with_progress(mut self, progress: ProgressConfig) -> Self {
        self.multi_progress = progress.create_multi_progress();
        self.progress = progress;
        self
    }

    fn stage_progress(&self) -> Option<&MultiProgress> {
        if self.progress.should_show_detailed() {
            self.multi_progress.as_ref()
        } else {
            None
        }
    }

    async fn phase_message(&self, pb: &Option<ProgressBar>, phase: &str) {
        let Some(pb) = pb else {
            return;
        };
        if self.progress.should_show_memory() {
            let memory_mb = get_memory_usage().await;
            pb.set_message(format!("{} (Memory: {} MB)", phase, memory_mb));
        } else {
            pb.set_message(phase.to_string());
        }
    }
}

/// Wipes the blocking map (and the memberships when `refresh_memberships`),
/// then indexes, pairs, scores and clusters every record.
///
/// Rerunning on unchanged input writes no new memberships: existing rows keep
/// their canon ids, review verdicts and processing state.
pub async fn run_full_rebuild(ctx: &RunContext, refresh_memberships: bool) -> Result<RebuildStats> {
    let run_start = Instant::now();
    info!("Starting full rebuild, run {}", ctx.run_id);
    ctx.config.log_config();

    let mut stats = RebuildStats {
        run_id: ctx.run_id.to_string(),
        ..Default::default()
    };
    let main_pb = stage_bar(ctx.multi_progress.as_ref(), 3, "Full rebuild");
    let store = ctx.store.as_ref();

    // Phase 1: blocking
    ctx.phase_message(&main_pb, "Phase 1: Blocking").await;
    let phase_start = Instant::now();
    if refresh_memberships {
        stats.memberships_cleared = store
            .clear_memberships()
            .await
            .context("Failed to clear cluster memberships")?;
        info!("Cleared {} cluster memberships", stats.memberships_cleared);
    }
    let indexer = BlockingIndexer::from_config(&ctx.config);
    stats.blocking = indexer
        .rebuild(store, ctx.stage_progress())
        .await
        .context("Blocking phase failed")?;
    stats.phase_times.push(("blocking".to_string(), phase_start.elapsed()));
    if let Some(pb) = &main_pb {
        pb.inc(1);
    }

    // Phase 2: candidate pairs
    ctx.phase_message(&main_pb, "Phase 2: Candidate pairs").await;
    let phase_start = Instant::now();
    let pairs = indexer
        .candidate_pairs(store, ctx.stage_progress())
        .await
        .context("Candidate pair generation failed")?;
    stats.candidate_pairs = pairs.len();
    stats.phase_times.push(("candidate_pairs".to_string(), phase_start.elapsed()));
    if let Some(pb) = &main_pb {
        pb.inc(1);
    }

    // Phase 3: scoring and clustering
    ctx.phase_message(&main_pb, "Phase 3: Scoring and clustering").await;
    let phase_start = Instant::now();
    stats.clustering = run_clustering(
        store,
        ctx.scorer.as_ref(),
        &pairs,
        &ctx.config,
        ctx.stage_progress(),
    )
    .await
    .context("Clustering phase failed")?;
    stats.memberships_total = store
        .count_memberships()
        .await
        .context("Failed to count cluster memberships")?;
    stats.phase_times.push(("clustering".to_string(), phase_start.elapsed()));
    if let Some(pb) = &main_pb {
        pb.inc(1);
        pb.finish_with_message(format!("Full rebuild complete in {:.2?}", run_start.elapsed()));
    }

    stats.log_summary();
    Ok(stats)
}

/// Canonicalizes at most `batch_limit` pending clusters, then, when asked,
/// resolves up to `batch_limit` leftover records as singletons.
pub async fn run_incremental(
    ctx: &RunContext,
    batch_limit: Option<usize>,
    include_singletons: bool,
) -> Result<IncrementalStats> {
    let start = Instant::now();
    info!(
        "Starting incremental run {} (batch limit: {:?}, singletons: {})",
        ctx.run_id, batch_limit, include_singletons
    );
    let store = ctx.store.as_ref();
    let mut stats = IncrementalStats {
        run_id: ctx.run_id.to_string(),
        ..Default::default()
    };

    stats.canonicalization = generate_canonical_employers_from_clusters(
        store,
        &ctx.config,
        batch_limit.unwrap_or(usize::MAX),
        ctx.stage_progress(),
    )
    .await
    .context("Cluster canonicalization failed")?;

    if include_singletons {
        stats.singletons = Some(
            generate_canonical_employers_from_unclustered_records(
                store,
                &ctx.config,
                batch_limit,
                ctx.stage_progress(),
            )
            .await
            .context("Singleton canonicalization failed")?,
        );
    }

    stats.elapsed = start.elapsed();
    stats.log_summary();
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::{BlockingPredicate, BlockingRule};
    use crate::error::ResolutionError;
    use crate::matching::normalize::normalize_value;
    use crate::models::{
        EmployerField, EmployerFields, EmployerRecord, RecordSource, ReviewDecision,
    };
    use crate::store::MemoryStore;
    use chrono::Utc;

    /// 0.9 for names equal after normalization, 0.5 otherwise.
    fn name_scorer(a: &EmployerFields, b: &EmployerFields) -> f64 {
        let na = a.name.as_deref().and_then(normalize_value);
        let nb = b.name.as_deref().and_then(normalize_value);
        if na.is_some() && na == nb {
            0.9
        } else {
            0.5
        }
    }

    fn record(id: i64, name: &str) -> EmployerRecord {
        let fields = EmployerFields {
            name: Some(name.to_string()),
            phone: Some("509-555-0100".to_string()),
            ..Default::default()
        };
        EmployerRecord::new(id, fields, RecordSource::Scraper)
    }

    fn acme_context(store: Arc<MemoryStore>) -> RunContext {
        let config = PipelineConfig {
            // everything shares the phone key, so every pair gets scored
            blocking_rules: vec![
                BlockingRule::new(EmployerField::Name, BlockingPredicate::Exact),
                BlockingRule::new(EmployerField::Phone, BlockingPredicate::Digits),
            ],
            ..Default::default()
        };
        RunContext::new(store, Arc::new(name_scorer), config).unwrap()
    }

    fn acme_store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_records([
            record(1, "Acme Farms"),
            record(2, "ACME Farms"),
            record(3, "Unrelated Co"),
        ]))
    }

    #[tokio::test]
    async fn test_acme_scenario_end_to_end() {
        let store = acme_store();
        let ctx = acme_context(store.clone());

        let rebuild = run_full_rebuild(&ctx, false).await.unwrap();
        assert_eq!(rebuild.candidate_pairs, 3);
        assert_eq!(rebuild.clustering.clusters, 1);
        let memberships = store.memberships().await;
        assert_eq!(memberships.len(), 2);
        assert!(memberships.iter().all(|m| m.canon_id == 1));

        let incremental = run_incremental(&ctx, None, false).await.unwrap();
        assert_eq!(incremental.canonicalization.entities_created, 1);
        let entities = store.fetch_canonical_entities().await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].fields.name.as_deref(), Some("Acme Farms"));
        let records = store.records().await;
        assert_eq!(records[0].canonical_entity_id, Some(entities[0].id));
        assert_eq!(records[1].canonical_entity_id, Some(entities[0].id));
        assert_eq!(records[2].canonical_entity_id, None);

        let with_singletons = run_incremental(&ctx, None, true).await.unwrap();
        assert_eq!(with_singletons.canonicalization.clusters_considered, 0);
        assert_eq!(with_singletons.singletons.unwrap().entities_created, 1);
        assert_eq!(store.count_canonical_entities().await.unwrap(), 2);
        let records = store.records().await;
        assert!(records[2].canonical_entity_id.is_some());
        assert_ne!(records[2].canonical_entity_id, records[0].canonical_entity_id);
    }

    #[tokio::test]
    async fn test_rerun_on_unchanged_input_adds_nothing() {
        let store = acme_store();
        let ctx = acme_context(store.clone());
        run_full_rebuild(&ctx, false).await.unwrap();
        run_incremental(&ctx, None, true).await.unwrap();

        let blocking_before = store.blocking_entries().await;
        let memberships_before = store.memberships().await;
        let entities_before = store.count_canonical_entities().await.unwrap();

        let rebuild = run_full_rebuild(&ctx, false).await.unwrap();
        assert_eq!(rebuild.clustering.memberships_written, 0);
        let incremental = run_incremental(&ctx, None, true).await.unwrap();
        assert_eq!(incremental.canonicalization.clusters_considered, 0);
        assert_eq!(incremental.singletons.unwrap().records_considered, 0);

        assert_eq!(store.blocking_entries().await, blocking_before);
        assert_eq!(store.memberships().await, memberships_before);
        assert_eq!(store.count_canonical_entities().await.unwrap(), entities_before);
    }

    #[tokio::test]
    async fn test_reviewed_cluster_flows_through() {
        let store = acme_store();
        let mut ctx = acme_context(store.clone());
        // 0.9 is now low confidence
        ctx.config.review_threshold = 0.95;
        run_full_rebuild(&ctx, false).await.unwrap();

        let first = run_incremental(&ctx, None, false).await.unwrap();
        assert_eq!(first.canonicalization.clusters_considered, 0);
        assert_eq!(store.count_pending_reviews(0.95).await.unwrap(), 2);

        let now = Utc::now().naive_utc();
        store
            .apply_review_decisions(&[
                ReviewDecision { record_id: 1, is_valid_cluster: true, review_date: now },
                ReviewDecision { record_id: 2, is_valid_cluster: true, review_date: now },
            ])
            .await
            .unwrap();
        let second = run_incremental(&ctx, None, false).await.unwrap();
        assert_eq!(second.canonicalization.entities_created, 1);
        assert_eq!(second.canonicalization.records_linked, 2);
    }

    #[tokio::test]
    async fn test_refresh_clears_memberships() {
        let store = acme_store();
        let ctx = acme_context(store.clone());
        run_full_rebuild(&ctx, false).await.unwrap();
        let stats = run_full_rebuild(&ctx, true).await.unwrap();
        assert_eq!(stats.memberships_cleared, 2);
        assert_eq!(stats.clustering.memberships_written, 2);
        assert_eq!(stats.memberships_total, 2);
        assert_eq!(stats.phase_times.len(), 3);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = PipelineConfig {
            cluster_threshold: -0.1,
            ..Default::default()
        };
        let err = RunContext::new(Arc::new(MemoryStore::new()), Arc::new(name_scorer), config)
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<ResolutionError>(),
            Some(ResolutionError::InvalidConfig(_))
        ));
    }
}
