// src/canonical/singletons.rs

use anyhow::{Context, Result};
use indicatif::MultiProgress;
use log::info;
use std::collections::HashMap;

use crate::canonical::canonical_employers::resolve_entity_target;
use crate::canonical::canonicalize::canonical_fields;
use crate::models::{ClusterResolution, EmployerFields, EntityTarget, SeenWindow, SingletonStats};
use crate::store::ResolutionStore;
use crate::utils::pipeline_config::PipelineConfig;
use crate::utils::progress_config::stage_spinner;

/// Gives every record outside an approved cluster its own canonical employer.
///
/// Covers records with no canonical link that either never clustered or were
/// rejected in review. A record whose tuple already has a canonical employer
/// is linked to it instead. Batches of `rows_before_commit` records commit
/// together; `limit` bounds the total number of records handled.
pub async fn generate_canonical_employers_from_unclustered_records(
    store: &dyn ResolutionStore,
    config: &PipelineConfig,
    limit: Option<usize>,
    multi_progress: Option<&MultiProgress>,
) -> Result<SingletonStats> {
    let mut stats = SingletonStats::default();
    let spinner = stage_spinner(multi_progress, "Resolving unclustered records...");
    let batch_size = config.rows_before_commit.max(1);
    let mut after_id: Option<i64> = None;

    loop {
        let remaining = limit.map_or(usize::MAX, |max| max.saturating_sub(stats.records_considered));
        if remaining == 0 {
            break;
        }
        let page = store
            .fetch_unresolved_singletons(after_id, batch_size.min(remaining))
            .await
            .context("Failed to fetch unresolved records")?;
        let Some(last) = page.last() else {
            break;
        };
        after_id = Some(last.id);
        stats.records_considered += page.len();

        // Records sharing a tuple inside one batch must land on one entity.
        let mut by_tuple: HashMap<EmployerFields, usize> = HashMap::new();
        let mut resolutions: Vec<ClusterResolution> = Vec::new();
        for record in &page {
            let fields = canonical_fields(std::slice::from_ref(record));
            let window = SeenWindow::from_records([record]);
            if let Some(&idx) = by_tuple.get(&fields) {
                let resolution = &mut resolutions[idx];
                resolution.record_ids.push(record.id);
                match &mut resolution.target {
                    EntityTarget::Create(entity) => entity.absorb(&window),
                    EntityTarget::Extend { window: pending, .. } => {
                        pending.observe(window.first_seen, window.last_seen, &window.sources)
                    }
                }
                continue;
            }
            let target = resolve_entity_target(store, fields.clone(), window).await?;
            match &target {
                EntityTarget::Create(_) => stats.entities_created += 1,
                EntityTarget::Extend { .. } => stats.entities_reused += 1,
            }
            by_tuple.insert(fields, resolutions.len());
            resolutions.push(ClusterResolution {
                target,
                record_ids: vec![record.id],
                mark_processed: false,
            });
        }

        store
            .commit_resolutions(&resolutions)
            .await
            .context("Failed to commit singleton batch")?;
        stats.batches_committed += 1;
        if let Some(pb) = &spinner {
            pb.set_message(format!(
                "Resolved {} unclustered records",
                stats.records_considered
            ));
        }
        if page.len() < batch_size.min(remaining) {
            break;
        }
    }

    if let Some(pb) = &spinner {
        pb.finish_with_message(format!(
            "{} unclustered records resolved",
            stats.records_considered
        ));
    }
    info!(
        "Singleton pass: {} records, {} canonical employers created, {} reused, {} batches",
        stats.records_considered, stats.entities_created, stats.entities_reused, stats.batches_committed
    );
    Ok(stats)
}
