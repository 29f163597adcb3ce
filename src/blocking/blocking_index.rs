// src/blocking/blocking_index.rs

use anyhow::{Context, Result};
use indicatif::MultiProgress;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::time::Instant;

use crate::blocking::predicates::BlockingRule;
use crate::models::{BlockingEntry, BlockingIndexStats, CandidatePair, EmployerFields};
use crate::store::ResolutionStore;
use crate::utils::pipeline_config::PipelineConfig;
use crate::utils::progress_config::{stage_bar, stage_spinner};

// Blocks bigger than this are logged; they dominate the pair count.
const LARGE_BLOCK_WARNING: usize = 500;

/// Derives block keys from employer records and turns shared keys into
/// candidate pairs.
#[derive(Debug, Clone)]
pub struct BlockingIndexer {
    rules: Vec<BlockingRule>,
    read_batch_size: usize,
    write_batch_size: usize,
}

impl BlockingIndexer {
    pub fn new(rules: Vec<BlockingRule>, read_batch_size: usize, write_batch_size: usize) -> Self {
        Self {
            rules,
            read_batch_size: read_batch_size.max(1),
            write_batch_size: write_batch_size.max(1),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.blocking_rules.clone(),
            config.blocking_read_batch_size,
            config.rows_before_commit,
        )
    }

    /// Distinct keys for one record, sorted.
    pub fn block_keys(&self, fields: &EmployerFields) -> Vec<String> {
        self.rules
            .iter()
            .filter_map(|rule| rule.key(fields))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Drops the whole blocking map and indexes every record again.
    pub async fn rebuild(
        &self,
        store: &dyn ResolutionStore,
        multi_progress: Option<&MultiProgress>,
    ) -> Result<BlockingIndexStats> {
        let start = Instant::now();
        let mut stats = BlockingIndexStats {
            entries_cleared: store
                .clear_blocking_entries()
                .await
                .context("Failed to clear blocking entries")?,
            ..Default::default()
        };

        let pb = stage_spinner(multi_progress, "Indexing employer records...");
        let mut pending: Vec<BlockingEntry> = Vec::with_capacity(self.write_batch_size);
        let mut last_id: Option<i64> = None;

        loop {
            let page = store
                .fetch_records_after(last_id, self.read_batch_size)
                .await
                .context("Failed to read employer records for blocking")?;
            let Some(last) = page.last() else {
                break;
            };
            last_id = Some(last.id);

            for record in &page {
                stats.records_scanned += 1;
                let keys = self.block_keys(&record.fields);
                if keys.is_empty() {
                    stats.records_without_keys += 1;
                    continue;
                }
                pending.extend(keys.into_iter().map(|key| BlockingEntry::new(key, record.id)));
                while pending.len() >= self.write_batch_size {
                    let rest = pending.split_off(self.write_batch_size);
                    stats.entries_written += self.flush(store, &pending).await?;
                    pending = rest;
                }
            }

            if let Some(pb) = &pb {
                pb.set_message(format!(
                    "Indexed {} records, {} entries",
                    stats.records_scanned, stats.entries_written
                ));
            }
            if page.len() < self.read_batch_size {
                break;
            }
        }
        stats.entries_written += self.flush(store, &pending).await?;

        if let Some(pb) = &pb {
            pb.finish_with_message(format!(
                "Blocking index rebuilt: {} entries",
                stats.entries_written
            ));
        }
        info!(
            "Blocking index rebuilt in {:.2?}: {} records scanned, {} entries, {} records without keys",
            start.elapsed(),
            stats.records_scanned,
            stats.entries_written,
            stats.records_without_keys
        );
        Ok(stats)
    }

    async fn flush(&self, store: &dyn ResolutionStore, batch: &[BlockingEntry]) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let written = store
            .insert_blocking_entries(batch)
            .await
            .context("Failed to write blocking entries")?;
        debug!("Flushed {} blocking entries", written);
        Ok(written as usize)
    }

    /// Every pair of distinct records sharing a block key, once, sorted.
    pub async fn candidate_pairs(
        &self,
        store: &dyn ResolutionStore,
        multi_progress: Option<&MultiProgress>,
    ) -> Result<Vec<CandidatePair>> {
        let total = store
            .count_blocking_entries()
            .await
            .context("Failed to count blocking entries")?;
        let pb = stage_bar(multi_progress, total, "Generating candidate pairs...");

        let mut pairs: BTreeSet<CandidatePair> = BTreeSet::new();
        let mut current_key: Option<String> = None;
        let mut block: Vec<i64> = Vec::new();
        let mut cursor: Option<BlockingEntry> = None;

        loop {
            let page = store
                .fetch_blocking_entries_after(cursor.as_ref(), self.read_batch_size)
                .await
                .context("Failed to read blocking entries")?;
            if page.is_empty() {
                break;
            }
            for entry in &page {
                if current_key.as_deref() != Some(entry.block_key.as_str()) {
                    emit_block_pairs(current_key.as_deref(), &block, &mut pairs);
                    current_key = Some(entry.block_key.clone());
                    block.clear();
                }
                block.push(entry.record_id);
            }
            if let Some(pb) = &pb {
                pb.inc(page.len() as u64);
            }
            let exhausted = page.len() < self.read_batch_size;
            cursor = page.into_iter().last();
            if exhausted {
                break;
            }
        }
        emit_block_pairs(current_key.as_deref(), &block, &mut pairs);

        if let Some(pb) = &pb {
            pb.finish_with_message(format!("{} candidate pairs", pairs.len()));
        }
        info!("Generated {} candidate pairs from {} blocking entries", pairs.len(), total);
        Ok(pairs.into_iter().collect())
    }
}

fn emit_block_pairs(key: Option<&str>, block: &[i64], pairs: &mut BTreeSet<CandidatePair>) {
    if block.len() > LARGE_BLOCK_WARNING {
        warn!(
            "Block '{}' holds {} records; consider a narrower blocking rule",
            key.unwrap_or_default(),
            block.len()
        );
    }
    for (i, &a) in block.iter().enumerate() {
        for &b in &block[i + 1..] {
            if let Some(pair) = CandidatePair::new(a, b) {
                pairs.insert(pair);
            }
        }
    }
}
