// src/models/stats_models.rs

use log::info;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockingIndexStats {
    pub records_scanned: usize,
    pub records_without_keys: usize,
    pub entries_written: usize,
    pub entries_cleared: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusteringStats {
    pub nodes: usize,
    pub edges: usize,
    pub clusters: usize,
    pub memberships_written: u64,
    pub memberships_already_present: u64,
}

/// Result of a full rebuild run.
#[derive(Debug, Clone, Default)]
pub struct RebuildStats {
    pub run_id: String,
    pub blocking: BlockingIndexStats,
    pub candidate_pairs: usize,
    pub clustering: ClusteringStats,
    pub memberships_cleared: u64,
    /// Membership rows in the store once the rebuild finished.
    pub memberships_total: u64,
    pub phase_times: Vec<(String, Duration)>,
}

impl RebuildStats {
    pub fn total_time(&self) -> Duration {
        self.phase_times.iter().map(|(_, d)| *d).sum()
    }

    pub fn log_summary(&self) {
        info!("=== Full Rebuild Summary (run {}) ===", self.run_id);
        info!(
            "  Records scanned: {} ({} without any block key)",
            self.blocking.records_scanned, self.blocking.records_without_keys
        );
        info!("  Blocking entries written: {}", self.blocking.entries_written);
        info!("  Candidate pairs: {}", self.candidate_pairs);
        info!(
            "  Graph: {} nodes, {} edges above threshold",
            self.clustering.nodes, self.clustering.edges
        );
        info!(
            "  Clusters: {} ({} new memberships, {} already present)",
            self.clustering.clusters,
            self.clustering.memberships_written,
            self.clustering.memberships_already_present
        );
        info!("  Cluster memberships stored: {}", self.memberships_total);
        for (phase, duration) in &self.phase_times {
            info!("  {}: {:.2?}", phase, duration);
        }
        info!("  Total: {:.2?}", self.total_time());
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalizationStats {
    pub clusters_considered: usize,
    pub clusters_resolved: usize,
    pub clusters_extended: usize,
    pub entities_created: usize,
    pub entities_reused: usize,
    pub records_linked: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SingletonStats {
    pub records_considered: usize,
    pub entities_created: usize,
    pub entities_reused: usize,
    pub batches_committed: usize,
}

/// Result of an incremental run.
#[derive(Debug, Clone, Default)]
pub struct IncrementalStats {
    pub run_id: String,
    pub canonicalization: CanonicalizationStats,
    pub singletons: Option<SingletonStats>,
    pub elapsed: Duration,
}

impl IncrementalStats {
    pub fn log_summary(&self) {
        let c = &self.canonicalization;
        info!("=== Incremental Run Summary (run {}) ===", self.run_id);
        info!(
            "  Clusters considered: {} (resolved: {}, extended: {})",
            c.clusters_considered, c.clusters_resolved, c.clusters_extended
        );
        info!(
            "  Canonical employers created: {}, reused: {}; records linked: {}",
            c.entities_created, c.entities_reused, c.records_linked
        );
        if let Some(s) = &self.singletons {
            info!(
                "  Singletons: {} records, {} created, {} reused, {} batches",
                s.records_considered, s.entities_created, s.entities_reused, s.batches_committed
            );
        }
        info!("  Elapsed: {:.2?}", self.elapsed);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewSummary {
    pub presented: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub unsure: usize,
    pub committed: usize,
    pub checkpoints: usize,
    pub quit: bool,
}
