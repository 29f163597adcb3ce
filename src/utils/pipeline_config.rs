// src/utils/pipeline_config.rs

use log::{info, warn};

use crate::blocking::{default_blocking_rules, parse_blocking_rules, BlockingRule};
use crate::clustering::ClusteringStrategy;
use crate::error::ResolutionError;
use crate::utils::env::env_or;

pub const DEFAULT_CLUSTERING_THRESHOLD: f64 = 0.6;
/// Anything at or below this score gets reviewed.
pub const DEFAULT_CLUSTER_REVIEW_THRESHOLD: f64 = 0.8;
pub const DEFAULT_ROWS_BEFORE_COMMIT: usize = 100;
pub const DEFAULT_BLOCKING_READ_BATCH_SIZE: usize = 1000;
pub const DEFAULT_REVIEW_PAGE_SIZE: usize = 10;
pub const DEFAULT_REVIEW_CHECKPOINT_EVERY: usize = 5;

/// Thresholds and batch sizes shared by every resolution stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Minimum pair score for an edge in the match graph.
    pub cluster_threshold: f64,
    /// Cluster scores at or below this need a human verdict.
    pub review_threshold: f64,
    /// Rows written per transaction.
    pub rows_before_commit: usize,
    /// Rows read per page when streaming records and blocking entries.
    pub blocking_read_batch_size: usize,
    pub clustering_strategy: ClusteringStrategy,
    pub review_page_size: usize,
    /// Review decisions committed per checkpoint.
    pub review_checkpoint_every: usize,
    pub blocking_rules: Vec<BlockingRule>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cluster_threshold: DEFAULT_CLUSTERING_THRESHOLD,
            review_threshold: DEFAULT_CLUSTER_REVIEW_THRESHOLD,
            rows_before_commit: DEFAULT_ROWS_BEFORE_COMMIT,
            blocking_read_batch_size: DEFAULT_BLOCKING_READ_BATCH_SIZE,
            clustering_strategy: ClusteringStrategy::ConnectedComponents,
            review_page_size: DEFAULT_REVIEW_PAGE_SIZE,
            review_checkpoint_every: DEFAULT_REVIEW_CHECKPOINT_EVERY,
            blocking_rules: default_blocking_rules(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let clustering_strategy = match std::env::var("CLUSTERING_STRATEGY") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(
                    "Unknown CLUSTERING_STRATEGY '{}', using connected components",
                    raw
                );
                ClusteringStrategy::ConnectedComponents
            }),
            Err(_) => ClusteringStrategy::ConnectedComponents,
        };

        let blocking_rules = match std::env::var("BLOCKING_RULES") {
            Ok(raw) => match parse_blocking_rules(&raw) {
                Ok(rules) if !rules.is_empty() => rules,
                Ok(_) => default_blocking_rules(),
                Err(e) => {
                    warn!("Ignoring BLOCKING_RULES: {}", e);
                    default_blocking_rules()
                }
            },
            Err(_) => default_blocking_rules(),
        };

        Self {
            cluster_threshold: env_or("DEDUPE_CLUSTERING_THRESHOLD", DEFAULT_CLUSTERING_THRESHOLD),
            review_threshold: env_or(
                "DEDUPE_CLUSTER_REVIEW_THRESHOLD",
                DEFAULT_CLUSTER_REVIEW_THRESHOLD,
            ),
            rows_before_commit: env_or("ROWS_BEFORE_COMMIT", DEFAULT_ROWS_BEFORE_COMMIT),
            blocking_read_batch_size: env_or(
                "BLOCKING_READ_BATCH_SIZE",
                DEFAULT_BLOCKING_READ_BATCH_SIZE,
            ),
            clustering_strategy,
            review_page_size: env_or("REVIEW_PAGE_SIZE", DEFAULT_REVIEW_PAGE_SIZE),
            review_checkpoint_every: env_or(
                "REVIEW_CHECKPOINT_EVERY",
                DEFAULT_REVIEW_CHECKPOINT_EVERY,
            ),
            blocking_rules,
        }
    }

    pub fn validate(&self) -> Result<(), ResolutionError> {
        for (name, value) in [
            ("cluster_threshold", self.cluster_threshold),
            ("review_threshold", self.review_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ResolutionError::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        for (name, value) in [
            ("rows_before_commit", self.rows_before_commit),
            ("blocking_read_batch_size", self.blocking_read_batch_size),
            ("review_page_size", self.review_page_size),
            ("review_checkpoint_every", self.review_checkpoint_every),
        ] {
            if value == 0 {
                return Err(ResolutionError::InvalidConfig(format!(
                    "{} must be positive",
                    name
                )));
            }
        }
        if self.blocking_rules.is_empty() {
            return Err(ResolutionError::InvalidConfig(
                "at least one blocking rule is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn log_config(&self) {
        info!("Resolution pipeline configuration:");
        info!("   Clustering threshold: {}", self.cluster_threshold);
        info!("   Review threshold: {}", self.review_threshold);
        info!("   Clustering strategy: {}", self.clustering_strategy);
        info!("   Rows before commit: {}", self.rows_before_commit);
        info!("   Blocking read batch size: {}", self.blocking_read_batch_size);
        info!(
            "   Review page size: {}, checkpoint every {} decisions",
            self.review_page_size, self.review_checkpoint_every
        );
        let rules: Vec<String> = self.blocking_rules.iter().map(|r| r.to_string()).collect();
        info!("   Blocking rules: {}", rules.join(", "));
    }
}
