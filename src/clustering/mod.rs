pub mod create_clusters;
pub mod linkage;

use std::fmt;
use std::str::FromStr;

use crate::error::ResolutionError;

pub use create_clusters::{
    assign_canon_ids, cluster_scored_pairs, run_clustering, score_candidate_pairs, ScoredCluster,
};

/// How threshold edges are turned into clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClusteringStrategy {
    /// Every connected component of the threshold graph is a cluster.
    #[default]
    ConnectedComponents,
    /// Components are split further by average-linkage agglomeration.
    AverageLinkage,
}

impl fmt::Display for ClusteringStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusteringStrategy::ConnectedComponents => f.write_str("connected_components"),
            ClusteringStrategy::AverageLinkage => f.write_str("average_linkage"),
        }
    }
}

impl FromStr for ClusteringStrategy {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "connected_components" | "components" => Ok(ClusteringStrategy::ConnectedComponents),
            "average_linkage" | "average" => Ok(ClusteringStrategy::AverageLinkage),
            other => Err(ResolutionError::InvalidConfig(format!(
                "unknown clustering strategy '{}'",
                other
            ))),
        }
    }
}
