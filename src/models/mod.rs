pub mod cluster;
pub mod employer;
pub mod stats_models;

pub use cluster::{
    BlockingEntry, CandidatePair, ClusterMembership, ClusterResolution, EntityTarget,
    PendingCanonicalCluster, ReviewCursor, ReviewDecision, ReviewState, ScoredPair,
};
pub use employer::{
    CanonicalEntity, EmployerField, EmployerFields, EmployerRecord, RecordSource, SeenWindow,
};
pub use stats_models::{
    BlockingIndexStats, CanonicalizationStats, ClusteringStats, IncrementalStats, RebuildStats,
    ReviewSummary, SingletonStats,
};
