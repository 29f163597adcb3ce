// src/clustering/create_clusters.rs

use anyhow::{Context, Result};
use indicatif::MultiProgress;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use petgraph::graph::{NodeIndex, UnGraph};

use crate::clustering::linkage::average_linkage;
use crate::clustering::ClusteringStrategy;
use crate::matching::PairScorer;
use crate::models::{
    CandidatePair, ClusterMembership, ClusteringStats, EmployerFields, ScoredPair,
};
use crate::store::ResolutionStore;
use crate::utils::pipeline_config::PipelineConfig;
use crate::utils::progress_config::{stage_bar, stage_spinner};

/// A cluster before it is written: its members and each member's score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCluster {
    /// Sorted ascending.
    pub members: Vec<i64>,
    pub member_scores: BTreeMap<i64, f64>,
}

/// Scores every candidate pair, `batch_size` pairs at a time. Only the
/// records of the current chunk are held in memory; pairs referring to a
/// record that no longer exists are skipped.
pub async fn score_candidate_pairs(
    store: &dyn ResolutionStore,
    scorer: &dyn PairScorer,
    pairs: &[CandidatePair],
    batch_size: usize,
    multi_progress: Option<&MultiProgress>,
) -> Result<Vec<ScoredPair>> {
    let pb = stage_bar(multi_progress, pairs.len() as u64, "Scoring candidate pairs...");
    let mut scored = Vec::with_capacity(pairs.len());
    let mut skipped = 0usize;

    for chunk in pairs.chunks(batch_size.max(1)) {
        let mut ids: Vec<i64> = chunk.iter().flat_map(|p| [p.low_id, p.high_id]).collect();
        ids.sort_unstable();
        ids.dedup();
        let fields: HashMap<i64, EmployerFields> = store
            .fetch_records_by_ids(&ids)
            .await
            .context("Failed to load records for scoring")?
            .into_iter()
            .map(|r| (r.id, r.fields))
            .collect();

        for pair in chunk {
            match (fields.get(&pair.low_id), fields.get(&pair.high_id)) {
                (Some(a), Some(b)) => scored.push(ScoredPair {
                    pair: *pair,
                    score: scorer.score(a, b).clamp(0.0, 1.0),
                }),
                _ => skipped += 1,
            }
        }
        if let Some(pb) = &pb {
            pb.inc(chunk.len() as u64);
        }
    }
    if skipped > 0 {
        warn!("Skipped {} candidate pairs referring to missing records", skipped);
    }
    if let Some(pb) = &pb {
        pb.finish_with_message(format!("Scored {} pairs", scored.len()));
    }
    Ok(scored)
}

/// Builds the match graph: one node per record in any scored pair, one edge
/// per pair scoring at least `threshold`.
fn build_match_graph(
    scored: &[ScoredPair],
    threshold: f64,
) -> (UnGraph<i64, f64>, HashMap<i64, NodeIndex>) {
    let mut ids: Vec<i64> = scored
        .iter()
        .flat_map(|s| [s.pair.low_id, s.pair.high_id])
        .collect();
    ids.sort_unstable();
    ids.dedup();

    let mut graph = UnGraph::new_undirected();
    let mut node_map = HashMap::with_capacity(ids.len());
    for id in ids {
        node_map.insert(id, graph.add_node(id));
    }
    for s in scored.iter().filter(|s| s.score >= threshold) {
        graph.add_edge(node_map[&s.pair.low_id], node_map[&s.pair.high_id], s.score);
    }
    (graph, node_map)
}

/// Connected components of size two or more, each sorted, ordered by their
/// smallest member.
fn connected_components(graph: &UnGraph<i64, f64>) -> Vec<Vec<i64>> {
    let mut visited = vec![false; graph.node_count()];
    let mut components = Vec::new();

    for node_idx in graph.node_indices() {
        if visited[node_idx.index()] {
            continue;
        }
        let mut component = Vec::new();
        let mut stack = vec![node_idx];
        while let Some(current) = stack.pop() {
            if visited[current.index()] {
                continue;
            }
            visited[current.index()] = true;
            component.push(graph[current]);
            for neighbor in graph.neighbors(current) {
                if !visited[neighbor.index()] {
                    stack.push(neighbor);
                }
            }
        }
        if component.len() > 1 {
            component.sort_unstable();
            components.push(component);
        }
    }
    components.sort_by_key(|c| c[0]);
    components
}

/// Partitions the scored pairs into clusters. Deterministic for fixed scores.
pub fn cluster_scored_pairs(
    scored: &[ScoredPair],
    threshold: f64,
    strategy: ClusteringStrategy,
) -> Vec<ScoredCluster> {
    let (graph, _) = build_match_graph(scored, threshold);
    let components = connected_components(&graph);
    let score_lookup: HashMap<CandidatePair, f64> =
        scored.iter().map(|s| (s.pair, s.score)).collect();

    let groups: Vec<Vec<i64>> = match strategy {
        ClusteringStrategy::ConnectedComponents => components,
        ClusteringStrategy::AverageLinkage => {
            let mut groups: Vec<Vec<i64>> = components
                .iter()
                .flat_map(|c| average_linkage(c, &score_lookup, threshold))
                .collect();
            groups.sort_by_key(|c| c[0]);
            groups
        }
    };

    groups
        .into_iter()
        .map(|members| {
            let member_scores = members
                .iter()
                .map(|&id| (id, member_score(id, &members, &score_lookup)))
                .collect();
            ScoredCluster {
                members,
                member_scores,
            }
        })
        .collect()
}

/// Best score between `id` and any other member of its cluster.
fn member_score(id: i64, members: &[i64], scores: &HashMap<CandidatePair, f64>) -> f64 {
    members
        .iter()
        .filter_map(|&other| CandidatePair::new(id, other))
        .filter_map(|pair| scores.get(&pair).copied())
        .fold(0.0, f64::max)
}

/// Picks a canon id for every cluster. A cluster keeps the smallest canon id
/// already persisted for one of its members; otherwise it takes its smallest
/// member id. Ids already handed out in this run are skipped so two clusters
/// never share one.
pub fn assign_canon_ids(
    clusters: &[ScoredCluster],
    existing: &HashMap<i64, i64>,
) -> Vec<ClusterMembership> {
    let mut taken: HashSet<i64> = HashSet::new();
    let mut rows = Vec::new();

    for cluster in clusters {
        let persisted = cluster
            .members
            .iter()
            .filter_map(|id| existing.get(id).copied())
            .filter(|canon| !taken.contains(canon))
            .min();
        let canon_id = match persisted.or_else(|| {
            cluster
                .members
                .iter()
                .copied()
                .find(|id| !taken.contains(id))
        }) {
            Some(id) => id,
            None => {
                warn!(
                    "No free canon id for cluster {:?}; leaving it unassigned",
                    cluster.members
                );
                continue;
            }
        };
        taken.insert(canon_id);

        for &record_id in &cluster.members {
            let score = cluster.member_scores.get(&record_id).copied().unwrap_or(0.0);
            rows.push(ClusterMembership::new(canon_id, record_id, score));
        }
    }
    rows
}

/// Scores `pairs`, clusters them and persists one membership per clustered
/// record. Existing rows are never overwritten, so review and processing
/// state survive reruns.
pub async fn run_clustering(
    store: &dyn ResolutionStore,
    scorer: &dyn PairScorer,
    pairs: &[CandidatePair],
    config: &PipelineConfig,
    multi_progress: Option<&MultiProgress>,
) -> Result<ClusteringStats> {
    let start = Instant::now();
    info!(
        "Clustering {} candidate pairs ({} strategy, threshold {})",
        pairs.len(),
        config.clustering_strategy,
        config.cluster_threshold
    );

    let scored = score_candidate_pairs(
        store,
        scorer,
        pairs,
        config.blocking_read_batch_size,
        multi_progress,
    )
    .await?;

    let spinner = stage_spinner(multi_progress, "Building match graph...");
    let (graph, _) = build_match_graph(&scored, config.cluster_threshold);
    let mut stats = ClusteringStats {
        nodes: graph.node_count(),
        edges: graph.edge_count(),
        ..Default::default()
    };
    let clusters = cluster_scored_pairs(&scored, config.cluster_threshold, config.clustering_strategy);
    stats.clusters = clusters.len();
    if let Some(pb) = &spinner {
        pb.finish_with_message(format!(
            "{} nodes, {} edges, {} clusters",
            stats.nodes, stats.edges, stats.clusters
        ));
    }

    let clustered_ids: Vec<i64> = clusters.iter().flat_map(|c| c.members.iter().copied()).collect();
    let mut existing: HashMap<i64, i64> = HashMap::new();
    for chunk in clustered_ids.chunks(config.blocking_read_batch_size.max(1)) {
        let rows = store
            .fetch_memberships_for_records(chunk)
            .await
            .context("Failed to load existing memberships")?;
        existing.extend(rows.into_iter().map(|m| (m.record_id, m.canon_id)));
    }
    debug!("{} clustered records already have a membership", existing.len());

    let rows = assign_canon_ids(&clusters, &existing);
    let pb = stage_bar(multi_progress, rows.len() as u64, "Writing cluster memberships...");
    for batch in rows.chunks(config.rows_before_commit.max(1)) {
        let written = store
            .insert_memberships_if_absent(batch)
            .await
            .context("Failed to write cluster memberships")?;
        stats.memberships_written += written;
        stats.memberships_already_present += batch.len() as u64 - written;
        if let Some(pb) = &pb {
            pb.inc(batch.len() as u64);
        }
    }
    if let Some(pb) = &pb {
        pb.finish_with_message(format!(
            "{} memberships written",
            stats.memberships_written
        ));
    }

    info!(
        "Clustering finished in {:.2?}: {} clusters, {} new memberships, {} already present",
        start.elapsed(),
        stats.clusters,
        stats.memberships_written,
        stats.memberships_already_present
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmployerRecord, RecordSource};
    use crate::store::MemoryStore;

    fn sp(a: i64, b: i64, score: f64) -> ScoredPair {
        ScoredPair {
            pair: CandidatePair::new(a, b).unwrap(),
            score,
        }
    }

    fn same_name_scorer(a: &EmployerFields, b: &EmployerFields) -> f64 {
        if a.name == b.name {
            0.95
        } else {
            0.1
        }
    }

    #[test]
    fn test_components_respect_threshold() {
        let scored = vec![sp(1, 2, 0.9), sp(2, 3, 0.6), sp(3, 4, 0.59), sp(5, 6, 0.7)];
        let clusters = cluster_scored_pairs(&scored, 0.6, ClusteringStrategy::ConnectedComponents);
        let members: Vec<Vec<i64>> = clusters.iter().map(|c| c.members.clone()).collect();
        assert_eq!(members, vec![vec![1, 2, 3], vec![5, 6]]);

        assert_eq!(clusters[0].member_scores[&1], 0.9);
        assert_eq!(clusters[0].member_scores[&2], 0.9);
        assert_eq!(clusters[0].member_scores[&3], 0.6);
    }

    #[test]
    fn test_no_edges_means_no_clusters() {
        let scored = vec![sp(1, 2, 0.2), sp(3, 4, 0.5)];
        assert!(cluster_scored_pairs(&scored, 0.6, ClusteringStrategy::ConnectedComponents).is_empty());
        assert!(cluster_scored_pairs(&scored, 0.6, ClusteringStrategy::AverageLinkage).is_empty());
    }

    #[test]
    fn test_average_linkage_splits_weak_bridges() {
        let scored = vec![sp(1, 2, 0.95), sp(3, 4, 0.9), sp(2, 3, 0.65)];
        let cc = cluster_scored_pairs(&scored, 0.6, ClusteringStrategy::ConnectedComponents);
        assert_eq!(cc.len(), 1);
        let al = cluster_scored_pairs(&scored, 0.6, ClusteringStrategy::AverageLinkage);
        let members: Vec<Vec<i64>> = al.iter().map(|c| c.members.clone()).collect();
        assert_eq!(members, vec![vec![1, 2], vec![3, 4]]);
        assert_eq!(al[0].member_scores[&2], 0.95);
    }

    #[test]
    fn test_canon_ids_prefer_persisted_then_minimum() {
        let clusters = cluster_scored_pairs(
            &[sp(4, 7, 0.9), sp(10, 12, 0.8)],
            0.6,
            ClusteringStrategy::ConnectedComponents,
        );
        let existing = HashMap::from([(12, 3)]);
        let rows = assign_canon_ids(&clusters, &existing);
        let canon: BTreeMap<i64, i64> = rows.iter().map(|r| (r.record_id, r.canon_id)).collect();
        assert_eq!(canon, BTreeMap::from([(4, 4), (7, 4), (10, 3), (12, 3)]));
        assert!(rows.iter().all(|r| !r.processed && r.is_valid_cluster.is_none()));
    }

    #[tokio::test]
    async fn test_run_clustering_is_insert_if_absent() {
        let store = MemoryStore::with_records([
            EmployerRecord::new(1, EmployerFields::named("Acme Farms"), RecordSource::Scraper),
            EmployerRecord::new(2, EmployerFields::named("Acme Farms"), RecordSource::Disclosure),
            EmployerRecord::new(3, EmployerFields::named("Zenith"), RecordSource::Scraper),
        ]);
        let pairs = vec![
            CandidatePair::new(1, 2).unwrap(),
            CandidatePair::new(1, 3).unwrap(),
        ];
        let config = PipelineConfig::default();

        let first = run_clustering(&store, &same_name_scorer, &pairs, &config, None)
            .await
            .unwrap();
        assert_eq!(first.nodes, 3);
        assert_eq!(first.edges, 1);
        assert_eq!(first.clusters, 1);
        assert_eq!(first.memberships_written, 2);

        let second = run_clustering(&store, &same_name_scorer, &pairs, &config, None)
            .await
            .unwrap();
        assert_eq!(second.memberships_written, 0);
        assert_eq!(second.memberships_already_present, 2);

        let rows = store.memberships().await;
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.canon_id == 1 && r.cluster_score == 0.95));
    }

    #[tokio::test]
    async fn test_scoring_holds_one_chunk_of_records() {
        let store = MemoryStore::with_records((1..=6).map(|id| {
            EmployerRecord::new(id, EmployerFields::named("Acme Farms"), RecordSource::Scraper)
        }));
        let mut pairs: Vec<CandidatePair> = (1..6)
            .filter_map(|id| CandidatePair::new(id, id + 1))
            .collect();
        pairs.push(CandidatePair::new(6, 99).unwrap());

        let chunked = score_candidate_pairs(&store, &same_name_scorer, &pairs, 2, None)
            .await
            .unwrap();
        assert!(store.largest_id_lookup() <= 4);
        assert_eq!(chunked.len(), 5);
        assert!(chunked.iter().all(|s| s.score == 0.95));

        let whole = score_candidate_pairs(&store, &same_name_scorer, &pairs, 100, None)
            .await
            .unwrap();
        assert_eq!(chunked, whole);
    }

    #[tokio::test]
    async fn test_failed_membership_batch_resumes_on_rerun() {
        let store = MemoryStore::with_records([
            EmployerRecord::new(1, EmployerFields::named("Acme Farms"), RecordSource::Scraper),
            EmployerRecord::new(2, EmployerFields::named("Acme Farms"), RecordSource::Scraper),
            EmployerRecord::new(3, EmployerFields::named("Zenith"), RecordSource::Scraper),
            EmployerRecord::new(4, EmployerFields::named("Zenith"), RecordSource::Scraper),
        ]);
        let pairs = vec![
            CandidatePair::new(1, 2).unwrap(),
            CandidatePair::new(3, 4).unwrap(),
        ];
        let config = PipelineConfig {
            rows_before_commit: 2,
            ..Default::default()
        };

        store.fail_nth_commit(2);
        assert!(run_clustering(&store, &same_name_scorer, &pairs, &config, None)
            .await
            .is_err());
        let kept: Vec<i64> = store.memberships().await.iter().map(|m| m.record_id).collect();
        assert_eq!(kept, vec![1, 2]);

        let rerun = run_clustering(&store, &same_name_scorer, &pairs, &config, None)
            .await
            .unwrap();
        assert_eq!(rerun.memberships_written, 2);
        assert_eq!(rerun.memberships_already_present, 2);
        let canon: BTreeMap<i64, i64> = store
            .memberships()
            .await
            .iter()
            .map(|m| (m.record_id, m.canon_id))
            .collect();
        assert_eq!(canon, BTreeMap::from([(1, 1), (2, 1), (3, 3), (4, 3)]));
    }
}
