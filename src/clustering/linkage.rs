// src/clustering/linkage.rs
//
// Average-linkage agglomeration inside one connected component.

use std::collections::HashMap;

use crate::models::CandidatePair;

/// Splits `members` by repeatedly merging the two clusters with the highest
/// average pairwise score, as long as that average is at least `threshold`.
/// Pairs without a score count as zero. On equal averages the pair whose
/// clusters hold the lowest member ids merges first. Clusters of one record
/// are dropped from the result.
pub fn average_linkage(
    members: &[i64],
    scores: &HashMap<CandidatePair, f64>,
    threshold: f64,
) -> Vec<Vec<i64>> {
    let mut sorted = members.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let mut clusters: Vec<Vec<i64>> = sorted.into_iter().map(|id| vec![id]).collect();

    loop {
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..clusters.len() {
            for j in (i + 1)..clusters.len() {
                let avg = average_score(&clusters[i], &clusters[j], scores);
                if best.map_or(true, |(_, _, b)| avg > b) {
                    best = Some((i, j, avg));
                }
            }
        }
        match best {
            Some((i, j, avg)) if avg >= threshold => {
                let absorbed = clusters.remove(j);
                clusters[i].extend(absorbed);
                clusters[i].sort_unstable();
                // keep clusters ordered by their smallest member
                clusters.sort_by_key(|c| c[0]);
            }
            _ => break,
        }
    }

    clusters.retain(|c| c.len() > 1);
    clusters
}

fn average_score(a: &[i64], b: &[i64], scores: &HashMap<CandidatePair, f64>) -> f64 {
    let mut total = 0.0;
    for &x in a {
        for &y in b {
            if let Some(pair) = CandidatePair::new(x, y) {
                total += scores.get(&pair).copied().unwrap_or(0.0);
            }
        }
    }
    total / (a.len() * b.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(entries: &[(i64, i64, f64)]) -> HashMap<CandidatePair, f64> {
        entries
            .iter()
            .filter_map(|&(a, b, s)| CandidatePair::new(a, b).map(|p| (p, s)))
            .collect()
    }

    #[test]
    fn test_chain_is_split_where_average_drops() {
        // 1-2 and 3-4 are strong, the bridge 2-3 alone is not enough
        let s = scores(&[(1, 2, 0.95), (3, 4, 0.9), (2, 3, 0.65)]);
        let clusters = average_linkage(&[1, 2, 3, 4], &s, 0.6);
        assert_eq!(clusters, vec![vec![1, 2], vec![3, 4]]);
    }

    #[test]
    fn test_dense_group_merges_fully() {
        let s = scores(&[(1, 2, 0.9), (1, 3, 0.8), (2, 3, 0.85)]);
        assert_eq!(average_linkage(&[3, 1, 2], &s, 0.6), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_leftover_singletons_are_dropped() {
        let s = scores(&[(1, 2, 0.9), (2, 3, 0.61)]);
        // after {1,2} forms, the average to 3 is (0 + 0.61) / 2
        assert_eq!(average_linkage(&[1, 2, 3], &s, 0.6), vec![vec![1, 2]]);
    }

    #[test]
    fn test_ties_merge_lowest_ids_first() {
        let s = scores(&[(1, 2, 0.7), (2, 3, 0.7)]);
        // {1,2} merges first; 3 then averages 0.35 against it
        assert_eq!(average_linkage(&[1, 2, 3], &s, 0.6), vec![vec![1, 2]]);
    }
}
