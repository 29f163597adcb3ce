// src/matching/affine_gap.rs
//
// Affine-gap edit distance. Opening a gap is expensive but extending one is
// cheap, so "Acme Farms" vs "Acme Farms LLC" is closer than two strings with
// scattered substitutions.

/// Costs for the affine-gap recurrence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineGapWeights {
    pub match_weight: f64,
    pub mismatch_weight: f64,
    pub gap_weight: f64,
    pub space_weight: f64,
}

impl Default for AffineGapWeights {
    fn default() -> Self {
        Self {
            match_weight: 1.0,
            mismatch_weight: 11.0,
            gap_weight: 10.0,
            space_weight: 7.0,
        }
    }
}

/// Raw affine-gap distance between two strings, compared per `char`.
pub fn affine_gap_distance(a: &str, b: &str, weights: &AffineGapWeights) -> f64 {
    let mut s1: Vec<char> = a.chars().collect();
    let mut s2: Vec<char> = b.chars().collect();
    if s1 == s2 {
        return weights.match_weight * s1.len() as f64;
    }
    // The longer string runs along the inner dimension.
    if s1.len() < s2.len() {
        std::mem::swap(&mut s1, &mut s2);
    }
    let len1 = s1.len();

    // v_current[i]: best cost aligning s1[..i] with s2[..j] for the current j.
    let mut v_current = vec![0.0f64; len1 + 1];
    let mut v_previous = vec![0.0f64; len1 + 1];
    // deletion[i]: best cost ending in a gap in s2 at column i.
    let mut deletion = vec![f64::INFINITY; len1 + 1];

    for i in 1..=len1 {
        v_current[i] = weights.gap_weight + weights.space_weight * i as f64;
    }

    for (j, &c2) in s2.iter().enumerate() {
        let j = j + 1;
        v_previous.copy_from_slice(&v_current);
        v_current[0] = weights.gap_weight + weights.space_weight * j as f64;
        let mut insertion = f64::INFINITY;

        for i in 1..=len1 {
            insertion = insertion.min(v_current[i - 1] + weights.gap_weight) + weights.space_weight;
            deletion[i] = deletion[i].min(v_previous[i] + weights.gap_weight) + weights.space_weight;
            let substitution = if s1[i - 1] == c2 {
                v_previous[i - 1] + weights.match_weight
            } else {
                v_previous[i - 1] + weights.mismatch_weight
            };
            v_current[i] = insertion.min(deletion[i]).min(substitution);
        }
    }

    v_current[len1]
}

/// Affine-gap distance divided by the combined length, so long and short
/// values are comparable. Two empty strings are at distance zero.
pub fn normalized_affine_gap_distance(a: &str, b: &str) -> f64 {
    let normalizer = (a.chars().count() + b.chars().count()) as f64;
    if normalizer == 0.0 {
        return 0.0;
    }
    affine_gap_distance(a, b, &AffineGapWeights::default()) / normalizer
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_identical_strings_cost_matches_only() {
        let w = AffineGapWeights::default();
        assert!((affine_gap_distance("acme", "acme", &w) - 4.0).abs() < EPS);
    }

    #[test]
    fn test_single_substitution() {
        let w = AffineGapWeights::default();
        // five matches and one mismatch
        assert!((affine_gap_distance("Value1", "value1", &w) - 16.0).abs() < EPS);
    }

    #[test]
    fn test_gaps_are_affine() {
        let w = AffineGapWeights::default();
        // three matches plus one gap of length one: 3 + 10 + 7
        assert!((affine_gap_distance("abc", "abcd", &w) - 20.0).abs() < EPS);
        // three matches plus one gap of length two: 3 + 10 + 14
        assert!((affine_gap_distance("abc", "abcde", &w) - 27.0).abs() < EPS);
    }

    #[test]
    fn test_distance_is_symmetric() {
        for (a, b) in [
            ("Acme Farms", "ACME Farms"),
            ("Green Valley Orchard", "Green Vally Orchards"),
            ("abc", "xbcz"),
        ] {
            assert!(
                (normalized_affine_gap_distance(a, b) - normalized_affine_gap_distance(b, a)).abs()
                    < EPS
            );
        }
    }

    #[test]
    fn test_normalized_distance() {
        assert!((normalized_affine_gap_distance("abc", "abcd") - 20.0 / 7.0).abs() < EPS);
        assert_eq!(normalized_affine_gap_distance("", ""), 0.0);
    }
}
