// src/matching/scorer.rs

use strsim::jaro_winkler;

use crate::matching::normalize::{normalize_phone, normalize_value};
use crate::models::{EmployerField, EmployerFields};

/// Match probability for a pair of employer records.
///
/// Implementations must be deterministic and symmetric and return a value in
/// `[0, 1]`. The pipeline treats the scorer as a black box; a trained model,
/// a heuristic or a test fake are interchangeable.
pub trait PairScorer: Send + Sync {
    fn score(&self, a: &EmployerFields, b: &EmployerFields) -> f64;
}

impl<F> PairScorer for F
where
    F: Fn(&EmployerFields, &EmployerFields) -> f64 + Send + Sync,
{
    fn score(&self, a: &EmployerFields, b: &EmployerFields) -> f64 {
        self(a, b)
    }
}

/// Weighted Jaro-Winkler similarity over the identity fields.
///
/// Fields missing on either side are left out of both the numerator and the
/// weight total, so absent evidence neither helps nor hurts. Phones compare on
/// normalized digits only.
#[derive(Debug, Clone)]
pub struct FieldSimilarityScorer {
    weights: Vec<(EmployerField, f64)>,
}

impl Default for FieldSimilarityScorer {
    fn default() -> Self {
        Self {
            weights: vec![
                (EmployerField::Name, 0.45),
                (EmployerField::TradeName, 0.15),
                (EmployerField::City, 0.15),
                (EmployerField::State, 0.10),
                (EmployerField::Country, 0.05),
                (EmployerField::Phone, 0.10),
            ],
        }
    }
}

impl FieldSimilarityScorer {
    fn field_similarity(field: EmployerField, a: &str, b: &str) -> Option<f64> {
        match field {
            EmployerField::Phone => {
                let (pa, pb) = (normalize_phone(a)?, normalize_phone(b)?);
                Some(if pa == pb { 1.0 } else { jaro_winkler(&pa, &pb) * 0.5 })
            }
            _ => {
                let (na, nb) = (normalize_value(a)?, normalize_value(b)?);
                Some(jaro_winkler(&na, &nb))
            }
        }
    }
}

impl PairScorer for FieldSimilarityScorer {
    fn score(&self, a: &EmployerFields, b: &EmployerFields) -> f64 {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for &(field, weight) in &self.weights {
            if let (Some(va), Some(vb)) = (a.get(field), b.get(field)) {
                if let Some(sim) = Self::field_similarity(field, va, vb) {
                    weighted += weight * sim;
                    total_weight += weight;
                }
            }
        }
        if total_weight <= 0.0 {
            return 0.0;
        }
        (weighted / total_weight).clamp(0.0, 1.0)
    }
}
