pub mod affine_gap;
pub mod normalize;
pub mod scorer;

pub use scorer::{FieldSimilarityScorer, PairScorer};
