pub mod blocking_index;
pub mod predicates;

pub use blocking_index::BlockingIndexer;
pub use predicates::{default_blocking_rules, parse_blocking_rules, BlockingPredicate, BlockingRule};
