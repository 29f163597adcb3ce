pub mod canonical_employers;
pub mod canonicalize;
pub mod singletons;

pub use canonical_employers::{generate_canonical_employers_from_clusters, resolve_entity_target};
pub use canonicalize::{canonical_fields, medoid_value};
pub use singletons::generate_canonical_employers_from_unclustered_records;
