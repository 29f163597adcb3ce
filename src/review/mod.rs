pub mod review_gate;
pub mod session;

pub use review_gate::{ReviewGate, ReviewItem, ReviewResponse, SubmitOutcome};
pub use session::{render_cluster_table, run_review_session, ReviewOutcome, ReviewPrompter, StdinPrompter};
