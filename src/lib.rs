pub mod blocking;
pub mod canonical;
pub mod clustering;
pub mod error;
pub mod matching;
pub mod models;
pub mod orchestrator;
pub mod review;
pub mod store;
pub mod utils;
