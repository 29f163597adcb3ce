// src/utils/env.rs

use log::{debug, info};
use std::str::FromStr;

/// Loads a `.env` file from the working directory or any parent, if present.
/// Variables already set in the process environment win.
pub fn load_env() {
    match dotenv::dotenv() {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) => debug!("No .env file loaded ({}); using process environment", e),
    }
}

/// Parses `key` from the environment, falling back to `default` when the
/// variable is unset or unparseable.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
