// src/matching/normalize.rs

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid regex"));

/// Lower-cases, folds `&` to "and", turns punctuation into spaces and
/// collapses whitespace. Returns None when nothing is left.
pub fn normalize_value(value: &str) -> Option<String> {
    let lowered = value.to_lowercase().replace('&', " and ").replace('\'', "");
    let spaced = NON_WORD.replace_all(&lowered, " ");
    let normalized = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Digits of a phone number with a leading US country code stripped.
/// Anything shorter than 7 or longer than 15 digits is not a usable phone.
pub fn normalize_phone(phone: &str) -> Option<String> {
    let digits_only: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits_only.len() == 11 && digits_only.starts_with('1') {
        return Some(digits_only[1..].to_string());
    }
    if (7..=15).contains(&digits_only.len()) {
        return Some(digits_only);
    }
    debug!(
        "Phone number '{}' normalized to '{}', considered invalid for matching.",
        phone, digits_only
    );
    None
}
