// src/blocking/predicates.rs

use std::fmt;
use std::str::FromStr;

use crate::error::ResolutionError;
use crate::matching::normalize::{normalize_phone, normalize_value};
use crate::models::{EmployerField, EmployerFields};

/// How a field value is reduced to a block key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockingPredicate {
    /// The whole normalized value.
    Exact,
    /// First normalized token, at least two characters long.
    FirstToken,
    /// Phone digits; fewer than seven digits give no key.
    Digits,
    /// First `n` characters of the normalized value.
    Prefix(usize),
}

impl BlockingPredicate {
    pub fn apply(&self, value: &str) -> Option<String> {
        match self {
            BlockingPredicate::Exact => normalize_value(value),
            BlockingPredicate::FirstToken => normalize_value(value)?
                .split(' ')
                .next()
                .filter(|token| token.chars().count() >= 2)
                .map(str::to_string),
            BlockingPredicate::Digits => normalize_phone(value),
            BlockingPredicate::Prefix(n) => {
                let normalized = normalize_value(value)?;
                if normalized.chars().count() < *n {
                    return None;
                }
                Some(normalized.chars().take(*n).collect())
            }
        }
    }
}

impl fmt::Display for BlockingPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockingPredicate::Exact => f.write_str("exact"),
            BlockingPredicate::FirstToken => f.write_str("first_token"),
            BlockingPredicate::Digits => f.write_str("digits"),
            BlockingPredicate::Prefix(n) => write!(f, "prefix_{}", n),
        }
    }
}

impl FromStr for BlockingPredicate {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        match lowered.as_str() {
            "exact" => Ok(BlockingPredicate::Exact),
            "first_token" => Ok(BlockingPredicate::FirstToken),
            "digits" => Ok(BlockingPredicate::Digits),
            other => other
                .strip_prefix("prefix_")
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .map(BlockingPredicate::Prefix)
                .ok_or_else(|| {
                    ResolutionError::InvalidConfig(format!("unknown blocking predicate '{}'", s))
                }),
        }
    }
}

/// A field paired with the predicate that keys it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockingRule {
    pub field: EmployerField,
    pub predicate: BlockingPredicate,
}

impl BlockingRule {
    pub fn new(field: EmployerField, predicate: BlockingPredicate) -> Self {
        Self { field, predicate }
    }

    /// Namespaced key for `fields`, e.g. `name:exact:acme farms`. Missing or
    /// blank values produce no key.
    pub fn key(&self, fields: &EmployerFields) -> Option<String> {
        let value = fields.get(self.field)?;
        let reduced = self.predicate.apply(value)?;
        Some(format!("{}:{}", self, reduced))
    }
}

impl fmt::Display for BlockingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field.as_str(), self.predicate)
    }
}

impl FromStr for BlockingRule {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, predicate) = s.trim().split_once(':').ok_or_else(|| {
            ResolutionError::InvalidConfig(format!(
                "blocking rule '{}' must look like field:predicate",
                s
            ))
        })?;
        let field = EmployerField::from_str(field).ok_or_else(|| {
            ResolutionError::InvalidConfig(format!("unknown blocking field '{}'", field))
        })?;
        Ok(BlockingRule::new(field, predicate.parse()?))
    }
}

pub fn default_blocking_rules() -> Vec<BlockingRule> {
    vec![
        BlockingRule::new(EmployerField::Name, BlockingPredicate::Exact),
        BlockingRule::new(EmployerField::Name, BlockingPredicate::FirstToken),
        BlockingRule::new(EmployerField::TradeName, BlockingPredicate::Exact),
        BlockingRule::new(EmployerField::Phone, BlockingPredicate::Digits),
    ]
}

/// Parses a comma separated list such as `name:exact, phone:digits`.
pub fn parse_blocking_rules(raw: &str) -> Result<Vec<BlockingRule>, ResolutionError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert_eq!(
            BlockingPredicate::Exact.apply("Acme Farms, LLC"),
            Some("acme farms llc".to_string())
        );
        assert_eq!(
            BlockingPredicate::FirstToken.apply("ACME Farms"),
            Some("acme".to_string())
        );
        assert_eq!(BlockingPredicate::FirstToken.apply("A Farms"), None);
        assert_eq!(
            BlockingPredicate::Digits.apply("1-509-555-0100"),
            Some("5095550100".to_string())
        );
        assert_eq!(BlockingPredicate::Digits.apply("555"), None);
        assert_eq!(BlockingPredicate::Prefix(4).apply("Acme"), Some("acme".to_string()));
        assert_eq!(BlockingPredicate::Prefix(5).apply("Acme"), None);
    }

    #[test]
    fn test_keys_are_namespaced_by_field() {
        let fields = EmployerFields {
            name: Some("Acme".to_string()),
            city: Some("Acme".to_string()),
            ..Default::default()
        };
        let by_name = BlockingRule::new(EmployerField::Name, BlockingPredicate::Exact);
        let by_city = BlockingRule::new(EmployerField::City, BlockingPredicate::Exact);
        assert_eq!(by_name.key(&fields), Some("name:exact:acme".to_string()));
        assert_ne!(by_name.key(&fields), by_city.key(&fields));

        let blank = EmployerFields {
            name: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(by_name.key(&blank), None);
    }

    #[test]
    fn test_parse_blocking_rules() {
        let rules = parse_blocking_rules("name:exact, trade_name:prefix_3,phone:digits").unwrap();
        assert_eq!(
            rules,
            vec![
                BlockingRule::new(EmployerField::Name, BlockingPredicate::Exact),
                BlockingRule::new(EmployerField::TradeName, BlockingPredicate::Prefix(3)),
                BlockingRule::new(EmployerField::Phone, BlockingPredicate::Digits),
            ]
        );
        assert_eq!(rules[1].to_string(), "trade_name_dba:prefix_3");
        assert!(parse_blocking_rules("name").is_err());
        assert!(parse_blocking_rules("zip:exact").is_err());
        assert!(parse_blocking_rules("name:soundex").is_err());
        assert!(parse_blocking_rules("").unwrap().is_empty());
    }
}
