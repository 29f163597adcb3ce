// src/canonical/canonicalize.rs
//
// Field-wise tie-break: every identity field independently takes the value
// closest to all the others (a one-dimensional medoid under normalized
// affine-gap distance).

use crate::matching::affine_gap::normalized_affine_gap_distance;
use crate::models::{EmployerField, EmployerFields, EmployerRecord};

/// Picks the value with the smallest summed distance to the other values.
/// Duplicates are ignored, the first occurrence wins ties and an empty
/// input gives `None`.
pub fn medoid_value<'a>(values: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let mut distinct: Vec<&str> = Vec::new();
    for value in values {
        if !value.trim().is_empty() && !distinct.contains(&value) {
            distinct.push(value);
        }
    }

    match distinct.len() {
        0 => None,
        1 => Some(distinct[0].to_string()),
        _ => {
            let mut best: Option<(usize, f64)> = None;
            for (i, candidate) in distinct.iter().enumerate() {
                let total: f64 = distinct
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, other)| normalized_affine_gap_distance(candidate, other))
                    .sum();
                if best.map_or(true, |(_, b)| total < b) {
                    best = Some((i, total));
                }
            }
            best.map(|(i, _)| distinct[i].to_string())
        }
    }
}

/// The canonical identity tuple for a group of records, in member order.
pub fn canonical_fields(records: &[EmployerRecord]) -> EmployerFields {
    let mut fields = EmployerFields::default();
    for field in EmployerField::ALL {
        let value = medoid_value(records.iter().filter_map(|r| r.fields.get(field)));
        fields.set(field, value);
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordSource;

    fn record(id: i64, fields: EmployerFields) -> EmployerRecord {
        EmployerRecord::new(id, fields, RecordSource::Scraper)
    }

    #[test]
    fn test_single_value_is_returned() {
        assert_eq!(medoid_value(["Acme Farms"]), Some("Acme Farms".to_string()));
        assert_eq!(
            medoid_value(["Acme Farms", "Acme Farms"]),
            Some("Acme Farms".to_string())
        );
        assert_eq!(medoid_value(Vec::<&str>::new()), None);
        assert_eq!(medoid_value(["", "  "]), None);
    }

    #[test]
    fn test_two_values_go_to_the_first() {
        assert_eq!(medoid_value(["Acme Farms", "ACME FARMS"]), Some("Acme Farms".to_string()));
        assert_eq!(medoid_value(["ACME FARMS", "Acme Farms"]), Some("ACME FARMS".to_string()));
    }

    #[test]
    fn test_case_variants() {
        assert_eq!(
            medoid_value(["Value1", "value1", "VALUE1"]),
            Some("Value1".to_string())
        );
    }

    #[test]
    fn test_middle_length_value_wins() {
        assert_eq!(medoid_value(["abc", "abcde", "abcd"]), Some("abcd".to_string()));
    }

    #[test]
    fn test_fields_are_resolved_independently() {
        let records = vec![
            record(
                1,
                EmployerFields {
                    name: Some("Acme Farms".to_string()),
                    city: None,
                    phone: Some("509-555-0100".to_string()),
                    ..Default::default()
                },
            ),
            record(
                2,
                EmployerFields {
                    name: Some("ACME FARMS".to_string()),
                    city: Some("Yakima".to_string()),
                    phone: Some("".to_string()),
                    ..Default::default()
                },
            ),
        ];
        let fields = canonical_fields(&records);
        assert_eq!(fields.name.as_deref(), Some("Acme Farms"));
        assert_eq!(fields.city.as_deref(), Some("Yakima"));
        assert_eq!(fields.phone.as_deref(), Some("509-555-0100"));
        assert_eq!(fields.trade_name, None);
    }
}
