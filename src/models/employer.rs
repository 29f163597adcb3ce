// src/models/employer.rs

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Where a raw employer record was ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordSource {
    #[serde(rename = "scraper")]
    Scraper,
    #[serde(rename = "DoL annual or quarterly disclosure data")]
    Disclosure,
}

impl RecordSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordSource::Scraper => "scraper",
            RecordSource::Disclosure => "DoL annual or quarterly disclosure data",
        }
    }

    pub fn from_db_str(value: &str) -> Option<Self> {
        match value {
            "scraper" => Some(RecordSource::Scraper),
            "DoL annual or quarterly disclosure data" | "dol_disclosure" => {
                Some(RecordSource::Disclosure)
            }
            _ => None,
        }
    }
}

impl fmt::Display for RecordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identity fields shared by raw records and canonical employers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EmployerField {
    Name,
    TradeName,
    City,
    State,
    Country,
    Phone,
}

impl EmployerField {
    pub const ALL: [EmployerField; 6] = [
        EmployerField::Name,
        EmployerField::TradeName,
        EmployerField::City,
        EmployerField::State,
        EmployerField::Country,
        EmployerField::Phone,
    ];

    /// Column name used by the storage layer.
    pub fn as_str(&self) -> &'static str {
        match self {
            EmployerField::Name => "name",
            EmployerField::TradeName => "trade_name_dba",
            EmployerField::City => "city",
            EmployerField::State => "state",
            EmployerField::Country => "country",
            EmployerField::Phone => "phone",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "name" => Some(EmployerField::Name),
            "trade_name" | "trade_name_dba" => Some(EmployerField::TradeName),
            "city" => Some(EmployerField::City),
            "state" => Some(EmployerField::State),
            "country" => Some(EmployerField::Country),
            "phone" => Some(EmployerField::Phone),
            _ => None,
        }
    }
}

/// Identity tuple of an employer. Blank values count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmployerFields {
    pub name: Option<String>,
    pub trade_name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
}

impl EmployerFields {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    /// Returns the value of `field`, treating empty and whitespace-only strings as missing.
    pub fn get(&self, field: EmployerField) -> Option<&str> {
        let raw = match field {
            EmployerField::Name => &self.name,
            EmployerField::TradeName => &self.trade_name,
            EmployerField::City => &self.city,
            EmployerField::State => &self.state,
            EmployerField::Country => &self.country,
            EmployerField::Phone => &self.phone,
        };
        raw.as_deref().filter(|v| !v.trim().is_empty())
    }

    pub fn set(&mut self, field: EmployerField, value: Option<String>) {
        let slot = match field {
            EmployerField::Name => &mut self.name,
            EmployerField::TradeName => &mut self.trade_name,
            EmployerField::City => &mut self.city,
            EmployerField::State => &mut self.state,
            EmployerField::Country => &mut self.country,
            EmployerField::Phone => &mut self.phone,
        };
        *slot = value;
    }

    pub fn is_empty(&self) -> bool {
        EmployerField::ALL.iter().all(|f| self.get(*f).is_none())
    }
}

/// A raw employer record as produced by the ingestion jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct EmployerRecord {
    pub id: i64,
    pub fields: EmployerFields,
    pub source: RecordSource,
    pub first_seen: Option<NaiveDateTime>,
    pub last_seen: Option<NaiveDateTime>,
    pub canonical_entity_id: Option<Uuid>,
}

impl EmployerRecord {
    pub fn new(id: i64, fields: EmployerFields, source: RecordSource) -> Self {
        Self {
            id,
            fields,
            source,
            first_seen: None,
            last_seen: None,
            canonical_entity_id: None,
        }
    }

    pub fn seen_between(mut self, first_seen: NaiveDateTime, last_seen: NaiveDateTime) -> Self {
        self.first_seen = Some(first_seen);
        self.last_seen = Some(last_seen);
        self
    }
}

/// Observation window and provenance folded over a set of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeenWindow {
    pub first_seen: Option<NaiveDateTime>,
    pub last_seen: Option<NaiveDateTime>,
    pub sources: Vec<RecordSource>,
}

impl SeenWindow {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a EmployerRecord>) -> Self {
        let mut window = SeenWindow::default();
        for record in records {
            window.observe(record.first_seen, record.last_seen, &[record.source]);
        }
        window
    }

    /// Widens the window; sources keep first-seen order and never repeat.
    pub fn observe(
        &mut self,
        first_seen: Option<NaiveDateTime>,
        last_seen: Option<NaiveDateTime>,
        sources: &[RecordSource],
    ) {
        self.first_seen = earliest(self.first_seen, first_seen);
        self.last_seen = latest(self.last_seen, last_seen);
        for source in sources {
            if !self.sources.contains(source) {
                self.sources.push(*source);
            }
        }
    }
}

fn earliest(a: Option<NaiveDateTime>, b: Option<NaiveDateTime>) -> Option<NaiveDateTime> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

fn latest(a: Option<NaiveDateTime>, b: Option<NaiveDateTime>) -> Option<NaiveDateTime> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// A deduplicated employer. Identity fields never change after creation; the
/// observation window and sources only grow.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalEntity {
    pub id: Uuid,
    pub fields: EmployerFields,
    pub first_seen: Option<NaiveDateTime>,
    pub last_seen: Option<NaiveDateTime>,
    pub sources: Vec<RecordSource>,
}

impl CanonicalEntity {
    pub fn mint(fields: EmployerFields, window: SeenWindow) -> Self {
        Self {
            id: Uuid::new_v4(),
            fields,
            first_seen: window.first_seen,
            last_seen: window.last_seen,
            sources: window.sources,
        }
    }

    pub fn absorb(&mut self, window: &SeenWindow) {
        let mut merged = SeenWindow {
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            sources: self.sources.clone(),
        };
        merged.observe(window.first_seen, window.last_seen, &window.sources);
        self.first_seen = merged.first_seen;
        self.last_seen = merged.last_seen;
        self.sources = merged.sources;
    }
}
