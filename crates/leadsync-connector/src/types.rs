//! Core source types
//!
//! Collections, raw records and pages as returned by a remote source.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FetchError, FetchResult};

/// A remote collection that can be synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionType {
    /// Leads (contacts). Their source id is authoritative.
    Lead,
    /// Pipeline opportunities (deals).
    Opportunity,
}

impl CollectionType {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionType::Lead => "lead",
            CollectionType::Opportunity => "opportunity",
        }
    }

    /// All known collections.
    #[must_use]
    pub fn all() -> &'static [CollectionType] {
        &[CollectionType::Lead, CollectionType::Opportunity]
    }
}

impl std::fmt::Display for CollectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CollectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lead" | "leads" => Ok(CollectionType::Lead),
            "opportunity" | "opportunities" | "deal" | "deals" => Ok(CollectionType::Opportunity),
            _ => Err(format!("Unknown collection: {s}")),
        }
    }
}

/// A raw item returned by the remote API.
///
/// Ephemeral: fetched per page and discarded once mapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Identifier, authoritative within its collection.
    pub source_id: i64,
    /// Collection this record was listed from.
    pub collection: CollectionType,
    /// Stage (pipeline column) the record was listed under, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Loosely-typed payload.
    pub fields: Map<String, Value>,
}

impl SourceRecord {
    /// Create a record from an already-parsed field map.
    pub fn new(source_id: i64, collection: CollectionType, fields: Map<String, Value>) -> Self {
        Self {
            source_id,
            collection,
            stage: None,
            fields,
        }
    }

    /// Set the stage.
    #[must_use]
    pub fn with_stage(mut self, stage: Option<String>) -> Self {
        self.stage = stage;
        self
    }

    /// Build a record from one JSON item of a list or detail response.
    ///
    /// The id is read from `id_field` and may be a JSON number or a numeric string.
    pub fn from_value(collection: CollectionType, value: Value, id_field: &str) -> FetchResult<Self> {
        let Value::Object(fields) = value else {
            return Err(FetchError::malformed(format!(
                "{collection} item is not an object"
            )));
        };

        let source_id = lookup_path(&fields, id_field)
            .and_then(value_as_id)
            .ok_or_else(|| {
                FetchError::malformed(format!("{collection} item has no usable '{id_field}'"))
            })?;

        Ok(Self::new(source_id, collection, fields))
    }

    /// Look up a field by dotted path (`contact.email`, `phones.0.number`).
    #[must_use]
    pub fn field(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.fields, path)
    }

    /// Top-level field names present on this record.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Overlay fields from a detail response. Detail values win.
    pub fn merge_detail(&mut self, detail: SourceRecord) {
        for (key, value) in detail.fields {
            self.fields.insert(key, value);
        }
    }
}

/// Resolve a dotted path against a JSON object.
///
/// Numeric segments index into arrays.
#[must_use]
pub fn lookup_path<'a>(fields: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = fields.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

fn value_as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// One page request against a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Collection to list.
    pub collection: CollectionType,
    /// Stage filter, if the collection is partitioned.
    pub stage: Option<String>,
    /// Zero-based page index.
    pub page: u32,
    /// Requested page size.
    pub limit: u32,
}

impl PageRequest {
    /// Create a page request.
    pub fn new(collection: CollectionType, stage: Option<String>, page: u32, limit: u32) -> Self {
        Self {
            collection,
            stage,
            page,
            limit,
        }
    }

    /// Request for the following page.
    #[must_use]
    pub fn next(&self) -> Self {
        Self {
            page: self.page + 1,
            ..self.clone()
        }
    }
}

/// A fetched page.
#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    /// Records that could be parsed.
    pub records: Vec<SourceRecord>,
    /// Number of items the upstream returned, parseable or not.
    pub raw_count: usize,
}

impl SourcePage {
    /// Create a page whose items all parsed.
    pub fn new(records: Vec<SourceRecord>) -> Self {
        let raw_count = records.len();
        Self { records, raw_count }
    }

    /// An empty page: the end-of-pagination signal.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw_count == 0
    }

    /// Whether the upstream returned fewer items than requested.
    #[must_use]
    pub fn is_short(&self, limit: u32) -> bool {
        self.raw_count < limit as usize
    }

    /// Number of items the upstream returned that could not be parsed.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.raw_count.saturating_sub(self.records.len())
    }
}
