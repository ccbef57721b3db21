//! Field mapping definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use leadsync_connector::types::CollectionType;

use super::defaults;

/// Canonical type of a mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Text,
    Email,
    Phone,
    /// Calendar date, truncated to day precision.
    Date,
    /// Instant, normalized to UTC.
    DateTime,
    /// Decimal number; placeholders become `0.0`.
    Number,
    /// Integer; placeholders become `0`.
    Integer,
    Boolean,
    /// Passed through untouched.
    Json,
}

impl FieldKind {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Email => "email",
            FieldKind::Phone => "phone",
            FieldKind::Date => "date",
            FieldKind::DateTime => "date_time",
            FieldKind::Number => "number",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::Json => "json",
        }
    }

    /// Whether a placeholder (blank or non-numeric text) maps to zero.
    ///
    /// Keys missing from the record, or sent as JSON null, still map to null.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldKind::Number | FieldKind::Integer)
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One canonical field and the source keys it is read from, in priority order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Canonical field name.
    pub target: String,
    /// Dotted source paths; the first non-blank value wins.
    pub candidates: Vec<String>,
    #[serde(default)]
    pub kind: FieldKind,
}

impl FieldMapping {
    /// Create a mapping.
    pub fn new(target: impl Into<String>, kind: FieldKind, candidates: &[&str]) -> Self {
        Self {
            target: target.into(),
            candidates: candidates.iter().map(|c| (*c).to_string()).collect(),
            kind,
        }
    }

    /// Top-level source keys this mapping reads.
    pub fn root_keys(&self) -> impl Iterator<Item = &str> {
        self.candidates
            .iter()
            .filter_map(|c| c.split('.').next())
    }
}

/// The complete field layout of one collection.
#[derive(Debug, Clone)]
pub struct CollectionMapping {
    pub collection: CollectionType,
    pub fields: Vec<FieldMapping>,
    /// Source keys that are known but deliberately not mapped.
    pub ignored_fields: BTreeSet<String>,
    /// Target holding the source creation instant.
    pub created_at_field: String,
    /// Target holding the source modification instant.
    pub updated_at_field: String,
}

impl CollectionMapping {
    /// Built-in layout for a collection.
    #[must_use]
    pub fn defaults_for(collection: CollectionType) -> Self {
        let fields = match collection {
            CollectionType::Lead => defaults::lead_fields(),
            CollectionType::Opportunity => defaults::opportunity_fields(),
        };

        Self {
            collection,
            fields,
            ignored_fields: defaults::IGNORED_FIELDS
                .iter()
                .map(|f| (*f).to_string())
                .collect(),
            created_at_field: defaults::CREATED_AT.to_string(),
            updated_at_field: defaults::UPDATED_AT.to_string(),
        }
    }

    /// Replace or append field mappings by target name.
    #[must_use]
    pub fn with_overrides(mut self, overrides: Vec<FieldMapping>) -> Self {
        for mapping in overrides {
            match self.fields.iter_mut().find(|f| f.target == mapping.target) {
                Some(existing) => *existing = mapping,
                None => self.fields.push(mapping),
            }
        }
        self
    }

    /// Add source keys that should not be reported as drift.
    #[must_use]
    pub fn with_ignored<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Look up a mapping by target name.
    #[must_use]
    pub fn field(&self, target: &str) -> Option<&FieldMapping> {
        self.fields.iter().find(|f| f.target == target)
    }

    /// Every top-level source key this layout recognizes.
    #[must_use]
    pub fn known_keys(&self) -> BTreeSet<String> {
        self.fields
            .iter()
            .flat_map(FieldMapping::root_keys)
            .map(str::to_string)
            .chain(self.ignored_fields.iter().cloned())
            .collect()
    }

    /// Targets whose values feed identity matching.
    pub fn contact_fields(&self, kind: FieldKind) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(move |f| f.kind == kind)
            .map(|f| f.target.as_str())
    }
}
