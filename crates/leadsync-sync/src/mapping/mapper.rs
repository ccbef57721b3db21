//! Field mapper.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::warn;

use leadsync_connector::types::{CollectionType, SourceRecord};

use super::drift::SchemaDriftTracker;
use super::field::{CollectionMapping, FieldKind};
use super::values::{coerce, is_blank, parse_datetime};
use crate::identity::ContactIdentity;
use crate::reconcile::CanonicalCandidate;

/// A source record in canonical shape, before its canonical id is known.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRecord {
    pub source_id: i64,
    pub collection: CollectionType,
    pub stage: Option<String>,
    /// Every mapped target, `Value::Null` when the source had nothing.
    pub fields: BTreeMap<String, Value>,
    pub contact: ContactIdentity,
    pub source_created_at: Option<DateTime<Utc>>,
    pub source_updated_at: Option<DateTime<Utc>>,
}

impl MappedRecord {
    /// Read a positive integer field (a direct foreign key).
    #[must_use]
    pub fn integer_field(&self, target: &str) -> Option<i64> {
        self.fields
            .get(target)
            .and_then(Value::as_i64)
            .filter(|id| *id > 0)
    }

    /// Attach the resolved canonical id.
    #[must_use]
    pub fn into_candidate(self, id: i64, resolved_from: Option<String>) -> CanonicalCandidate {
        let fingerprint = content_fingerprint(&self.fields);
        CanonicalCandidate {
            id,
            collection: self.collection,
            source_id: self.source_id,
            stage: self.stage,
            fields: self.fields,
            fingerprint,
            resolved_from,
            source_created_at: self.source_created_at,
            source_updated_at: self.source_updated_at,
        }
    }
}

/// SHA-256 of the sorted-key JSON rendering of the mapped fields.
#[must_use]
pub fn content_fingerprint(fields: &BTreeMap<String, Value>) -> String {
    let canonical = serde_json::to_vec(fields).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}

/// Converts raw source records of one collection into canonical shape.
///
/// Stateless apart from the shared drift tracker, so one mapper may be used
/// from many worker tasks at once.
#[derive(Debug, Clone)]
pub struct FieldMapper {
    mapping: Arc<CollectionMapping>,
    known_keys: Arc<BTreeSet<String>>,
    drift: Arc<SchemaDriftTracker>,
}

impl FieldMapper {
    /// Create a mapper for a layout.
    #[must_use]
    pub fn new(mapping: CollectionMapping, drift: Arc<SchemaDriftTracker>) -> Self {
        let known_keys = mapping.known_keys();
        Self {
            mapping: Arc::new(mapping),
            known_keys: Arc::new(known_keys),
            drift,
        }
    }

    /// The layout this mapper applies.
    #[must_use]
    pub fn mapping(&self) -> &CollectionMapping {
        &self.mapping
    }

    /// Collection this mapper handles.
    #[must_use]
    pub fn collection(&self) -> CollectionType {
        self.mapping.collection
    }

    /// Map one record. Never fails: unknown fields go to the drift tracker.
    pub fn map_record(&self, record: &SourceRecord) -> MappedRecord {
        self.track_drift(record);

        let mut fields = BTreeMap::new();
        for mapping in &self.mapping.fields {
            let present: Vec<&Value> = mapping
                .candidates
                .iter()
                .filter_map(|path| record.field(path))
                .collect();
            let value = match present.iter().find(|value| !is_blank(value)) {
                Some(raw) => coerce(mapping.kind, raw),
                // A blank string sent for a number is a placeholder, not absence.
                None if mapping.kind.is_numeric() && present.iter().any(|v| v.is_string()) => {
                    coerce(mapping.kind, &Value::Null)
                }
                None => Value::Null,
            };
            fields.insert(mapping.target.clone(), value);
        }

        let instant = |target: &str| fields.get(target).and_then(parse_datetime);
        let source_created_at = instant(&self.mapping.created_at_field);
        let source_updated_at = instant(&self.mapping.updated_at_field);

        let contact = self.contact_of(&fields);

        MappedRecord {
            source_id: record.source_id,
            collection: record.collection,
            stage: record.stage.clone(),
            fields,
            contact,
            source_created_at,
            source_updated_at,
        }
    }

    fn contact_of(&self, fields: &BTreeMap<String, Value>) -> ContactIdentity {
        let text = |target: &str| fields.get(target).and_then(Value::as_str).map(str::to_string);

        ContactIdentity {
            emails: self
                .mapping
                .contact_fields(FieldKind::Email)
                .filter_map(text)
                .collect(),
            phones: self
                .mapping
                .contact_fields(FieldKind::Phone)
                .filter_map(text)
                .collect(),
        }
    }

    fn track_drift(&self, record: &SourceRecord) {
        for name in record.field_names() {
            if self.known_keys.contains(name) {
                continue;
            }
            if self.drift.record(record.collection, name) {
                warn!(
                    collection = %record.collection,
                    field = %name,
                    source_id = record.source_id,
                    "Unrecognized source field"
                );
            }
        }
    }
}
