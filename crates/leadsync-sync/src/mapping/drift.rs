//! Schema drift side-channel.
//!
//! Counts source fields the mapper does not recognize. Never fails.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

use leadsync_connector::types::CollectionType;

/// One unrecognized field and how often it was seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftEntry {
    pub collection: CollectionType,
    pub field: String,
    pub occurrences: u64,
}

/// Run-scoped tracker of unknown source fields.
#[derive(Debug, Default)]
pub struct SchemaDriftTracker {
    fields: RwLock<BTreeMap<(CollectionType, String), u64>>,
}

impl SchemaDriftTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sighting. Returns `true` the first time a field is seen.
    pub fn record(&self, collection: CollectionType, field: &str) -> bool {
        let Ok(mut fields) = self.fields.write() else {
            return false;
        };
        let count = fields.entry((collection, field.to_string())).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Number of distinct unknown fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.read().map(|f| f.len()).unwrap_or(0)
    }

    /// Whether nothing has drifted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every unknown field, ordered by collection then name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DriftEntry> {
        self.fields
            .read()
            .map(|fields| {
                fields
                    .iter()
                    .map(|((collection, field), occurrences)| DriftEntry {
                        collection: *collection,
                        field: field.clone(),
                        occurrences: *occurrences,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sighting_reported_once() {
        let tracker = SchemaDriftTracker::new();
        assert!(tracker.record(CollectionType::Lead, "favorite_color"));
        assert!(!tracker.record(CollectionType::Lead, "favorite_color"));
        assert!(tracker.record(CollectionType::Opportunity, "favorite_color"));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_snapshot_counts() {
        let tracker = SchemaDriftTracker::new();
        tracker.record(CollectionType::Lead, "b");
        tracker.record(CollectionType::Lead, "a");
        tracker.record(CollectionType::Lead, "b");

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].field, "a");
        assert_eq!(snapshot[0].occurrences, 1);
        assert_eq!(snapshot[1].field, "b");
        assert_eq!(snapshot[1].occurrences, 2);
    }

    #[test]
    fn test_empty() {
        let tracker = SchemaDriftTracker::new();
        assert!(tracker.is_empty());
        assert!(tracker.snapshot().is_empty());
    }
}
