//! Fuzz target for record mapping.
//!
//! Feeds arbitrary JSON payloads through the default lead and opportunity
//! mappings. Mapping must be total: every payload yields a record whose
//! fingerprint is stable across repeated mapping.
//!
//! Run with:
//! cargo +nightly fuzz run fuzz_record_mapping -- -max_total_time=600

#![no_main]

use libfuzzer_sys::fuzz_target;
use leadsync_connector::types::{CollectionType, SourceRecord};
use leadsync_sync::mapping::{
    content_fingerprint, CollectionMapping, FieldMapper, SchemaDriftTracker,
};
use serde_json::{Map, Value};
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    // Skip oversized payloads
    if data.len() > 64 * 1024 {
        return;
    }
    let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    for collection in CollectionType::all() {
        let mapper = FieldMapper::new(
            CollectionMapping::defaults_for(*collection),
            Arc::new(SchemaDriftTracker::new()),
        );
        let record = SourceRecord::new(1, *collection, fields.clone());

        let first = mapper.map_record(&record);
        let second = mapper.map_record(&record);
        assert_eq!(
            content_fingerprint(&first.fields),
            content_fingerprint(&second.fields)
        );
    }

    let empty = SourceRecord::new(1, CollectionType::Lead, Map::new());
    let _ = FieldMapper::new(
        CollectionMapping::defaults_for(CollectionType::Lead),
        Arc::new(SchemaDriftTracker::new()),
    )
    .map_record(&empty);
});
