//! Field mapping and canonicalization.
//!
//! Every canonical field is read from an ordered list of candidate source
//! paths. The first non-blank value wins and is coerced to the field's kind.
//! Unknown source keys are reported through [`SchemaDriftTracker`].

pub mod defaults;
pub mod drift;
pub mod field;
pub mod mapper;
pub mod values;

pub use drift::{DriftEntry, SchemaDriftTracker};
pub use field::{CollectionMapping, FieldKind, FieldMapping};
pub use mapper::{content_fingerprint, FieldMapper, MappedRecord};
