//! Identity matching.
//!
//! A [`MatchIndex`] maps identity tokens to canonical ids. It is built once
//! per run from a reference collection and is read-only afterwards, so
//! resolution can run on any number of workers.

use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::identity::{ContactIdentity, IdentityToken, TokenKind};
use crate::mapping::{CollectionMapping, FieldKind, MappedRecord};
use crate::store::CanonicalRecord;

/// A reference record: a contact known to belong to a canonical id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceRecord {
    pub canonical_id: i64,
    pub contact: ContactIdentity,
}

impl ReferenceRecord {
    /// Create a reference record.
    #[must_use]
    pub fn new(canonical_id: i64, contact: ContactIdentity) -> Self {
        Self {
            canonical_id,
            contact,
        }
    }

    /// Reference from a stored canonical record, reading the contact
    /// fields declared by its collection layout.
    #[must_use]
    pub fn from_canonical(record: &CanonicalRecord, mapping: &CollectionMapping) -> Self {
        let text = |target: &str| {
            record
                .fields
                .get(target)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        Self {
            canonical_id: record.id,
            contact: ContactIdentity {
                emails: mapping
                    .contact_fields(FieldKind::Email)
                    .filter_map(text)
                    .collect(),
                phones: mapping
                    .contact_fields(FieldKind::Phone)
                    .filter_map(text)
                    .collect(),
            },
        }
    }

    /// Reference from a mapped remote record carrying the canonical id in
    /// `id_field`. Records without it are not references.
    #[must_use]
    pub fn from_mapped(record: &MappedRecord, id_field: &str) -> Option<Self> {
        record
            .integer_field(id_field)
            .map(|canonical_id| Self::new(canonical_id, record.contact.clone()))
    }
}

/// Token → canonical id lookup over one reference collection.
#[derive(Debug, Clone, Default)]
pub struct MatchIndex {
    name: String,
    tokens: HashMap<IdentityToken, i64>,
    records: usize,
    collisions: usize,
}

impl MatchIndex {
    /// Build an index. The first record to claim a token keeps it.
    #[must_use]
    pub fn build<I>(name: impl Into<String>, references: I) -> Self
    where
        I: IntoIterator<Item = ReferenceRecord>,
    {
        let mut index = Self {
            name: name.into(),
            ..Self::default()
        };

        for reference in references {
            index.records += 1;
            for token in reference.contact.tokens() {
                match index.tokens.get(&token) {
                    None => {
                        index.tokens.insert(token, reference.canonical_id);
                    }
                    Some(existing) if *existing != reference.canonical_id => {
                        index.collisions += 1;
                        debug!(
                            index = %index.name,
                            token = %token,
                            kept = *existing,
                            ignored = reference.canonical_id,
                            "Identity token claimed by two canonical ids"
                        );
                    }
                    Some(_) => {}
                }
            }
        }

        if index.collisions > 0 {
            warn!(
                index = %index.name,
                collisions = index.collisions,
                "Ambiguous identity tokens resolved to the first reference"
            );
        }

        index
    }

    /// Resolve a contact: email tokens first, then phone variants.
    #[must_use]
    pub fn resolve(&self, contact: &ContactIdentity) -> Option<(i64, TokenKind)> {
        contact
            .email_tokens()
            .into_iter()
            .chain(contact.phone_tokens())
            .find_map(|token| self.tokens.get(&token).map(|id| (*id, token.kind)))
    }

    /// Index name, used in provenance labels.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of distinct tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the index holds no token.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Reference records scanned.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records
    }

    /// Tokens that two distinct canonical ids competed for.
    #[must_use]
    pub fn collisions(&self) -> usize {
        self.collisions
    }
}

/// A resolved canonical id and how it was established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub id: i64,
    /// `None` when the source id is authoritative.
    pub resolved_from: Option<String>,
}

#[derive(Debug, Clone)]
enum Strategy {
    Authoritative,
    Matched {
        direct_key: Option<String>,
        indices: Vec<MatchIndex>,
    },
}

/// Resolves mapped records to canonical ids for one collection.
#[derive(Debug, Clone)]
pub struct IdentityMatcher {
    strategy: Strategy,
}

impl IdentityMatcher {
    /// Source ids are canonical ids.
    #[must_use]
    pub fn authoritative() -> Self {
        Self {
            strategy: Strategy::Authoritative,
        }
    }

    /// Resolve through `direct_key`, then each index in order.
    #[must_use]
    pub fn matched(direct_key: Option<String>, indices: Vec<MatchIndex>) -> Self {
        Self {
            strategy: Strategy::Matched {
                direct_key,
                indices,
            },
        }
    }

    /// Whether the matcher needs no reference data.
    #[must_use]
    pub fn is_authoritative(&self) -> bool {
        matches!(self.strategy, Strategy::Authoritative)
    }

    /// Resolve one record. `None` means unmatched.
    #[must_use]
    pub fn resolve(&self, record: &MappedRecord) -> Option<Resolution> {
        match &self.strategy {
            Strategy::Authoritative => Some(Resolution {
                id: record.source_id,
                resolved_from: None,
            }),
            Strategy::Matched {
                direct_key,
                indices,
            } => {
                if let Some(key) = direct_key {
                    if let Some(id) = record.integer_field(key) {
                        return Some(Resolution {
                            id,
                            resolved_from: Some(format!("direct:{key}")),
                        });
                    }
                }

                indices.iter().find_map(|index| {
                    index.resolve(&record.contact).map(|(id, kind)| Resolution {
                        id,
                        resolved_from: Some(format!("{kind}:{}", index.name())),
                    })
                })
            }
        }
    }

    /// Total token collisions across every index.
    #[must_use]
    pub fn ambiguities(&self) -> usize {
        match &self.strategy {
            Strategy::Authoritative => 0,
            Strategy::Matched { indices, .. } => indices.iter().map(MatchIndex::collisions).sum(),
        }
    }
}
