//! Built-in field layouts for the CRM collections.

use super::field::{FieldKind, FieldMapping};

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

/// Source keys that are known but carry nothing to map.
pub const IGNORED_FIELDS: &[&str] = &["id", "links", "_links", "meta", "url"];

/// Lead layout.
#[must_use]
pub fn lead_fields() -> Vec<FieldMapping> {
    vec![
        FieldMapping::new(
            "name",
            FieldKind::Text,
            &["name", "full_name", "nome", "person.name", "contact.name"],
        ),
        FieldMapping::new(
            "email",
            FieldKind::Email,
            &["email", "contact.email", "person.email", "emails.0.email", "emails.0"],
        ),
        FieldMapping::new(
            "phone",
            FieldKind::Phone,
            &["phone", "telefone", "contact.phone", "phones.0.number", "phones.0"],
        ),
        FieldMapping::new(
            "mobile_phone",
            FieldKind::Phone,
            &["mobile_phone", "cellphone", "celular", "whatsapp", "phones.1.number"],
        ),
        FieldMapping::new(
            "company",
            FieldKind::Text,
            &["company", "company_name", "empresa", "organization.name"],
        ),
        FieldMapping::new(
            "source",
            FieldKind::Text,
            &["source", "lead_source", "origin", "origem", "utm_source"],
        ),
        FieldMapping::new(
            "status",
            FieldKind::Text,
            &["status", "situation", "stage.name", "stage_name"],
        ),
        FieldMapping::new(
            "owner",
            FieldKind::Text,
            &["owner.name", "owner_name", "user.name", "responsible"],
        ),
        FieldMapping::new("city", FieldKind::Text, &["city", "cidade", "address.city"]),
        FieldMapping::new("state", FieldKind::Text, &["state", "uf", "address.state"]),
        FieldMapping::new("score", FieldKind::Integer, &["score", "lead_score"]),
        FieldMapping::new("tags", FieldKind::Json, &["tags"]),
        FieldMapping::new(
            "first_conversion_date",
            FieldKind::Date,
            &["first_conversion_date", "first_contact_date", "data_conversao"],
        ),
        FieldMapping::new(
            CREATED_AT,
            FieldKind::DateTime,
            &["created_at", "createdAt", "date_create", "created"],
        ),
        FieldMapping::new(
            UPDATED_AT,
            FieldKind::DateTime,
            &["updated_at", "updatedAt", "date_update", "last_modified", "updated"],
        ),
    ]
}

/// Opportunity (deal) layout.
#[must_use]
pub fn opportunity_fields() -> Vec<FieldMapping> {
    vec![
        FieldMapping::new(
            "title",
            FieldKind::Text,
            &["title", "name", "deal_name", "titulo"],
        ),
        FieldMapping::new(
            "lead_id",
            FieldKind::Integer,
            &["lead_id", "leadId", "lead.id", "contact_id", "person_id"],
        ),
        FieldMapping::new(
            "value",
            FieldKind::Number,
            &["value", "amount", "price", "valor"],
        ),
        FieldMapping::new(
            "pipeline",
            FieldKind::Text,
            &["pipeline.name", "pipeline_name", "pipeline_id"],
        ),
        FieldMapping::new(
            "stage",
            FieldKind::Text,
            &["stage.name", "stage_name", "stage_id"],
        ),
        FieldMapping::new(
            "status",
            FieldKind::Text,
            &["status", "deal_status", "situacao"],
        ),
        FieldMapping::new(
            "owner",
            FieldKind::Text,
            &["owner.name", "owner_name", "user.name"],
        ),
        FieldMapping::new(
            "contact_email",
            FieldKind::Email,
            &["contact.email", "lead.email", "person.email", "email"],
        ),
        FieldMapping::new(
            "contact_phone",
            FieldKind::Phone,
            &["contact.phone", "lead.phone", "person.phone", "phone"],
        ),
        FieldMapping::new(
            "expected_close_date",
            FieldKind::Date,
            &["expected_close_date", "close_date", "closing_date", "previsao_fechamento"],
        ),
        FieldMapping::new(
            "closed_at",
            FieldKind::DateTime,
            &["closed_at", "won_at", "lost_at", "date_closed"],
        ),
        FieldMapping::new(
            CREATED_AT,
            FieldKind::DateTime,
            &["created_at", "createdAt", "date_create", "created"],
        ),
        FieldMapping::new(
            UPDATED_AT,
            FieldKind::DateTime,
            &["updated_at", "updatedAt", "date_update", "last_modified", "updated"],
        ),
    ]
}
