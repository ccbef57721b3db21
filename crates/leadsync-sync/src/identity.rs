//! Identity normalization.
//!
//! Pure functions turning raw contact fields into comparable identity
//! tokens. Source systems disagree on phone formatting, so a phone number
//! normalizes to a *set* of variants rather than one canonical form.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Phone tokens shorter than this are discarded as non-discriminating.
pub const MIN_PHONE_TOKEN_LEN: usize = 8;

/// Country calling code stripped from phone variants.
pub const COUNTRY_CODE: &str = "55";

/// Suffix lengths emitted as phone variants (area code + number, with and
/// without the trunk digit, and the bare subscriber number).
const PHONE_SUFFIX_LENGTHS: [usize; 3] = [10, 11, 9];

/// Kind of contact channel a token was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Email,
    Phone,
}

impl TokenKind {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Email => "email",
            TokenKind::Phone => "phone",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A normalized representation of a contact channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityToken {
    pub kind: TokenKind,
    pub value: String,
}

impl IdentityToken {
    /// Create an email token from an already-normalized address.
    pub fn email(value: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Email,
            value: value.into(),
        }
    }

    /// Create a phone token from an already-normalized variant.
    pub fn phone(value: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Phone,
            value: value.into(),
        }
    }
}

impl std::fmt::Display for IdentityToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Trim and lowercase an email address. Blank input yields `None`.
#[must_use]
pub fn normalize_email(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Strip every non-digit character.
#[must_use]
pub fn phone_digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Produce every comparable encoding of a phone number.
///
/// Emits the raw digits, the digits without a leading country code, the
/// digits without a single leading zero, and the last 10, 11 and 9 digits.
/// Variants shorter than [`MIN_PHONE_TOKEN_LEN`] are discarded.
#[must_use]
pub fn normalize_phone_variants(raw: &str) -> BTreeSet<String> {
    let digits = phone_digits(raw);
    let mut variants = BTreeSet::new();
    if digits.is_empty() {
        return variants;
    }

    variants.insert(digits.clone());

    if let Some(rest) = digits.strip_prefix(COUNTRY_CODE) {
        variants.insert(rest.to_string());
    }

    if let Some(rest) = digits.strip_prefix('0') {
        variants.insert(rest.to_string());
    }

    for len in PHONE_SUFFIX_LENGTHS {
        if digits.len() > len {
            variants.insert(digits[digits.len() - len..].to_string());
        }
    }

    variants.retain(|v| v.len() >= MIN_PHONE_TOKEN_LEN);
    variants
}

/// The contact channels of one record, raw as mapped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactIdentity {
    pub emails: Vec<String>,
    pub phones: Vec<String>,
}

impl ContactIdentity {
    /// Create an empty identity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.emails.push(email.into());
        self
    }

    /// Add a phone number.
    #[must_use]
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phones.push(phone.into());
        self
    }

    /// Whether no channel is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty() && self.phones.is_empty()
    }

    /// Normalized email tokens, in field order, deduplicated.
    #[must_use]
    pub fn email_tokens(&self) -> Vec<IdentityToken> {
        let mut seen = BTreeSet::new();
        self.emails
            .iter()
            .filter_map(|raw| normalize_email(raw))
            .filter(|email| seen.insert(email.clone()))
            .map(IdentityToken::email)
            .collect()
    }

    /// Phone variant tokens across every phone field, deduplicated.
    #[must_use]
    pub fn phone_tokens(&self) -> Vec<IdentityToken> {
        let mut seen = BTreeSet::new();
        self.phones
            .iter()
            .flat_map(|raw| normalize_phone_variants(raw))
            .filter(|variant| seen.insert(variant.clone()))
            .map(IdentityToken::phone)
            .collect()
    }

    /// All tokens: emails first, then phone variants.
    #[must_use]
    pub fn tokens(&self) -> Vec<IdentityToken> {
        let mut tokens = self.email_tokens();
        tokens.extend(self.phone_tokens());
        tokens
    }
}
