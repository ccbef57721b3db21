//! Fuzz target for contact normalization.
//!
//! Email and phone normalization run on every record of every page, so
//! they must never panic on arbitrary text.
//!
//! Run with:
//! cargo +nightly fuzz run fuzz_identity_normalize -- -max_total_time=600

#![no_main]

use libfuzzer_sys::fuzz_target;
use leadsync_sync::identity::{normalize_email, normalize_phone_variants, phone_digits};

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    if let Some(email) = normalize_email(raw) {
        assert!(!email.is_empty());
        assert_eq!(normalize_email(&email).as_deref(), Some(email.as_str()));
    }

    let digits = phone_digits(raw);
    assert!(digits.chars().all(|c| c.is_ascii_digit()));

    for variant in normalize_phone_variants(raw) {
        assert!(variant.chars().all(|c| c.is_ascii_digit()));
        assert!(variant.len() <= digits.len());
    }
});
