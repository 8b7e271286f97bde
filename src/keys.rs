//! Deterministic storage-key derivation.
//!
//! Repeated runs over unchanged sources must land on the same keys so the
//! store writer can skip existing objects. Keys are derived from a record's
//! identity-bearing fields when the target configures them and they are all
//! present; otherwise from a content hash over the whole record.
//!
//! # Key Shapes
//!
//! ```text
//! {target}/{slug-of-identity-values}-{hash16}.json   identity path
//! {target}/{hash64}.json                             content-hash fallback
//! ```
//!
//! The slug keeps keys legible; the appended hash makes them collision-free
//! even when slugification flattens distinct values (e.g. "a b" vs "a-b").
//! Fields are fed to the hasher in sorted order (the record map is a
//! `BTreeMap`), so insertion order never changes a key.

use crate::models::{Record, StorageKey, Target};
use crate::utils::slugify;
use sha2::{Digest, Sha256};

/// Longest slug segment kept in an identity key. Object stores cap key
/// length around 1 KiB; the hash suffix carries the uniqueness anyway.
const MAX_SLUG_LEN: usize = 80;

/// Derive the storage key for a record.
///
/// Pure and infallible: every record gets a key. Two records with identical
/// identity-bearing content always map to the same key; records differing
/// in any hashed field map to different keys up to SHA-256 collision odds.
pub fn derive_key(target: &Target, record: &Record) -> StorageKey {
    if !target.identity_fields.is_empty() {
        let values: Option<Vec<&str>> = target
            .identity_fields
            .iter()
            .map(|name| record.fields.get(name).map(String::as_str))
            .collect();
        if let Some(values) = values {
            let digest = hash_parts(
                target
                    .identity_fields
                    .iter()
                    .map(String::as_str)
                    .zip(values.iter().copied()),
            );
            let slug = bounded_slug(&values.join("-"));
            let key = if slug.is_empty() {
                format!("{}/{}.json", target.name, &digest[..16])
            } else {
                format!("{}/{}-{}.json", target.name, slug, &digest[..16])
            };
            return StorageKey::new(key);
        }
        // One or more identity fields absent on this record; fall through
        // to the content hash.
    }

    let digest = hash_parts(
        [("target", record.target.as_str()), ("source_url", record.source_url.as_str())]
            .into_iter()
            .chain(record.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
    );
    StorageKey::new(format!("{}/{}.json", target.name, digest))
}

/// SHA-256 over length-unambiguous (name, value) pairs, as lowercase hex.
///
/// Separator bytes keep `("ab", "c")` distinct from `("a", "bc")`.
fn hash_parts<'a>(parts: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let mut hasher = Sha256::new();
    for (name, value) in parts {
        hasher.update(name.as_bytes());
        hasher.update([0x1f]);
        hasher.update(value.as_bytes());
        hasher.update([0x1e]);
    }
    format!("{:x}", hasher.finalize())
}

fn bounded_slug(value: &str) -> String {
    let mut slug = slugify(value);
    if slug.len() > MAX_SLUG_LEN {
        let mut cut = MAX_SLUG_LEN;
        while !slug.is_char_boundary(cut) {
            cut -= 1;
        }
        slug.truncate(cut);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldRule;
    use std::collections::BTreeMap;

    fn target(identity_fields: &[&str]) -> Target {
        Target {
            name: "bls".to_string(),
            url: "https://example.com/pub/".to_string(),
            record_selector: "a".to_string(),
            fields: BTreeMap::<String, FieldRule>::new(),
            identity_fields: identity_fields.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn record(pairs: &[(&str, &str)]) -> Record {
        Record {
            target: "bls".to_string(),
            source_url: "https://example.com/pub/".to_string(),
            fields: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_identity_key_is_deterministic() {
        let target = target(&["href"]);
        let a = record(&[("href", "/pub/pr.txt"), ("title", "PR data")]);
        let b = record(&[("title", "PR data"), ("href", "/pub/pr.txt")]);
        assert_eq!(derive_key(&target, &a), derive_key(&target, &b));
    }

    #[test]
    fn test_identity_key_ignores_non_identity_fields() {
        let target = target(&["href"]);
        let a = record(&[("href", "/pub/pr.txt"), ("title", "old title")]);
        let b = record(&[("href", "/pub/pr.txt"), ("title", "new title")]);
        assert_eq!(derive_key(&target, &a), derive_key(&target, &b));
    }

    #[test]
    fn test_identity_key_shape() {
        let target = target(&["href"]);
        let key = derive_key(&target, &record(&[("href", "/pub/pr.txt")]));
        assert!(key.as_str().starts_with("bls/pub-pr-txt-"));
        assert!(key.as_str().ends_with(".json"));
    }

    #[test]
    fn test_differing_identity_values_never_collide() {
        let target = target(&["href"]);
        // Distinct values that slugify identically; the hash suffix must
        // keep the keys apart.
        let a = derive_key(&target, &record(&[("href", "a b")]));
        let b = derive_key(&target, &record(&[("href", "a-b")]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_missing_identity_field_falls_back_to_content_hash() {
        let target = target(&["href"]);
        let key = derive_key(&target, &record(&[("title", "no link here")]));
        // Fallback shape: target prefix then a bare 64-char digest.
        let digest = key
            .as_str()
            .strip_prefix("bls/")
            .and_then(|rest| rest.strip_suffix(".json"))
            .unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_content_hash_is_order_independent() {
        let target = target(&[]);
        let a = record(&[("x", "1"), ("y", "2")]);
        let b = record(&[("y", "2"), ("x", "1")]);
        assert_eq!(derive_key(&target, &a), derive_key(&target, &b));
    }

    #[test]
    fn test_content_hash_differs_on_any_field() {
        let target = target(&[]);
        let a = derive_key(&target, &record(&[("x", "1"), ("y", "2")]));
        let b = derive_key(&target, &record(&[("x", "1"), ("y", "3")]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let target = target(&[]);
        let a = derive_key(&target, &record(&[("ab", "c")]));
        let b = derive_key(&target, &record(&[("a", "bc")]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_long_identity_values_are_bounded() {
        let target = target(&["href"]);
        let long = "x".repeat(500);
        let key = derive_key(&target, &record(&[("href", long.as_str())]));
        assert!(key.as_str().len() < 160);
    }

    #[test]
    fn test_unslugifiable_identity_still_keyed() {
        let target = target(&["href"]);
        let key = derive_key(&target, &record(&[("href", "@#$%")]));
        assert!(key.as_str().starts_with("bls/"));
        assert!(key.as_str().ends_with(".json"));
    }
}
