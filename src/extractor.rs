//! Selector-rule extraction of structured records from fetched documents.
//!
//! Each target configures a `record_selector` matching one element per
//! record, plus a map of field rules ([`FieldRule`]) evaluated within each
//! matched element. The rule set is a small closed vocabulary (text,
//! attribute, nested) interpreted against the parsed document tree.
//!
//! Some hosts serve their listing as a JSON array of file URLs instead of
//! HTML. An `application/json` payload takes that path: each entry becomes
//! one record with `href` (resolved against the target URL) and `name`
//! (the URL's final path segment) fields, and the selector rules are not
//! consulted.
//!
//! # Tolerance
//!
//! A field whose selector matches nothing is simply absent from the record;
//! only an unusable document (wrong content type, unparseable selector)
//! fails extraction. Elements yielding no fields at all produce no record.
//!
//! # Link Resolution
//!
//! Attribute values pulled from `href` or `src` are resolved against the
//! target URL, so relative listing links come out absolute the way
//! downstream consumers expect.
//!
//! Extraction is fully synchronous: the parsed tree (`scraper::Html`) is
//! not `Send`, so records are collected before control returns to the
//! async pipeline. The resulting `Vec` is consumed exactly once downstream.

use crate::errors::ExtractError;
use crate::models::{FieldRule, RawPayload, Record, Target};
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};
use url::Url;

/// Extract all records the target's rules find in the payload.
#[instrument(level = "info", skip_all, fields(target = %target.name))]
pub fn extract(target: &Target, payload: &RawPayload) -> Result<Vec<Record>, ExtractError> {
    if let Some(content_type) = &payload.content_type {
        if is_json(content_type) {
            return extract_json_listing(target, payload);
        }
        if !is_markup(content_type) {
            return Err(ExtractError::UnsupportedContentType {
                content_type: content_type.clone(),
            });
        }
    }

    let record_selector = parse_selector(&target.record_selector)?;
    // Selectors come from config, so one bad rule fails the whole target
    // rather than silently dropping a field.
    let field_selectors: Vec<(&String, &FieldRule)> = target.fields.iter().collect();
    for (_, rule) in &field_selectors {
        validate_rule(rule)?;
    }

    let base_url = Url::parse(&target.url).ok();
    let html = String::from_utf8_lossy(&payload.body);
    let document = Html::parse_document(&html);

    let mut records = Vec::new();
    for element in document.select(&record_selector) {
        let mut fields = BTreeMap::new();
        for (name, rule) in &field_selectors {
            if let Some(value) = apply_rule(element, rule, base_url.as_ref()) {
                fields.insert((*name).clone(), value);
            }
        }
        if fields.is_empty() {
            debug!("Matched element yielded no fields; dropping");
            continue;
        }
        records.push(Record {
            target: target.name.clone(),
            source_url: target.url.clone(),
            fields,
        });
    }

    info!(count = records.len(), "Extracted records");
    Ok(records)
}

fn is_markup(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.contains("html") || ct.contains("xml") || ct.starts_with("text/")
}

fn is_json(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("json")
}

/// Interpret a JSON payload as an array of file URLs, one record each.
#[instrument(level = "info", skip_all, fields(target = %target.name))]
fn extract_json_listing(target: &Target, payload: &RawPayload) -> Result<Vec<Record>, ExtractError> {
    let entries: Vec<String> = serde_json::from_slice(&payload.body).map_err(|e| {
        ExtractError::MalformedListing {
            message: e.to_string(),
        }
    })?;
    let base_url = Url::parse(&target.url).ok();

    let mut records = Vec::new();
    for entry in entries {
        let href = match base_url.as_ref().and_then(|base| base.join(&entry).ok()) {
            Some(resolved) => resolved.to_string(),
            None => entry,
        };
        let mut fields = BTreeMap::new();
        if let Some(name) = url_basename(&href) {
            fields.insert("name".to_string(), name);
        }
        fields.insert("href".to_string(), href);
        records.push(Record {
            target: target.name.clone(),
            source_url: target.url.clone(),
            fields,
        });
    }

    info!(count = records.len(), "Extracted records from JSON listing");
    Ok(records)
}

/// Final non-empty path segment of a URL, if it parses as one.
fn url_basename(href: &str) -> Option<String> {
    let url = Url::parse(href).ok()?;
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .next_back()
        .map(|segment| segment.to_string())
}

fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::BadSelector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

/// Check every selector in a rule tree up front.
fn validate_rule(rule: &FieldRule) -> Result<(), ExtractError> {
    match rule {
        FieldRule::Text { selector } | FieldRule::Attribute { selector, .. } => {
            parse_selector(selector).map(|_| ())
        }
        FieldRule::Nested { selector, rule } => {
            parse_selector(selector)?;
            validate_rule(rule)
        }
    }
}

/// Evaluate one field rule within the scope element. `None` means the
/// field is absent on this record.
fn apply_rule(scope: ElementRef<'_>, rule: &FieldRule, base_url: Option<&Url>) -> Option<String> {
    match rule {
        FieldRule::Text { selector } => {
            let selector = parse_selector(selector).ok()?;
            let element = scope.select(&selector).next()?;
            let text = element.text().collect::<Vec<_>>().join(" ");
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            (!text.is_empty()).then_some(text)
        }
        FieldRule::Attribute { selector, attr } => {
            let selector = parse_selector(selector).ok()?;
            let element = scope.select(&selector).next()?;
            let value = element.value().attr(attr)?;
            if matches!(attr.as_str(), "href" | "src") {
                if let Some(base) = base_url {
                    if let Ok(resolved) = base.join(value) {
                        return Some(resolved.to_string());
                    }
                }
            }
            Some(value.to_string())
        }
        FieldRule::Nested { selector, rule } => {
            let selector = parse_selector(selector).ok()?;
            let inner = scope.select(&selector).next()?;
            apply_rule(inner, rule, base_url)
        }
    }
}
