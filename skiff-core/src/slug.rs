//! URL slugs for paginated records.

use serde_json::Value;
use tracing::error;
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

use crate::record::FileRecord;

/// Normalize free text into a lowercase, hyphenated ASCII slug.
///
/// Text is decomposed (NFD) and its combining marks dropped, so `é` becomes
/// `e`. Anything else outside `[A-Za-z0-9- ]` is removed, not transliterated,
/// and runs of spaces or hyphens collapse to one hyphen. The result is left
/// raw; it is already URL-safe.
pub fn slugify(input: &str) -> String {
    let kept: String = input
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == ' ')
        .collect();

    let mut slug = String::with_capacity(kept.len());
    for c in kept.trim().chars() {
        let c = if c == ' ' { '-' } else { c.to_ascii_lowercase() };
        if c == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(c);
    }

    slug
}

/// Build a slug from a `--` separated list of field names, e.g. `date--title`.
///
/// Each field contributes its own slug; a missing or non-string field is
/// reported and contributes an empty segment.
pub fn slug_from_fields(record: &FileRecord, spec: &str) -> String {
    spec.split("--")
        .map(|field| match record.field(field) {
            Some(Value::String(text)) => slugify(&text),
            Some(other) => {
                error!(record = %record.name, field, value = %other, "slug field is not a string");
                String::new()
            }
            None => {
                error!(record = %record.name, field, "slug field is missing");
                String::new()
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
