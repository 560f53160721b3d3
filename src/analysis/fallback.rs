//! Deterministic last-resort content.
//!
//! Nothing here is analysis. Every value written is tagged
//! [`Provenance::Synthesized`] or [`Provenance::Placeholder`] so consumers
//! can tell it apart from provider output.

use serde_json::Value;
use tracing::info;

use super::text::{sentences, truncate_chars};
use crate::model::{AnalysisDocument, DocumentQuality, Field, Provenance, Schema, Section, Severity};

const EXCERPT_CHARS: usize = 240;

/// `sessionSummary` -> `session summary`.
fn field_label(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_uppercase() {
            out.push(' ');
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn excerpt(text: &str) -> Option<String> {
    let first: Vec<&str> = sentences(text).into_iter().take(2).collect();
    if first.is_empty() {
        return None;
    }
    Some(truncate_chars(&first.join(" "), EXCERPT_CHARS).to_string())
}

/// A minimal value for one field derived from the raw input. Stable for a
/// given input and field.
pub fn synthesize_field(section: Section, field: &str, text: &str) -> Field {
    let label = field_label(field);
    let all = sentences(text);
    let value = if all.is_empty() {
        format!("[auto] No transcript content was available to assess {label} ({section}).")
    } else {
        let seed = field.bytes().fold(section as usize, |acc, b| acc.wrapping_add(b as usize));
        let sentence = all[seed % all.len()];
        format!(
            "[auto] Derived from the transcript for {label}: \"{}\"",
            truncate_chars(sentence, EXCERPT_CHARS)
        )
    };
    Field::new(Value::String(value), Provenance::Synthesized)
}

/// Placeholder for a critical field that no provider could fill.
pub fn placeholder(section: Section, field: &str, text: &str) -> Field {
    let label = field_label(field);
    let value = match excerpt(text) {
        Some(excerpt) => format!(
            "[placeholder] The {label} ({section}) could not be determined automatically. \
             Session opening: \"{excerpt}\""
        ),
        None => format!("[placeholder] The {label} ({section}) could not be determined automatically."),
    };
    Field::new(Value::String(value), Provenance::Placeholder)
}

/// Fill every still-deficient critical field with placeholder content and
/// mark the document best-effort. Returns the number of fields written.
pub fn apply_emergency_fallback(doc: &mut AnalysisDocument, schema: &Schema, text: &str) -> usize {
    let mut written = 0;
    for spec in &schema.sections {
        for field in spec.fields.iter().filter(|f| f.severity == Severity::Critical) {
            let filled = placeholder(spec.section, &field.name, text);
            if doc.merge_field(spec.section, &field.name, filled, &schema.rule) {
                written += 1;
            }
        }
    }
    doc.quality = DocumentQuality::BestEffort;
    info!(fields = written, "emergency fallback applied");
    written
}

/// Document for a job whose source recording could not be retrieved.
pub fn degraded_document(schema: &Schema, reason: &str) -> AnalysisDocument {
    let mut doc = AnalysisDocument::new();
    for spec in &schema.sections {
        for field in spec.fields.iter().filter(|f| f.severity == Severity::Critical) {
            let label = field_label(&field.name);
            let value = format!(
                "[placeholder] The session recording was unavailable, so the {label} could not be assessed. ({reason})"
            );
            doc.merge_field(
                spec.section,
                &field.name,
                Field::new(Value::String(value), Provenance::Placeholder),
                &schema.rule,
            );
        }
    }
    doc.quality = DocumentQuality::Degraded;
    doc
}
