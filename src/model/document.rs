//! The accumulating feedback document and its non-destructive merge rule.
//!
//! Every field remembers who wrote it. Merging only ever improves a field:
//! a sufficient value is never replaced by an insufficient one, and
//! provider-authored content outranks synthesized or placeholder content.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::schema::{ContentRule, Section};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Who authored a field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "provider", rename_all = "snake_case")]
pub enum Provenance {
    /// Returned by a named analysis provider.
    Provider(String),
    /// Derived deterministically from the raw input after an incomplete response.
    Synthesized,
    /// Emergency or degraded-path filler. Not analysis.
    Placeholder,
}

impl Provenance {
    fn rank(&self) -> u8 {
        match self {
            Provenance::Placeholder => 0,
            Provenance::Synthesized => 1,
            Provenance::Provider(_) => 2,
        }
    }

    pub fn is_provider(&self) -> bool {
        matches!(self, Provenance::Provider(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub value: Value,
    pub provenance: Provenance,
}

impl Field {
    pub fn new(value: Value, provenance: Provenance) -> Self {
        Self { value, provenance }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Payload of one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "data", rename_all = "snake_case")]
pub enum SectionPayload {
    Structured(BTreeMap<String, Field>),
    /// The section arrived, but not as a key/value object.
    Malformed(Value),
}

impl SectionPayload {
    pub fn fields(&self) -> Option<&BTreeMap<String, Field>> {
        match self {
            SectionPayload::Structured(fields) => Some(fields),
            SectionPayload::Malformed(_) => None,
        }
    }
}

/// Overall trust level of a document, for downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentQuality {
    /// Not yet checked for completeness.
    #[default]
    Unverified,
    /// Every required field is sufficient.
    Complete,
    /// Gap filling ran out of rounds; critical fields were backfilled.
    BestEffort,
    /// The source recording was unavailable.
    Degraded,
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDocument {
    pub sections: BTreeMap<Section, SectionPayload>,
    #[serde(default)]
    pub quality: DocumentQuality,
}

impl AnalysisDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(&self, section: Section) -> Option<&SectionPayload> {
        self.sections.get(&section)
    }

    pub fn field(&self, section: Section, name: &str) -> Option<&Field> {
        self.sections
            .get(&section)
            .and_then(SectionPayload::fields)
            .and_then(|fields| fields.get(name))
    }

    /// Merge a single field. Returns true if the document changed.
    pub fn merge_field(
        &mut self,
        section: Section,
        name: &str,
        incoming: Field,
        rule: &ContentRule,
    ) -> bool {
        // A malformed payload carries no usable fields; structure replaces it.
        if !matches!(
            self.sections.get(&section),
            Some(SectionPayload::Structured(_))
        ) {
            self.sections
                .insert(section, SectionPayload::Structured(BTreeMap::new()));
        }
        let Some(SectionPayload::Structured(fields)) = self.sections.get_mut(&section) else {
            return false;
        };

        let replace = match fields.get(name) {
            None => true,
            Some(current) => {
                let current_ok = rule.is_sufficient(&current.value);
                let incoming_ok = rule.is_sufficient(&incoming.value);
                match (current_ok, incoming_ok) {
                    (false, true) => true,
                    (true, true) => incoming.provenance.rank() > current.provenance.rank(),
                    (_, false) => false,
                }
            }
        };

        if replace {
            fields.insert(name.to_string(), incoming);
        }
        replace
    }

    /// Merge a raw section payload from a provider. Object payloads merge
    /// field by field; anything else is kept only if the section is absent.
    pub fn merge_section_value(
        &mut self,
        section: Section,
        value: &Value,
        provenance: &Provenance,
        rule: &ContentRule,
    ) -> usize {
        match value {
            Value::Object(map) => map
                .iter()
                .filter(|(name, v)| {
                    self.merge_field(section, name, Field::new((*v).clone(), provenance.clone()), rule)
                })
                .count(),
            other => {
                if !self.sections.contains_key(&section) {
                    debug!(%section, "keeping malformed section payload");
                    self.sections
                        .insert(section, SectionPayload::Malformed(other.clone()));
                }
                0
            }
        }
    }

    /// Merge a provider's partial output. Returns the number of fields changed.
    pub fn merge_partial(
        &mut self,
        partial: &PartialDocument,
        provenance: &Provenance,
        rule: &ContentRule,
    ) -> usize {
        partial
            .sections
            .iter()
            .map(|(section, value)| self.merge_section_value(*section, value, provenance, rule))
            .sum()
    }

    /// Merge another document into this one under the same rule.
    pub fn merge(&mut self, other: &AnalysisDocument, rule: &ContentRule) -> usize {
        let mut changed = 0;
        for (section, payload) in &other.sections {
            match payload {
                SectionPayload::Structured(fields) => {
                    for (name, field) in fields {
                        if self.merge_field(*section, name, field.clone(), rule) {
                            changed += 1;
                        }
                    }
                }
                SectionPayload::Malformed(value) => {
                    if !self.sections.contains_key(section) {
                        self.sections
                            .insert(*section, SectionPayload::Malformed(value.clone()));
                    }
                }
            }
        }
        changed
    }

    /// Iterate every field with its location.
    pub fn fields(&self) -> impl Iterator<Item = (Section, &str, &Field)> {
        self.sections.iter().flat_map(|(section, payload)| {
            payload
                .fields()
                .into_iter()
                .flat_map(move |fields| fields.iter().map(move |(n, f)| (*section, n.as_str(), f)))
        })
    }

    pub fn count_by_provenance(&self, predicate: impl Fn(&Provenance) -> bool) -> usize {
        self.fields().filter(|(_, _, f)| predicate(&f.provenance)).count()
    }

    /// Plain section → field → value JSON, as presented to end consumers.
    pub fn to_feedback_json(&self) -> Value {
        let mut out = serde_json::Map::new();
        for (section, payload) in &self.sections {
            let value = match payload {
                SectionPayload::Structured(fields) => Value::Object(
                    fields
                        .iter()
                        .map(|(name, field)| (name.clone(), field.value.clone()))
                        .collect(),
                ),
                SectionPayload::Malformed(value) => value.clone(),
            };
            out.insert(section.as_str().to_string(), value);
        }
        Value::Object(out)
    }
}

// ---------------------------------------------------------------------------
// Provider output
// ---------------------------------------------------------------------------

/// Raw section contributions from one provider call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialDocument {
    pub sections: BTreeMap<Section, Value>,
}

impl PartialDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, section: Section, value: Value) -> Self {
        self.sections.insert(section, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Drop every section not in `targets`.
    pub fn restrict(mut self, targets: &[Section]) -> Self {
        self.sections.retain(|section, _| targets.contains(section));
        self
    }

    /// Parse a provider reply: a JSON object keyed by section name, possibly
    /// wrapped in a markdown code fence or surrounded by prose. Unknown keys
    /// are ignored.
    pub fn parse(reply: &str) -> Result<Self> {
        let start = reply.find('{');
        let end = reply.rfind('}');
        let body = match (start, end) {
            (Some(start), Some(end)) if start < end => &reply[start..=end],
            _ => {
                return Err(Error::MalformedOutput(
                    "reply does not contain a JSON object".to_string(),
                ));
            }
        };

        let value: Value = serde_json::from_str(body)
            .map_err(|e| Error::MalformedOutput(format!("invalid JSON: {e}")))?;
        let Value::Object(map) = value else {
            return Err(Error::MalformedOutput("top level is not an object".to_string()));
        };

        let mut partial = Self::new();
        for (key, value) in map {
            match key.parse::<Section>() {
                Ok(section) => {
                    partial.sections.insert(section, value);
                }
                Err(_) => debug!(key, "ignoring unknown section in provider reply"),
            }
        }
        Ok(partial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider(name: &str) -> Provenance {
        Provenance::Provider(name.to_string())
    }

    #[test]
    fn sufficient_field_survives_insufficient_update() {
        let rule = ContentRule::default();
        let mut doc = AnalysisDocument::new();
        doc.merge_field(
            Section::Language,
            "tone",
            Field::new(json!("Warm and encouraging throughout"), provider("a")),
            &rule,
        );
        let changed = doc.merge_field(
            Section::Language,
            "tone",
            Field::new(json!("ok"), provider("b")),
            &rule,
        );
        assert!(!changed);
        assert_eq!(
            doc.field(Section::Language, "tone").unwrap().value,
            json!("Warm and encouraging throughout")
        );
    }

    #[test]
    fn provider_content_replaces_placeholder() {
        let rule = ContentRule::default();
        let mut doc = AnalysisDocument::new();
        doc.merge_field(
            Section::Comments,
            "overallComment",
            Field::new(json!("[placeholder] not determined"), Provenance::Placeholder),
            &rule,
        );
        assert!(doc.merge_field(
            Section::Comments,
            "overallComment",
            Field::new(json!("A well organised session"), provider("a")),
            &rule,
        ));
        assert!(
            doc.field(Section::Comments, "overallComment")
                .unwrap()
                .provenance
                .is_provider()
        );
    }

    #[test]
    fn structured_section_replaces_malformed() {
        let rule = ContentRule::default();
        let mut doc = AnalysisDocument::new();
        let partial = PartialDocument::new().with(Section::Questioning, json!("not an object"));
        doc.merge_partial(&partial, &provider("a"), &rule);
        assert!(matches!(
            doc.section(Section::Questioning),
            Some(SectionPayload::Malformed(_))
        ));

        let partial = PartialDocument::new().with(
            Section::Questioning,
            json!({"questionTypes": "Mostly open questions"}),
        );
        doc.merge_partial(&partial, &provider("a"), &rule);
        assert!(doc.field(Section::Questioning, "questionTypes").is_some());
    }

    #[test]
    fn parse_tolerates_code_fences_and_unknown_keys() {
        let reply = "Here you go:\n```json\n{\"keyInfo\": {\"sessionSummary\": \"Passing drills\"}, \"bogus\": 1}\n```";
        let partial = PartialDocument::parse(reply).unwrap();
        assert_eq!(partial.sections.len(), 1);
        assert!(partial.sections.contains_key(&Section::KeyInfo));
    }

    #[test]
    fn parse_rejects_non_json() {
        assert!(matches!(
            PartialDocument::parse("I could not analyse this"),
            Err(Error::MalformedOutput(_))
        ));
    }
}
