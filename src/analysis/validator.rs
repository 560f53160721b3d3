//! Completeness validation against the required schema.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::gaps::{Gap, GapClassifier, GapEvidence, HeuristicClassifier};
use crate::model::{AnalysisDocument, Schema, Section, SectionPayload, Severity};
use crate::provider::UNASSIGNED;

/// Completeness of the sections attributed to one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_complete: bool,
    /// `section.field` paths that are absent.
    pub missing_fields: Vec<String>,
    /// `section.field` paths that are present but too thin.
    pub insufficient_content: Vec<String>,
    /// Sufficient required fields over all required fields, 0-100.
    pub completion_percentage: f64,
}

impl ValidationResult {
    fn empty() -> Self {
        Self {
            is_complete: true,
            missing_fields: Vec::new(),
            insufficient_content: Vec::new(),
            completion_percentage: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletenessReport {
    /// Keyed by provider name, or `unassigned`.
    pub results: BTreeMap<String, ValidationResult>,
    /// `sections_complete / total_sections * 100`.
    pub completeness_score: f64,
    pub sections_complete: usize,
    pub total_sections: usize,
    pub gaps: Vec<Gap>,
    pub is_complete: bool,
}

impl CompletenessReport {
    pub fn critical_gaps(&self) -> usize {
        self.gaps
            .iter()
            .filter(|g| g.severity == Severity::Critical)
            .count()
    }
}

/// Checks a document against a schema and describes every gap.
#[derive(Clone)]
pub struct CompletenessValidator {
    schema: Schema,
    classifier: Arc<dyn GapClassifier>,
}

impl CompletenessValidator {
    pub fn new(schema: Schema, classifier: Arc<dyn GapClassifier>) -> Self {
        Self { schema, classifier }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Validate `doc`, attributing each section to its owner in `owners`.
    /// Pure: never mutates the document.
    pub fn validate(
        &self,
        doc: &AnalysisDocument,
        owners: &BTreeMap<Section, String>,
    ) -> CompletenessReport {
        let rule = &self.schema.rule;
        let mut results: BTreeMap<String, ValidationResult> = BTreeMap::new();
        let mut counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        let mut gaps = Vec::new();
        let mut sections_complete = 0;

        for spec in &self.schema.sections {
            let section = spec.section;
            let owner = owners.get(&section).cloned();
            let source = owner.clone().unwrap_or_else(|| UNASSIGNED.to_string());
            let result = results
                .entry(source.clone())
                .or_insert_with(ValidationResult::empty);

            let payload = doc.section(section);
            let fields = payload.and_then(SectionPayload::fields);

            let mut deficient = Vec::new();
            let mut worst = Severity::Minor;
            let mut sufficient = 0;
            for field in &spec.fields {
                let path = format!("{section}.{}", field.name);
                match fields.and_then(|f| f.get(&field.name)) {
                    Some(f) if rule.is_sufficient(&f.value) => {
                        sufficient += 1;
                        continue;
                    }
                    Some(f) if !f.value.is_null() => result.insufficient_content.push(path),
                    _ => result.missing_fields.push(path),
                }
                deficient.push(field.name.clone());
                worst = worst.max(field.severity);
            }

            let tally = counts.entry(source).or_default();
            tally.0 += sufficient;
            tally.1 += spec.fields.len();

            if deficient.is_empty() && fields.is_some() {
                sections_complete += 1;
                continue;
            }

            result.is_complete = false;
            let structured = fields.is_some();
            let present = payload.is_some();
            let severity = if structured { worst } else { Severity::Critical };
            let cause = self.classifier.classify(&GapEvidence {
                section,
                present,
                structured,
                deficient_fields: &deficient,
            });
            gaps.push(Gap {
                section,
                missing_fields: deficient,
                severity,
                cause,
                provider: owner,
            });
        }

        for (source, result) in results.iter_mut() {
            if let Some((sufficient, total)) = counts.get(source)
                && *total > 0
            {
                result.completion_percentage = *sufficient as f64 / *total as f64 * 100.0;
            }
        }

        let total_sections = self.schema.sections.len();
        let completeness_score = if total_sections == 0 {
            100.0
        } else {
            sections_complete as f64 / total_sections as f64 * 100.0
        };

        CompletenessReport {
            results,
            completeness_score,
            sections_complete,
            total_sections,
            is_complete: gaps.is_empty(),
            gaps,
        }
    }
}

impl Default for CompletenessValidator {
    fn default() -> Self {
        Self::new(Schema::coaching(), Arc::new(HeuristicClassifier::default()))
    }
}
