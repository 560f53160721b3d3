//! The required shape of a feedback document, expressed as data.
//!
//! Sections are a fixed enumerable set. Each section declares the fields
//! a complete document must carry and how much each one matters.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Section
// ---------------------------------------------------------------------------

/// A named section of the feedback document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Section {
    KeyInfo,
    Questioning,
    Language,
    CoachBehaviours,
    PlayerEngagement,
    IntendedOutcomes,
    CoachSpecific,
    Neuroscience,
    Comments,
}

impl Section {
    pub const ALL: [Section; 9] = [
        Section::KeyInfo,
        Section::Questioning,
        Section::Language,
        Section::CoachBehaviours,
        Section::PlayerEngagement,
        Section::IntendedOutcomes,
        Section::CoachSpecific,
        Section::Neuroscience,
        Section::Comments,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Section::KeyInfo => "keyInfo",
            Section::Questioning => "questioning",
            Section::Language => "language",
            Section::CoachBehaviours => "coachBehaviours",
            Section::PlayerEngagement => "playerEngagement",
            Section::IntendedOutcomes => "intendedOutcomes",
            Section::CoachSpecific => "coachSpecific",
            Section::Neuroscience => "neuroscience",
            Section::Comments => "comments",
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Section {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Section::ALL
            .into_iter()
            .find(|section| section.as_str() == s)
            .ok_or_else(|| Error::Other(format!("unknown section: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// How much a missing field or section hurts the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Important,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Minor => "minor",
            Severity::Important => "important",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Content sufficiency
// ---------------------------------------------------------------------------

/// Decides whether a field value carries enough content to count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRule {
    /// Strings shorter than this (after trimming) are insufficient.
    pub min_text_len: usize,
}

impl Default for ContentRule {
    fn default() -> Self {
        Self { min_text_len: 10 }
    }
}

impl ContentRule {
    pub fn is_sufficient(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match value {
            Value::Null => false,
            Value::String(s) => s.trim().chars().count() >= self.min_text_len,
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
            Value::Bool(_) | Value::Number(_) => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSchema {
    pub section: Section,
    pub fields: Vec<FieldSpec>,
}

impl SectionSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Required sections and fields for a complete document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub rule: ContentRule,
    pub sections: Vec<SectionSchema>,
}

impl Schema {
    pub fn section(&self, section: Section) -> Option<&SectionSchema> {
        self.sections.iter().find(|s| s.section == section)
    }

    pub fn required_sections(&self) -> impl Iterator<Item = Section> + '_ {
        self.sections.iter().map(|s| s.section)
    }

    /// Declared severity of `section.field`, `Minor` when undeclared.
    pub fn field_severity(&self, section: Section, field: &str) -> Severity {
        self.section(section)
            .and_then(|s| s.field(field))
            .map(|f| f.severity)
            .unwrap_or(Severity::Minor)
    }

    /// The coaching-feedback schema: nine sections.
    pub fn coaching() -> Self {
        use Severity::*;

        let section = |section: Section, fields: &[(&str, Severity)]| SectionSchema {
            section,
            fields: fields
                .iter()
                .map(|(name, severity)| FieldSpec {
                    name: (*name).to_string(),
                    severity: *severity,
                })
                .collect(),
        };

        Self {
            rule: ContentRule::default(),
            sections: vec![
                section(
                    Section::KeyInfo,
                    &[
                        ("sessionSummary", Critical),
                        ("sessionFocus", Critical),
                        ("participants", Important),
                        ("setting", Minor),
                    ],
                ),
                section(
                    Section::Questioning,
                    &[
                        ("questionTypes", Critical),
                        ("openVsClosed", Important),
                        ("examples", Important),
                        ("recommendations", Minor),
                    ],
                ),
                section(
                    Section::Language,
                    &[
                        ("tone", Critical),
                        ("clarity", Important),
                        ("keyPhrases", Important),
                        ("recommendations", Minor),
                    ],
                ),
                section(
                    Section::CoachBehaviours,
                    &[
                        ("strengths", Critical),
                        ("areasForImprovement", Critical),
                        ("observedBehaviours", Important),
                        ("feedbackStyle", Minor),
                    ],
                ),
                section(
                    Section::PlayerEngagement,
                    &[
                        ("engagementLevel", Critical),
                        ("interactionPatterns", Important),
                        ("playerVoice", Important),
                        ("recommendations", Minor),
                    ],
                ),
                section(
                    Section::IntendedOutcomes,
                    &[
                        ("statedOutcomes", Critical),
                        ("alignment", Important),
                        ("evidence", Minor),
                    ],
                ),
                section(
                    Section::CoachSpecific,
                    &[
                        ("developmentGoals", Critical),
                        ("personalisedTips", Important),
                        ("nextSteps", Important),
                        ("reflectionPrompts", Minor),
                    ],
                ),
                section(
                    Section::Neuroscience,
                    &[
                        ("learningPrinciples", Critical),
                        ("cognitiveLoad", Minor),
                        ("recommendations", Minor),
                    ],
                ),
                section(
                    Section::Comments,
                    &[
                        ("overallComment", Critical),
                        ("highlights", Important),
                        ("closingSummary", Minor),
                    ],
                ),
            ],
        }
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::coaching()
    }
}
