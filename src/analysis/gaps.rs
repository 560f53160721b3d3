//! Gap description and cause classification.
//!
//! The cause attached to a gap is a guess used to pick a repair strategy.
//! The heuristic is isolated behind [`GapClassifier`] so it can be swapped.

use serde::{Deserialize, Serialize};

use crate::model::{Section, Severity};

/// Probable reason a section came back deficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapCause {
    TokenLimit,
    JsonParsing,
    Timeout,
    ApiFailure,
    IncompleteResponse,
}

impl GapCause {
    pub fn as_str(self) -> &'static str {
        match self {
            GapCause::TokenLimit => "token_limit",
            GapCause::JsonParsing => "json_parsing",
            GapCause::Timeout => "timeout",
            GapCause::ApiFailure => "api_failure",
            GapCause::IncompleteResponse => "incomplete_response",
        }
    }
}

impl std::fmt::Display for GapCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One deficient section. Always recomputed from document state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub section: Section,
    /// Required fields that are absent or insufficient, in schema order.
    pub missing_fields: Vec<String>,
    pub severity: Severity,
    pub cause: GapCause,
    /// Provider owning the section, if any.
    pub provider: Option<String>,
}

/// What the validator observed about a deficient section.
#[derive(Debug, Clone, Copy)]
pub struct GapEvidence<'a> {
    pub section: Section,
    pub present: bool,
    /// Present as a key/value object.
    pub structured: bool,
    pub deficient_fields: &'a [String],
}

pub trait GapClassifier: Send + Sync {
    fn classify(&self, evidence: &GapEvidence<'_>) -> GapCause;
}

/// Default classifier. Thresholds are tunable, not diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeuristicClassifier {
    /// More deficient fields than this in one section reads as truncation.
    pub token_limit_threshold: usize,
}

impl Default for HeuristicClassifier {
    fn default() -> Self {
        Self {
            token_limit_threshold: 3,
        }
    }
}

impl GapClassifier for HeuristicClassifier {
    fn classify(&self, evidence: &GapEvidence<'_>) -> GapCause {
        let missing = evidence.deficient_fields.len();
        if evidence.present && !evidence.structured {
            GapCause::JsonParsing
        } else if missing > self.token_limit_threshold {
            GapCause::TokenLimit
        } else if missing == 1 {
            GapCause::IncompleteResponse
        } else {
            GapCause::Timeout
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{i}")).collect()
    }

    fn classify(present: bool, structured: bool, missing: usize) -> GapCause {
        let deficient = fields(missing);
        HeuristicClassifier::default().classify(&GapEvidence {
            section: Section::Language,
            present,
            structured,
            deficient_fields: &deficient,
        })
    }

    #[test]
    fn heuristic_thresholds() {
        assert_eq!(classify(true, false, 4), GapCause::JsonParsing);
        assert_eq!(classify(false, false, 4), GapCause::TokenLimit);
        assert_eq!(classify(true, true, 1), GapCause::IncompleteResponse);
        assert_eq!(classify(true, true, 2), GapCause::Timeout);
        assert_eq!(classify(false, false, 3), GapCause::Timeout);
    }
}
