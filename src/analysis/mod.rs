//! Document assembly: orchestration, completeness validation, gap filling.

pub mod fallback;
pub mod filler;
pub mod gaps;
pub mod orchestrator;
pub mod pipeline;
pub mod text;
pub mod validator;

pub use filler::{FillOutcome, GapFillConfig, GapFiller};
pub use gaps::{Gap, GapCause, GapClassifier, GapEvidence, HeuristicClassifier};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use pipeline::AnalysisPipeline;
pub use validator::{CompletenessReport, CompletenessValidator, ValidationResult};
