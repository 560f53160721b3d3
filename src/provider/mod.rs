//! Analysis providers and their registry.
//!
//! A provider is an independent, unreliable capability that contributes
//! some sections of the feedback document. Providers are declared in TOML
//! files, one per provider, and may overlap in the sections they cover.

pub mod llm;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use opentelemetry::KeyValue;
use serde::Deserialize;
use tracing::{Instrument, debug, warn};

use crate::error::{Error, Result};
use crate::model::{PartialDocument, Section, SessionMetadata};
use crate::telemetry::genai::start_provider_span;
use crate::telemetry::metrics;

pub use llm::LlmProvider;

/// Label for sections no registered provider declares.
pub const UNASSIGNED: &str = "unassigned";

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Input to one provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub text: String,
    pub media_ref: Option<String>,
    pub metadata: SessionMetadata,
    /// Restrict output to these sections. `None` asks for a best-effort full document.
    pub target_sections: Option<Vec<Section>>,
    /// Every field of every requested section is expected.
    pub require_complete: bool,
    /// Use a simplified, stricter output contract.
    pub strict_output: bool,
}

impl ProviderRequest {
    pub fn new(text: impl Into<String>, media_ref: Option<String>, metadata: SessionMetadata) -> Self {
        Self {
            text: text.into(),
            media_ref,
            metadata,
            target_sections: None,
            require_complete: false,
            strict_output: false,
        }
    }

    /// Same request, restricted to `sections` and asking for completeness.
    pub fn scoped(&self, sections: Vec<Section>) -> Self {
        Self {
            target_sections: Some(sections),
            require_complete: true,
            ..self.clone()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict_output = true;
        self
    }

    /// Sections this request asks for, given the provider's own coverage.
    pub fn requested<'a>(&'a self, provider_sections: &'a [Section]) -> &'a [Section] {
        self.target_sections.as_deref().unwrap_or(provider_sections)
    }

    fn sections_label(&self) -> String {
        match &self.target_sections {
            None => "all".to_string(),
            Some(sections) => sections
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Sections this provider is responsible for.
    fn sections(&self) -> &[Section];

    /// Analyse the request. Must fail rather than hang past its own timeout.
    async fn analyze(&self, request: &ProviderRequest) -> Result<PartialDocument>;
}

/// Call a provider under a deadline. Any failure, including a timeout, is
/// logged and reported as no contribution.
pub async fn invoke(
    provider: &dyn AnalysisProvider,
    request: &ProviderRequest,
    deadline: Duration,
) -> Option<PartialDocument> {
    let name = provider.name().to_string();
    let span = start_provider_span(&name, &request.sections_label());
    let started = Instant::now();

    let result = async {
        match tokio::time::timeout(deadline, provider.analyze(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(deadline)),
        }
    }
    .instrument(span.clone())
    .await;

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    metrics::provider_call_duration_ms().record(elapsed_ms, &[KeyValue::new("provider", name.clone())]);

    let (outcome, partial) = match result {
        Ok(partial) => {
            let partial = match &request.target_sections {
                Some(targets) => partial.restrict(targets),
                None => partial,
            };
            debug!(provider = %name, sections = partial.sections.len(), elapsed_ms, "provider call succeeded");
            ("ok", Some(partial))
        }
        Err(Error::Timeout(after)) => {
            warn!(provider = %name, timeout_ms = after.as_millis() as u64, "provider call timed out");
            ("timeout", None)
        }
        Err(e) => {
            warn!(provider = %name, error = %e, "provider call failed");
            ("error", None)
        }
    };

    metrics::provider_calls().add(
        1,
        &[
            KeyValue::new("provider", name),
            KeyValue::new("result", outcome),
        ],
    );
    partial
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct ProviderFile {
    provider: ProviderDef,
}

/// A provider's declaration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderDef {
    pub name: String,
    pub model: String,
    pub sections: Vec<Section>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
    /// Extra guidance appended to the system prompt.
    #[serde(default)]
    pub instructions: Option<String>,
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_tokens() -> u64 {
    4096
}

impl ProviderDef {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Load all `.toml` provider definitions from a directory, sorted by file name.
pub fn load_definitions(dir: &Path) -> Result<Vec<ProviderDef>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::Config(format!("cannot read provider dir {}: {e}", dir.display()))
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "toml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut defs: Vec<ProviderDef> = Vec::with_capacity(paths.len());
    for path in paths {
        let content = std::fs::read_to_string(&path)?;
        let file: ProviderFile = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("bad provider config {}: {e}", path.display()))
        })?;
        if defs.iter().any(|d| d.name == file.provider.name) {
            return Err(Error::Config(format!(
                "duplicate provider name {} in {}",
                file.provider.name,
                path.display()
            )));
        }
        defs.push(file.provider);
    }
    Ok(defs)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Ordered set of providers. Registration order decides section ownership
/// and merge order.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn AnalysisProvider>>,
}

impl ProviderRegistry {
    /// Create an empty registry with no providers.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(providers: Vec<Arc<dyn AnalysisProvider>>) -> Self {
        Self { providers }
    }

    pub fn register(&mut self, provider: Arc<dyn AnalysisProvider>) {
        self.providers.push(provider);
    }

    pub fn providers(&self) -> &[Arc<dyn AnalysisProvider>] {
        &self.providers
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Look up a provider by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn AnalysisProvider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// The first registered provider declaring `section`.
    pub fn owner_of(&self, section: Section) -> Option<&Arc<dyn AnalysisProvider>> {
        self.providers
            .iter()
            .find(|p| p.sections().contains(&section))
    }

    /// Section → owning provider name, for every owned section.
    pub fn ownership(&self) -> BTreeMap<Section, String> {
        Section::ALL
            .into_iter()
            .filter_map(|s| self.owner_of(s).map(|p| (s, p.name().to_string())))
            .collect()
    }
}
