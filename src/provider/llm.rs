//! Anthropic-backed analysis provider via rig-core.

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use secrecy::{ExposeSecret, SecretString};
use tracing::Instrument;

use super::{AnalysisProvider, ProviderDef, ProviderRequest};
use crate::error::{Error, Result};
use crate::model::{PartialDocument, Schema, Section, SessionMetadata};
use crate::telemetry::genai::{record_response_chars, start_chat_span};

/// Create an Anthropic client from a secret API key.
///
/// # Errors
/// Returns an error if the underlying HTTP client cannot be constructed.
pub fn anthropic_client(
    api_key: &SecretString,
) -> std::result::Result<rig::providers::anthropic::Client, rig::http_client::Error> {
    rig::providers::anthropic::Client::new(api_key.expose_secret())
}

/// A provider that prompts a model for its sections and parses the JSON reply.
pub struct LlmProvider {
    def: ProviderDef,
    client: rig::providers::anthropic::Client,
    schema: Schema,
}

impl LlmProvider {
    pub fn new(def: ProviderDef, client: rig::providers::anthropic::Client, schema: Schema) -> Self {
        Self { def, client, schema }
    }

    pub fn from_key(def: ProviderDef, api_key: &SecretString, schema: Schema) -> Result<Self> {
        let client = anthropic_client(api_key)
            .map_err(|e| Error::Config(format!("anthropic client: {e}")))?;
        Ok(Self::new(def, client, schema))
    }

    pub fn def(&self) -> &ProviderDef {
        &self.def
    }

    fn preamble(&self, request: &ProviderRequest, sections: &[Section]) -> String {
        let mut out = String::from(
            "You analyse transcripts of sports coaching sessions and write \
             structured feedback for the coach.\n\n\
             Reply with a single JSON object keyed by section name. Each section \
             is an object whose keys are the field names listed below.\n",
        );

        for section in sections {
            out.push_str(&format!("\n- {section}:"));
            if let Some(spec) = self.schema.section(*section) {
                for field in &spec.fields {
                    out.push_str(&format!(" {},", field.name));
                }
                out.pop();
            }
        }
        out.push('\n');

        if request.require_complete {
            out.push_str(
                "\nEvery listed field is required. Write at least one full sentence \
                 for each text field.\n",
            );
        }
        if request.strict_output {
            out.push_str(
                "\nReturn only the JSON object. No prose, no markdown, plain string \
                 values only.\n",
            );
        }
        if let Some(extra) = &self.def.instructions {
            out.push('\n');
            out.push_str(extra);
            out.push('\n');
        }
        out
    }
}

fn metadata_block(metadata: &SessionMetadata) -> String {
    let mut lines = Vec::new();
    let mut push = |label: &str, value: &Option<String>| {
        if let Some(v) = value {
            lines.push(format!("{label}: {v}"));
        }
    };
    push("Title", &metadata.title);
    push("Coach", &metadata.coach_name);
    push("Sport", &metadata.sport);
    push("Age group", &metadata.age_group);
    for (key, value) in &metadata.extra {
        lines.push(format!("{key}: {value}"));
    }
    lines.join("\n")
}

#[async_trait]
impl AnalysisProvider for LlmProvider {
    fn name(&self) -> &str {
        &self.def.name
    }

    fn sections(&self) -> &[Section] {
        &self.def.sections
    }

    async fn analyze(&self, request: &ProviderRequest) -> Result<PartialDocument> {
        let sections = request.requested(&self.def.sections).to_vec();
        let preamble = self.preamble(request, &sections);

        let meta = metadata_block(&request.metadata);
        let prompt = if meta.is_empty() {
            format!("Transcript:\n{}", request.text)
        } else {
            format!("{meta}\n\nTranscript:\n{}", request.text)
        };

        let agent = self
            .client
            .agent(&self.def.model)
            .preamble(&preamble)
            .max_tokens(self.def.max_tokens)
            .build();

        let span = start_chat_span(&self.def.model, "anthropic");
        let reply = async {
            let call = agent.prompt(prompt.as_str());
            match tokio::time::timeout(self.def.timeout(), call).await {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(e)) => Err(Error::provider(&self.def.name, e)),
                Err(_) => Err(Error::Timeout(self.def.timeout())),
            }
        }
        .instrument(span.clone())
        .await?;

        record_response_chars(&span, reply.chars().count());
        Ok(PartialDocument::parse(&reply)?.restrict(&sections))
    }
}
