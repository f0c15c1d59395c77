//! # Completion Service
//!
//! The seam between the workflow and the language model. The workflow only
//! knows [`CompletionService`]; replies are decoded with an explicit
//! parse-or-fail step so a malformed structured reply surfaces as
//! [`ResearchError::SchemaViolation`] instead of a partial value.

use async_trait::async_trait;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ResearchError, ResearchResult};
use crate::models::ModelConfig;
use crate::run_llm_function;
use crate::state::records::{ConclusionAndReferences, FeedbackReply, QueryBatch, RouteReply, SectionPlan};

/// Every point in the workflow that calls the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Outline,
    Route,
    Decompose,
    Seed,
    Query,
    Synthesize,
    Reflect,
    Format,
    Conclude,
}

impl Stage {
    pub fn all() -> [Stage; 9] {
        [
            Stage::Outline,
            Stage::Route,
            Stage::Decompose,
            Stage::Seed,
            Stage::Query,
            Stage::Synthesize,
            Stage::Reflect,
            Stage::Format,
            Stage::Conclude,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Outline => "outline",
            Stage::Route => "route",
            Stage::Decompose => "decompose",
            Stage::Seed => "seed",
            Stage::Query => "query",
            Stage::Synthesize => "synthesize",
            Stage::Reflect => "reflect",
            Stage::Format => "format",
            Stage::Conclude => "conclude",
        }
    }

    /// Reply shape the stage expects
    pub fn shape(&self) -> Shape {
        match self {
            Stage::Outline | Stage::Seed | Stage::Synthesize | Stage::Format => Shape::Text,
            Stage::Route => Shape::Route,
            Stage::Decompose => Shape::Sections,
            Stage::Query => Shape::Queries,
            Stage::Reflect => Shape::Feedback,
            Stage::Conclude => Shape::Conclusion,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Text,
    Sections,
    Queries,
    Feedback,
    Route,
    Conclusion,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shape::Text => "text",
            Shape::Sections => "sections",
            Shape::Queries => "queries",
            Shape::Feedback => "feedback",
            Shape::Route => "route",
            Shape::Conclusion => "conclusion",
        };
        f.write_str(name)
    }
}

/// One call to the completion service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub stage: Stage,
    /// System instructions for the stage
    pub system: String,
    /// Rendered context: conversation, section, search history, ...
    pub input: String,
    /// Section name when the call belongs to a section sub-workflow
    pub subject: Option<String>,
}

impl CompletionRequest {
    pub fn shape(&self) -> Shape {
        self.stage.shape()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionReply {
    Text(String),
    Structured(serde_json::Value),
}

impl CompletionReply {
    /// Free text for a `Text` stage. Empty text counts as a failed call.
    pub fn into_text(self, stage: Stage) -> ResearchResult<String> {
        let text = match self {
            CompletionReply::Text(text) => text,
            CompletionReply::Structured(serde_json::Value::String(text)) => text,
            CompletionReply::Structured(other) => {
                return Err(ResearchError::schema(
                    Shape::Text,
                    format!("expected prose, got {}", other),
                ))
            }
        };
        if text.trim().is_empty() {
            return Err(ResearchError::upstream(stage, "empty reply"));
        }
        Ok(text)
    }

    /// Parse a structured reply into `T`, failing on any mismatch.
    pub fn decode<T: DeserializeOwned>(self, shape: Shape) -> ResearchResult<T> {
        let parsed = match self {
            CompletionReply::Structured(value) => serde_json::from_value(value),
            CompletionReply::Text(text) => serde_json::from_str(strip_fence(&text)),
        };
        parsed.map_err(|e| ResearchError::schema(shape, e.to_string()))
    }
}

/// Drop a surrounding ```json fence some models wrap around JSON.
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> ResearchResult<CompletionReply>;
}

/// Wrapper shape for free-text stages on the radkit path
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct ProseReply {
    /// The full reply as markdown
    pub content: String,
}

/// Completion service backed by radkit `LlmFunction`s over the configured provider.
///
/// Temperature is not forwarded: `LlmFunction` uses the provider's default sampling.
pub struct RadkitCompletion {
    config: ModelConfig,
}

impl RadkitCompletion {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    async fn prose(&self, request: &CompletionRequest) -> anyhow::Result<ProseReply> {
        run_llm_function!(&self.config, ProseReply, request.system.as_str(), request.input.clone())
    }

    async fn sections(&self, request: &CompletionRequest) -> anyhow::Result<SectionPlan> {
        run_llm_function!(&self.config, SectionPlan, request.system.as_str(), request.input.clone())
    }

    async fn queries(&self, request: &CompletionRequest) -> anyhow::Result<QueryBatch> {
        run_llm_function!(&self.config, QueryBatch, request.system.as_str(), request.input.clone())
    }

    async fn feedback(&self, request: &CompletionRequest) -> anyhow::Result<FeedbackReply> {
        run_llm_function!(&self.config, FeedbackReply, request.system.as_str(), request.input.clone())
    }

    async fn route(&self, request: &CompletionRequest) -> anyhow::Result<RouteReply> {
        run_llm_function!(&self.config, RouteReply, request.system.as_str(), request.input.clone())
    }

    async fn conclusion(
        &self,
        request: &CompletionRequest,
    ) -> anyhow::Result<ConclusionAndReferences> {
        run_llm_function!(
            &self.config,
            ConclusionAndReferences,
            request.system.as_str(),
            request.input.clone()
        )
    }
}

fn structured<T: Serialize>(value: anyhow::Result<T>) -> anyhow::Result<CompletionReply> {
    Ok(CompletionReply::Structured(serde_json::to_value(value?)?))
}

#[async_trait]
impl CompletionService for RadkitCompletion {
    async fn complete(&self, request: CompletionRequest) -> ResearchResult<CompletionReply> {
        tracing::debug!(stage = %request.stage, subject = ?request.subject, "completion call");

        let reply = match request.shape() {
            Shape::Text => self
                .prose(&request)
                .await
                .map(|p| CompletionReply::Text(p.content)),
            Shape::Sections => structured(self.sections(&request).await),
            Shape::Queries => structured(self.queries(&request).await),
            Shape::Feedback => structured(self.feedback(&request).await),
            Shape::Route => structured(self.route(&request).await),
            Shape::Conclusion => structured(self.conclusion(&request).await),
        };

        reply.map_err(|e| ResearchError::upstream(request.stage, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::records::{Feedback, RouteDecision};
    use serde_json::json;

    #[test]
    fn test_stage_shapes() {
        assert_eq!(Stage::Outline.shape(), Shape::Text);
        assert_eq!(Stage::Decompose.shape(), Shape::Sections);
        assert_eq!(Stage::Reflect.shape(), Shape::Feedback);
        assert_eq!(Stage::Conclude.shape(), Shape::Conclusion);
        assert_eq!(Stage::all().len(), 9);
    }

    #[test]
    fn test_decode_structured() {
        let reply = CompletionReply::Structured(json!({ "step": "do_research" }));
        let route: RouteReply = reply.decode(Shape::Route).unwrap();
        assert_eq!(route.step, RouteDecision::ReadyForResearch);
    }

    #[test]
    fn test_decode_fenced_text() {
        let reply = CompletionReply::Text("```json\n{\"feedback\": true}\n```".into());
        let feedback: FeedbackReply = reply.decode(Shape::Feedback).unwrap();
        assert_eq!(Feedback::from(feedback), Feedback::Sufficient);
    }

    #[test]
    fn test_decode_mismatch_is_schema_violation() {
        let reply = CompletionReply::Structured(json!({ "sections": "not a list" }));
        let err = reply.decode::<SectionPlan>(Shape::Sections).unwrap_err();
        assert!(matches!(
            err,
            ResearchError::SchemaViolation {
                shape: Shape::Sections,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_text_is_upstream_failure() {
        let err = CompletionReply::Text("  ".into())
            .into_text(Stage::Seed)
            .unwrap_err();
        assert!(matches!(
            err,
            ResearchError::UpstreamFailure {
                stage: Stage::Seed,
                ..
            }
        ));
    }
}
