//! # Scribe Models
//!
//! LLM provider selection shared by the completion service, the radkit
//! skill, and the server's provider listing.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ResearchError;

/// Supported LLM providers
///
/// Each provider loads its API key from the environment through radkit's
/// `from_env` constructors:
/// - Anthropic (Claude) - `ANTHROPIC_API_KEY`
/// - OpenAI (GPT) - `OPENAI_API_KEY`
/// - Gemini (Google) - `GEMINI_API_KEY`
/// - OpenRouter (Gateway) - `OPENROUTER_API_KEY`
/// - Grok (xAI) - `XAI_API_KEY`
/// - DeepSeek - `DEEPSEEK_API_KEY`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
    Gemini,
    OpenRouter,
    Grok,
    DeepSeek,
}

impl LlmProvider {
    /// Get all available providers
    pub fn all() -> Vec<LlmProvider> {
        vec![
            LlmProvider::Anthropic,
            LlmProvider::OpenAI,
            LlmProvider::Gemini,
            LlmProvider::OpenRouter,
            LlmProvider::Grok,
            LlmProvider::DeepSeek,
        ]
    }

    /// Display name for UI
    pub fn display_name(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "Anthropic",
            LlmProvider::OpenAI => "OpenAI",
            LlmProvider::Gemini => "Gemini",
            LlmProvider::OpenRouter => "OpenRouter",
            LlmProvider::Grok => "Grok",
            LlmProvider::DeepSeek => "DeepSeek",
        }
    }

    /// Environment variable holding this provider's API key
    pub fn api_key_env(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
            LlmProvider::OpenAI => "OPENAI_API_KEY",
            LlmProvider::Gemini => "GEMINI_API_KEY",
            LlmProvider::OpenRouter => "OPENROUTER_API_KEY",
            LlmProvider::Grok => "XAI_API_KEY",
            LlmProvider::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }

    /// Whether this provider supports custom base URL
    pub fn supports_base_url(&self) -> bool {
        matches!(self, LlmProvider::OpenAI)
    }
}

impl FromStr for LlmProvider {
    type Err = ResearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" => Ok(LlmProvider::Anthropic),
            "openai" => Ok(LlmProvider::OpenAI),
            "gemini" => Ok(LlmProvider::Gemini),
            "openrouter" => Ok(LlmProvider::OpenRouter),
            "grok" => Ok(LlmProvider::Grok),
            "deepseek" => Ok(LlmProvider::DeepSeek),
            other => Err(ResearchError::invalid_config(format!(
                "unknown LLM provider '{}'",
                other
            ))),
        }
    }
}

/// Configuration for LLM model selection
///
/// ## Example
/// ```rust,ignore
/// use scribe_core::models::{ModelConfig, LlmProvider};
///
/// let config = ModelConfig::with_provider(LlmProvider::Gemini, "gemini-2.0-flash");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    /// LLM provider to use
    #[serde(default)]
    pub provider: LlmProvider,
    /// Model name (e.g., "claude-sonnet-4-20250514", "gpt-4o")
    pub model: String,
    /// Optional base URL override for OpenAI-compatible APIs
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Anthropic,
            model: "claude-sonnet-4-20250514".to_string(),
            base_url: None,
        }
    }
}

impl ModelConfig {
    /// Create a new model config with default provider (Anthropic)
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            provider: LlmProvider::Anthropic,
            model: model.into(),
            base_url: None,
        }
    }

    /// Create config for a specific provider
    pub fn with_provider(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            base_url: None,
        }
    }

    /// Set base URL (for OpenAI-compatible endpoints)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}
