//! # Research Configuration
//!
//! Run-wide knobs for the research workflow. Values are layered: built-in
//! defaults, then a JSON file (`.scribe/config.json`), then `SCRIBE_*`
//! environment variables. The server applies CLI flags on top.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ResearchError, ResearchResult};
use crate::models::ModelConfig;
use crate::state::io;

/// How sections are driven through their sub-workflows
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicy {
    /// One section at a time, pausing between sections
    #[default]
    Sequential,
    /// All sections at once, merged back in index order
    Concurrent,
}

/// What happens to the run when one section fails
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    AbortRun,
    /// Record the failure and assemble the report from the sections that succeeded
    SkipFailedSections,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchBackend {
    #[default]
    Tavily,
    Searxng,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub backend: SearchBackend,
    /// Custom SearXNG instance URL (overrides auto-discovery)
    pub searxng_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResearchConfig {
    /// Upper bound on queries generated per reflection round
    pub max_queries_per_round: usize,
    /// Results requested from the search service per query
    pub search_result_depth: usize,
    /// Maximum reflection rounds per section (at least 1)
    pub max_reflection_rounds: u32,
    /// Pause before each section after the first, sequential policy only
    pub inter_section_delay_secs: f64,
    /// Sampling temperature; validated and persisted but not forwarded to providers
    pub temperature: f32,
    pub scheduling: SchedulingPolicy,
    /// Concurrency cap for the concurrent policy
    pub max_concurrent_sections: usize,
    pub failure_policy: FailurePolicy,
    /// Deadline applied to every completion and search call
    pub call_timeout_secs: f64,
    pub model: ModelConfig,
    pub search: SearchConfig,
    /// Where intermediate artifacts are written; `None` uses `.scribe/logs`
    pub logs_dir: Option<PathBuf>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_queries_per_round: 3,
            search_result_depth: 2,
            max_reflection_rounds: 2,
            inter_section_delay_secs: 3.0,
            temperature: 0.5,
            scheduling: SchedulingPolicy::Sequential,
            max_concurrent_sections: 3,
            failure_policy: FailurePolicy::AbortRun,
            call_timeout_secs: 120.0,
            model: ModelConfig::default(),
            search: SearchConfig::default(),
            logs_dir: None,
        }
    }
}

impl ResearchConfig {
    /// Default location of the persisted config file
    pub fn default_path() -> PathBuf {
        io::get_runtime_path().join("config.json")
    }

    /// Load from `path` (or the default location), then apply environment overrides.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        let mut config = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read config: {:?}", path))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write config: {:?}", path))
    }

    pub fn apply_env_overrides(&mut self) -> ResearchResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `SCRIBE_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ResearchResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SCRIBE_MAX_QUERIES_PER_ROUND") {
            self.max_queries_per_round = parse_var("SCRIBE_MAX_QUERIES_PER_ROUND", &v)?;
        }
        if let Some(v) = lookup("SCRIBE_SEARCH_RESULT_DEPTH") {
            self.search_result_depth = parse_var("SCRIBE_SEARCH_RESULT_DEPTH", &v)?;
        }
        if let Some(v) = lookup("SCRIBE_MAX_REFLECTION_ROUNDS") {
            self.max_reflection_rounds = parse_var("SCRIBE_MAX_REFLECTION_ROUNDS", &v)?;
        }
        if let Some(v) = lookup("SCRIBE_INTER_SECTION_DELAY_SECONDS") {
            self.inter_section_delay_secs = parse_var("SCRIBE_INTER_SECTION_DELAY_SECONDS", &v)?;
        }
        if let Some(v) = lookup("SCRIBE_TEMPERATURE") {
            self.temperature = parse_var("SCRIBE_TEMPERATURE", &v)?;
        }
        if let Some(v) = lookup("SCRIBE_SCHEDULING") {
            self.scheduling = match v.trim().to_lowercase().as_str() {
                "sequential" => SchedulingPolicy::Sequential,
                "concurrent" => SchedulingPolicy::Concurrent,
                other => {
                    return Err(ResearchError::invalid_config(format!(
                        "SCRIBE_SCHEDULING must be 'sequential' or 'concurrent', got '{}'",
                        other
                    )))
                }
            };
        }
        if let Some(v) = lookup("SCRIBE_LLM_PROVIDER") {
            self.model.provider = v.parse()?;
        }
        if let Some(v) = lookup("SCRIBE_LLM_MODEL") {
            self.model.model = v;
        }
        if let Some(v) = lookup("SCRIBE_SEARCH_BACKEND") {
            self.search.backend = match v.trim().to_lowercase().as_str() {
                "tavily" => SearchBackend::Tavily,
                "searxng" => SearchBackend::Searxng,
                other => {
                    return Err(ResearchError::invalid_config(format!(
                        "unknown search backend '{}'",
                        other
                    )))
                }
            };
        }
        if let Some(v) = lookup("SEARXNG_URL") {
            self.search.searxng_url.get_or_insert(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> ResearchResult<()> {
        if self.max_reflection_rounds == 0 {
            return Err(ResearchError::invalid_config(
                "max_reflection_rounds must be at least 1",
            ));
        }
        if self.max_queries_per_round == 0 {
            return Err(ResearchError::invalid_config(
                "max_queries_per_round must be at least 1",
            ));
        }
        if self.search_result_depth == 0 {
            return Err(ResearchError::invalid_config(
                "search_result_depth must be at least 1",
            ));
        }
        if self.max_concurrent_sections == 0 {
            return Err(ResearchError::invalid_config(
                "max_concurrent_sections must be at least 1",
            ));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(ResearchError::invalid_config(
                "temperature must be a non-negative number",
            ));
        }
        if !self.inter_section_delay_secs.is_finite() || self.inter_section_delay_secs < 0.0 {
            return Err(ResearchError::invalid_config(
                "inter_section_delay_secs must be a non-negative number",
            ));
        }
        if !self.call_timeout_secs.is_finite() || self.call_timeout_secs <= 0.0 {
            return Err(ResearchError::invalid_config(
                "call_timeout_secs must be positive",
            ));
        }
        if self.model.base_url.is_some() && !self.model.provider.supports_base_url() {
            tracing::warn!(
                "base_url is ignored for provider {}",
                self.model.provider.display_name()
            );
        }
        Ok(())
    }

    pub fn inter_section_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.inter_section_delay_secs).unwrap_or(Duration::ZERO)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.call_timeout_secs).unwrap_or(Duration::from_secs(120))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.logs_dir
            .clone()
            .unwrap_or_else(|| io::get_runtime_path().join("logs"))
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> ResearchResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ResearchError::invalid_config(format!("{} has invalid value '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LlmProvider;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ResearchConfig::default();
        assert_eq!(config.max_queries_per_round, 3);
        assert_eq!(config.search_result_depth, 2);
        assert_eq!(config.max_reflection_rounds, 2);
        assert_eq!(config.inter_section_delay(), Duration::from_secs(3));
        assert_eq!(config.scheduling, SchedulingPolicy::Sequential);
        assert_eq!(config.failure_policy, FailurePolicy::AbortRun);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ResearchConfig =
            serde_json::from_str(r#"{"scheduling":"concurrent","max_reflection_rounds":4}"#)
                .unwrap();
        assert_eq!(config.scheduling, SchedulingPolicy::Concurrent);
        assert_eq!(config.max_reflection_rounds, 4);
        assert_eq!(config.max_queries_per_round, 3);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ResearchConfig::default();
        config
            .apply_overrides(lookup(&[
                ("SCRIBE_MAX_QUERIES_PER_ROUND", "5"),
                ("SCRIBE_INTER_SECTION_DELAY_SECONDS", "0.5"),
                ("SCRIBE_SCHEDULING", "Concurrent"),
                ("SCRIBE_LLM_PROVIDER", "gemini"),
                ("SCRIBE_LLM_MODEL", "gemini-2.0-flash"),
            ]))
            .unwrap();

        assert_eq!(config.max_queries_per_round, 5);
        assert_eq!(config.inter_section_delay(), Duration::from_millis(500));
        assert_eq!(config.scheduling, SchedulingPolicy::Concurrent);
        assert_eq!(config.model.provider, LlmProvider::Gemini);
        assert_eq!(config.model.model, "gemini-2.0-flash");
    }

    #[test]
    fn test_bad_env_value_is_rejected() {
        let mut config = ResearchConfig::default();
        let err = config
            .apply_overrides(lookup(&[("SCRIBE_SEARCH_RESULT_DEPTH", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ResearchError::InvalidConfig { .. }));
    }

    #[test]
    fn test_zero_reflection_rounds_invalid() {
        let config = ResearchConfig {
            max_reflection_rounds: 0,
            ..ResearchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_temperature_must_be_finite_and_non_negative() {
        for temperature in [f32::NAN, f32::INFINITY, -0.1] {
            let config = ResearchConfig {
                temperature,
                ..ResearchConfig::default()
            };
            assert!(config.validate().is_err());
        }
        let config = ResearchConfig {
            temperature: 0.0,
            ..ResearchConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = ResearchConfig {
            max_reflection_rounds: 3,
            scheduling: SchedulingPolicy::Concurrent,
            ..ResearchConfig::default()
        };
        config.save(Some(&path)).await.unwrap();

        let loaded = ResearchConfig::load(Some(&path)).await.unwrap();
        assert_eq!(loaded.max_reflection_rounds, 3);
        assert_eq!(loaded.scheduling, SchedulingPolicy::Concurrent);
    }
}
