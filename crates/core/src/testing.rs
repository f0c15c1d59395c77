//! Deterministic collaborators for unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ResearchConfig;
use crate::error::{ResearchError, ResearchResult};
use crate::services::completion::{CompletionReply, CompletionRequest, CompletionService, Stage};
use crate::services::search::WebSearch;
use crate::state::records::RawSearchHit;
use crate::workflow::context::RunContext;

type Handler = Box<dyn Fn(&CompletionRequest) -> ResearchResult<CompletionReply> + Send + Sync>;

/// Completion service replaying queued replies per stage.
///
/// The last queued reply of a stage is repeated once the queue drains.
/// A handler registered for a stage takes precedence over its queue.
#[derive(Default)]
pub struct ScriptedCompletion {
    queues: Mutex<HashMap<Stage, VecDeque<ResearchResult<CompletionReply>>>>,
    handlers: HashMap<Stage, Handler>,
    latency: HashMap<String, Duration>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, stage: Stage, reply: ResearchResult<CompletionReply>) -> Self {
        if let Ok(mut queues) = self.queues.lock() {
            queues.entry(stage).or_default().push_back(reply);
        }
        self
    }

    pub fn text(self, stage: Stage, text: &str) -> Self {
        self.reply(stage, Ok(CompletionReply::Text(text.to_string())))
    }

    pub fn json(self, stage: Stage, value: Value) -> Self {
        self.reply(stage, Ok(CompletionReply::Structured(value)))
    }

    pub fn fail(self, stage: Stage, reason: &str) -> Self {
        self.reply(stage, Err(ResearchError::upstream(stage, reason)))
    }

    pub fn handler<F>(mut self, stage: Stage, f: F) -> Self
    where
        F: Fn(&CompletionRequest) -> ResearchResult<CompletionReply> + Send + Sync + 'static,
    {
        self.handlers.insert(stage, Box::new(f));
        self
    }

    /// Delay every call whose subject is `subject`
    pub fn latency(mut self, subject: &str, delay: Duration) -> Self {
        self.latency.insert(subject.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn count(&self, stage: Stage) -> usize {
        self.calls().iter().filter(|c| c.stage == stage).count()
    }

    fn next_reply(&self, request: &CompletionRequest) -> ResearchResult<CompletionReply> {
        if let Some(handler) = self.handlers.get(&request.stage) {
            return handler(request);
        }
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| ResearchError::upstream(request.stage, "script lock poisoned"))?;
        match queues.get_mut(&request.stage) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| Err(ResearchError::upstream(request.stage, "empty script"))),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(ResearchError::upstream(request.stage, "empty script"))),
            None => Err(ResearchError::upstream(request.stage, "no scripted reply")),
        }
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, request: CompletionRequest) -> ResearchResult<CompletionReply> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        if let Some(delay) = request.subject.as_ref().and_then(|s| self.latency.get(s)) {
            tokio::time::sleep(*delay).await;
        }
        self.next_reply(&request)
    }
}

/// Search service returning fixed hits
#[derive(Default)]
pub struct StaticSearch {
    default_hits: Vec<RawSearchHit>,
    failing: HashSet<String>,
    queries: Mutex<Vec<String>>,
}

impl StaticSearch {
    pub fn new(default_hits: Vec<RawSearchHit>) -> Self {
        Self {
            default_hits,
            ..Self::default()
        }
    }

    pub fn failing(mut self, query: &str) -> Self {
        self.failing.insert(query.to_string());
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl WebSearch for StaticSearch {
    async fn search(&self, query: &str, max_results: usize) -> ResearchResult<Vec<RawSearchHit>> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }
        if self.failing.contains(query) {
            return Err(ResearchError::SearchFailure {
                query: query.to_string(),
                reason: "backend unavailable".to_string(),
            });
        }
        Ok(self
            .default_hits
            .iter()
            .take(max_results)
            .cloned()
            .collect())
    }
}

pub fn hit(url: &str, title: &str, content: &str) -> RawSearchHit {
    RawSearchHit {
        url: Some(url.to_string()),
        title: Some(title.to_string()),
        content: Some(content.to_string()),
    }
}

pub fn default_hits() -> Vec<RawSearchHit> {
    vec![
        hit("https://a.example", "Source A", "alpha facts"),
        hit("https://b.example", "Source B", "beta facts"),
    ]
}

pub fn sections_json(names: &[&str]) -> Value {
    let sections: Vec<Value> = names
        .iter()
        .map(|n| json!({ "section_name": n, "sub_sections": [format!("{} overview", n)] }))
        .collect();
    json!({ "sections": sections })
}

/// Config with no inter-section delay and a short call deadline
pub fn fast_config() -> ResearchConfig {
    ResearchConfig {
        inter_section_delay_secs: 0.0,
        call_timeout_secs: 5.0,
        ..ResearchConfig::default()
    }
}

/// Script where the outline is approved and every section is sufficient on round 1.
/// Formatted sections read `## <section name>`.
pub fn approved_script(names: &[&str]) -> ScriptedCompletion {
    ScriptedCompletion::new()
        .text(Stage::Outline, "1. Background\n2. Outlook\n\nApprove or suggest changes.")
        .json(Stage::Route, json!({ "step": "ready_for_research" }))
        .json(Stage::Decompose, sections_json(names))
        .text(Stage::Seed, "seed knowledge")
        .json(
            Stage::Query,
            json!({ "queries": [{ "query": "q1" }, { "query": "q2" }] }),
        )
        .text(Stage::Synthesize, "synthesized notes")
        .json(Stage::Reflect, json!({ "feedback": true }))
        .handler(Stage::Format, |req| {
            Ok(CompletionReply::Text(format!(
                "## {}",
                req.subject.clone().unwrap_or_default()
            )))
        })
        .json(
            Stage::Conclude,
            json!({
                "conclusion": "## Conclusion\n\nAll done.",
                "references": ["[Source A](https://a.example)", "[Source B](https://b.example)"]
            }),
        )
}

pub fn context(
    config: ResearchConfig,
    completion: Arc<ScriptedCompletion>,
    search: Arc<StaticSearch>,
) -> RunContext {
    RunContext::new("test-session", Arc::new(config), completion, search)
}
