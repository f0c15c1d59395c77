//! # Run Context
//!
//! Everything one run needs to talk to the outside world: injected
//! collaborators, prompts, the artifact log, the event channel, and the
//! cancellation token. Every completion and search call goes through
//! [`RunContext::complete`] / [`RunContext::search`], which race the call
//! against the per-call deadline and the run's cancellation token.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ResearchConfig;
use crate::error::{ResearchError, ResearchResult};
use crate::services::completion::{CompletionReply, CompletionRequest, CompletionService, Stage};
use crate::services::search::WebSearch;
use crate::skills::prompts::PromptBook;
use crate::state::io::ArtifactWriter;
use crate::state::records::RawSearchHit;

use super::events::{ResearchEvent, ResearchEventKind};

#[derive(Clone)]
pub struct RunContext {
    pub session_id: String,
    pub config: Arc<ResearchConfig>,
    pub artifacts: ArtifactWriter,
    completion: Arc<dyn CompletionService>,
    search: Arc<dyn WebSearch>,
    prompts: Arc<PromptBook>,
    event_tx: Option<mpsc::Sender<ResearchEvent>>,
    event_log: Arc<Mutex<Vec<ResearchEvent>>>,
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new(
        session_id: impl Into<String>,
        config: Arc<ResearchConfig>,
        completion: Arc<dyn CompletionService>,
        search: Arc<dyn WebSearch>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            config,
            artifacts: ArtifactWriter::disabled(),
            completion,
            search,
            prompts: Arc::new(PromptBook::default()),
            event_tx: None,
            event_log: Arc::new(Mutex::new(Vec::new())),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_prompts(mut self, prompts: Arc<PromptBook>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_artifacts(mut self, artifacts: ArtifactWriter) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_event_channel(mut self, tx: Option<mpsc::Sender<ResearchEvent>>) -> Self {
        self.event_tx = tx;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// A context sharing everything except cancellation, which cascades from
    /// this one but can also be triggered on its own.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    pub fn event(&self, kind: ResearchEventKind) -> ResearchEvent {
        ResearchEvent::new(kind, &self.session_id)
    }

    pub async fn emit(&self, event: ResearchEvent) {
        if let Ok(mut log) = self.event_log.lock() {
            log.push(event.clone());
        }
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Snapshot of events emitted so far
    pub fn events(&self) -> Vec<ResearchEvent> {
        self.event_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    pub async fn complete(
        &self,
        stage: Stage,
        input: String,
        subject: Option<&str>,
    ) -> ResearchResult<CompletionReply> {
        let request = CompletionRequest {
            stage,
            system: self.prompts.get(stage).to_string(),
            input,
            subject: subject.map(str::to_string),
        };
        let completion = Arc::clone(&self.completion);
        self.guarded(stage.as_str(), async move { completion.complete(request).await })
            .await
    }

    /// Search with the configured result depth.
    pub async fn search(&self, query: &str) -> ResearchResult<Vec<RawSearchHit>> {
        let depth = self.config.search_result_depth;
        self.guarded("search", self.search.search(query, depth))
            .await
    }

    /// Timed suspension that ends early, with an error, on cancellation.
    pub async fn pause(&self, duration: Duration) -> ResearchResult<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ResearchError::aborted("cancelled while waiting")),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    async fn guarded<T, F>(&self, label: &str, call: F) -> ResearchResult<T>
    where
        F: Future<Output = ResearchResult<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(ResearchError::aborted(format!("cancelled before {}", label)));
        }
        let deadline = self.config.call_timeout();
        tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(ResearchError::aborted(format!("cancelled during {}", label)))
            }
            outcome = tokio::time::timeout(deadline, call) => match outcome {
                Ok(result) => result,
                Err(_) => Err(ResearchError::aborted(format!(
                    "{} call exceeded {:?}",
                    label, deadline
                ))),
            },
        }
    }
}
