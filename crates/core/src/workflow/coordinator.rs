//! # Research Coordinator
//!
//! Owns the collaborators and drives one report run per external turn:
//! outline and approval gate, decomposition, section scheduling, assembly.
//! Conversations awaiting outline feedback are kept per session so the next
//! turn resumes them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::ResearchConfig;
use crate::error::ResearchResult;
use crate::services::completion::{CompletionService, RadkitCompletion};
use crate::services::search::{build_search, WebSearch};
use crate::skills::prompts::PromptBook;
use crate::state::db::SessionDb;
use crate::state::io::ArtifactWriter;
use crate::state::run_state::{ChatTurn, ReportRunState};

use super::assembler::assemble;
use super::context::RunContext;
use super::events::{ResearchEvent, ResearchEventKind};
use super::outline::{decompose, run_outline_stage};
use super::pipeline::{ReportEvent, ReportPipeline, ReportStage};
use super::response::{ResponseEnvelope, ResponseStatus};
use super::scheduler::run_sections;

const STATUS_AWAITING_INPUT: &str = "awaiting_input";

/// Everything one turn produced
#[derive(Debug)]
pub struct TurnReport {
    pub envelope: ResponseEnvelope,
    pub state: ReportRunState,
    pub events: Vec<ResearchEvent>,
}

pub struct Coordinator {
    config: Arc<ResearchConfig>,
    completion: Arc<dyn CompletionService>,
    search: Arc<dyn WebSearch>,
    prompts: Arc<PromptBook>,
    artifacts: ArtifactWriter,
    event_tx: Option<mpsc::Sender<ResearchEvent>>,
    db: Option<Arc<SessionDb>>,
    /// Conversations waiting on the user, by session
    sessions: Mutex<HashMap<String, Vec<ChatTurn>>>,
    /// Cancellation handles of runs in flight, by session then run id
    active: Mutex<HashMap<String, Vec<(u64, CancellationToken)>>>,
    next_run: AtomicU64,
}

impl Coordinator {
    pub fn new(
        config: ResearchConfig,
        completion: Arc<dyn CompletionService>,
        search: Arc<dyn WebSearch>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            completion,
            search,
            prompts: Arc::new(PromptBook::default()),
            artifacts: ArtifactWriter::disabled(),
            event_tx: None,
            db: None,
            sessions: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            next_run: AtomicU64::new(0),
        }
    }

    /// Coordinator backed by the configured model provider and search backend,
    /// writing artifacts under the configured logs directory.
    pub fn from_config(config: ResearchConfig) -> ResearchResult<Self> {
        let completion = Arc::new(RadkitCompletion::new(config.model.clone()));
        let search = build_search(&config.search)?;
        let artifacts = ArtifactWriter::new(config.logs_dir());
        Ok(Self::new(config, completion, search).with_artifacts(artifacts))
    }

    pub fn with_prompts(mut self, prompts: PromptBook) -> Self {
        self.prompts = Arc::new(prompts);
        self
    }

    pub fn with_artifacts(mut self, artifacts: ArtifactWriter) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_db(mut self, db: Arc<SessionDb>) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_event_channel(mut self, tx: mpsc::Sender<ResearchEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    /// Handle one user message for a session and return the envelope.
    ///
    /// A conversation left waiting on the user is resumed; a completed run
    /// clears the session; a failed turn leaves the stored conversation as
    /// it was before the turn.
    pub async fn handle_turn(&self, session_id: &str, message: &str) -> ResponseEnvelope {
        let mut conversation = self.load_conversation(session_id).await;
        conversation.push(ChatTurn::user(message));

        let report = self.run_conversation(session_id, conversation).await;
        match report.envelope.status {
            ResponseStatus::InputRequired => {
                self.store_conversation(session_id, report.state.conversation)
                    .await
            }
            ResponseStatus::Completed => self.reset(session_id).await,
            ResponseStatus::Error => {}
        }
        report.envelope
    }

    /// Run one turn over a full conversation. Never fails; errors are
    /// reported through the envelope.
    #[tracing::instrument(skip(self, conversation), fields(turns = conversation.len()))]
    pub async fn run_conversation(&self, session_id: &str, conversation: Vec<ChatTurn>) -> TurnReport {
        let run_id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        self.active
            .lock()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push((run_id, cancel.clone()));

        let ctx = RunContext::new(
            session_id,
            Arc::clone(&self.config),
            Arc::clone(&self.completion),
            Arc::clone(&self.search),
        )
        .with_prompts(Arc::clone(&self.prompts))
        .with_artifacts(self.artifacts.clone())
        .with_event_channel(self.event_tx.clone())
        .with_cancel(cancel);

        ctx.emit(ctx.event(ResearchEventKind::RunStarted)).await;

        let mut state = ReportRunState::new(conversation);
        let mut pipeline = ReportPipeline::new();
        let envelope = match drive(&ctx, &mut pipeline, &mut state).await {
            Ok(ReportStage::AwaitingInput) => {
                ctx.emit(ctx.event(ResearchEventKind::InputRequired)).await;
                ResponseEnvelope::from_state(&state)
            }
            Ok(_) => {
                ctx.emit(ctx.event(ResearchEventKind::RunCompleted)).await;
                tracing::info!("report completed");
                ResponseEnvelope::from_state(&state)
            }
            Err(error) => {
                if let Err(e) = pipeline.advance(ReportEvent::Failed) {
                    tracing::debug!("{}", e);
                }
                tracing::warn!("Research run failed: {}", error);
                ctx.emit(
                    ctx.event(ResearchEventKind::RunFailed)
                        .with_data(serde_json::json!({ "error": error.to_string() })),
                )
                .await;
                ResponseEnvelope::from_error(&error)
            }
        };

        self.release(session_id, run_id).await;
        TurnReport {
            envelope,
            state,
            events: ctx.events(),
        }
    }

    /// Cancel every run in flight for a session. Returns false when none is.
    pub async fn cancel(&self, session_id: &str) -> bool {
        match self.active.lock().await.get(session_id) {
            Some(runs) if !runs.is_empty() => {
                for (_, token) in runs {
                    token.cancel();
                }
                true
            }
            _ => false,
        }
    }

    /// Drop the cancellation handle of one finished run.
    async fn release(&self, session_id: &str, run_id: u64) {
        let mut active = self.active.lock().await;
        if let Some(runs) = active.get_mut(session_id) {
            runs.retain(|(id, _)| *id != run_id);
            if runs.is_empty() {
                active.remove(session_id);
            }
        }
    }

    /// Forget a session's stored conversation.
    pub async fn reset(&self, session_id: &str) {
        self.sessions.lock().await.remove(session_id);
        if let Some(db) = &self.db {
            if let Err(e) = db.delete_session(session_id) {
                tracing::warn!("Failed to delete session {}: {}", session_id, e);
            }
        }
    }

    async fn load_conversation(&self, session_id: &str) -> Vec<ChatTurn> {
        if let Some(conversation) = self.sessions.lock().await.get(session_id) {
            return conversation.clone();
        }
        let Some(db) = &self.db else {
            return Vec::new();
        };
        match db.load_session(session_id) {
            Ok(Some(record)) => record.conversation,
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!("Failed to load session {}: {}", session_id, e);
                Vec::new()
            }
        }
    }

    async fn store_conversation(&self, session_id: &str, conversation: Vec<ChatTurn>) {
        if let Some(db) = &self.db {
            if let Err(e) = db.save_session(session_id, &conversation, STATUS_AWAITING_INPUT) {
                tracing::warn!("Failed to save session {}: {}", session_id, e);
            }
        }
        self.sessions
            .lock()
            .await
            .insert(session_id.to_string(), conversation);
    }
}

/// Advance the report pipeline until the turn is over.
async fn drive(
    ctx: &RunContext,
    pipeline: &mut ReportPipeline,
    state: &mut ReportRunState,
) -> ResearchResult<ReportStage> {
    while !pipeline.is_complete() {
        match pipeline.stage {
            ReportStage::Outline => {
                let decision = run_outline_stage(ctx, state).await?;
                pipeline.advance(ReportEvent::Routed(decision))?;
            }
            ReportStage::Decompose => {
                state.sections = decompose(ctx, state).await?;
                pipeline.advance(ReportEvent::Decomposed)?;
            }
            ReportStage::Research => {
                let results = run_sections(ctx, &state.sections).await?;
                state.absorb(results);
                pipeline.advance(ReportEvent::SectionsFinished)?;
            }
            ReportStage::Assemble => {
                state.final_report = Some(assemble(ctx, state).await?);
                pipeline.advance(ReportEvent::Assembled)?;
            }
            ReportStage::AwaitingInput | ReportStage::Completed | ReportStage::Failed => break,
        }
    }
    Ok(pipeline.stage)
}
