//! # Deep Research Skill
//!
//! A2A-native skill that turns a topic into a multi-section report.
//!
//! ## Flow
//! 1. `on_request` proposes an outline and usually asks for approval
//! 2. `on_input_received` feeds the reply back into the conversation
//! 3. Once the outline is approved the report is researched and returned
//!
//! The conversation lives in task state between turns.

use std::sync::Arc;

use async_trait::async_trait;
use radkit::agent::{Artifact, OnInputResult, OnRequestResult, SkillHandler, SkillSlot};
use radkit::errors::{AgentError, AgentResult};
use radkit::macros::skill;
use radkit::models::Content;
use radkit::runtime::context::{ProgressSender, State};
use radkit::runtime::AgentRuntime;
use serde::{Deserialize, Serialize};

use crate::state::run_state::ChatTurn;
use crate::workflow::{Coordinator, ResponseStatus, TurnReport};

/// Slots for the outline approval loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResearchSlot {
    /// Waiting for the user to approve or revise the outline
    AwaitingOutlineFeedback,
}

/// Summary attached to a finished report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportArtifact {
    pub session_id: String,
    pub sections: Vec<String>,
    pub failed_sections: Vec<String>,
    pub sources: usize,
    pub report: String,
}

enum TurnOutcome {
    /// Outline to show, and the conversation that produced it
    AskUser(String, Vec<ChatTurn>),
    Finished(String, Artifact),
    Failed(String),
}

#[skill(
    id = "deep_research",
    name = "Deep Research Analysis",
    description = "Plans an outline with the user, researches every section with web search and self-critique, and writes a referenced long-form report.",
    tags = ["research", "analysis", "academic", "literature review"],
    examples = ["Write a report on solid-state batteries", "Research the history of tidal power"],
    input_modes = ["text/plain"],
    output_modes = ["text/markdown", "application/json"]
)]
pub struct DeepResearchSkill {
    coordinator: Arc<Coordinator>,
}

impl DeepResearchSkill {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    async fn run_turn(
        &self,
        session_id: &str,
        conversation: Vec<ChatTurn>,
        progress: &ProgressSender,
    ) -> AgentResult<TurnOutcome> {
        progress.send_update("Working on the report outline...").await?;
        let report = self
            .coordinator
            .run_conversation(session_id, conversation)
            .await;
        outcome(session_id, report)
    }
}

#[async_trait]
impl SkillHandler for DeepResearchSkill {
    async fn on_request(
        &self,
        state: &mut State,
        progress: &ProgressSender,
        _runtime: &dyn AgentRuntime,
        content: Content,
    ) -> AgentResult<OnRequestResult> {
        let topic = content.first_text().unwrap_or_default();
        let session_id = uuid::Uuid::new_v4().to_string();
        let conversation = vec![ChatTurn::user(topic)];

        match self.run_turn(&session_id, conversation, progress).await? {
            TurnOutcome::AskUser(message, conversation) => {
                save_conversation(state, &session_id, &conversation)?;
                Ok(OnRequestResult::InputRequired {
                    message: Content::from_text(&message),
                    slot: SkillSlot::new(ResearchSlot::AwaitingOutlineFeedback),
                })
            }
            TurnOutcome::Finished(report, artifact) => Ok(OnRequestResult::Completed {
                message: Some(Content::from_text(&report)),
                artifacts: vec![artifact],
            }),
            TurnOutcome::Failed(error) => Ok(OnRequestResult::Failed {
                error: Content::from_text(&error),
            }),
        }
    }

    async fn on_input_received(
        &self,
        state: &mut State,
        progress: &ProgressSender,
        _runtime: &dyn AgentRuntime,
        content: Content,
    ) -> AgentResult<OnInputResult> {
        let slot: ResearchSlot = state
            .slot()?
            .ok_or_else(|| AgentError::SkillSlot("No slot found".to_string()))?;

        match slot {
            ResearchSlot::AwaitingOutlineFeedback => {
                let mut conversation: Vec<ChatTurn> =
                    state.task().load("conversation")?.ok_or_else(|| {
                        AgentError::ContextError("No conversation found".to_string())
                    })?;
                let session_id: String = state
                    .task()
                    .load("session_id")?
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

                conversation.push(ChatTurn::user(content.first_text().unwrap_or_default()));

                match self.run_turn(&session_id, conversation, progress).await? {
                    TurnOutcome::AskUser(message, conversation) => {
                        save_conversation(state, &session_id, &conversation)?;
                        Ok(OnInputResult::InputRequired {
                            message: Content::from_text(&message),
                            slot: SkillSlot::new(ResearchSlot::AwaitingOutlineFeedback),
                        })
                    }
                    TurnOutcome::Finished(report, artifact) => Ok(OnInputResult::Completed {
                        message: Some(Content::from_text(&report)),
                        artifacts: vec![artifact],
                    }),
                    TurnOutcome::Failed(error) => Ok(OnInputResult::Failed {
                        error: Content::from_text(&error),
                    }),
                }
            }
        }
    }
}

fn save_conversation(
    state: &mut State,
    session_id: &str,
    conversation: &[ChatTurn],
) -> AgentResult<()> {
    state.task().save("conversation", &conversation)?;
    state.task().save("session_id", &session_id.to_string())?;
    Ok(())
}

fn outcome(session_id: &str, report: TurnReport) -> AgentResult<TurnOutcome> {
    let TurnReport {
        envelope, state, ..
    } = report;

    Ok(match envelope.status {
        ResponseStatus::InputRequired => TurnOutcome::AskUser(envelope.message, state.conversation),
        ResponseStatus::Error => TurnOutcome::Failed(envelope.message),
        ResponseStatus::Completed => {
            let summary = ReportArtifact {
                session_id: session_id.to_string(),
                sections: state.sections.iter().map(|s| s.name.clone()).collect(),
                failed_sections: state.failed_sections.iter().map(|f| f.name.clone()).collect(),
                sources: state.search_history.iter().map(|s| s.results.len()).sum(),
                report: envelope.message.clone(),
            };
            let artifact =
                Artifact::from_json("report.json", &summary).map_err(|e| AgentError::Internal {
                    component: "research_skill".to_string(),
                    reason: format!("Failed to create artifact: {}", e),
                })?;
            TurnOutcome::Finished(envelope.message, artifact)
        }
    })
}
