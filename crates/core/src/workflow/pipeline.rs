//! # Pipeline Stages
//!
//! Explicit state machines for a report run and for one section's
//! reflection loop. Workflow code reports what happened; the machines decide
//! where to go next.

use serde::{Deserialize, Serialize};

use crate::error::{ResearchError, ResearchResult};
use crate::state::records::RouteDecision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStage {
    /// Proposing or revising the outline
    Outline,
    /// Turn ended; waiting for the user's reply
    AwaitingInput,
    Decompose,
    /// Sections running through their sub-workflows
    Research,
    Assemble,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportEvent {
    Routed(RouteDecision),
    Decomposed,
    SectionsFinished,
    Assembled,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ReportPipeline {
    pub stage: ReportStage,
}

impl Default for ReportPipeline {
    fn default() -> Self {
        Self {
            stage: ReportStage::Outline,
        }
    }
}

impl ReportPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, event: ReportEvent) -> ResearchResult<ReportStage> {
        use ReportStage::*;

        let next = match (self.stage, event) {
            (Outline, ReportEvent::Routed(RouteDecision::NeedsMoreInput)) => AwaitingInput,
            (Outline, ReportEvent::Routed(RouteDecision::ReadyForResearch)) => Decompose,
            (Decompose, ReportEvent::Decomposed) => Research,
            (Research, ReportEvent::SectionsFinished) => Assemble,
            (Assemble, ReportEvent::Assembled) => Completed,
            (stage, ReportEvent::Failed) if !self.is_complete() => {
                tracing::debug!("report pipeline failed during {:?}", stage);
                Failed
            }
            (stage, event) => return Err(invalid(stage, event)),
        };
        self.stage = next;
        Ok(next)
    }

    /// Whether the turn is over (awaiting input counts as over)
    pub fn is_complete(&self) -> bool {
        matches!(
            self.stage,
            ReportStage::AwaitingInput | ReportStage::Completed | ReportStage::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStage {
    Seed,
    Query,
    Search,
    Synthesize,
    Reflect,
    Format,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionEvent {
    Seeded,
    QueriesGenerated,
    SearchCompleted,
    Synthesized,
    Reflected { sufficient: bool },
    Formatted,
}

/// Reflection loop for one section.
///
/// `round` starts at 1, only ever grows, and never exceeds `max_rounds`.
#[derive(Debug, Clone)]
pub struct SectionPipeline {
    pub stage: SectionStage,
    pub round: u32,
    pub max_rounds: u32,
}

impl SectionPipeline {
    pub fn new(max_rounds: u32) -> Self {
        Self {
            stage: SectionStage::Seed,
            round: 1,
            max_rounds: max_rounds.max(1),
        }
    }

    pub fn advance(&mut self, event: SectionEvent) -> ResearchResult<SectionStage> {
        use SectionStage::*;

        let next = match (self.stage, event) {
            (Seed, SectionEvent::Seeded) => Query,
            (Query, SectionEvent::QueriesGenerated) => Search,
            (Search, SectionEvent::SearchCompleted) => Synthesize,
            (Synthesize, SectionEvent::Synthesized) => Reflect,
            (Reflect, SectionEvent::Reflected { sufficient }) => {
                if sufficient || self.round >= self.max_rounds {
                    Format
                } else {
                    self.round += 1;
                    Query
                }
            }
            (Format, SectionEvent::Formatted) => Done,
            (stage, event) => return Err(invalid(stage, event)),
        };
        self.stage = next;
        Ok(next)
    }
}

fn invalid(stage: impl std::fmt::Debug, event: impl std::fmt::Debug) -> ResearchError {
    ResearchError::InvalidTransition {
        from: format!("{:?}", stage),
        event: format!("{:?}", event),
    }
}
