//! # A2A Agent Definitions
//!
//! Composes the research agent from its skill using radkit's Agent::builder().

use std::sync::Arc;

use radkit::agent::{Agent, AgentDefinition};

use crate::skills::DeepResearchSkill;
use crate::workflow::Coordinator;

/// The Deep Research Agent
///
/// Negotiates an outline with the user, then researches and writes the report.
pub fn deep_research_agent(coordinator: Arc<Coordinator>) -> AgentDefinition {
    Agent::builder()
        .with_name("Deep Research Agent")
        .with_description(
            "Plans a report outline with the user, researches each section through \
             iterative search and self-critique, and assembles a referenced report.",
        )
        .with_skill(DeepResearchSkill::new(coordinator))
        .build()
}
