//! # Scribe Skills
//!
//! A2A-facing surface of the research workflow, plus the prompts and LLM
//! plumbing the workflow's completion service uses.
//!
//! ```text
//! Agent (A2A server)
//!   └── DeepResearchSkill (#[skill] + SkillHandler)
//!         └── Coordinator (workflow)
//! ```

pub mod llm_helpers;
pub mod prompts;

pub mod research_skill;

// Agent Definitions (compose skills into agents)
pub mod agent_definitions;

pub use agent_definitions::deep_research_agent;
pub use prompts::PromptBook;
pub use research_skill::{DeepResearchSkill, ResearchSlot};
