//! # Scribe Core
//!
//! Research workflow that turns a topic into a long-form, referenced report:
//! an outline negotiated with the user, per-section research loops with
//! self-critique, and final assembly.
//!
//! ## Architecture
//!
//! - `workflow/` - Outline gate, section sub-workflows, scheduler, assembler
//! - `services/` - Completion and web search collaborators
//! - `state/` - Run state, session database, artifact files
//! - `skills/` - A2A skill, agent definition, prompt templates
//! - `models/` - LLM provider configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use scribe_core::config::ResearchConfig;
//! use scribe_core::workflow::Coordinator;
//!
//! let config = ResearchConfig::load(None).await?;
//! let coordinator = Coordinator::from_config(config)?;
//! let envelope = coordinator.handle_turn("session-1", "Research tidal power").await;
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod skills;
pub mod state;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ResearchError, ResearchResult};
