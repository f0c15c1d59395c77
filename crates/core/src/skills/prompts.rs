//! Default prompt templates bundled at compile time.
//!
//! These seed the database on first run. At runtime a [`PromptBook`] is
//! built from the database so prompts can be edited without a rebuild.

use std::collections::HashMap;

use crate::services::completion::Stage;
use crate::state::db::SessionDb;

/// Outline planner - proposes and revises the report outline
pub const OUTLINE: &str = include_str!("defaults/outline.md");

/// Approval gate - decides whether the outline was approved
pub const ROUTE: &str = include_str!("defaults/route.md");

/// Section formatter - turns the approved outline into sections
pub const DECOMPOSE: &str = include_str!("defaults/decompose.md");

pub const SEED: &str = include_str!("defaults/seed.md");

pub const QUERY: &str = include_str!("defaults/query.md");

pub const SYNTHESIZE: &str = include_str!("defaults/synthesize.md");

pub const REFLECT: &str = include_str!("defaults/reflect.md");

/// Final section writer
pub const FORMAT: &str = include_str!("defaults/format.md");

/// Report finisher - conclusion and curated references
pub const CONCLUDE: &str = include_str!("defaults/conclude.md");

pub fn default_for(stage: Stage) -> &'static str {
    match stage {
        Stage::Outline => OUTLINE,
        Stage::Route => ROUTE,
        Stage::Decompose => DECOMPOSE,
        Stage::Seed => SEED,
        Stage::Query => QUERY,
        Stage::Synthesize => SYNTHESIZE,
        Stage::Reflect => REFLECT,
        Stage::Format => FORMAT,
        Stage::Conclude => CONCLUDE,
    }
}

/// All default prompts with their slugs for seeding
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    Stage::all()
        .into_iter()
        .map(|stage| (stage.as_str(), default_for(stage)))
        .collect()
}

/// System prompts for one run, keyed by stage
#[derive(Debug, Clone)]
pub struct PromptBook {
    prompts: HashMap<Stage, String>,
}

impl Default for PromptBook {
    fn default() -> Self {
        Self {
            prompts: Stage::all()
                .into_iter()
                .map(|stage| (stage, default_for(stage).to_string()))
                .collect(),
        }
    }
}

impl PromptBook {
    /// Load edited prompts from the database, falling back to the bundled default per stage.
    pub fn from_db(db: &SessionDb) -> Self {
        let mut book = Self::default();
        for stage in Stage::all() {
            match db.get_prompt(stage.as_str()) {
                Ok(Some(content)) if !content.trim().is_empty() => {
                    book.prompts.insert(stage, content);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to load prompt '{}': {}", stage, e),
            }
        }
        book
    }

    pub fn with_prompt(mut self, stage: Stage, content: impl Into<String>) -> Self {
        self.prompts.insert(stage, content.into());
        self
    }

    pub fn get(&self, stage: Stage) -> &str {
        self.prompts
            .get(&stage)
            .map(String::as_str)
            .unwrap_or_else(|| default_for(stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_prompts_non_empty() {
        for (slug, content) in all_defaults() {
            assert!(!content.is_empty(), "Prompt '{}' should not be empty", slug);
            assert!(content.len() > 50, "Prompt '{}' seems too short", slug);
        }
    }

    #[test]
    fn test_prompt_count() {
        assert_eq!(all_defaults().len(), 9);
    }

    #[test]
    fn test_book_prefers_database_copy() {
        let db = SessionDb::open_in_memory().unwrap();
        db.seed_prompts().unwrap();
        db.set_prompt("reflect", "Only answer true.").unwrap();

        let book = PromptBook::from_db(&db);
        assert_eq!(book.get(Stage::Reflect), "Only answer true.");
        assert_eq!(book.get(Stage::Seed), SEED);
    }
}
