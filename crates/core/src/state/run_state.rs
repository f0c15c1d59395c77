//! # Run State
//!
//! `SectionRunState` is private to one section sub-workflow. `ReportRunState`
//! belongs to the run and is only written by the scheduler (once every
//! section is terminal) and the assembler.

use serde::{Deserialize, Serialize};

use crate::error::ResearchError;
use crate::state::records::{Feedback, Query, SearchResultSet, Section};

#[derive(Debug, Clone)]
pub struct SectionRunState {
    pub index: usize,
    pub section: Section,
    /// Baseline knowledge produced before any search
    pub knowledge: Option<String>,
    /// Queries produced in the current round
    pub generated_queries: Vec<Query>,
    /// Every query searched so far, append-only
    pub searched_queries: Vec<Query>,
    /// Every result set gathered so far, append-only
    pub search_history: Vec<SearchResultSet>,
    /// Latest synthesis; replaced each round
    pub accumulated_content: String,
    pub latest_feedback: Option<Feedback>,
    /// Reflection round, starting at 1
    pub round: u32,
    pub final_content: Option<String>,
}

impl SectionRunState {
    pub fn new(index: usize, section: Section) -> Self {
        Self {
            index,
            section,
            knowledge: None,
            generated_queries: Vec::new(),
            searched_queries: Vec::new(),
            search_history: Vec::new(),
            accumulated_content: String::new(),
            latest_feedback: None,
            round: 1,
            final_content: None,
        }
    }

    pub fn record_queries(&mut self, queries: Vec<Query>) {
        self.searched_queries.extend(queries.iter().cloned());
        self.generated_queries = queries;
    }

    pub fn record_results(&mut self, sets: Vec<SearchResultSet>) {
        self.search_history.extend(sets);
    }

    pub fn replace_content(&mut self, content: String) {
        self.accumulated_content = content;
    }

    /// Consume the state into the value the scheduler merges.
    pub fn into_outcome(self, content: String) -> SectionOutcome {
        SectionOutcome {
            index: self.index,
            name: self.section.name,
            content,
            queries: self.searched_queries,
            search_history: self.search_history,
            rounds: self.round,
        }
    }
}

/// Terminal value of a successful section sub-workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionOutcome {
    pub index: usize,
    pub name: String,
    pub content: String,
    pub queries: Vec<Query>,
    pub search_history: Vec<SearchResultSet>,
    pub rounds: u32,
}

/// Per-section error marker kept under the skip-failed-sections policy
#[derive(Debug, Clone, PartialEq)]
pub struct SectionFailure {
    pub index: usize,
    pub name: String,
    pub error: ResearchError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Render a conversation as model input.
pub fn render_conversation(turns: &[ChatTurn]) -> String {
    turns
        .iter()
        .map(|t| match t.role {
            ChatRole::User => format!("User: {}", t.content),
            ChatRole::Assistant => format!("Assistant: {}", t.content),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Clone, Default)]
pub struct ReportRunState {
    pub conversation: Vec<ChatTurn>,
    pub outline: Option<String>,
    pub sections: Vec<Section>,
    /// Number of sections that reached a terminal value
    pub section_index: usize,
    /// Finished section prose, in section order
    pub finished_sections: Vec<String>,
    pub failed_sections: Vec<SectionFailure>,
    /// Every result set from every section, append-only
    pub search_history: Vec<SearchResultSet>,
    pub final_report: Option<String>,
}

impl ReportRunState {
    pub fn new(conversation: Vec<ChatTurn>) -> Self {
        Self {
            conversation,
            ..Self::default()
        }
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.conversation.push(ChatTurn::assistant(content));
    }

    pub fn last_message(&self) -> Option<&str> {
        self.conversation.last().map(|t| t.content.as_str())
    }

    /// Merge terminal section values, which must already be in section order.
    pub fn absorb(&mut self, results: Vec<Result<SectionOutcome, SectionFailure>>) {
        for result in results {
            match result {
                Ok(outcome) => {
                    self.finished_sections.push(outcome.content);
                    self.search_history.extend(outcome.search_history);
                }
                Err(failure) => self.failed_sections.push(failure),
            }
            self.section_index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::records::SearchResult;

    fn result_set(query: &str) -> SearchResultSet {
        SearchResultSet {
            query: Query::new(query),
            results: vec![SearchResult {
                url: format!("https://{}.example", query),
                title: query.to_string(),
                content: "body".to_string(),
            }],
        }
    }

    #[test]
    fn test_histories_only_grow() {
        let mut state = SectionRunState::new(0, Section::new("Intro", vec!["scope".into()]));
        state.record_queries(vec![Query::new("a"), Query::new("b")]);
        state.record_results(vec![result_set("a"), result_set("b")]);
        state.record_queries(vec![Query::new("a"), Query::new("c")]);
        state.record_results(vec![result_set("a"), result_set("c")]);

        assert_eq!(state.searched_queries.len(), 4);
        assert_eq!(state.generated_queries.len(), 2);
        assert_eq!(state.search_history.len(), 4);
        assert_eq!(state.search_history[3].query.text, "c");
    }

    #[test]
    fn test_absorb_keeps_order_and_history() {
        let mut report = ReportRunState::new(vec![ChatTurn::user("topic")]);
        let outcome = |index: usize, name: &str| SectionOutcome {
            index,
            name: name.to_string(),
            content: format!("## {}", name),
            queries: vec![Query::new(name)],
            search_history: vec![result_set(name)],
            rounds: 1,
        };

        report.absorb(vec![
            Ok(outcome(0, "first")),
            Err(SectionFailure {
                index: 1,
                name: "second".into(),
                error: ResearchError::aborted("x"),
            }),
            Ok(outcome(2, "third")),
        ]);

        assert_eq!(report.finished_sections, vec!["## first", "## third"]);
        assert_eq!(report.failed_sections.len(), 1);
        assert_eq!(report.search_history.len(), 2);
        assert_eq!(report.section_index, 3);
    }

    #[test]
    fn test_render_conversation() {
        let text = render_conversation(&[ChatTurn::user("hi"), ChatTurn::assistant("outline")]);
        assert_eq!(text, "User: hi\n\nAssistant: outline");
    }
}
