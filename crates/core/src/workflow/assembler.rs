//! # Report Assembler
//!
//! Writes the conclusion and curates references from every source seen
//! during the run, then concatenates finished sections, conclusion and the
//! reference block into the final report.

use std::collections::HashSet;

use crate::error::{ResearchError, ResearchResult};
use crate::services::completion::{Shape, Stage};
use crate::state::records::{ConclusionAndReferences, SearchResultSet};
use crate::state::run_state::ReportRunState;

use super::context::RunContext;
use super::events::ResearchEventKind;

const MIN_REFERENCES: usize = 5;
const MAX_REFERENCES: usize = 6;

#[tracing::instrument(skip_all, fields(session = %ctx.session_id))]
pub async fn assemble(ctx: &RunContext, state: &ReportRunState) -> ResearchResult<String> {
    if state.finished_sections.is_empty() {
        return Err(ResearchError::NoSectionsCompleted {
            failed: state.failed_sections.len(),
        });
    }
    if !state.failed_sections.is_empty() {
        tracing::warn!(
            "assembling report without {} failed sections",
            state.failed_sections.len()
        );
    }

    let sources = unique_sources(&state.search_history);
    let input = format!(
        "Report sections:\n\n{}\n\nSources:\n{}",
        state.finished_sections.join("\n\n"),
        sources
            .iter()
            .map(|(url, title)| format!("- {} ({})", title, url))
            .collect::<Vec<_>>()
            .join("\n")
    );

    let mut closing: ConclusionAndReferences = ctx
        .complete(Stage::Conclude, input, None)
        .await?
        .decode(Shape::Conclusion)?;

    if closing.references.len() > MAX_REFERENCES {
        closing.references.truncate(MAX_REFERENCES);
    } else if closing.references.len() < MIN_REFERENCES {
        tracing::warn!(
            "only {} references returned, expected at least {}",
            closing.references.len(),
            MIN_REFERENCES
        );
    }

    let report = render_report(&state.finished_sections, &closing);
    ctx.artifacts.write_report(&report).await;
    ctx.emit(
        ctx.event(ResearchEventKind::ReportAssembled).with_data(serde_json::json!({
            "sections": state.finished_sections.len(),
            "references": closing.references.len(),
        })),
    )
    .await;
    Ok(report)
}

/// Sections in order, then the conclusion, then a `# References` list.
pub fn render_report(sections: &[String], closing: &ConclusionAndReferences) -> String {
    let references = closing
        .references
        .iter()
        .map(|r| format!("- {}", r))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "{}\n\n{}\n\n# References\n\n{}",
        sections.join("\n\n"),
        closing.conclusion,
        references
    )
}

/// (url, title) pairs, first occurrence of each url wins
fn unique_sources(history: &[SearchResultSet]) -> Vec<(&str, &str)> {
    let mut seen = HashSet::new();
    history
        .iter()
        .flat_map(|set| &set.results)
        .filter(|r| seen.insert(r.url.as_str()))
        .map(|r| (r.url.as_str(), r.title.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::records::{Query, SearchResult};
    use crate::state::run_state::SectionFailure;
    use crate::testing::{self, ScriptedCompletion, StaticSearch};
    use serde_json::json;
    use std::sync::Arc;

    fn result(url: &str, title: &str) -> SearchResult {
        SearchResult {
            url: url.into(),
            title: title.into(),
            content: "body".into(),
        }
    }

    fn finished_state() -> ReportRunState {
        ReportRunState {
            finished_sections: vec!["## One".into(), "## Two".into()],
            search_history: vec![
                SearchResultSet {
                    query: Query::new("a"),
                    results: vec![result("https://a.example", "A"), result("https://b.example", "B")],
                },
                SearchResultSet {
                    query: Query::new("b"),
                    results: vec![result("https://a.example", "A again")],
                },
            ],
            ..ReportRunState::default()
        }
    }

    #[test]
    fn test_render_report_layout() {
        let closing = ConclusionAndReferences {
            conclusion: "## Conclusion\n\nDone.".into(),
            references: vec!["[A](https://a.example)".into(), "[B](https://b.example)".into()],
        };
        let report = render_report(&["## One".into(), "## Two".into()], &closing);
        assert_eq!(
            report,
            "## One\n\n## Two\n\n## Conclusion\n\nDone.\n\n# References\n\n- [A](https://a.example)\n- [B](https://b.example)"
        );
    }

    #[test]
    fn test_sources_deduplicated_by_url() {
        let state = finished_state();
        let sources = unique_sources(&state.search_history);
        assert_eq!(
            sources,
            vec![("https://a.example", "A"), ("https://b.example", "B")]
        );
    }

    #[tokio::test]
    async fn test_assemble_truncates_references() {
        let refs: Vec<String> = (1..=8).map(|i| format!("ref {}", i)).collect();
        let completion = Arc::new(ScriptedCompletion::new().json(
            Stage::Conclude,
            json!({ "conclusion": "## Conclusion", "references": refs }),
        ));
        let ctx = testing::context(
            testing::fast_config(),
            completion.clone(),
            Arc::new(StaticSearch::default()),
        );

        let report = assemble(&ctx, &finished_state()).await.unwrap();
        assert!(report.starts_with("## One\n\n## Two\n\n## Conclusion"));
        assert!(report.contains("- ref 6"));
        assert!(!report.contains("- ref 7"));

        let input = &completion.calls()[0].input;
        assert!(input.contains("- A (https://a.example)"));
        assert!(!input.contains("A again"));
    }

    #[tokio::test]
    async fn test_assemble_needs_a_finished_section() {
        let ctx = testing::context(
            testing::fast_config(),
            Arc::new(ScriptedCompletion::new()),
            Arc::new(StaticSearch::default()),
        );
        let state = ReportRunState {
            failed_sections: vec![SectionFailure {
                index: 0,
                name: "A".into(),
                error: ResearchError::aborted("x"),
            }],
            ..ReportRunState::default()
        };
        let err = assemble(&ctx, &state).await.unwrap_err();
        assert_eq!(err, ResearchError::NoSectionsCompleted { failed: 1 });
    }

    #[tokio::test]
    async fn test_malformed_conclusion_is_schema_violation() {
        let completion = Arc::new(
            ScriptedCompletion::new().json(Stage::Conclude, json!({ "conclusion": "only" })),
        );
        let ctx = testing::context(
            testing::fast_config(),
            completion,
            Arc::new(StaticSearch::default()),
        );
        let err = assemble(&ctx, &finished_state()).await.unwrap_err();
        assert!(matches!(
            err,
            ResearchError::SchemaViolation {
                shape: Shape::Conclusion,
                ..
            }
        ));
    }
}
