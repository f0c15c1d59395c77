//! # Outline and Decomposition
//!
//! The outline stage proposes (or revises) an outline, records it as one
//! assistant turn, then asks for a route decision. Once approved, the
//! outline is decomposed into an ordered section plan.

use crate::error::{ResearchError, ResearchResult};
use crate::services::completion::{Shape, Stage};
use crate::state::records::{RouteDecision, RouteReply, Section, SectionPlan};
use crate::state::run_state::{render_conversation, ReportRunState};

use super::context::RunContext;
use super::events::ResearchEventKind;

/// Propose an outline and decide whether research can start.
///
/// Appends exactly one assistant turn to the conversation.
#[tracing::instrument(skip_all, fields(session = %ctx.session_id))]
pub async fn run_outline_stage(
    ctx: &RunContext,
    state: &mut ReportRunState,
) -> ResearchResult<RouteDecision> {
    let outline = ctx
        .complete(Stage::Outline, render_conversation(&state.conversation), None)
        .await?
        .into_text(Stage::Outline)?;
    state.push_assistant(outline.clone());
    state.outline = Some(outline);
    ctx.emit(ctx.event(ResearchEventKind::OutlineProposed)).await;

    let reply: RouteReply = ctx
        .complete(Stage::Route, render_conversation(&state.conversation), None)
        .await?
        .decode(Shape::Route)?;
    tracing::info!("route decision: {:?}", reply.step);
    Ok(reply.step)
}

/// Turn the approved outline into sections.
#[tracing::instrument(skip_all, fields(session = %ctx.session_id))]
pub async fn decompose(ctx: &RunContext, state: &ReportRunState) -> ResearchResult<Vec<Section>> {
    let outline = state.outline.as_deref().unwrap_or_default();
    let input = format!(
        "Approved outline:\n{}\n\nConversation:\n{}",
        outline,
        render_conversation(&state.conversation)
    );
    let plan: SectionPlan = ctx
        .complete(Stage::Decompose, input, None)
        .await?
        .decode(Shape::Sections)?;

    validate_plan(&plan)?;
    ctx.artifacts.write_sections(&plan.sections).await;
    ctx.emit(
        ctx.event(ResearchEventKind::SectionsPlanned).with_data(serde_json::json!({
            "sections": plan.sections.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        })),
    )
    .await;
    Ok(plan.sections)
}

fn validate_plan(plan: &SectionPlan) -> ResearchResult<()> {
    if plan.sections.is_empty() {
        return Err(ResearchError::schema(Shape::Sections, "no sections returned"));
    }
    if let Some(section) = plan.sections.iter().find(|s| s.subsections.is_empty()) {
        return Err(ResearchError::schema(
            Shape::Sections,
            format!("section '{}' has no subsections", section.name),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::run_state::{ChatRole, ChatTurn};
    use crate::testing::{self, ScriptedCompletion, StaticSearch};
    use serde_json::json;
    use std::sync::Arc;

    fn state() -> ReportRunState {
        ReportRunState::new(vec![ChatTurn::user("Research solid-state batteries")])
    }

    #[tokio::test]
    async fn test_outline_appends_one_turn() {
        let completion = Arc::new(testing::approved_script(&["A"]));
        let ctx = testing::context(
            testing::fast_config(),
            completion.clone(),
            Arc::new(StaticSearch::default()),
        );
        let mut state = state();

        let decision = run_outline_stage(&ctx, &mut state).await.unwrap();
        assert_eq!(decision, RouteDecision::ReadyForResearch);
        assert_eq!(state.conversation.len(), 2);
        assert_eq!(state.conversation[1].role, ChatRole::Assistant);
        assert_eq!(state.outline.as_deref(), state.last_message());

        let route = &completion.calls()[1];
        assert_eq!(route.stage, Stage::Route);
        assert!(route.input.contains("Assistant: 1. Background"));
    }

    #[tokio::test]
    async fn test_outline_failure_is_upstream() {
        let completion = Arc::new(ScriptedCompletion::new().fail(Stage::Outline, "quota"));
        let ctx = testing::context(
            testing::fast_config(),
            completion.clone(),
            Arc::new(StaticSearch::default()),
        );
        let mut state = state();

        let err = run_outline_stage(&ctx, &mut state).await.unwrap_err();
        assert!(matches!(err, ResearchError::UpstreamFailure { stage: Stage::Outline, .. }));
        assert_eq!(state.conversation.len(), 1);
        assert_eq!(completion.count(Stage::Route), 0);
    }

    #[tokio::test]
    async fn test_decompose_returns_ordered_sections() {
        let completion = Arc::new(testing::approved_script(&["Background", "Outlook"]));
        let ctx = testing::context(
            testing::fast_config(),
            completion,
            Arc::new(StaticSearch::default()),
        );
        let mut state = state();
        state.outline = Some("1. Background\n2. Outlook".into());

        let sections = decompose(&ctx, &state).await.unwrap();
        let names: Vec<_> = sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Background", "Outlook"]);
    }

    #[tokio::test]
    async fn test_decompose_rejects_empty_plans() {
        for reply in [
            json!({ "sections": [] }),
            json!({ "sections": [{ "section_name": "A", "sub_sections": [] }] }),
            json!({ "sections": "none" }),
        ] {
            let completion = Arc::new(ScriptedCompletion::new().json(Stage::Decompose, reply));
            let ctx = testing::context(
                testing::fast_config(),
                completion,
                Arc::new(StaticSearch::default()),
            );
            let err = decompose(&ctx, &state()).await.unwrap_err();
            assert!(matches!(
                err,
                ResearchError::SchemaViolation {
                    shape: Shape::Sections,
                    ..
                }
            ));
        }
    }
}
