//! # Section Scheduler
//!
//! Runs every section's sub-workflow under the configured policy and hands
//! back one terminal value per section, in section order.
//!
//! - `sequential` runs sections one at a time with a pause between them
//! - `concurrent` runs up to `max_concurrent_sections` at once and reorders
//!   completions by index before returning

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::{FailurePolicy, SchedulingPolicy};
use crate::error::{ResearchError, ResearchResult};
use crate::state::records::Section;
use crate::state::run_state::{SectionFailure, SectionOutcome};

use super::context::RunContext;
use super::events::ResearchEventKind;
use super::section::SectionRun;

pub type SectionResults = Vec<Result<SectionOutcome, SectionFailure>>;

#[tracing::instrument(skip_all, fields(session = %ctx.session_id, sections = sections.len()))]
pub async fn run_sections(ctx: &RunContext, sections: &[Section]) -> ResearchResult<SectionResults> {
    match ctx.config.scheduling {
        SchedulingPolicy::Sequential => run_sequential(ctx, sections).await,
        SchedulingPolicy::Concurrent => run_concurrent(ctx, sections).await,
    }
}

async fn run_sequential(ctx: &RunContext, sections: &[Section]) -> ResearchResult<SectionResults> {
    let delay = ctx.config.inter_section_delay();
    let mut results = Vec::with_capacity(sections.len());

    for (index, section) in sections.iter().enumerate() {
        if index > 0 && !delay.is_zero() {
            tracing::debug!("waiting {:?} before section {}", delay, index);
            ctx.pause(delay).await?;
        }
        let result = SectionRun::new(ctx.clone(), index, section.clone())
            .run()
            .await;
        results.push(settle(ctx, index, &section.name, result).await?);
    }

    Ok(results)
}

async fn run_concurrent(ctx: &RunContext, sections: &[Section]) -> ResearchResult<SectionResults> {
    let scope = ctx.child();
    let limit = ctx.config.max_concurrent_sections.max(1);
    let semaphore = Arc::new(Semaphore::new(limit));
    let mut join_set = JoinSet::new();

    for (index, section) in sections.iter().enumerate() {
        let scope = scope.clone();
        let semaphore = Arc::clone(&semaphore);
        let section = section.clone();

        join_set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return (index, Err(ResearchError::aborted(e.to_string()))),
            };
            (index, SectionRun::new(scope, index, section).run().await)
        });
    }

    let mut slots: Vec<Option<Result<SectionOutcome, SectionFailure>>> =
        (0..sections.len()).map(|_| None).collect();

    while let Some(joined) = join_set.join_next().await {
        let settled = match joined {
            Ok((index, result)) => settle(ctx, index, &sections[index].name, result)
                .await
                .map(|value| (index, value)),
            Err(e) => Err(ResearchError::aborted(format!("section task failed: {}", e))),
        };
        match settled {
            Ok((index, value)) => slots[index] = Some(value),
            Err(e) => {
                scope.cancel_token().cancel();
                join_set.abort_all();
                return Err(e);
            }
        }
    }

    Ok(slots.into_iter().flatten().collect())
}

/// Record a section's terminal value. Errors that must end the run are
/// returned; anything else becomes a failure marker.
async fn settle(
    ctx: &RunContext,
    index: usize,
    name: &str,
    result: ResearchResult<SectionOutcome>,
) -> ResearchResult<Result<SectionOutcome, SectionFailure>> {
    match result {
        Ok(outcome) => {
            ctx.emit(
                ctx.event(ResearchEventKind::SectionCompleted)
                    .with_section(index)
                    .with_data(serde_json::json!({
                        "name": name,
                        "rounds": outcome.rounds,
                        "queries": outcome.queries.len(),
                    })),
            )
            .await;
            Ok(Ok(outcome))
        }
        Err(error) => {
            tracing::warn!("Section {} '{}' failed: {}", index, name, error);
            ctx.emit(
                ctx.event(ResearchEventKind::SectionFailed)
                    .with_section(index)
                    .with_data(serde_json::json!({ "name": name, "error": error.to_string() })),
            )
            .await;
            if error.is_abort() || ctx.config.failure_policy == FailurePolicy::AbortRun {
                return Err(error);
            }
            Ok(Err(SectionFailure {
                index,
                name: name.to_string(),
                error,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResearchConfig;
    use crate::services::completion::{CompletionReply, Stage};
    use crate::testing::{self, StaticSearch};
    use std::time::{Duration, Instant};

    fn sections(names: &[&str]) -> Vec<Section> {
        names
            .iter()
            .map(|n| Section::new(*n, vec![format!("{} overview", n)]))
            .collect()
    }

    fn contents(results: &SectionResults) -> Vec<String> {
        results
            .iter()
            .map(|r| match r {
                Ok(outcome) => outcome.content.clone(),
                Err(failure) => format!("failed: {}", failure.name),
            })
            .collect()
    }

    fn failing_seed(bad: &'static str) -> impl Fn(&crate::services::CompletionRequest) -> ResearchResult<CompletionReply> {
        move |req| {
            if req.subject.as_deref() == Some(bad) {
                Err(ResearchError::upstream(Stage::Seed, "model unavailable"))
            } else {
                Ok(CompletionReply::Text("seed knowledge".into()))
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_results_follow_section_order() {
        let names = ["First", "Second", "Third"];
        let completion = Arc::new(
            testing::approved_script(&names).latency("First", Duration::from_millis(60)),
        );
        let search = Arc::new(StaticSearch::new(testing::default_hits()));
        let config = ResearchConfig {
            scheduling: SchedulingPolicy::Concurrent,
            ..testing::fast_config()
        };
        let ctx = testing::context(config, completion, search);

        let results = run_sections(&ctx, &sections(&names)).await.unwrap();
        assert_eq!(contents(&results), vec!["## First", "## Second", "## Third"]);

        let completed: Vec<usize> = ctx
            .events()
            .iter()
            .filter(|e| e.kind == ResearchEventKind::SectionCompleted)
            .filter_map(|e| e.section)
            .collect();
        assert_eq!(completed.len(), 3);
        assert_eq!(completed.last(), Some(&0));
    }

    #[tokio::test]
    async fn test_sequential_runs_in_order_with_delay() {
        let names = ["A", "B", "C"];
        let completion = Arc::new(testing::approved_script(&names));
        let search = Arc::new(StaticSearch::new(testing::default_hits()));
        let config = ResearchConfig {
            inter_section_delay_secs: 0.05,
            ..testing::fast_config()
        };
        let ctx = testing::context(config, completion.clone(), search);

        let started = Instant::now();
        let results = run_sections(&ctx, &sections(&names)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(contents(&results), vec!["## A", "## B", "## C"]);

        let seeded: Vec<String> = completion
            .calls()
            .into_iter()
            .filter(|c| c.stage == Stage::Seed)
            .filter_map(|c| c.subject)
            .collect();
        assert_eq!(seeded, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_skip_policy_keeps_failure_markers() {
        let names = ["A", "Bad", "C"];
        let completion =
            Arc::new(testing::approved_script(&names).handler(Stage::Seed, failing_seed("Bad")));
        let search = Arc::new(StaticSearch::new(testing::default_hits()));
        let config = ResearchConfig {
            failure_policy: FailurePolicy::SkipFailedSections,
            ..testing::fast_config()
        };
        let ctx = testing::context(config, completion, search);

        let results = run_sections(&ctx, &sections(&names)).await.unwrap();
        assert_eq!(contents(&results), vec!["## A", "failed: Bad", "## C"]);
        match &results[1] {
            Err(failure) => assert_eq!(failure.index, 1),
            Ok(_) => panic!("expected a failure marker"),
        }
    }

    #[tokio::test]
    async fn test_abort_policy_stops_at_first_failure() {
        let names = ["A", "Bad", "C"];
        let completion =
            Arc::new(testing::approved_script(&names).handler(Stage::Seed, failing_seed("Bad")));
        let search = Arc::new(StaticSearch::new(testing::default_hits()));
        let ctx = testing::context(testing::fast_config(), completion.clone(), search);

        let err = run_sections(&ctx, &sections(&names)).await.unwrap_err();
        assert!(matches!(err, ResearchError::UpstreamFailure { stage: Stage::Seed, .. }));
        assert_eq!(completion.count(Stage::Seed), 2);
    }

    #[tokio::test]
    async fn test_cancellation_returns_no_partial_results() {
        let names = ["Slow", "Slower"];
        let completion = Arc::new(
            testing::approved_script(&names)
                .latency("Slow", Duration::from_secs(2))
                .latency("Slower", Duration::from_secs(3)),
        );
        let search = Arc::new(StaticSearch::new(testing::default_hits()));
        let config = ResearchConfig {
            scheduling: SchedulingPolicy::Concurrent,
            failure_policy: FailurePolicy::SkipFailedSections,
            ..testing::fast_config()
        };
        let ctx = testing::context(config, completion, search);

        let token = ctx.cancel_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let started = Instant::now();
        let err = run_sections(&ctx, &sections(&names)).await.unwrap_err();
        assert!(err.is_abort());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
