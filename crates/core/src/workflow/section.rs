//! # Section Sub-workflow
//!
//! Drives one section through seed, query, search, synthesize and reflect,
//! looping until the critique is satisfied or the round budget runs out,
//! then formats the final prose.

use crate::error::ResearchResult;
use crate::services::completion::{Shape, Stage};
use crate::state::records::{Feedback, FeedbackReply, QueryBatch, SearchResultSet, Section};
use crate::state::run_state::{SectionOutcome, SectionRunState};

use super::context::RunContext;
use super::events::ResearchEventKind;
use super::pipeline::{SectionEvent, SectionPipeline, SectionStage};

/// Longest excerpt of one source handed to the synthesizer
const MAX_SOURCE_CHARS: usize = 6_000;

pub struct SectionRun {
    ctx: RunContext,
    state: SectionRunState,
    pipeline: SectionPipeline,
}

impl SectionRun {
    pub fn new(ctx: RunContext, index: usize, section: Section) -> Self {
        let pipeline = SectionPipeline::new(ctx.config.max_reflection_rounds);
        Self {
            ctx,
            state: SectionRunState::new(index, section),
            pipeline,
        }
    }

    fn name(&self) -> &str {
        &self.state.section.name
    }

    pub async fn run(mut self) -> ResearchResult<SectionOutcome> {
        let index = self.state.index;
        tracing::info!(section = index, name = %self.name(), "section started");
        self.ctx
            .emit(
                self.ctx
                    .event(ResearchEventKind::SectionStarted)
                    .with_section(index)
                    .with_data(serde_json::json!({ "name": self.name() })),
            )
            .await;

        loop {
            match self.pipeline.stage {
                SectionStage::Seed => {
                    self.seed().await?;
                    self.pipeline.advance(SectionEvent::Seeded)?;
                }
                SectionStage::Query => {
                    self.ctx
                        .emit(
                            self.ctx
                                .event(ResearchEventKind::RoundStarted)
                                .with_section(index)
                                .with_data(serde_json::json!({ "round": self.pipeline.round })),
                        )
                        .await;
                    self.generate_queries().await?;
                    self.pipeline.advance(SectionEvent::QueriesGenerated)?;
                }
                SectionStage::Search => {
                    self.search().await?;
                    self.pipeline.advance(SectionEvent::SearchCompleted)?;
                }
                SectionStage::Synthesize => {
                    self.synthesize().await?;
                    self.pipeline.advance(SectionEvent::Synthesized)?;
                }
                SectionStage::Reflect => {
                    let sufficient = self.reflect().await?.is_sufficient();
                    self.ctx
                        .emit(
                            self.ctx
                                .event(ResearchEventKind::RoundCompleted)
                                .with_section(index)
                                .with_data(serde_json::json!({
                                    "round": self.pipeline.round,
                                    "sufficient": sufficient,
                                })),
                        )
                        .await;
                    self.pipeline
                        .advance(SectionEvent::Reflected { sufficient })?;
                    self.state.round = self.pipeline.round;
                }
                SectionStage::Format => {
                    self.format().await?;
                    self.pipeline.advance(SectionEvent::Formatted)?;
                }
                SectionStage::Done => break,
            }
        }

        let content = self.state.final_content.clone().unwrap_or_default();
        self.ctx
            .artifacts
            .write_section(index, &self.state.section.name, &content)
            .await;
        tracing::info!(section = index, rounds = self.state.round, "section finished");
        Ok(self.state.into_outcome(content))
    }

    async fn seed(&mut self) -> ResearchResult<()> {
        let input = self.state.section.describe();
        let knowledge = self
            .ctx
            .complete(Stage::Seed, input, Some(self.name()))
            .await?
            .into_text(Stage::Seed)?;
        self.state.knowledge = Some(knowledge);
        Ok(())
    }

    async fn generate_queries(&mut self) -> ResearchResult<()> {
        let max = self.ctx.config.max_queries_per_round;
        let previous = if self.state.searched_queries.is_empty() {
            "none".to_string()
        } else {
            self.state
                .searched_queries
                .iter()
                .map(|q| format!("- {}", q.text))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let feedback = self
            .state
            .latest_feedback
            .as_ref()
            .map(Feedback::guidance)
            .unwrap_or("none yet");
        let input = format!(
            "{}\nMaximum number of queries: {}\n\nPrevious queries:\n{}\n\nReflection feedback: {}",
            self.state.section.describe(),
            max,
            previous,
            feedback
        );

        let batch: QueryBatch = self
            .ctx
            .complete(Stage::Query, input, Some(self.name()))
            .await?
            .decode(Shape::Queries)?;

        let mut queries: Vec<_> = batch
            .queries
            .into_iter()
            .filter(|q| !q.text.trim().is_empty())
            .collect();
        if queries.len() > max {
            tracing::debug!(
                section = self.state.index,
                "truncating {} queries to {}",
                queries.len(),
                max
            );
            queries.truncate(max);
        }
        if queries.is_empty() {
            tracing::warn!(section = self.state.index, "query generation returned no queries");
        }
        self.state.record_queries(queries);
        Ok(())
    }

    async fn search(&mut self) -> ResearchResult<()> {
        let mut sets = Vec::with_capacity(self.state.generated_queries.len());
        for query in &self.state.generated_queries {
            let hits = self.ctx.search(&query.text).await?;
            let received = hits.len();
            let set = SearchResultSet::from_hits(query.clone(), hits);
            if set.results.len() < received {
                tracing::debug!(
                    "dropped {} incomplete results for '{}'",
                    received - set.results.len(),
                    query.text
                );
            }
            sets.push(set);
        }
        self.state.record_results(sets);
        Ok(())
    }

    async fn synthesize(&mut self) -> ResearchResult<()> {
        let input = format!(
            "{}\nSearch results:\n{}",
            self.state.section.describe(),
            render_results(&self.state.search_history)
        );
        let content = self
            .ctx
            .complete(Stage::Synthesize, input, Some(self.name()))
            .await?
            .into_text(Stage::Synthesize)?;
        self.state.replace_content(content);
        Ok(())
    }

    async fn reflect(&mut self) -> ResearchResult<Feedback> {
        let input = format!(
            "{}\nAccumulated content:\n{}",
            self.state.section.describe(),
            self.state.accumulated_content
        );
        let reply: FeedbackReply = self
            .ctx
            .complete(Stage::Reflect, input, Some(self.name()))
            .await?
            .decode(Shape::Feedback)?;
        let feedback = Feedback::from(reply);
        self.state.latest_feedback = Some(feedback.clone());
        Ok(feedback)
    }

    async fn format(&mut self) -> ResearchResult<()> {
        let input = format!(
            "{}\nInternal knowledge:\n{}\n\nResearched content:\n{}",
            self.state.section.describe(),
            self.state.knowledge.as_deref().unwrap_or(""),
            self.state.accumulated_content
        );
        let content = self
            .ctx
            .complete(Stage::Format, input, Some(self.name()))
            .await?
            .into_text(Stage::Format)?;
        if self.state.final_content.is_some() {
            tracing::warn!(section = self.state.index, "final content already set");
        }
        self.state.final_content = Some(content);
        Ok(())
    }
}

fn render_results(history: &[SearchResultSet]) -> String {
    let mut out = String::new();
    for set in history {
        out.push_str(&format!("\n### Query: {}\n", set.query.text));
        if set.results.is_empty() {
            out.push_str("(no usable results)\n");
        }
        for result in &set.results {
            let excerpt: String = result.content.chars().take(MAX_SOURCE_CHARS).collect();
            out.push_str(&format!(
                "\nSource: {} ({})\n{}\n",
                result.title, result.url, excerpt
            ));
        }
    }
    out
}
