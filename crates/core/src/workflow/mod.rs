//! # Research Workflow
//!
//! Outline gate, decomposition, per-section reflection loops, scheduling,
//! assembly, and the response envelope.

pub mod assembler;
pub mod context;
pub mod coordinator;
pub mod events;
pub mod outline;
pub mod pipeline;
pub mod response;
pub mod scheduler;
pub mod section;

pub use context::RunContext;
pub use coordinator::{Coordinator, TurnReport};
pub use events::{ResearchEvent, ResearchEventKind};
pub use pipeline::{ReportPipeline, ReportStage, SectionPipeline, SectionStage};
pub use response::{ResponseEnvelope, ResponseStatus};
pub use scheduler::{run_sections, SectionResults};
pub use section::SectionRun;
