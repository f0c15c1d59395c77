//! # Scribe State
//!
//! Research records, run state, and persistence.

pub mod db;
pub mod io;
pub mod records;
pub mod run_state;

pub use db::{SessionDb, SessionRecord};
pub use io::ArtifactWriter;
pub use records::{
    ConclusionAndReferences, Feedback, Query, RawSearchHit, RouteDecision, SearchResult,
    SearchResultSet, Section, SectionPlan,
};
pub use run_state::{
    ChatRole, ChatTurn, ReportRunState, SectionFailure, SectionOutcome, SectionRunState,
};
