//! # Research Events
//!
//! Progress notifications emitted while a run advances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResearchEventKind {
    /// A turn started for a session
    RunStarted,
    OutlineProposed,
    /// The outline is waiting on the user
    InputRequired,
    SectionsPlanned,
    SectionStarted,
    RoundStarted,
    RoundCompleted,
    SectionCompleted,
    SectionFailed,
    ReportAssembled,
    RunCompleted,
    RunFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: ResearchEventKind,
    pub session_id: String,
    /// Section index, for section-scoped events
    #[serde(default)]
    pub section: Option<usize>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl ResearchEvent {
    pub fn new(kind: ResearchEventKind, session_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            session_id: session_id.to_string(),
            section: None,
            data: None,
        }
    }

    pub fn with_section(mut self, index: usize) -> Self {
        self.section = Some(index);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}
