//! # Response Adapter
//!
//! Maps the outcome of a turn onto the envelope returned to callers.

use serde::{Deserialize, Serialize};

use crate::error::ResearchError;
use crate::state::run_state::ReportRunState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    InputRequired,
    Completed,
    Error,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::InputRequired => "input_required",
            ResponseStatus::Completed => "completed",
            ResponseStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status: ResponseStatus,
    pub message: String,
}

impl ResponseEnvelope {
    pub fn input_required(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::InputRequired,
            message: message.into(),
        }
    }

    pub fn completed(report: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Completed,
            message: report.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: message.into(),
        }
    }

    /// A finished report wins; otherwise surface the last conversational message.
    pub fn from_state(state: &ReportRunState) -> Self {
        match &state.final_report {
            Some(report) => Self::completed(report.clone()),
            None => Self::input_required(state.last_message().unwrap_or_default()),
        }
    }

    pub fn from_error(error: &ResearchError) -> Self {
        let message = match error {
            ResearchError::RunAborted { .. } => format!("The research run was stopped: {}", error),
            _ => format!("The research run failed: {}", error),
        };
        Self::error(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::completion::{Shape, Stage};
    use crate::state::run_state::ChatTurn;

    #[test]
    fn test_report_wins_over_conversation() {
        let mut state = ReportRunState::new(vec![ChatTurn::user("topic")]);
        state.push_assistant("Here is the outline");
        assert_eq!(
            ResponseEnvelope::from_state(&state),
            ResponseEnvelope::input_required("Here is the outline")
        );

        state.final_report = Some("# Report".into());
        let envelope = ResponseEnvelope::from_state(&state);
        assert_eq!(envelope.status, ResponseStatus::Completed);
        assert_eq!(envelope.message, "# Report");
    }

    #[test]
    fn test_errors_become_error_envelopes() {
        let envelope =
            ResponseEnvelope::from_error(&ResearchError::upstream(Stage::Outline, "503"));
        assert_eq!(envelope.status, ResponseStatus::Error);
        assert!(envelope.message.contains("outline call failed: 503"));

        let envelope = ResponseEnvelope::from_error(&ResearchError::schema(Shape::Queries, "bad"));
        assert!(envelope.message.contains("queries"));
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(ResponseEnvelope::input_required("?")).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "input_required", "message": "?" }));
    }
}
