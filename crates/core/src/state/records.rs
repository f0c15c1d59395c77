//! # Research Records
//!
//! Values exchanged between workflow stages. The serialized field names are
//! the ones structured completions are asked to produce, so these types double
//! as the shapes handed to the model.

use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One report section produced by decomposition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct Section {
    /// Section title without numbering; never "Conclusion" or "References"
    #[serde(rename = "section_name")]
    pub name: String,
    /// What each subsection should cover, in order
    #[serde(rename = "sub_sections")]
    pub subsections: Vec<String>,
}

impl Section {
    pub fn new(name: impl Into<String>, subsections: Vec<String>) -> Self {
        Self {
            name: name.into(),
            subsections,
        }
    }

    /// Plain-text rendering used as model input
    pub fn describe(&self) -> String {
        let mut out = format!("Section: {}\n", self.name);
        for (i, sub) in self.subsections.iter().enumerate() {
            out.push_str(&format!("  {}. {}\n", i + 1, sub));
        }
        out
    }
}

/// The `sections` shape returned by decomposition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct SectionPlan {
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct Query {
    #[serde(rename = "query")]
    pub text: String,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// The `queries` shape returned by query generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct QueryBatch {
    pub queries: Vec<Query>,
}

/// A search hit as the search service returned it; any field may be missing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSearchHit {
    pub url: Option<String>,
    pub title: Option<String>,
    #[serde(alias = "raw_content")]
    pub content: Option<String>,
}

/// A search hit with every field present and non-empty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub content: String,
}

impl SearchResult {
    /// Keep a hit only when url, title and content are all non-empty.
    pub fn from_raw(hit: RawSearchHit) -> Option<Self> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Some(Self {
            url: non_empty(hit.url)?,
            title: non_empty(hit.title)?,
            content: non_empty(hit.content)?,
        })
    }
}

/// Results gathered for one query in one round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResultSet {
    pub query: Query,
    pub results: Vec<SearchResult>,
}

impl SearchResultSet {
    pub fn from_hits(query: Query, hits: Vec<RawSearchHit>) -> Self {
        let results = hits.into_iter().filter_map(SearchResult::from_raw).collect();
        Self { query, results }
    }
}

/// Raw critique value: either a boolean verdict or a free-text note
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, LLMOutput)]
#[serde(untagged)]
pub enum FeedbackValue {
    Flag(bool),
    Note(String),
}

/// The `feedback` shape returned by reflection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct FeedbackReply {
    /// `true` when the content covers the section, otherwise what is missing
    pub feedback: FeedbackValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Feedback {
    Sufficient,
    Insufficient { reason: String },
}

impl Feedback {
    pub fn is_sufficient(&self) -> bool {
        matches!(self, Feedback::Sufficient)
    }

    /// Text handed to the next query round
    pub fn guidance(&self) -> &str {
        match self {
            Feedback::Sufficient => "The previous round was judged sufficient.",
            Feedback::Insufficient { reason } => reason,
        }
    }
}

impl From<FeedbackReply> for Feedback {
    fn from(reply: FeedbackReply) -> Self {
        match reply.feedback {
            FeedbackValue::Flag(true) => Feedback::Sufficient,
            FeedbackValue::Flag(false) => Feedback::Insufficient {
                reason: "The content does not yet cover the section.".to_string(),
            },
            FeedbackValue::Note(note) if note.trim().eq_ignore_ascii_case("true") => {
                Feedback::Sufficient
            }
            FeedbackValue::Note(note) => Feedback::Insufficient { reason: note },
        }
    }
}

/// Decision taken after each outline proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub enum RouteDecision {
    /// The outline is not approved yet; ask the user
    #[serde(rename = "needs_more_input", alias = "input_required")]
    NeedsMoreInput,
    /// The user approved the outline
    #[serde(rename = "ready_for_research", alias = "do_research")]
    ReadyForResearch,
}

/// The `route` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct RouteReply {
    pub step: RouteDecision,
}

/// The `conclusion` shape returned by the report writer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct ConclusionAndReferences {
    pub conclusion: String,
    /// Five or six curated references
    pub references: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sections_round_trip_preserves_names_and_counts() {
        let plan = SectionPlan {
            sections: vec![
                Section::new("Background", vec!["History".into(), "Key terms".into()]),
                Section::new("Current State", vec!["Adoption".into()]),
            ],
        };

        let text = serde_json::to_string(&plan).unwrap();
        assert!(text.contains("section_name"));
        assert!(text.contains("sub_sections"));

        let back: SectionPlan = serde_json::from_str(&text).unwrap();
        assert_eq!(back.sections.len(), 2);
        for (a, b) in plan.sections.iter().zip(&back.sections) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.subsections.len(), b.subsections.len());
        }
    }

    #[test]
    fn test_search_result_requires_every_field() {
        let full = RawSearchHit {
            url: Some("https://a.example".into()),
            title: Some("A".into()),
            content: Some("body".into()),
        };
        assert!(SearchResult::from_raw(full.clone()).is_some());

        let no_title = RawSearchHit {
            title: None,
            ..full.clone()
        };
        assert!(SearchResult::from_raw(no_title).is_none());

        let blank_content = RawSearchHit {
            content: Some("   ".into()),
            ..full
        };
        assert!(SearchResult::from_raw(blank_content).is_none());
    }

    #[test]
    fn test_raw_hit_accepts_raw_content_key() {
        let hit: RawSearchHit = serde_json::from_value(json!({
            "url": "https://a.example",
            "title": "A",
            "raw_content": "body"
        }))
        .unwrap();
        assert_eq!(hit.content.as_deref(), Some("body"));
    }

    #[test]
    fn test_feedback_from_reply() {
        let parse = |v: serde_json::Value| -> Feedback {
            serde_json::from_value::<FeedbackReply>(json!({ "feedback": v }))
                .unwrap()
                .into()
        };

        assert_eq!(parse(json!(true)), Feedback::Sufficient);
        assert_eq!(parse(json!("TRUE")), Feedback::Sufficient);
        assert!(!parse(json!(false)).is_sufficient());
        assert_eq!(
            parse(json!("needs adoption numbers")),
            Feedback::Insufficient {
                reason: "needs adoption numbers".into()
            }
        );
    }

    #[test]
    fn test_route_accepts_both_vocabularies() {
        let r: RouteReply = serde_json::from_value(json!({ "step": "do_research" })).unwrap();
        assert_eq!(r.step, RouteDecision::ReadyForResearch);
        let r: RouteReply = serde_json::from_value(json!({ "step": "needs_more_input" })).unwrap();
        assert_eq!(r.step, RouteDecision::NeedsMoreInput);
        assert!(serde_json::from_value::<RouteReply>(json!({ "step": "maybe" })).is_err());
    }

    fn assert_llm_output<T: radkit::models::LLMOutputTrait>() {}

    #[test]
    fn test_structured_shapes_are_llm_outputs() {
        assert_llm_output::<SectionPlan>();
        assert_llm_output::<QueryBatch>();
        assert_llm_output::<FeedbackReply>();
        assert_llm_output::<FeedbackValue>();
        assert_llm_output::<RouteReply>();
        assert_llm_output::<RouteDecision>();
        assert_llm_output::<ConclusionAndReferences>();
    }
}
