//! External collaborators: the completion service and web search.

pub mod completion;
pub mod search;

pub use completion::{
    CompletionReply, CompletionRequest, CompletionService, RadkitCompletion, Shape, Stage,
};
pub use search::{build_search, SearxngSearch, TavilySearch, WebSearch};
