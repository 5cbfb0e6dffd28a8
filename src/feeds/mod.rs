pub mod search_timeline;

use crate::error::FetchError;
use crate::tweet::SearchFilter;
use async_trait::async_trait;

/// Result of asking the endpoint for one page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    /// Tweets are available; `cursor` requests the page after this one.
    /// Without a cursor this page is the last.
    Continue {
        cursor: Option<String>,
        fragments: Vec<String>,
        raw: serde_json::Value,
    },
    /// The endpoint refused to serve more items and said why.
    Throttled(String),
    /// The endpoint has nothing left for this search.
    Exhausted,
}

/// Something that can walk a cursor-paginated tweet search.
///
/// An empty `cursor` asks for the first page.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, filter: &SearchFilter, cursor: &str) -> Result<PageOutcome, FetchError>;
}
