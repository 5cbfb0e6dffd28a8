//! Collect historical tweets from the legacy search timeline.
//!
//! [`PaginationEngine`] walks the cursor-paginated endpoint through a
//! [`PageSource`], turns each tweet fragment into a [`Tweet`] with
//! [`TweetExtractor`] and streams bounded batches into a [`TweetSink`]
//! such as [`CsvExporter`].

pub mod config;
pub mod error;
pub mod export;
pub mod feeds;
pub mod pagination;
pub mod tweet;
pub mod twitter_parser;

pub use config::{Config, DisplayZone};
pub use error::{ConfigError, ExtractionError, FetchError, RunError, SinkError};
pub use export::{CsvExporter, TweetSink};
pub use feeds::search_timeline::SearchTimelineFetcher;
pub use feeds::{PageOutcome, PageSource};
pub use pagination::{EngineOptions, PaginationEngine, RunState, RunSummary, Termination};
pub use tweet::{SearchFilter, Tweet};
pub use twitter_parser::TweetExtractor;
