use thiserror::Error;

/// Failure to reach the search endpoint or to make sense of its reply.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("endpoint returned a non-JSON body (HTTP {status}): {source}")]
    InvalidJson {
        status: u16,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("invalid endpoint url {0:?}")]
    InvalidEndpoint(String),

    #[error("cannot build a search request: {0}")]
    Filter(#[from] ConfigError),
}

/// A single tweet fragment could not be turned into a [`crate::Tweet`].
#[derive(Debug, Error)]
#[error("malformed tweet {}: {field} {reason}", locate(.tweet_id.as_deref(), .position))]
pub struct ExtractionError {
    pub tweet_id: Option<String>,
    /// Where the fragment sat in the run, when known.
    pub position: Option<FragmentPosition>,
    pub field: &'static str,
    pub reason: String,
}

/// 1-based page number and 0-based fragment index within that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentPosition {
    pub page: usize,
    pub index: usize,
}

impl ExtractionError {
    pub(crate) fn missing(tweet_id: Option<&str>, field: &'static str) -> Self {
        Self {
            tweet_id: tweet_id.map(str::to_string),
            position: None,
            field,
            reason: "is missing".to_string(),
        }
    }

    pub(crate) fn invalid(tweet_id: Option<&str>, field: &'static str, reason: String) -> Self {
        Self {
            tweet_id: tweet_id.map(str::to_string),
            position: None,
            field,
            reason,
        }
    }

    pub fn at(mut self, page: usize, index: usize) -> Self {
        self.position = Some(FragmentPosition { page, index });
        self
    }
}

fn locate(tweet_id: Option<&str>, position: &Option<FragmentPosition>) -> String {
    let id = tweet_id.unwrap_or("<unknown id>");
    match position {
        Some(pos) => format!("{} (page {}, fragment {})", id, pos.page, pos.index),
        None => id.to_string(),
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is already closed")]
    Closed(String),

    #[error("failed to encode csv row: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("at least one of a username or a query is required")]
    MissingAuthorOrQuery,

    #[error("batch_size must be at least 1")]
    ZeroBatchSize,

    #[error("unknown timezone {0:?}")]
    UnknownTimezone(String),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Everything that can end a collection run with a failure outcome.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}
