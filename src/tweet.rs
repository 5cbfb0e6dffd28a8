use crate::error::ConfigError;
use chrono::{NaiveDate, NaiveDateTime};

pub const DEFAULT_MAX_TWEETS: i64 = 100;

/// A single tweet as recovered from the search timeline markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tweet {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub author_handle: String,
    pub text: String,
    pub language: String,
    /// Short timestamp exactly as rendered in the markup, e.g. "Jan 5".
    pub date_text: String,
    pub posted_at_ms: i64,
    /// Wall-clock time of `posted_at_ms` in the configured display zone.
    pub posted_at: NaiveDateTime,
    /// `posted_at` rendered as `Sat Jan 05 14:30:00 +0000 2019`.
    pub formatted_date: String,
    pub permalink: String,
    pub retweets: u64,
    pub favorites: u64,
    pub geo_location: String,
    pub mentions: Vec<String>,
    pub hashtags: Vec<String>,
    pub urls: Vec<String>,
}

impl Tweet {
    pub fn mentions_joined(&self) -> String {
        self.mentions.join(" ")
    }

    pub fn hashtags_joined(&self) -> String {
        self.hashtags.join(" ")
    }

    pub fn urls_joined(&self) -> String {
        self.urls.join(",")
    }
}

/// Search criteria for one collection run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    pub username: Option<String>,
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub query: Option<String>,
    pub max_tweets: i64,
    pub language: Option<String>,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self {
            username: None,
            since: None,
            until: None,
            query: None,
            max_tweets: DEFAULT_MAX_TWEETS,
            language: None,
        }
    }
}

impl SearchFilter {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let has = |field: &Option<String>| field.as_deref().is_some_and(|s| !s.trim().is_empty());
        if has(&self.username) || has(&self.query) {
            Ok(())
        } else {
            Err(ConfigError::MissingAuthorOrQuery)
        }
    }

    /// Build the upstream search expression, e.g.
    /// `from:nasa since:2016-01-01 until:2017-04-01 #moon`.
    ///
    /// Directives always appear in the order `from:`, `since:`, `until:`,
    /// free text.
    pub fn search_terms(&self) -> Result<String, ConfigError> {
        self.validate()?;

        let mut terms = Vec::with_capacity(4);
        if let Some(username) = &self.username {
            terms.push(format!("from:{}", username.trim_start_matches('@')));
        }
        if let Some(since) = self.since {
            terms.push(format!("since:{}", since.format("%Y-%m-%d")));
        }
        if let Some(until) = self.until {
            terms.push(format!("until:{}", until.format("%Y-%m-%d")));
        }
        if let Some(query) = &self.query {
            terms.push(query.clone());
        }
        Ok(terms.join(" "))
    }
}
