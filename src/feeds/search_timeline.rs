use super::{PageOutcome, PageSource};
use crate::config::HttpConfig;
use crate::error::FetchError;
use crate::tweet::SearchFilter;
use crate::twitter_parser::{split_fragments, tweet_selector};
use async_trait::async_trait;
use reqwest::Url;
use scraper::Selector;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

const ACCEPT: &str = "application/json, text/javascript, */*; q=0.01";

/// Fetches pages from the legacy `i/search/timeline` endpoint, which answers
/// with rendered tweet HTML wrapped in a JSON envelope.
pub struct SearchTimelineFetcher {
    endpoint: Url,
    user_agent: String,
    accept_language: String,
    tweet: Selector,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    items_html: Option<String>,
    min_position: Option<String>,
    message: Option<String>,
}

impl SearchTimelineFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self, FetchError> {
        let endpoint = Url::parse(&config.endpoint)
            .ok()
            .filter(|url| url.host_str().is_some())
            .ok_or_else(|| FetchError::InvalidEndpoint(config.endpoint.clone()))?;

        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.as_str());
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().map_err(FetchError::Client)?;

        Ok(Self {
            endpoint,
            user_agent: config.user_agent.clone(),
            accept_language: config.accept_language.clone(),
            tweet: tweet_selector(),
            client,
        })
    }

    /// Full request URL for one page of `filter`, starting at `cursor`.
    pub fn request_url(&self, filter: &SearchFilter, cursor: &str) -> Result<String, FetchError> {
        let terms = filter.search_terms()?;
        let language = filter
            .language
            .as_deref()
            .filter(|lang| !lang.is_empty())
            .map(|lang| format!("&lang={}", urlencoding::encode(lang)))
            .unwrap_or_default();

        Ok(format!(
            "{}?f=realtime&q={}{}&src=typd&max_position={}",
            self.endpoint,
            urlencoding::encode(&terms),
            language,
            urlencoding::encode(cursor),
        ))
    }

    /// Browser-like headers sent with every page request.
    pub fn headers(&self, url: &str) -> Vec<(&'static str, String)> {
        let host = match (self.endpoint.host_str(), self.endpoint.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };

        vec![
            ("Host", host),
            ("User-Agent", self.user_agent.clone()),
            ("Accept", ACCEPT.to_string()),
            ("Accept-Language", self.accept_language.clone()),
            ("X-Requested-With", "XMLHttpRequest".to_string()),
            ("Referer", url.to_string()),
            ("Connection", "keep-alive".to_string()),
        ]
    }
}

#[async_trait]
impl PageSource for SearchTimelineFetcher {
    async fn fetch_page(&self, filter: &SearchFilter, cursor: &str) -> Result<PageOutcome, FetchError> {
        let url = self.request_url(filter, cursor)?;
        let headers = self.headers(&url);
        debug!(url = %url, headers = ?headers, "requesting search timeline page");

        let mut request = self.client.get(&url);
        for (name, value) in &headers {
            request = request.header(*name, value);
        }

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(source) => {
                error!("search timeline request failed, try it in a browser: {}", url);
                error!("stopped at cursor {:?}", cursor);
                return Err(FetchError::Transport { url, source });
            }
        };

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.clone(),
                source,
            })?;

        self.classify_envelope(status, &body)
    }
}

impl SearchTimelineFetcher {
    /// Interpret the JSON envelope of one search timeline response.
    ///
    /// No `items_html` at all is the endpoint's way of saying it is rate
    /// limiting us; an empty one, or one holding no tweets, ends the search.
    /// A page without `min_position` is still returned, but is the last one.
    pub fn classify_envelope(&self, status: u16, body: &str) -> Result<PageOutcome, FetchError> {
        let raw: serde_json::Value =
            serde_json::from_str(body).map_err(|source| FetchError::InvalidJson { status, source })?;
        let envelope =
            Envelope::deserialize(&raw).map_err(|source| FetchError::InvalidJson { status, source })?;

        let Some(items_html) = envelope.items_html else {
            let message = envelope
                .message
                .unwrap_or_else(|| format!("endpoint returned no items (HTTP {})", status));
            return Ok(PageOutcome::Throttled(message));
        };

        if items_html.trim().is_empty() {
            return Ok(PageOutcome::Exhausted);
        }

        let fragments = split_fragments(&items_html, &self.tweet);
        if fragments.is_empty() {
            return Ok(PageOutcome::Exhausted);
        }

        Ok(PageOutcome::Continue {
            cursor: envelope.min_position,
            fragments,
            raw,
        })
    }
}
