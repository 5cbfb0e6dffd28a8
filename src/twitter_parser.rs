use crate::config::{DisplayZone, DEFAULT_ORIGIN};
use crate::error::ExtractionError;
use crate::tweet::Tweet;
use chrono::DateTime;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Selector matching one tweet container inside a search timeline page.
pub const TWEET_SELECTOR: &str = "div.js-stream-tweet";

const BODY_SELECTOR: &str = "p.js-tweet-text";
const RETWEETS_SELECTOR: &str = "span.ProfileTweet-action--retweet span.ProfileTweet-actionCount";
const FAVORITES_SELECTOR: &str = "span.ProfileTweet-action--favorite span.ProfileTweet-actionCount";
const TIMESTAMP_SELECTOR: &str = "span.js-short-timestamp";
const GEO_SELECTOR: &str = "span.Tweet-geo";
const STAT_COUNT_ATTR: &str = "data-tweet-stat-count";
const EXPANDED_URL_ATTR: &str = "data-expanded-url";

/// Turns a single `js-stream-tweet` fragment into a [`Tweet`].
///
/// Selectors and patterns are compiled once per extractor and reused for
/// every fragment.
#[derive(Debug, Clone)]
pub struct TweetExtractor {
    origin: String,
    zone: DisplayZone,
    tweet: Selector,
    body: Selector,
    retweets: Selector,
    favorites: Selector,
    timestamp: Selector,
    geo: Selector,
    anchors: Selector,
    markup_tag: Regex,
    mention: Regex,
    hashtag: Regex,
}

impl Default for TweetExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_ORIGIN, DisplayZone::Local)
    }
}

impl TweetExtractor {
    pub fn new(origin: impl Into<String>, zone: DisplayZone) -> Self {
        Self {
            origin: origin.into().trim_end_matches('/').to_string(),
            zone,
            tweet: tweet_selector(),
            body: selector(BODY_SELECTOR),
            retweets: selector(RETWEETS_SELECTOR),
            favorites: selector(FAVORITES_SELECTOR),
            timestamp: selector(TIMESTAMP_SELECTOR),
            geo: selector(GEO_SELECTOR),
            anchors: selector("a"),
            markup_tag: pattern(r"<.*?>"),
            mention: pattern(r"@\w*"),
            hashtag: pattern(r"#\w*"),
        }
    }

    pub fn extract(&self, fragment: &str) -> Result<Tweet, ExtractionError> {
        let document = Html::parse_fragment(fragment);
        let root = document
            .select(&self.tweet)
            .next()
            .ok_or_else(|| ExtractionError::missing(None, "tweet container"))?;

        let id = required_attr(root, "data-tweet-id", None)?;
        let id_ref = Some(id.as_str());
        let author_id = required_attr(root, "data-user-id", id_ref)?;
        let author_handle = required_attr(root, "data-screen-name", id_ref)?;
        let author_name = required_attr(root, "data-name", id_ref)?;
        let permalink_path = required_attr(root, "data-permalink-path", id_ref)?;

        let body = root
            .select(&self.body)
            .next()
            .ok_or_else(|| ExtractionError::missing(id_ref, "tweet text"))?;
        let text = self.reconstruct_text(&body.inner_html());
        let language = body.value().attr("lang").unwrap_or_default().to_string();

        let timestamp = root
            .select(&self.timestamp)
            .next()
            .ok_or_else(|| ExtractionError::missing(id_ref, "timestamp"))?;
        let posted_at_ms = parse_timestamp_ms(timestamp, id_ref)?;
        let instant = DateTime::from_timestamp_millis(posted_at_ms).ok_or_else(|| {
            ExtractionError::invalid(id_ref, "timestamp", format!("{} is out of range", posted_at_ms))
        })?;
        let posted_at = self.zone.wall_clock(instant);
        let date_text = timestamp.text().collect::<String>().trim().to_string();

        let retweets = self.stat_count(root, &self.retweets, "retweet count", id_ref)?;
        let favorites = self.stat_count(root, &self.favorites, "favorite count", id_ref)?;

        let geo_location = root
            .select(&self.geo)
            .next()
            .and_then(|geo| geo.value().attr("title"))
            .unwrap_or_default()
            .to_string();

        let urls = root
            .select(&self.anchors)
            .filter_map(|a| a.value().attr(EXPANDED_URL_ATTR))
            .map(str::to_string)
            .collect();

        let mentions = find_all(&self.mention, &text);
        let hashtags = find_all(&self.hashtag, &text);

        Ok(Tweet {
            permalink: format!("{}{}", self.origin, permalink_path),
            formatted_date: posted_at.format("%a %b %d %H:%M:%S +0000 %Y").to_string(),
            id,
            author_id,
            author_name,
            author_handle,
            text,
            language,
            date_text,
            posted_at_ms,
            posted_at,
            retweets,
            favorites,
            geo_location,
            mentions,
            hashtags,
            urls,
        })
    }

    /// Plain text of the tweet body: a space goes in front of every `http`
    /// so links don't run into the preceding word, then tags are dropped.
    fn reconstruct_text(&self, inner_html: &str) -> String {
        let spaced = inner_html.replace("http", " http");
        self.markup_tag.replace_all(&spaced, "").into_owned()
    }

    fn stat_count(
        &self,
        root: ElementRef<'_>,
        selector: &Selector,
        field: &'static str,
        tweet_id: Option<&str>,
    ) -> Result<u64, ExtractionError> {
        let raw = root
            .select(selector)
            .next()
            .and_then(|counter| counter.value().attr(STAT_COUNT_ATTR))
            .ok_or_else(|| ExtractionError::missing(tweet_id, field))?;
        raw.replace(',', "")
            .trim()
            .parse::<u64>()
            .map_err(|e| ExtractionError::invalid(tweet_id, field, format!("{:?}: {}", raw, e)))
    }
}

/// Compiled [`TWEET_SELECTOR`], for callers that split pages themselves.
pub fn tweet_selector() -> Selector {
    selector(TWEET_SELECTOR)
}

/// Split a page's `items_html` into one outer-HTML fragment per tweet.
pub fn split_fragments(items_html: &str, tweet: &Selector) -> Vec<String> {
    let document = Html::parse_fragment(items_html);
    document.select(tweet).map(|el| el.html()).collect()
}

fn required_attr(
    root: ElementRef<'_>,
    name: &'static str,
    tweet_id: Option<&str>,
) -> Result<String, ExtractionError> {
    root.value()
        .attr(name)
        .map(str::to_string)
        .ok_or_else(|| ExtractionError::missing(tweet_id, name))
}

/// `data-time-ms` carries epoch milliseconds; older markup only has
/// `data-time` in seconds.
fn parse_timestamp_ms(node: ElementRef<'_>, tweet_id: Option<&str>) -> Result<i64, ExtractionError> {
    let parse = |attr: &'static str, raw: &str| {
        raw.trim()
            .parse::<i64>()
            .map_err(|e| ExtractionError::invalid(tweet_id, attr, format!("{:?}: {}", raw, e)))
    };

    if let Some(ms) = node.value().attr("data-time-ms") {
        return parse("data-time-ms", ms);
    }
    match node.value().attr("data-time") {
        Some(secs) => parse("data-time", secs)?.checked_mul(1000).ok_or_else(|| {
            ExtractionError::invalid(tweet_id, "data-time", format!("{} is out of range", secs))
        }),
        None => Err(ExtractionError::missing(tweet_id, "data-time")),
    }
}

fn find_all(pattern: &Regex, text: &str) -> Vec<String> {
    pattern
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

// Only ever called with the constant selectors above.
fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {:?}: {:?}", css, e))
}

fn pattern(re: &str) -> Regex {
    Regex::new(re).unwrap_or_else(|e| panic!("invalid pattern {:?}: {}", re, e))
}
