use crate::config::{Config, DEFAULT_BATCH_SIZE};
use crate::error::{ConfigError, RunError};
use crate::export::TweetSink;
use crate::feeds::{PageOutcome, PageSource};
use crate::tweet::{SearchFilter, Tweet};
use crate::twitter_parser::TweetExtractor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Draining,
    Done,
    Aborted,
}

/// Why a successful run stopped asking for pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// `max_tweets` was zero or negative, nothing was requested.
    NothingRequested,
    /// The endpoint ran out of tweets.
    Exhausted,
    /// The endpoint refused further pages with this message.
    Throttled(String),
    /// `max_tweets` tweets were collected.
    LimitReached,
    /// The endpoint handed back the cursor it was given.
    StuckCursor,
    /// The configured page budget was used up.
    PageLimit,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub collected: usize,
    pub pages: usize,
    pub batches: usize,
    pub skipped: usize,
    pub termination: Termination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub batch_size: usize,
    pub max_pages: Option<usize>,
    pub stop_on_stuck_cursor: bool,
    pub skip_malformed: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_pages: None,
            stop_on_stuck_cursor: true,
            skip_malformed: false,
        }
    }
}

/// Walks the search pages one at a time, extracts every tweet and hands
/// them to a [`TweetSink`] in bounded batches.
pub struct PaginationEngine {
    extractor: TweetExtractor,
    options: EngineOptions,
    cancel: CancellationToken,
}

impl PaginationEngine {
    pub fn new(extractor: TweetExtractor, options: EngineOptions) -> Self {
        Self {
            extractor,
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let extractor = TweetExtractor::new(config.http.origin.clone(), config.display_zone()?);
        let options = EngineOptions {
            batch_size: config.run.batch_size,
            max_pages: config.run.max_pages,
            stop_on_stuck_cursor: config.run.stop_on_stuck_cursor,
            skip_malformed: config.run.skip_malformed,
        };
        Ok(Self::new(extractor, options))
    }

    /// Stop at the next page boundary once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Collect tweets for `filter` into `sink`.
    ///
    /// The sink is closed exactly once before this returns, whatever the
    /// outcome. On a fatal error the batch being filled is dropped unflushed.
    pub async fn run<S, K>(
        &self,
        filter: &SearchFilter,
        source: &S,
        sink: &mut K,
    ) -> Result<RunSummary, RunError>
    where
        S: PageSource + ?Sized,
        K: TweetSink + ?Sized,
    {
        let outcome = self.collect(filter, source, sink).await;
        let closed = sink.close();

        match (outcome, closed) {
            (Ok(summary), Ok(())) => {
                info!("Total results: {}", summary.collected);
                Ok(summary)
            }
            (Ok(_), Err(e)) => {
                error!("failed to close output: {}", e);
                Err(e.into())
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!("failed to close output after aborting: {}", close_err);
                Err(e)
            }
        }
    }

    async fn collect<S, K>(
        &self,
        filter: &SearchFilter,
        source: &S,
        sink: &mut K,
    ) -> Result<RunSummary, RunError>
    where
        S: PageSource + ?Sized,
        K: TweetSink + ?Sized,
    {
        let mut summary = RunSummary {
            collected: 0,
            pages: 0,
            batches: 0,
            skipped: 0,
            termination: Termination::NothingRequested,
        };
        if filter.max_tweets <= 0 {
            trace_state(RunState::Done);
            return Ok(summary);
        }
        filter.validate()?;

        let cap = usize::try_from(filter.max_tweets).unwrap_or(usize::MAX);
        let batch_size = self.options.batch_size.max(1);
        let mut cursor = String::new();
        let mut batch: Vec<Tweet> = Vec::with_capacity(batch_size.min(cap));

        let result = async {
            trace_state(RunState::Running);
            let termination = loop {
                if self.cancel.is_cancelled() {
                    break Termination::Cancelled;
                }
                if self
                    .options
                    .max_pages
                    .is_some_and(|max_pages| summary.pages >= max_pages)
                {
                    break Termination::PageLimit;
                }

                let outcome = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break Termination::Cancelled,
                    outcome = source.fetch_page(filter, &cursor) => outcome?,
                };
                summary.pages += 1;

                let (next_cursor, fragments) = match outcome {
                    PageOutcome::Continue {
                        cursor, fragments, ..
                    } => (cursor, fragments),
                    PageOutcome::Throttled(message) => {
                        warn!("{}", message);
                        break Termination::Throttled(message);
                    }
                    PageOutcome::Exhausted => break Termination::Exhausted,
                };
                debug!(
                    page = summary.pages,
                    tweets = fragments.len(),
                    cursor = ?next_cursor,
                    "received page"
                );
                let stuck = next_cursor.as_deref() == Some(cursor.as_str());
                let last_page = next_cursor.is_none();
                if let Some(next_cursor) = next_cursor {
                    cursor = next_cursor;
                }

                let mut limit_reached = false;
                for (index, fragment) in fragments.iter().enumerate() {
                    let tweet = match self.extractor.extract(fragment) {
                        Ok(tweet) => tweet,
                        Err(e) => {
                            let e = e.at(summary.pages, index);
                            if self.options.skip_malformed {
                                warn!("skipping {}", e);
                                summary.skipped += 1;
                                continue;
                            }
                            return Err(RunError::from(e));
                        }
                    };

                    batch.push(tweet);
                    summary.collected += 1;
                    if batch.len() >= batch_size {
                        sink.flush(std::mem::take(&mut batch))?;
                        summary.batches += 1;
                    }
                    if summary.collected >= cap {
                        limit_reached = true;
                        break;
                    }
                }

                if limit_reached {
                    break Termination::LimitReached;
                }
                if last_page {
                    break Termination::Exhausted;
                }
                if stuck && self.options.stop_on_stuck_cursor {
                    warn!("endpoint returned the same cursor {:?} again, stopping", cursor);
                    break Termination::StuckCursor;
                }
            };
            Ok(termination)
        }
        .await;

        let termination = match result {
            Ok(termination) => termination,
            Err(e) => {
                trace_state(RunState::Aborted);
                error!("stopped at cursor {:?}: {}", cursor, e);
                return Err(e);
            }
        };

        trace_state(RunState::Draining);
        if !batch.is_empty() {
            sink.flush(batch)?;
            summary.batches += 1;
        }
        trace_state(RunState::Done);

        summary.termination = termination;
        Ok(summary)
    }
}

fn trace_state(state: RunState) {
    debug!(?state, "pagination state");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DisplayZone;
    use crate::error::{FetchError, FragmentPosition, SinkError};
    use crate::twitter_parser::tests::tweet_fragment;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned page outcomes and records the cursors it was asked for.
    #[derive(Default)]
    struct ScriptedSource {
        pages: Mutex<VecDeque<Result<PageOutcome, FetchError>>>,
        cursors: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Result<PageOutcome, FetchError>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                cursors: Mutex::default(),
            }
        }

        fn requested(&self) -> Vec<String> {
            self.cursors.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageSource for ScriptedSource {
        async fn fetch_page(&self, _filter: &SearchFilter, cursor: &str) -> Result<PageOutcome, FetchError> {
            self.cursors.lock().unwrap().push(cursor.to_string());
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(PageOutcome::Exhausted))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        batches: Vec<Vec<Tweet>>,
        closes: usize,
        fail_flush: bool,
    }

    impl RecordingSink {
        fn batch_sizes(&self) -> Vec<usize> {
            self.batches.iter().map(Vec::len).collect()
        }
    }

    impl TweetSink for RecordingSink {
        fn flush(&mut self, batch: Vec<Tweet>) -> Result<(), SinkError> {
            assert!(!batch.is_empty(), "flushed an empty batch");
            if self.fail_flush {
                return Err(SinkError::Io {
                    path: "recording".to_string(),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.batches.push(batch);
            Ok(())
        }

        fn close(&mut self) -> Result<(), SinkError> {
            self.closes += 1;
            Ok(())
        }
    }

    fn page(cursor: &str, ids: std::ops::Range<u32>) -> Result<PageOutcome, FetchError> {
        Ok(PageOutcome::Continue {
            cursor: Some(cursor.to_string()),
            fragments: ids
                .map(|id| tweet_fragment(&id.to_string(), Some("3")))
                .collect(),
            raw: serde_json::Value::Null,
        })
    }

    fn engine(options: EngineOptions) -> PaginationEngine {
        PaginationEngine::new(
            TweetExtractor::new("https://twitter.com", DisplayZone::Named(chrono_tz::UTC)),
            options,
        )
    }

    fn filter(max_tweets: i64) -> SearchFilter {
        SearchFilter {
            query: Some("#test".to_string()),
            max_tweets,
            ..SearchFilter::default()
        }
    }

    #[tokio::test]
    async fn test_non_positive_max_does_nothing() {
        for max in [0, -5] {
            let source = ScriptedSource::new(vec![page("c1", 0..3)]);
            let mut sink = RecordingSink::default();

            let summary = engine(EngineOptions::default())
                .run(&filter(max), &source, &mut sink)
                .await
                .unwrap();

            assert_eq!(summary.termination, Termination::NothingRequested);
            assert_eq!(summary.collected, 0);
            assert!(source.requested().is_empty());
            assert!(sink.batches.is_empty());
            assert_eq!(sink.closes, 1);
        }
    }

    #[tokio::test]
    async fn test_single_tweet_query() {
        let source = ScriptedSource::new(vec![page("c1", 0..1)]);
        let mut sink = RecordingSink::default();

        let summary = engine(EngineOptions::default())
            .run(&filter(1), &source, &mut sink)
            .await
            .unwrap();

        assert_eq!(summary.collected, 1);
        assert_eq!(summary.termination, Termination::LimitReached);
        assert_eq!(sink.batch_sizes(), vec![1]);
        assert_eq!(sink.closes, 1);
        assert_eq!(source.requested(), vec![""]);
    }

    #[tokio::test]
    async fn test_empty_first_page() {
        let source = ScriptedSource::new(vec![Ok(PageOutcome::Exhausted)]);
        let mut sink = RecordingSink::default();

        let summary = engine(EngineOptions::default())
            .run(&filter(100), &source, &mut sink)
            .await
            .unwrap();

        assert_eq!(summary.termination, Termination::Exhausted);
        assert_eq!(summary.collected, 0);
        assert!(sink.batches.is_empty());
        assert_eq!(sink.closes, 1);
    }

    #[tokio::test]
    async fn test_throttle_flushes_pending_batch_once() {
        let source = ScriptedSource::new(vec![
            page("c1", 0..3),
            Ok(PageOutcome::Throttled("rate limited".to_string())),
        ]);
        let mut sink = RecordingSink::default();

        let summary = engine(EngineOptions::default())
            .run(&filter(100), &source, &mut sink)
            .await
            .unwrap();

        assert_eq!(
            summary.termination,
            Termination::Throttled("rate limited".to_string())
        );
        assert_eq!(sink.batch_sizes(), vec![3]);
        assert_eq!(sink.closes, 1);
        assert_eq!(source.requested(), vec!["", "c1"]);
    }

    #[tokio::test]
    async fn test_malformed_fragment_aborts_without_flush() {
        let source = ScriptedSource::new(vec![Ok(PageOutcome::Continue {
            cursor: Some("c1".to_string()),
            fragments: vec![tweet_fragment("1", Some("3")), tweet_fragment("2", None)],
            raw: serde_json::Value::Null,
        })]);
        let mut sink = RecordingSink::default();

        let err = engine(EngineOptions::default())
            .run(&filter(100), &source, &mut sink)
            .await
            .unwrap_err();

        match err {
            RunError::Extraction(e) => {
                assert_eq!(e.field, "retweet count");
                assert_eq!(e.tweet_id.as_deref(), Some("2"));
                assert_eq!(e.position, Some(FragmentPosition { page: 1, index: 1 }));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(sink.batches.is_empty());
        assert_eq!(sink.closes, 1);
    }

    #[tokio::test]
    async fn test_fragment_without_id_is_located() {
        let anonymous = tweet_fragment("7", Some("3")).replacen(r#"data-tweet-id="7" "#, "", 1);
        let source = ScriptedSource::new(vec![
            page("c1", 0..2),
            Ok(PageOutcome::Continue {
                cursor: Some("c2".to_string()),
                fragments: vec![tweet_fragment("5", Some("3")), anonymous],
                raw: serde_json::Value::Null,
            }),
        ]);
        let mut sink = RecordingSink::default();

        let err = engine(EngineOptions::default())
            .run(&filter(100), &source, &mut sink)
            .await
            .unwrap_err();

        match err {
            RunError::Extraction(e) => {
                assert_eq!(e.field, "data-tweet-id");
                assert_eq!(e.tweet_id, None);
                assert_eq!(e.position, Some(FragmentPosition { page: 2, index: 1 }));
                assert!(e.to_string().contains("(page 2, fragment 1)"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(sink.closes, 1);
    }

    #[tokio::test]
    async fn test_skip_malformed_when_configured() {
        let source = ScriptedSource::new(vec![Ok(PageOutcome::Continue {
            cursor: Some("c1".to_string()),
            fragments: vec![tweet_fragment("1", Some("3")), tweet_fragment("2", None)],
            raw: serde_json::Value::Null,
        })]);
        let mut sink = RecordingSink::default();
        let options = EngineOptions {
            skip_malformed: true,
            ..EngineOptions::default()
        };

        let summary = engine(options)
            .run(&filter(100), &source, &mut sink)
            .await
            .unwrap();

        assert_eq!(summary.collected, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(sink.batch_sizes(), vec![1]);
    }

    #[tokio::test]
    async fn test_cap_reached_mid_page_with_bounded_batches() {
        let source = ScriptedSource::new(vec![page("c1", 0..5), page("c2", 5..10)]);
        let mut sink = RecordingSink::default();
        let options = EngineOptions {
            batch_size: 3,
            ..EngineOptions::default()
        };

        let summary = engine(options)
            .run(&filter(7), &source, &mut sink)
            .await
            .unwrap();

        assert_eq!(summary.collected, 7);
        assert_eq!(summary.termination, Termination::LimitReached);
        assert_eq!(sink.batch_sizes(), vec![3, 3, 1]);
        assert_eq!(source.requested(), vec!["", "c1"]);

        let ids: Vec<&str> = sink.batches.iter().flatten().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4", "5", "6"]);
    }

    #[tokio::test]
    async fn test_total_is_all_fragments_when_under_cap() {
        let source = ScriptedSource::new(vec![page("c1", 0..4), page("c2", 4..8)]);
        let mut sink = RecordingSink::default();
        let options = EngineOptions {
            batch_size: 3,
            ..EngineOptions::default()
        };

        let summary = engine(options)
            .run(&filter(100), &source, &mut sink)
            .await
            .unwrap();

        assert_eq!(summary.collected, 8);
        assert_eq!(summary.termination, Termination::Exhausted);
        assert_eq!(sink.batch_sizes(), vec![3, 3, 2]);
        assert_eq!(summary.batches, 3);
        assert_eq!(source.requested(), vec!["", "c1", "c2"]);
    }

    #[tokio::test]
    async fn test_fetch_error_drops_partial_batch() {
        let source = ScriptedSource::new(vec![
            page("c1", 0..2),
            Err(FetchError::InvalidEndpoint("gone".to_string())),
        ]);
        let mut sink = RecordingSink::default();

        let err = engine(EngineOptions::default())
            .run(&filter(100), &source, &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Fetch(FetchError::InvalidEndpoint(_))));
        assert!(sink.batches.is_empty());
        assert_eq!(sink.closes, 1);
    }

    #[tokio::test]
    async fn test_stuck_cursor_stops_after_repeat() {
        let source = ScriptedSource::new(vec![
            page("same", 0..2),
            page("same", 2..4),
            page("same", 4..6),
        ]);
        let mut sink = RecordingSink::default();

        let summary = engine(EngineOptions::default())
            .run(&filter(100), &source, &mut sink)
            .await
            .unwrap();

        assert_eq!(summary.termination, Termination::StuckCursor);
        assert_eq!(summary.pages, 2);
        assert_eq!(summary.collected, 4);
        assert_eq!(sink.batch_sizes(), vec![4]);
    }

    #[tokio::test]
    async fn test_page_limit() {
        let source = ScriptedSource::new(vec![page("c1", 0..2), page("c2", 2..4)]);
        let mut sink = RecordingSink::default();
        let options = EngineOptions {
            max_pages: Some(1),
            ..EngineOptions::default()
        };

        let summary = engine(options)
            .run(&filter(100), &source, &mut sink)
            .await
            .unwrap();

        assert_eq!(summary.termination, Termination::PageLimit);
        assert_eq!(source.requested(), vec![""]);
        assert_eq!(sink.batch_sizes(), vec![2]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let source = ScriptedSource::new(vec![page("c1", 0..2)]);
        let mut sink = RecordingSink::default();

        let summary = engine(EngineOptions::default())
            .with_cancellation(token)
            .run(&filter(100), &source, &mut sink)
            .await
            .unwrap();

        assert_eq!(summary.termination, Termination::Cancelled);
        assert!(source.requested().is_empty());
        assert_eq!(sink.closes, 1);
    }

    /// Serves one page, then cancels the run while the next fetch is pending.
    struct CancellingSource {
        token: CancellationToken,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl PageSource for CancellingSource {
        async fn fetch_page(&self, _filter: &SearchFilter, _cursor: &str) -> Result<PageOutcome, FetchError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if call == 1 {
                return page("c1", 0..3);
            }
            self.token.cancel();
            std::future::pending::<()>().await;
            unreachable!("a cancelled fetch is never polled to completion")
        }
    }

    #[tokio::test]
    async fn test_cancelled_mid_run_flushes_collected() {
        let token = CancellationToken::new();
        let source = CancellingSource {
            token: token.clone(),
            calls: Mutex::new(0),
        };
        let mut sink = RecordingSink::default();

        let summary = engine(EngineOptions::default())
            .with_cancellation(token)
            .run(&filter(100), &source, &mut sink)
            .await
            .unwrap();

        assert_eq!(summary.termination, Termination::Cancelled);
        assert_eq!(summary.collected, 3);
        assert_eq!(sink.batch_sizes(), vec![3]);
        assert_eq!(sink.closes, 1);
        assert_eq!(*source.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_page_without_cursor_is_last() {
        let source = ScriptedSource::new(vec![
            Ok(PageOutcome::Continue {
                cursor: None,
                fragments: vec![tweet_fragment("1", Some("3")), tweet_fragment("2", Some("0"))],
                raw: serde_json::Value::Null,
            }),
            page("c2", 2..4),
        ]);
        let mut sink = RecordingSink::default();

        let summary = engine(EngineOptions::default())
            .run(&filter(100), &source, &mut sink)
            .await
            .unwrap();

        assert_eq!(summary.termination, Termination::Exhausted);
        assert_eq!(summary.collected, 2);
        assert_eq!(sink.batch_sizes(), vec![2]);
        assert_eq!(source.requested(), vec![""]);
        assert_eq!(sink.closes, 1);
    }

    #[tokio::test]
    async fn test_missing_author_and_query_fails_before_fetch() {
        let source = ScriptedSource::new(vec![page("c1", 0..2)]);
        let mut sink = RecordingSink::default();

        let err = engine(EngineOptions::default())
            .run(&SearchFilter::default(), &source, &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RunError::Config(ConfigError::MissingAuthorOrQuery)
        ));
        assert!(source.requested().is_empty());
        assert_eq!(sink.closes, 1);
    }

    #[tokio::test]
    async fn test_flush_failure_still_closes() {
        let source = ScriptedSource::new(vec![page("c1", 0..2)]);
        let mut sink = RecordingSink {
            fail_flush: true,
            ..RecordingSink::default()
        };

        let err = engine(EngineOptions::default())
            .run(&filter(2), &source, &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Sink(_)));
        assert_eq!(sink.closes, 1);
    }

    #[test]
    fn test_from_config_rejects_zero_batch() {
        let mut config = Config::default();
        config.run.batch_size = 0;
        assert!(matches!(
            PaginationEngine::from_config(&config),
            Err(ConfigError::ZeroBatchSize)
        ));
    }
}
