use crate::error::SinkError;
use crate::tweet::Tweet;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::info;

pub const DEFAULT_OUTPUT_FILE: &str = "tweets_gathered.csv";

pub const CSV_HEADER: [&str; 12] = [
    "username",
    "user_handle",
    "date",
    "retweets",
    "favorites",
    "text",
    "language",
    "geological_location",
    "mentions",
    "hashtags",
    "tweet_id",
    "permalink",
];

/// Durable destination for collected tweets.
///
/// `flush` is handed ownership of each batch and is never called with an
/// empty one. `close` is called exactly once per run, on every exit path.
pub trait TweetSink {
    fn flush(&mut self, batch: Vec<Tweet>) -> Result<(), SinkError>;
    fn close(&mut self) -> Result<(), SinkError>;
}

/// Writes tweets as comma separated rows with `\n` line endings.
pub struct CsvExporter<W: Write> {
    label: String,
    writer: Option<csv::Writer<W>>,
    rows_written: usize,
}

impl CsvExporter<File> {
    /// Create (or truncate) `path` and write the header row.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| SinkError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_writer(file, path.display().to_string())
    }
}

impl<W: Write> CsvExporter<W> {
    pub fn from_writer(inner: W, label: impl Into<String>) -> Result<Self, SinkError> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b',')
            .quote(b'"')
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(inner);
        writer.write_record(CSV_HEADER)?;

        Ok(Self {
            label: label.into(),
            writer: Some(writer),
            rows_written: 0,
        })
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    fn io_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            path: self.label.clone(),
            source,
        }
    }
}

impl<W: Write> TweetSink for CsvExporter<W> {
    fn flush(&mut self, batch: Vec<Tweet>) -> Result<(), SinkError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(SinkError::Closed(self.label.clone()));
        };

        for tweet in &batch {
            let date = tweet.posted_at.format("%Y-%m-%d %H:%M").to_string();
            let retweets = tweet.retweets.to_string();
            let favorites = tweet.favorites.to_string();
            let mentions = tweet.mentions_joined();
            let hashtags = tweet.hashtags_joined();
            writer.write_record([
                tweet.author_name.as_str(),
                tweet.author_handle.as_str(),
                date.as_str(),
                retweets.as_str(),
                favorites.as_str(),
                tweet.text.as_str(),
                tweet.language.as_str(),
                tweet.geo_location.as_str(),
                mentions.as_str(),
                hashtags.as_str(),
                tweet.id.as_str(),
                tweet.permalink.as_str(),
            ])?;
        }
        if let Err(e) = writer.flush() {
            return Err(self.io_error(e));
        }

        self.rows_written += batch.len();
        info!("{} tweets added to file", batch.len());
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        match self.writer.take() {
            Some(mut writer) => writer.flush().map_err(|e| self.io_error(e)),
            None => Ok(()),
        }
    }
}
