use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{CommandFactory, Parser};
use oldtweets::export::DEFAULT_OUTPUT_FILE;
use oldtweets::{
    Config, ConfigError, CsvExporter, PaginationEngine, RunError, RunSummary, SearchFilter,
    SearchTimelineFetcher, Termination,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const EXAMPLES: &str = "\
Examples:
  # Tweets by username, at most one
  oldtweets --username \"barackobama\" --max-tweets 1

  # Tweets matching a query
  oldtweets --query \"#marcosNotAHero\" --max-tweets 1

  # Query bounded by dates
  oldtweets --query \"#BenhamRise\" --since 2016-01-01 --until 2017-04-01";

#[derive(Parser, Debug)]
#[command(name = "oldtweets", version)]
#[command(about = "Collect historical tweets from the Twitter search timeline into a CSV file")]
#[command(long_about = "Collect historical tweets from the Twitter search timeline into a CSV file.\n\n\
At least one of --username or --query must be given.")]
#[command(after_help = EXAMPLES)]
struct Cli {
    /// Twitter username whose tweets to collect
    #[arg(long)]
    username: Option<String>,

    /// Lower bound for the tweet date (YYYY-MM-DD)
    #[arg(long)]
    since: Option<NaiveDate>,

    /// Upper bound for the tweet date (YYYY-MM-DD)
    #[arg(long)]
    until: Option<NaiveDate>,

    /// Query text to search for
    #[arg(long)]
    query: Option<String>,

    /// Maximum number of tweets to retrieve
    #[arg(long, default_value_t = 100, allow_negative_numbers = true)]
    max_tweets: i64,

    /// CSV file the tweets are written to
    #[arg(long, default_value = DEFAULT_OUTPUT_FILE)]
    output_file: PathBuf,

    /// Restrict results to a language code, e.g. "en"
    #[arg(long)]
    lang: Option<String>,

    /// Config file (defaults to ~/.config/oldtweets/config.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log every request
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn filter(&self) -> SearchFilter {
        SearchFilter {
            username: self.username.clone(),
            since: self.since,
            until: self.until,
            query: self.query.clone(),
            max_tweets: self.max_tweets,
            language: self.lang.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    if std::env::args_os().len() <= 1 {
        println!("No arguments passed. Pass --help for more information on how to use oldtweets.\n");
        let _ = Cli::command().print_help();
        return ExitCode::SUCCESS;
    }

    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli).await {
        Ok(summary) => report(&cli, &summary),
        Err(e) => {
            eprintln!(
                "Unexpected error. Please try again. For more information on how to use oldtweets, pass --help."
            );
            eprintln!("{:#}", e);
            ExitCode::from(failure_code(&e))
        }
    }
}

async fn run(cli: &Cli) -> Result<RunSummary> {
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let filter = cli.filter();
    filter.validate()?;

    let cancel = CancellationToken::new();
    let engine = PaginationEngine::from_config(&config)?.with_cancellation(cancel.clone());
    let fetcher = SearchTimelineFetcher::new(&config.http)?;
    let mut exporter = CsvExporter::create(&cli.output_file)?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing the current batch");
            cancel.cancel();
        }
    });

    let summary = engine.run(&filter, &fetcher, &mut exporter).await?;
    Ok(summary)
}

fn report(cli: &Cli, summary: &RunSummary) -> ExitCode {
    info!(
        "Finished scraping data. Output file generated {} with {} {}",
        cli.output_file.display(),
        summary.collected,
        tweet_noun(summary.collected)
    );

    if summary.termination == Termination::Cancelled {
        ExitCode::from(130)
    } else {
        ExitCode::SUCCESS
    }
}

fn tweet_noun(count: usize) -> &'static str {
    if count == 1 {
        "tweet"
    } else {
        "tweets"
    }
}

/// 2 for misuse (bad filter or config), 1 for everything that went wrong mid-run.
fn failure_code(err: &anyhow::Error) -> u8 {
    let misuse = err.chain().any(|cause| {
        cause.downcast_ref::<ConfigError>().is_some()
            || matches!(cause.downcast_ref::<RunError>(), Some(RunError::Config(_)))
    });
    if misuse {
        2
    } else {
        1
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "info,oldtweets=debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_build_filter() {
        let cli = Cli::try_parse_from([
            "oldtweets",
            "--query",
            "#BenhamRise",
            "--since",
            "2016-01-01",
            "--until",
            "2017-04-01",
            "--max-tweets",
            "5",
            "--output-file",
            "out.csv",
        ])
        .unwrap();
        let filter = cli.filter();
        assert_eq!(filter.query.as_deref(), Some("#BenhamRise"));
        assert_eq!(filter.since, NaiveDate::from_ymd_opt(2016, 1, 1));
        assert_eq!(filter.max_tweets, 5);
        assert_eq!(cli.output_file, PathBuf::from("out.csv"));
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["oldtweets", "--username", "nasa"]).unwrap();
        assert_eq!(cli.max_tweets, 100);
        assert_eq!(cli.output_file, PathBuf::from(DEFAULT_OUTPUT_FILE));
    }

    #[test]
    fn test_bad_date_rejected() {
        assert!(Cli::try_parse_from(["oldtweets", "--query", "x", "--since", "yesterday"]).is_err());
    }

    #[test]
    fn test_tweet_noun() {
        assert_eq!(tweet_noun(0), "tweets");
        assert_eq!(tweet_noun(1), "tweet");
        assert_eq!(tweet_noun(2), "tweets");
    }

    #[test]
    fn test_failure_codes() {
        let misuse = anyhow::Error::from(ConfigError::MissingAuthorOrQuery);
        assert_eq!(failure_code(&misuse), 2);

        let wrapped = anyhow::Error::from(RunError::Config(ConfigError::ZeroBatchSize));
        assert_eq!(failure_code(&wrapped), 2);

        let fetch = anyhow::Error::from(RunError::Fetch(oldtweets::FetchError::InvalidEndpoint(
            "gone".to_string(),
        )));
        assert_eq!(failure_code(&fetch), 1);
    }
}
