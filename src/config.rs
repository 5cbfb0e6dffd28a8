use crate::error::ConfigError;
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_ENDPOINT: &str = "https://twitter.com/i/search/timeline";
pub const DEFAULT_ORIGIN: &str = "https://twitter.com";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 6.1; Win64; x64)";
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "de,en-US;q=0.7,en;q=0.3";
pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub http: HttpConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Search timeline endpoint the paginated requests are sent to.
    pub endpoint: String,
    /// Prefix joined with each tweet's relative permalink path.
    pub origin: String,
    pub user_agent: String,
    pub accept_language: String,
    /// Unset means the HTTP client's default, which never times out.
    pub timeout_secs: Option<u64>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub batch_size: usize,
    pub max_pages: Option<usize>,
    pub stop_on_stuck_cursor: bool,
    pub skip_malformed: bool,
    /// IANA zone name used for the CSV date column. Unset means local time.
    pub timezone: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_pages: None,
            stop_on_stuck_cursor: true,
            skip_malformed: false,
            timezone: None,
        }
    }
}

impl Config {
    /// `~/.config/oldtweets/config.toml` on Linux, the platform equivalent elsewhere.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("oldtweets").join("config.toml"))
    }

    /// Load from an explicit path, or from [`Config::default_path`] when it exists.
    ///
    /// An explicit path that cannot be read is an error; a missing default
    /// file silently yields the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        self.display_zone()?;
        Ok(())
    }

    pub fn display_zone(&self) -> Result<DisplayZone, ConfigError> {
        match &self.run.timezone {
            None => Ok(DisplayZone::Local),
            Some(name) => name
                .parse::<Tz>()
                .map(DisplayZone::Named)
                .map_err(|_| ConfigError::UnknownTimezone(name.clone())),
        }
    }
}

/// Zone in which tweet timestamps are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayZone {
    #[default]
    Local,
    Named(Tz),
}

impl DisplayZone {
    pub fn wall_clock(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self {
            DisplayZone::Local => instant.with_timezone(&Local).naive_local(),
            DisplayZone::Named(tz) => instant.with_timezone(tz).naive_local(),
        }
    }
}
