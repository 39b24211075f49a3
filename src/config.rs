use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::feeds::Category;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Snapshot refresh interval in minutes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Per-feed request timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    pub feeds: Vec<FeedSource>,
    #[serde(default)]
    pub fixtures: FixturesConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
}

fn default_refresh_interval() -> u64 {
    5
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    "PompeyNews/1.0".to_string()
}

/// A configured origin of syndicated content.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub name: String,
    /// Human-facing site link
    pub url: String,
    pub rss_url: String,
    pub category: Category,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FixturesConfig {
    #[serde(default = "default_team_id")]
    pub team_id: u32,
    #[serde(default = "default_competition_id")]
    pub competition_id: u32,
    #[serde(default = "default_fixtures_base_url")]
    pub base_url: String,
    #[serde(default = "default_fixture_limit")]
    pub fixture_limit: usize,
    #[serde(default = "default_result_limit")]
    pub result_limit: usize,
}

fn default_team_id() -> u32 {
    389
}

fn default_competition_id() -> u32 {
    2016
}

fn default_fixtures_base_url() -> String {
    "https://api.football-data.org/v4".to_string()
}

fn default_fixture_limit() -> usize {
    3
}

fn default_result_limit() -> usize {
    5
}

impl Default for FixturesConfig {
    fn default() -> Self {
        Self {
            team_id: default_team_id(),
            competition_id: default_competition_id(),
            base_url: default_fixtures_base_url(),
            fixture_limit: default_fixture_limit(),
            result_limit: default_result_limit(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummaryConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_headlines")]
    pub max_headlines: usize,
    #[serde(default = "default_summary_base_url")]
    pub base_url: String,
    /// Requests allowed per client within one window
    #[serde(default = "default_per_client_limit")]
    pub per_client_limit: u32,
    #[serde(default = "default_window_minutes")]
    pub window_minutes: i64,
    /// Requests allowed across all clients per calendar day (UTC)
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
}

fn default_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_max_tokens() -> u32 {
    600
}

fn default_max_headlines() -> usize {
    15
}

fn default_summary_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_per_client_limit() -> u32 {
    10
}

fn default_window_minutes() -> i64 {
    60
}

fn default_daily_limit() -> u32 {
    100
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            max_headlines: default_max_headlines(),
            base_url: default_summary_base_url(),
            per_client_limit: default_per_client_limit(),
            window_minutes: default_window_minutes(),
            daily_limit: default_daily_limit(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("duplicate feed name: {0}")]
    DuplicateFeed(String),
    #[error("feed '{0}' has an empty rss_url")]
    EmptyFeedUrl(String),
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for feed in &self.feeds {
            if feed.rss_url.trim().is_empty() {
                return Err(ConfigError::EmptyFeedUrl(feed.name.clone()));
            }
            if !names.insert(feed.name.as_str()) {
                return Err(ConfigError::DuplicateFeed(feed.name.clone()));
            }
        }
        Ok(())
    }
}

/// Secrets and deployment settings read from the environment.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub football_data_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub site_password: Option<String>,
    pub production: bool,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            football_data_api_key: non_empty_var("FOOTBALL_DATA_API_KEY"),
            anthropic_api_key: non_empty_var("ANTHROPIC_API_KEY"),
            site_password: non_empty_var("SITE_PASSWORD"),
            production: std::env::var("APP_ENV").is_ok_and(|v| v == "production"),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
