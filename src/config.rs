//! Configuration loader and validator for the release watch bot.
use crate::model::RepoUrlPattern;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_SURVEY_PERIOD_SECS: u64 = 3600;
const DEFAULT_FETCH_STEP_PERIOD_SECS: u64 = 60;
const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_WEB_URL: &str = "https://github.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("Invalid repository pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    #[serde(default)]
    pub github: Github,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Idle gap between two full sweeps over all repositories.
    #[serde(default = "default_survey_period_secs")]
    pub survey_period_secs: u64,
    /// Idle gap between two upstream requests within one sweep.
    #[serde(default = "default_fetch_step_period_secs")]
    pub fetch_step_period_secs: u64,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
}

/// Upstream release host settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Github {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_web_url")]
    pub web_url: String,
    /// Optional API token; raises the upstream rate limit when set.
    #[serde(default)]
    pub token: Option<String>,
    /// Overrides the accepted subscription URL pattern derived from `web_url`.
    #[serde(default)]
    pub repository_pattern: Option<String>,
}

/// Only the `github` section; the other sections may be absent.
#[derive(Debug, Deserialize)]
struct GithubSection {
    #[serde(default)]
    github: Github,
}

impl Default for Github {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            web_url: default_web_url(),
            token: None,
            repository_pattern: None,
        }
    }
}

fn default_survey_period_secs() -> u64 {
    DEFAULT_SURVEY_PERIOD_SECS
}

fn default_fetch_step_period_secs() -> u64 {
    DEFAULT_FETCH_STEP_PERIOD_SECS
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_web_url() -> String {
    DEFAULT_WEB_URL.to_string()
}

impl Github {
    /// Compile the accepted subscription URL pattern.
    pub fn repo_pattern(&self) -> Result<RepoUrlPattern, ConfigError> {
        let pattern = match self.repository_pattern.as_deref() {
            Some(custom) => RepoUrlPattern::new(custom)?,
            None => RepoUrlPattern::for_web_url(&self.web_url)?,
        };
        Ok(pattern)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn survey_period(&self) -> Duration {
        Duration::from_secs(self.app.survey_period_secs)
    }

    pub fn fetch_step_period(&self) -> Duration {
        Duration::from_secs(self.app.fetch_step_period_secs)
    }

    /// Default SQLite location inside the data directory.
    pub fn database_url(&self) -> String {
        format!(
            "sqlite://{}/watchbot.db",
            self.app.data_dir.trim_end_matches('/')
        )
    }

    pub fn repo_pattern(&self) -> Result<RepoUrlPattern, ConfigError> {
        self.github.repo_pattern()
    }

    /// Apply environment overrides (`TELEGRAM_API_KEY`).
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("TELEGRAM_API_KEY") {
            if !token.trim().is_empty() {
                self.telegram.bot_token = token;
            }
        }
    }
}

/// Load configuration from a YAML file, apply env overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env();
    validate(&cfg)?;
    Ok(cfg)
}

/// Load and validate just the `github` section of a config file.
pub fn load_github(path: &Path) -> Result<Github, ConfigError> {
    let content = fs::read_to_string(path)?;
    let section: GithubSection = serde_yaml::from_str(&content)?;
    validate_github(&section.github)?;
    Ok(section.github)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.survey_period_secs == 0 {
        return Err(ConfigError::Invalid("app.survey_period_secs must be > 0"));
    }
    if cfg.app.fetch_step_period_secs == 0 {
        return Err(ConfigError::Invalid("app.fetch_step_period_secs must be > 0"));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }

    validate_github(&cfg.github)
}

fn validate_github(github: &Github) -> Result<(), ConfigError> {
    if reqwest::Url::parse(&github.api_url).is_err() {
        return Err(ConfigError::Invalid("github.api_url must be a valid URL"));
    }
    if reqwest::Url::parse(&github.web_url).is_err() {
        return Err(ConfigError::Invalid("github.web_url must be a valid URL"));
    }
    github.repo_pattern()?;
    Ok(())
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  survey_period_secs: 3600
  fetch_step_period_secs: 60

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"

github:
  api_url: "https://api.github.com"
  web_url: "https://github.com"
"#
}
