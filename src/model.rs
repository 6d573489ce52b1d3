use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Default accepted subscription URL: `https://github.com/<owner>/<name>`.
pub const GITHUB_REPOSITORY_PATTERN: &str = r"^https://github\.com/([\w-]+/[\w-]+)$";

static GITHUB_PATTERN: Lazy<RepoUrlPattern> = Lazy::new(|| {
    RepoUrlPattern::new(GITHUB_REPOSITORY_PATTERN).expect("valid built-in repository pattern")
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub external_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct TrackedRepository {
    pub id: i64,
    pub url: String,
    pub short_name: String,
    pub latest_tag: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrackedRepository {
    /// True when `tag` is already the stored latest tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.latest_tag.as_deref() == Some(tag)
    }
}

/// Latest release of one repository as reported upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub tag_name: String,
    pub source_url: String,
}

/// A subscription URL accepted from user input, with its `owner/name` part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoUrl<'a> {
    pub url: &'a str,
    pub short_name: &'a str,
}

/// Accepted repository URL pattern. Capture group 1 is the short name.
#[derive(Debug, Clone)]
pub struct RepoUrlPattern {
    regex: Regex,
}

impl RepoUrlPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(pattern)?;
        if regex.captures_len() < 2 {
            return Err(regex::Error::Syntax(format!(
                "pattern {pattern} has no capture group for the short name"
            )));
        }
        Ok(Self { regex })
    }

    /// The stock `https://github.com/<owner>/<name>` pattern.
    pub fn github() -> Self {
        GITHUB_PATTERN.clone()
    }

    /// Build the pattern for a GitHub-compatible web host such as
    /// `https://github.example.com`.
    pub fn for_web_url(web_url: &str) -> Result<Self, regex::Error> {
        let base = regex::escape(web_url.trim_end_matches('/'));
        Self::new(&format!(r"^{base}/([\w-]+/[\w-]+)$"))
    }

    pub fn parse<'a>(&self, token: &'a str) -> Option<RepoUrl<'a>> {
        let caps = self.regex.captures(token)?;
        let short_name = caps.get(1)?.as_str();
        Some(RepoUrl {
            url: token,
            short_name,
        })
    }

    /// Split free-form text on whitespace and keep the tokens that match.
    /// Rejected tokens are returned separately so callers can log them.
    pub fn extract<'a>(&self, text: &'a str) -> (Vec<RepoUrl<'a>>, Vec<&'a str>) {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for token in text.split_whitespace() {
            match self.parse(token) {
                Some(repo) => accepted.push(repo),
                None => rejected.push(token),
            }
        }
        (accepted, rejected)
    }
}
