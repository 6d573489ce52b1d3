use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Config, Github};
use crate::model::ReleaseInfo;

const GITHUB_API_BASE: &str = "https://api.github.com";
const GITHUB_WEB_BASE: &str = "https://github.com";

static TAG_REF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"refs/tags/([\w\-.]+)").expect("valid tag ref pattern"));

/// Failure to talk to the release host. The whole check is retried next sweep.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected status {status} from {url}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("invalid response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Source of "latest release" information for a repository short name.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// `Ok(None)` means the host knows no release or tag for this repository.
    async fn resolve(&self, short_name: &str) -> Result<Option<ReleaseInfo>, ResolveError>;
}

#[derive(Clone)]
pub struct GithubClient {
    http: Client,
    api_base: String,
    web_base: String,
    token: Option<String>,
}

impl fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubClient")
            .field("api_base", &self.api_base)
            .field("web_base", &self.web_base)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct LatestReleaseResp {
    #[serde(default)]
    tag_name: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
}

#[derive(Deserialize)]
struct TagRef {
    #[serde(rename = "ref")]
    reference: String,
}

impl GithubClient {
    pub fn new(token: Option<String>) -> Result<Self> {
        Self::with_base_urls(GITHUB_API_BASE, GITHUB_WEB_BASE, token)
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::from_github(&cfg.github)
    }

    pub fn from_github(github: &Github) -> Result<Self> {
        Self::with_base_urls(&github.api_url, &github.web_url, github.token.clone())
    }

    pub fn with_base_urls(api_base: &str, web_base: &str, token: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("release-watchbot/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            web_base: web_base.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    /// Tier 1: the repository's "latest release".
    pub async fn latest_release(&self, short_name: &str) -> Result<Option<ReleaseInfo>, ResolveError> {
        let url = format!("{}/repos/{}/releases/latest", self.api_base, short_name);
        let Some(resp) = self.get_json::<LatestReleaseResp>(&url).await? else {
            return Ok(None);
        };
        let Some(tag_name) = resp.tag_name.filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        let source_url = resp
            .html_url
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| self.release_tag_url(short_name, &tag_name));
        Ok(Some(ReleaseInfo {
            tag_name,
            source_url,
        }))
    }

    /// Tier 2: the greatest tag ref, compared as raw strings.
    pub async fn latest_tag(&self, short_name: &str) -> Result<Option<ReleaseInfo>, ResolveError> {
        let url = format!("{}/repos/{}/git/refs/tags", self.api_base, short_name);
        let refs = self
            .get_json::<Vec<TagRef>>(&url)
            .await?
            .unwrap_or_default();
        if refs.is_empty() {
            warn!(repo = short_name, "no tags found");
            return Ok(None);
        }
        let Some(tag_name) = latest_tag_name(refs.into_iter().map(|r| r.reference).collect())
        else {
            warn!(repo = short_name, "no tag ref matched the tag pattern");
            return Ok(None);
        };
        Ok(Some(ReleaseInfo {
            source_url: self.release_tag_url(short_name, &tag_name),
            tag_name,
        }))
    }

    pub fn release_tag_url(&self, short_name: &str, tag_name: &str) -> String {
        format!("{}/{}/releases/tag/{}", self.web_base, short_name, tag_name)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, ResolveError> {
        let mut request = self
            .http
            .get(url)
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let transport = |source| ResolveError::Transport {
            url: url.to_string(),
            source,
        };

        debug!(url, "requesting release host");
        let res = request.send().await.map_err(transport)?;
        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            debug!(url, "release host has nothing here");
            return Ok(None);
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ResolveError::Status {
                url: url.to_string(),
                status,
                body,
            });
        }

        let body = res.bytes().await.map_err(transport)?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|source| ResolveError::Decode {
                url: url.to_string(),
                source,
            })
    }
}

#[async_trait]
impl ReleaseSource for GithubClient {
    async fn resolve(&self, short_name: &str) -> Result<Option<ReleaseInfo>, ResolveError> {
        if let Some(info) = self.latest_release(short_name).await? {
            return Ok(Some(info));
        }
        self.latest_tag(short_name).await
    }
}

/// Sort refs in descending lexicographic order and return the name of the
/// first `refs/tags/<name>` entry. `v10.0.0` sorts below `v9.0.0`.
pub fn latest_tag_name(mut refs: Vec<String>) -> Option<String> {
    refs.sort_unstable_by(|a, b| b.cmp(a));
    refs.iter().find_map(|reference| {
        TAG_REF_PATTERN
            .captures(reference)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}
