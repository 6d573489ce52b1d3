//! Release monitor: periodic sweeps over all tracked repositories.
//!
//! Two idle gaps drive the loop. The survey period separates full sweeps, the
//! fetch-step period separates consecutive upstream requests inside a sweep.
//! Both are measured from the end of the previous unit of work, so a slow
//! request never shortens the pause before the next one. Repositories are
//! checked strictly one at a time; that serialization is what keeps the
//! upstream request rate under its ceiling.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use teloxide::utils::html;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::db::{self, Pool};
use crate::github::ReleaseSource;
use crate::model::{ReleaseInfo, TrackedRepository};
use crate::notifier::Notifier;

const DEFAULT_SURVEY_PERIOD: Duration = Duration::from_secs(3600);
const DEFAULT_FETCH_STEP_PERIOD: Duration = Duration::from_secs(60);

/// Terminal transition of one repository check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Neither the release nor the tag lookup returned anything.
    NoRelease,
    /// The resolved tag equals the stored one; nothing was written or sent.
    Unchanged,
    /// The tag was persisted and subscribers were notified.
    Updated {
        tag: String,
        notified: usize,
        failed: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed { checked: usize },
    Cancelled { checked: usize },
}

pub struct ReleaseMonitor {
    pool: Pool,
    source: Arc<dyn ReleaseSource>,
    notifier: Arc<dyn Notifier>,
    survey_period: Duration,
    fetch_step_period: Duration,
}

impl ReleaseMonitor {
    pub fn new(pool: Pool, source: Arc<dyn ReleaseSource>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            pool,
            source,
            notifier,
            survey_period: DEFAULT_SURVEY_PERIOD,
            fetch_step_period: DEFAULT_FETCH_STEP_PERIOD,
        }
    }

    pub fn with_periods(mut self, survey_period: Duration, fetch_step_period: Duration) -> Self {
        self.survey_period = survey_period;
        self.fetch_step_period = fetch_step_period;
        self
    }

    /// Sweep until `cancel` fires. The first sweep starts right away.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            survey_secs = self.survey_period.as_secs(),
            fetch_step_secs = self.fetch_step_period.as_secs(),
            "starting release monitor"
        );
        loop {
            if let SweepOutcome::Cancelled { .. } = self.sweep(&cancel).await {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.survey_period) => {}
            }
        }
        info!("release monitor stopped");
    }

    /// One pass over every tracked repository. A failing repository is logged
    /// and skipped; cancellation stops before the next repository.
    pub async fn sweep(&self, cancel: &CancellationToken) -> SweepOutcome {
        info!("start repos data collection");
        let repositories = match db::list_repositories(&self.pool).await {
            Ok(repositories) => repositories,
            Err(err) => {
                error!(?err, "repositories selection failed");
                return SweepOutcome::Completed { checked: 0 };
            }
        };

        let mut checked = 0;
        for repository in &repositories {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(checked, "data collection cancelled");
                    return SweepOutcome::Cancelled { checked };
                }
                _ = tokio::time::sleep(self.fetch_step_period) => {}
            }

            match self.check_repository(repository).await {
                Ok(outcome) => debug!(repo = %repository.short_name, ?outcome, "repository checked"),
                Err(err) => error!(repo = %repository.short_name, ?err, "data collection error"),
            }
            checked += 1;
        }

        info!(checked, "repos data collection completed");
        SweepOutcome::Completed { checked }
    }

    #[instrument(skip_all, fields(repo = %repository.short_name))]
    pub async fn check_repository(&self, repository: &TrackedRepository) -> Result<CheckOutcome> {
        let release = self
            .source
            .resolve(&repository.short_name)
            .await
            .with_context(|| format!("cannot get latest tag for {}", repository.short_name))?;
        let Some(release) = release else {
            info!("no release or tag published");
            return Ok(CheckOutcome::NoRelease);
        };

        if repository.has_tag(&release.tag_name) {
            info!(tag = %release.tag_name, "tag exists");
            return Ok(CheckOutcome::Unchanged);
        }

        db::update_tag(&self.pool, repository.id, &release.tag_name).await?;
        let subscribers = db::list_subscribers(&self.pool, repository.id)
            .await
            .context("get subscribers failed")?;

        let text = release_message(&release);
        let mut notified = 0;
        let mut failed = 0;
        for user in &subscribers {
            match self.notifier.send(user.external_id, &text, false).await {
                Ok(()) => {
                    notified += 1;
                    info!(receiver = user.external_id, "sent release to user");
                }
                Err(err) => {
                    failed += 1;
                    warn!(receiver = user.external_id, ?err, "send message failed");
                }
            }
        }

        info!(tag = %release.tag_name, notified, failed, "new tag recorded");
        Ok(CheckOutcome::Updated {
            tag: release.tag_name,
            notified,
            failed,
        })
    }
}

pub fn release_message(release: &ReleaseInfo) -> String {
    format!("<b>Release tag</b>: {}", html::escape(&release.source_url))
}
