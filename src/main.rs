use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use release_watchbot::commands::BotState;
use release_watchbot::github::GithubClient;
use release_watchbot::monitor::ReleaseMonitor;
use release_watchbot::notifier::TelegramNotifier;
use release_watchbot::{config, db, handlers};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;
    let pattern = cfg.repo_pattern()?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let github = GithubClient::from_config(&cfg)?;
    let monitor = ReleaseMonitor::new(
        pool.clone(),
        Arc::new(github),
        Arc::new(TelegramNotifier::new(bot.clone())),
    )
    .with_periods(cfg.survey_period(), cfg.fetch_step_period());

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    let monitor_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { monitor.run(cancel).await }
    });
    let bot_task = tokio::spawn(handlers::run(
        bot,
        BotState::new(pool.clone(), pattern),
        cancel.clone(),
    ));

    let (monitor_res, bot_res) = tokio::join!(monitor_task, bot_task);
    for res in [monitor_res, bot_res] {
        if let Err(err) = res {
            error!(?err, "task exited abnormally");
        }
    }

    pool.close().await;
    info!("shutdown complete");
    Ok(())
}

/// Cancel `cancel` on Ctrl-C or SIGTERM.
async fn shutdown_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(?err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!(?err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
    cancel.cancel();
}
