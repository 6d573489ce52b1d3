use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use release_watchbot::config;
use release_watchbot::github::{GithubClient, ReleaseSource};

#[derive(Parser, Debug)]
#[command(about = "Resolve the latest release of one repository and exit")]
struct Args {
    /// Path to YAML config; GitHub defaults are used when it is absent
    #[arg(long)]
    config: Option<PathBuf>,

    /// Repository short name, e.g. `rust-lang/rust`
    repo: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let client = match &args.config {
        Some(path) => GithubClient::from_github(&config::load_github(path)?)?,
        None => GithubClient::new(std::env::var("GITHUB_TOKEN").ok())?,
    };

    match client.resolve(&args.repo).await? {
        Some(release) => {
            println!("Tag: {}", release.tag_name);
            println!("URL: {}", release.source_url);
        }
        None => println!("No release or tag found for {}", args.repo),
    }
    Ok(())
}
