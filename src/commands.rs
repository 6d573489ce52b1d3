use teloxide::utils::command::BotCommands;
use teloxide::utils::html;
use tracing::error;

use crate::db::{self, Pool};
use crate::model::{RepoUrlPattern, TrackedRepository, User};

pub const ERROR_MESSAGE: &str = "Some error occurred, please try later :(";
pub const FALLBACK_MESSAGE: &str = "Say /help";

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "snake_case", description = "Supported commands:")]
pub enum Command {
    #[command(description = "base command for user registration")]
    Start,
    #[command(description = "view all commands")]
    Help,
    #[command(description = "view all subscriptions")]
    MySubscriptions,
    #[command(description = "[github repository urls] subscribe to GitHub repositories")]
    Subscribe(String),
    #[command(description = "[github repository urls] unsubscribe from GitHub repositories")]
    Unsubscribe(String),
    #[command(description = "remove all existing subscriptions")]
    RemoveAllSubscriptions,
}

/// Shared handles the chat handlers need.
#[derive(Clone, Debug)]
pub struct BotState {
    pub pool: Pool,
    pub pattern: RepoUrlPattern,
}

impl BotState {
    pub fn new(pool: Pool, pattern: RepoUrlPattern) -> Self {
        Self { pool, pattern }
    }
}

/// Compute the reply for one command. Store failures are logged and turned
/// into a generic message; internal error text never reaches the user.
pub async fn answer(state: &BotState, user: &User, command: Command) -> String {
    match command {
        Command::Start | Command::Help => help_text(),
        Command::MySubscriptions => {
            match db::list_user_subscriptions(&state.pool, user.id).await {
                Ok(repos) => format_subscriptions(&repos),
                Err(err) => store_failure(user, err),
            }
        }
        Command::Subscribe(text) => {
            match db::add_subscriptions(&state.pool, &state.pattern, user.id, &text).await {
                Ok(_) => "Successfully subscribed!".to_string(),
                Err(err) => store_failure(user, err),
            }
        }
        Command::Unsubscribe(text) => {
            match db::remove_subscriptions(&state.pool, &state.pattern, user.id, &text).await {
                Ok(_) => "Successfully unsubscribed!".to_string(),
                Err(err) => store_failure(user, err),
            }
        }
        Command::RemoveAllSubscriptions => {
            match db::remove_all_subscriptions(&state.pool, user.id).await {
                Ok(_) => "Successfully unsubscribed!".to_string(),
                Err(err) => store_failure(user, err),
            }
        }
    }
}

pub fn help_text() -> String {
    Command::descriptions().to_string()
}

/// One line per repository: latest known tag (or a placeholder) and URL.
pub fn format_subscriptions(repos: &[TrackedRepository]) -> String {
    if repos.is_empty() {
        return "Subscriptions: empty".to_string();
    }
    let mut answer = String::from("Subscriptions:");
    for repo in repos {
        let tag = repo.latest_tag.as_deref().unwrap_or("fetch in progress");
        answer.push('\n');
        answer.push_str(&html::escape(tag));
        answer.push_str(" - ");
        answer.push_str(&repo.url);
    }
    answer
}

fn store_failure(user: &User, err: anyhow::Error) -> String {
    error!(user_id = user.id, external_id = user.external_id, ?err, "command failed");
    ERROR_MESSAGE.to_string()
}
