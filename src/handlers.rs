use anyhow::Result;
use std::time::Duration;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, ParseMode};
use teloxide::utils::command::BotCommands;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::commands::{self, BotState, Command, ERROR_MESSAGE, FALLBACK_MESSAGE};
use crate::db;

/// Run the Telegram dispatcher until `cancel` fires.
pub async fn run(bot: Bot, state: BotState, cancel: CancellationToken) {
    if let Err(err) = bot.set_my_commands(Command::bot_commands()).await {
        warn!(?err, "failed to register bot commands");
    }

    let handler = Update::filter_message()
        .branch(dptree::entry().filter_command::<Command>().endpoint(handle_command))
        .branch(dptree::endpoint(handle_other));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|update| async move {
            debug!(update_id = ?update.id, "unhandled update");
        })
        .build();

    let shutdown = dispatcher.shutdown_token();
    let watcher = tokio::spawn(async move {
        cancel.cancelled().await;
        // The dispatcher refuses to stop before it has started; retry until it runs.
        loop {
            match shutdown.shutdown() {
                Ok(done) => {
                    done.await;
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
    });

    info!("starting telegram bot");
    dispatcher.dispatch().await;
    watcher.abort();
    info!("telegram bot stopped");
}

async fn handle_command(bot: Bot, msg: Message, cmd: Command, state: BotState) -> Result<()> {
    handle_update(&bot, &msg, &state, Some(cmd)).await
}

async fn handle_other(bot: Bot, msg: Message, state: BotState) -> Result<()> {
    handle_update(&bot, &msg, &state, None).await
}

#[instrument(skip_all)]
async fn handle_update(
    bot: &Bot,
    msg: &Message,
    state: &BotState,
    command: Option<Command>,
) -> Result<()> {
    let Some(from) = msg.from() else {
        return Ok(());
    };
    let sender_id = from.id.0 as i64;
    info!(
        chat_id = msg.chat.id.0,
        sender_id,
        username = ?from.username,
        message = ?msg.text(),
        "new message"
    );

    if let Err(err) = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await {
        warn!(chat_id = msg.chat.id.0, ?err, "typing action failed");
    }

    let answer = match db::get_or_create_user(&state.pool, sender_id).await {
        Ok(user) => match command {
            Some(command) => commands::answer(state, &user, command).await,
            None => FALLBACK_MESSAGE.to_string(),
        },
        Err(err) => {
            error!(sender_id, ?err, "user lookup failed");
            ERROR_MESSAGE.to_string()
        }
    };

    bot.send_message(msg.chat.id, answer.as_str())
        .parse_mode(ParseMode::Html)
        .disable_web_page_preview(true)
        .reply_to_message_id(msg.id)
        .await?;
    info!(chat_id = msg.chat.id.0, sender_id, answer = %answer, "sent message");
    Ok(())
}
