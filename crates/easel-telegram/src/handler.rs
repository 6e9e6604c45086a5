//! Update handlers registered in the teloxide Dispatcher.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{debug, error, warn};

use easel_core::types::{MessageSnapshot, PhotoRef, UserId};
use easel_session::orchestrator::MODEL_UNAVAILABLE_MESSAGE;
use easel_session::{GroupKey, MediaGroupAggregator, ModelSelection, SessionOrchestrator};

use crate::keyboard;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "start and pick a model")]
    Start,
    #[command(description = "switch to another model")]
    Swap,
}

/// `/start` and `/swap` both open the model menu; `/start` greets first.
pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    orchestrator: Arc<SessionOrchestrator>,
) -> ResponseResult<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    if from.is_bot {
        return Ok(());
    }
    let user = UserId(from.id.0);
    let chat_id = msg.chat.id.0;

    // The chat shows only the bot's own messages; the command goes away too.
    if let Err(e) = bot.delete_message(msg.chat.id, msg.id).await {
        debug!(error = %e, "Telegram: could not delete command message");
    }

    let greeting = matches!(cmd, Command::Start);
    if let Err(e) = orchestrator.clear_idle_aux(user).await {
        warn!(user = user.0, error = %e, "Telegram: sweeping notices failed");
    }
    if let Err(e) = orchestrator
        .begin_model_selection(user, chat_id, greeting)
        .await
    {
        error!(user = user.0, error = %e, "Telegram: opening the model menu failed");
    }
    Ok(())
}

/// Main message handler. Runs for every non-command `Message`. Performs:
/// 1. Bot-message and slash-text filter
/// 2. Snapshot extraction (text, caption, best photo)
/// 3. Inbound deletion
/// 4. Album routing through the aggregator; single messages form a
///    one-element batch straight away
pub async fn handle_message(
    bot: Bot,
    msg: Message,
    aggregator: Arc<MediaGroupAggregator>,
    orchestrator: Arc<SessionOrchestrator>,
) -> ResponseResult<()> {
    // 1. Ignore other bots and senderless channel posts. Slash-shaped text
    //    that failed command parsing is left alone as well.
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    if from.is_bot {
        return Ok(());
    }
    if msg.text().map(|t| t.starts_with('/')).unwrap_or(false) {
        return Ok(());
    }

    let user = UserId(from.id.0);
    let chat_id = msg.chat.id.0;

    // 2. Snapshot before deleting; afterwards the content is gone.
    let snapshot = snapshot_message(&msg);

    // 3. Delete the inbound message.
    if let Err(e) = bot.delete_message(msg.chat.id, msg.id).await {
        debug!(error = %e, "Telegram: could not delete inbound message");
    }

    // 4. Albums are debounced into one batch; everything else is already
    //    complete.
    if let Some(group_id) = msg.media_group_id() {
        let key = GroupKey {
            chat_id,
            media_group_id: group_id.to_string(),
        };
        aggregator.submit(key, user, snapshot);
        return Ok(());
    }

    // The dispatcher serializes updates per chat; generation must not hold
    // that lane.
    tokio::spawn(async move {
        if let Err(e) = orchestrator
            .process_batch(user, chat_id, vec![snapshot])
            .await
        {
            error!(user = user.0, error = %e, "Telegram: message processing failed");
        }
    });
    Ok(())
}

/// Model-menu tap: validate against the catalog, persist, acknowledge.
pub async fn handle_model_tap(
    bot: Bot,
    q: CallbackQuery,
    orchestrator: Arc<SessionOrchestrator>,
) -> ResponseResult<()> {
    let Some(model_id) = q.data.as_deref().and_then(keyboard::parse_model_callback) else {
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };
    let user = UserId(q.from.id.0);
    // Menus live in the chat the tap came from; private chats share the
    // user id.
    let chat_id = match q.message.as_ref() {
        Some(teloxide::types::MaybeInaccessibleMessage::Regular(m)) => m.chat.id.0,
        _ => q.from.id.0 as i64,
    };

    match orchestrator.select_model(user, chat_id, model_id).await {
        Ok(ModelSelection::Accepted) => {
            bot.answer_callback_query(q.id).await?;
        }
        Ok(ModelSelection::Rejected) => {
            bot.answer_callback_query(q.id)
                .text(MODEL_UNAVAILABLE_MESSAGE)
                .show_alert(true)
                .await?;
        }
        Err(e) => {
            error!(user = user.0, error = %e, "Telegram: model selection failed");
            bot.answer_callback_query(q.id).await?;
        }
    }
    Ok(())
}

fn snapshot_message(msg: &Message) -> MessageSnapshot {
    MessageSnapshot {
        message_id: msg.id.0,
        text: msg.text().map(str::to_string),
        caption: msg.caption().map(str::to_string),
        // Telegram lists sizes small to large; the last one is the original.
        photo: msg
            .photo()
            .and_then(|sizes| sizes.last())
            .map(|p| PhotoRef(p.file.id.clone())),
    }
}
