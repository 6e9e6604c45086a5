//! Telegram adapter.
//!
//! Wraps a teloxide `Bot` + `Dispatcher` and drives the long-polling event
//! loop until the process exits.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::MenuButton;
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};

use easel_session::{MediaGroupAggregator, SessionOrchestrator};

use crate::handler::{handle_command, handle_message, handle_model_tap, Command};

pub struct TelegramAdapter {
    bot: Bot,
    orchestrator: Arc<SessionOrchestrator>,
    aggregator: Arc<MediaGroupAggregator>,
}

impl TelegramAdapter {
    pub fn new(
        bot: Bot,
        orchestrator: Arc<SessionOrchestrator>,
        aggregator: Arc<MediaGroupAggregator>,
    ) -> Self {
        Self {
            bot,
            orchestrator,
            aggregator,
        }
    }

    /// Register the command surface and drive the long-polling loop.
    ///
    /// Never returns under normal operation; runs for the lifetime of the
    /// process.
    pub async fn run(self) {
        // Best effort: the bot works without the visible command menu.
        if let Err(e) = self.bot.set_my_commands(Command::bot_commands()).await {
            warn!(error = %e, "Telegram: set_my_commands failed");
        }
        if let Err(e) = self
            .bot
            .set_chat_menu_button()
            .menu_button(MenuButton::Commands)
            .await
        {
            warn!(error = %e, "Telegram: set_chat_menu_button failed");
        }

        info!("Telegram: starting long-polling dispatcher");

        let handler = dptree::entry()
            .branch(
                Update::filter_message()
                    .filter_command::<Command>()
                    .endpoint(handle_command),
            )
            .branch(Update::filter_callback_query().endpoint(handle_model_tap))
            .branch(Update::filter_message().endpoint(handle_message));

        Dispatcher::builder(self.bot, handler)
            .dependencies(dptree::deps![self.orchestrator, self.aggregator])
            .default_handler(|_upd| async {})
            .build()
            .dispatch()
            .await;
    }
}
