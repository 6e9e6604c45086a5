//! `ChatTransport` backed by the Telegram Bot API.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{InputFile, MessageId};

use easel_api::ModelInfo;
use easel_core::types::{MessageRef, PhotoRef, UserId};
use easel_session::{ChatTransport, TransportError};

use crate::keyboard::model_keyboard;

/// Production transport. Notices, menus and results go out through teloxide;
/// photo references resolve to files under `temp_dir/{user_id}/`.
pub struct TelegramTransport {
    bot: Bot,
    temp_dir: PathBuf,
}

impl TelegramTransport {
    pub fn new(bot: Bot, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            bot,
            temp_dir: temp_dir.into(),
        }
    }
}

fn message_ref(msg: &Message) -> MessageRef {
    MessageRef {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_notice(&self, chat_id: i64, text: &str) -> Result<MessageRef, TransportError> {
        let msg = self
            .bot
            .send_message(ChatId(chat_id), text)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        Ok(message_ref(&msg))
    }

    async fn send_model_menu(
        &self,
        chat_id: i64,
        text: &str,
        models: &[ModelInfo],
    ) -> Result<MessageRef, TransportError> {
        let msg = self
            .bot
            .send_message(ChatId(chat_id), text)
            .reply_markup(model_keyboard(models))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        Ok(message_ref(&msg))
    }

    async fn send_image(
        &self,
        chat_id: i64,
        image: Vec<u8>,
        file_name: &str,
    ) -> Result<MessageRef, TransportError> {
        let photo = InputFile::memory(image).file_name(file_name.to_string());
        let msg = self
            .bot
            .send_photo(ChatId(chat_id), photo)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        Ok(message_ref(&msg))
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), TransportError> {
        self.bot
            .delete_message(ChatId(message.chat_id), MessageId(message.message_id))
            .await
            .map_err(|e| TransportError::Delete(e.to_string()))?;
        Ok(())
    }

    async fn fetch_photo(
        &self,
        user: UserId,
        photo: &PhotoRef,
        index: usize,
    ) -> Result<PathBuf, TransportError> {
        let file = self
            .bot
            .get_file(photo.0.as_str())
            .await
            .map_err(|e| TransportError::Download(e.to_string()))?;

        // Keep the remote extension when there is one; Telegram photos are
        // normally jpg.
        let suffix = Path::new(&file.path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_else(|| ".jpg".to_string());

        let dir = self.temp_dir.join(user.0.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| TransportError::Download(e.to_string()))?;

        let mut bytes: Vec<u8> = Vec::new();
        self.bot
            .download_file(&file.path, &mut bytes)
            .await
            .map_err(|e| TransportError::Download(e.to_string()))?;

        let path = dir.join(format!("photo_{index}{suffix}"));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| TransportError::Download(e.to_string()))?;
        Ok(path)
    }
}
