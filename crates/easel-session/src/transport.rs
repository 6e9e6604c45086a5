use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use easel_api::ModelInfo;
use easel_core::types::{MessageRef, PhotoRef, UserId};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("send failed: {0}")]
    Send(String),

    #[error("delete failed: {0}")]
    Delete(String),

    #[error("download failed: {0}")]
    Download(String),
}

/// Chat-side operations the orchestrator needs.
///
/// Implemented by the Telegram adapter in production and by in-memory fakes
/// in tests, keeping the orchestration core free of teloxide types.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a plain text notice and return its address.
    async fn send_notice(&self, chat_id: i64, text: &str) -> Result<MessageRef, TransportError>;

    /// Send the model-selection menu (one tappable entry per model).
    async fn send_model_menu(
        &self,
        chat_id: i64,
        text: &str,
        models: &[ModelInfo],
    ) -> Result<MessageRef, TransportError>;

    /// Deliver a generated image under the given file name.
    async fn send_image(
        &self,
        chat_id: i64,
        image: Vec<u8>,
        file_name: &str,
    ) -> Result<MessageRef, TransportError>;

    /// Delete one message. An already-deleted message is an error here;
    /// callers decide whether that matters.
    async fn delete_message(&self, message: MessageRef) -> Result<(), TransportError>;

    /// Resolve a photo reference into a local file and return its path.
    /// `index` is 1-based and keeps sibling downloads apart.
    async fn fetch_photo(
        &self,
        user: UserId,
        photo: &PhotoRef,
        index: usize,
    ) -> Result<PathBuf, TransportError>;
}
