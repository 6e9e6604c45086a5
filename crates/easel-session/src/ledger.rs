use std::sync::Arc;

use tracing::debug;

use easel_core::types::{MessageRef, UserId};
use easel_store::SessionStore;

use crate::error::Result;
use crate::transport::ChatTransport;

/// Tracks transient bot messages (prompts, status notices) so stale ones can
/// be swept from the chat before the next state change.
///
/// Deletion is always best effort: a tracked message may already be gone,
/// and that must never fail the caller. The persisted set and the chat are
/// reconciled by `clear_except`, which deletes first and records after.
pub struct MessageLedger {
    store: Arc<SessionStore>,
    transport: Arc<dyn ChatTransport>,
}

impl MessageLedger {
    pub fn new(store: Arc<SessionStore>, transport: Arc<dyn ChatTransport>) -> Self {
        Self { store, transport }
    }

    /// Send a notice and track it in one step.
    pub async fn send_tracked(&self, user: UserId, chat_id: i64, text: &str) -> Result<MessageRef> {
        let message = self.transport.send_notice(chat_id, text).await?;
        self.store.add_aux_message(user, message)?;
        Ok(message)
    }

    /// Delete every tracked message and empty the ledger.
    pub async fn clear(&self, user: UserId) -> Result<()> {
        self.clear_except(user, &[]).await
    }

    /// Delete every tracked message not in `keep`, then persist the ledger
    /// as exactly the keep-set.
    pub async fn clear_except(&self, user: UserId, keep: &[MessageRef]) -> Result<()> {
        let tracked = self.store.aux_messages(user)?;
        for message in tracked {
            if keep.contains(&message) {
                continue;
            }
            if let Err(e) = self.transport.delete_message(message).await {
                debug!(
                    chat_id = message.chat_id,
                    message_id = message.message_id,
                    error = %e,
                    "tracked message already gone"
                );
            }
        }
        if keep.is_empty() {
            self.store.clear_aux_messages(user)?;
        } else {
            self.store.set_aux_messages(user, keep)?;
        }
        Ok(())
    }
}
