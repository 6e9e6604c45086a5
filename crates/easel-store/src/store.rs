use std::sync::Mutex;

use rusqlite::Connection;
use tracing::instrument;

use easel_core::types::{MessageRef, PhotoRef, UserId};

use crate::error::{Result, StoreError};

/// Thread-safe store for per-user session state: the selected model, the
/// pending-image carry-over buffer and the transient-message ledger.
///
/// Wraps a single SQLite connection in a `Mutex`. A Mutex is sufficient for
/// the single-node bot; calls are short and never overlap a network await.
pub struct SessionStore {
    db: Mutex<Connection>,
}

impl SessionStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// The user's selected model id, `None` if never chosen.
    pub fn selected_model(&self, user: UserId) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT selected_model FROM user_settings WHERE user_id = ?1",
            rusqlite::params![user.0 as i64],
            |row| row.get(0),
        ) {
            Ok(model) => Ok(Some(model)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Persist the selected model (upsert pattern).
    #[instrument(skip(self), fields(user = user.0, model = model_id))]
    pub fn set_selected_model(&self, user: UserId, model_id: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO user_settings (user_id, selected_model, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                 selected_model = excluded.selected_model,
                 updated_at     = excluded.updated_at",
            rusqlite::params![user.0 as i64, model_id, now],
        )?;
        Ok(())
    }

    /// Pending photo references in upload order.
    pub fn pending_images(&self, user: UserId) -> Result<Vec<PhotoRef>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT file_id FROM pending_images
             WHERE user_id = ?1
             ORDER BY position",
        )?;
        let rows = stmt.query_map(rusqlite::params![user.0 as i64], |row| {
            Ok(PhotoRef(row.get(0)?))
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Replace the pending buffer with a new ordered set.
    #[instrument(skip(self, photos), fields(user = user.0, count = photos.len()))]
    pub fn set_pending_images(&self, user: UserId, photos: &[PhotoRef]) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM pending_images WHERE user_id = ?1",
            rusqlite::params![user.0 as i64],
        )?;
        for (position, photo) in photos.iter().enumerate() {
            db.execute(
                "INSERT INTO pending_images (user_id, position, file_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![user.0 as i64, position as i64, photo.0, now],
            )?;
        }
        Ok(())
    }

    pub fn clear_pending_images(&self, user: UserId) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM pending_images WHERE user_id = ?1",
            rusqlite::params![user.0 as i64],
        )?;
        Ok(())
    }

    /// Track a transient bot message. Idempotent: re-adding the same
    /// message is a no-op.
    pub fn add_aux_message(&self, user: UserId, message: MessageRef) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO aux_messages (user_id, chat_id, message_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![user.0 as i64, message.chat_id, message.message_id, now],
        )?;
        Ok(())
    }

    /// Every tracked transient message for the user.
    pub fn aux_messages(&self, user: UserId) -> Result<Vec<MessageRef>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT chat_id, message_id FROM aux_messages WHERE user_id = ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![user.0 as i64], |row| {
            Ok(MessageRef {
                chat_id: row.get(0)?,
                message_id: row.get(1)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn clear_aux_messages(&self, user: UserId) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM aux_messages WHERE user_id = ?1",
            rusqlite::params![user.0 as i64],
        )?;
        Ok(())
    }

    /// Replace the ledger with exactly `messages`.
    #[instrument(skip(self, messages), fields(user = user.0, count = messages.len()))]
    pub fn set_aux_messages(&self, user: UserId, messages: &[MessageRef]) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM aux_messages WHERE user_id = ?1",
            rusqlite::params![user.0 as i64],
        )?;
        for message in messages {
            db.execute(
                "INSERT OR IGNORE INTO aux_messages (user_id, chat_id, message_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![user.0 as i64, message.chat_id, message.message_id, now],
            )?;
        }
        Ok(())
    }
}
