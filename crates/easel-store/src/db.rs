use rusqlite::Connection;

use crate::error::Result;

/// Initialise the per-user state tables.
///
/// Safe to call on every startup: uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_settings (
            user_id        INTEGER PRIMARY KEY,
            selected_model TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS pending_images (
            user_id    INTEGER NOT NULL,
            position   INTEGER NOT NULL,
            file_id    TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (user_id, position)
        );
        CREATE TABLE IF NOT EXISTS aux_messages (
            user_id    INTEGER NOT NULL,
            chat_id    INTEGER NOT NULL,
            message_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (user_id, chat_id, message_id)
        );",
    )?;
    Ok(())
}
