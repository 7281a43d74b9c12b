use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::models::uuid_at;
use crate::{Database, db_time};

/// Dependent tables in the order they must be emptied for one chat.
const CASCADE: &[(&str, &str)] = &[
    (
        "message_translations",
        "DELETE FROM message_translations WHERE message_id IN (SELECT id FROM messages WHERE chat_id = ?1)",
    ),
    (
        "message_reactions",
        "DELETE FROM message_reactions WHERE message_id IN (SELECT id FROM messages WHERE chat_id = ?1)",
    ),
    (
        "message_read_receipts",
        "DELETE FROM message_read_receipts WHERE message_id IN (SELECT id FROM messages WHERE chat_id = ?1)",
    ),
    ("messages", "DELETE FROM messages WHERE chat_id = ?1"),
    ("chat_participants", "DELETE FROM chat_participants WHERE chat_id = ?1"),
    ("chats", "DELETE FROM chats WHERE id = ?1"),
];

impl Database {
    /// Ephemeral chats whose `delete_after` has been reached.
    pub fn expired_ephemeral_chats(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM chats
                 WHERE is_ephemeral = 1
                   AND delete_after IS NOT NULL
                   AND delete_after <= ?1
                 ORDER BY delete_after",
            )?;
            let ids = stmt
                .query_map([db_time(now)], |row| uuid_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Delete a chat and everything hanging off it, children first, in one
    /// transaction. Returns false if the chat was already gone.
    pub fn delete_chat_cascade(&self, chat_id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let id = chat_id.to_string();
            let mut deleted_chat = false;
            for (table, sql) in CASCADE {
                let n = tx.execute(sql, [&id])?;
                if *table == "chats" {
                    deleted_chat = n == 1;
                }
            }
            tx.commit()?;
            Ok(deleted_chat)
        })
    }

    /// Guest sessions past their expiry that no chat references any more.
    pub fn purge_expired_guest_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM guest_sessions
                 WHERE expires_at < ?1
                   AND NOT EXISTS (SELECT 1 FROM chat_participants cp WHERE cp.user_id = guest_sessions.id)
                   AND NOT EXISTS (SELECT 1 FROM chats c WHERE c.guest_session_id = guest_sessions.id)",
                params![db_time(now)],
            )?;
            Ok(n)
        })
    }

    /// Invites past their expiry. Sessions admitted by them keep existing
    /// with `invite_id` nulled by the foreign key.
    pub fn purge_expired_invites(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM guest_invites WHERE expires_at < ?1", params![db_time(now)])?)
        })
    }

    /// Drop rate-limit windows that started before `cutoff` (unix seconds).
    pub fn purge_rate_limits(&self, cutoff: i64) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM rate_limits WHERE window_start < ?1", [cutoff])?))
    }
}
