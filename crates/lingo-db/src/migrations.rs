use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE profiles (
                id                  TEXT PRIMARY KEY,
                username            TEXT NOT NULL UNIQUE,
                password            TEXT NOT NULL,
                preferred_language  TEXT NOT NULL DEFAULT 'en',
                qr_slug             TEXT UNIQUE,
                qr_slug_rotated_at  TEXT,
                created_at          TEXT NOT NULL
            );

            CREATE TABLE guest_invites (
                id          TEXT PRIMARY KEY,
                token       TEXT NOT NULL UNIQUE,
                inviter_id  TEXT NOT NULL REFERENCES profiles(id),
                expires_at  TEXT NOT NULL,
                max_uses    INTEGER NOT NULL CHECK (max_uses > 0),
                used_count  INTEGER NOT NULL DEFAULT 0 CHECK (used_count <= max_uses),
                created_at  TEXT NOT NULL
            );

            CREATE TABLE guest_sessions (
                id                  TEXT PRIMARY KEY,
                display_name        TEXT NOT NULL,
                preferred_language  TEXT NOT NULL,
                invite_id           TEXT REFERENCES guest_invites(id) ON DELETE SET NULL,
                expires_at          TEXT NOT NULL,
                created_at          TEXT NOT NULL,
                last_active_at      TEXT NOT NULL
            );

            CREATE TABLE chats (
                id                TEXT PRIMARY KEY,
                kind              TEXT NOT NULL CHECK (kind IN ('direct', 'group')),
                name              TEXT,
                created_by        TEXT NOT NULL,
                is_ephemeral      INTEGER NOT NULL DEFAULT 0,
                delete_after      TEXT,
                guest_session_id  TEXT REFERENCES guest_sessions(id) ON DELETE SET NULL,
                active            INTEGER NOT NULL DEFAULT 1,
                created_at        TEXT NOT NULL
            );

            CREATE INDEX idx_chats_ephemeral ON chats(is_ephemeral, delete_after);
            CREATE INDEX idx_chats_created_by ON chats(created_by);

            -- user_id is a profile id or a guest-session id, so no FK
            CREATE TABLE chat_participants (
                chat_id    TEXT NOT NULL REFERENCES chats(id),
                user_id    TEXT NOT NULL,
                joined_at  TEXT NOT NULL,
                PRIMARY KEY (chat_id, user_id)
            );

            CREATE INDEX idx_participants_user ON chat_participants(user_id);

            CREATE TABLE messages (
                id               TEXT PRIMARY KEY,
                chat_id          TEXT NOT NULL REFERENCES chats(id),
                sender_id        TEXT NOT NULL,
                sender_type      TEXT NOT NULL CHECK (sender_type IN ('user', 'guest')),
                original_text    TEXT NOT NULL,
                source_language  TEXT NOT NULL,
                attachment_url   TEXT,
                attachment_type  TEXT,
                reply_to_id      TEXT REFERENCES messages(id),
                created_at       TEXT NOT NULL,
                deleted          INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_messages_chat ON messages(chat_id, created_at);

            CREATE TABLE message_translations (
                message_id       TEXT NOT NULL REFERENCES messages(id),
                user_id          TEXT NOT NULL,
                target_language  TEXT NOT NULL,
                translated_text  TEXT NOT NULL,
                created_at       TEXT NOT NULL,
                PRIMARY KEY (message_id, user_id, target_language)
            );

            CREATE TABLE message_reactions (
                id          TEXT PRIMARY KEY,
                message_id  TEXT NOT NULL REFERENCES messages(id),
                user_id     TEXT NOT NULL,
                emoji       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                UNIQUE(message_id, user_id, emoji)
            );

            CREATE INDEX idx_reactions_message ON message_reactions(message_id);

            CREATE TABLE message_read_receipts (
                message_id  TEXT NOT NULL REFERENCES messages(id),
                user_id     TEXT NOT NULL,
                read_at     TEXT NOT NULL,
                PRIMARY KEY (message_id, user_id)
            );

            -- Content-keyed, independent of message identity
            CREATE TABLE translation_cache (
                hash             TEXT PRIMARY KEY,
                source_text      TEXT NOT NULL,
                source_lang      TEXT NOT NULL,
                target_lang      TEXT NOT NULL,
                translated_text  TEXT NOT NULL,
                last_used        TEXT NOT NULL
            );

            CREATE TABLE rate_limits (
                scope         TEXT NOT NULL,
                subject       TEXT NOT NULL,
                window_start  INTEGER NOT NULL,
                count         INTEGER NOT NULL,
                PRIMARY KEY (scope, subject, window_start)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_rerunnable() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }
}
