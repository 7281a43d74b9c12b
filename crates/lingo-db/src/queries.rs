use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use lingo_types::models::{Chat, Message, MessageTranslation, Profile};

use crate::models::{
    CHAT_COLUMNS, MESSAGE_COLUMNS, NewChat, NewMessage, PROFILE_COLUMNS, ParticipantRow,
    ReaderMessageRow, StoredTranslation, UserRow, chat_from_row, message_from_row,
    profile_from_row, translation_from_row, uuid_at,
};
use crate::{Database, db_time};

impl Database {
    // -- Profiles --

    /// Insert a profile. Returns false when the username is already taken.
    pub fn create_profile(
        &self,
        id: Uuid,
        username: &str,
        password_hash: &str,
        preferred_language: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO profiles (id, username, password, preferred_language, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.to_string(), username, password_hash, preferred_language, db_time(crate::now())],
            );
            match inserted {
                Ok(_) => Ok(true),
                Err(e) if is_unique_violation(&e) => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, username, password, preferred_language FROM profiles WHERE username = ?1",
                    [username],
                    |row| {
                        Ok(UserRow {
                            id: uuid_at(row, 0)?,
                            username: row.get(1)?,
                            password: row.get(2)?,
                            preferred_language: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_profile(&self, id: Uuid) -> Result<Option<Profile>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1");
            Ok(conn.query_row(&sql, [id.to_string()], profile_from_row).optional()?)
        })
    }

    // -- Chats --

    /// Create a chat and its participant rows in one transaction.
    /// A repeated participant id fails the whole insert.
    pub fn create_chat(&self, chat: &NewChat<'_>, participants: &[Uuid]) -> Result<Chat> {
        let now = crate::now();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO chats (id, kind, name, created_by, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    chat.id.to_string(),
                    chat.kind.as_str(),
                    chat.name,
                    chat.created_by.to_string(),
                    db_time(now)
                ],
            )?;
            for user_id in participants {
                insert_participant(&tx, chat.id, *user_id, now)?;
            }
            let created = query_chat(&tx, chat.id)?.ok_or_else(|| anyhow!("chat vanished"))?;
            tx.commit()?;
            Ok(created)
        })
    }

    pub fn get_chat(&self, id: Uuid) -> Result<Option<Chat>> {
        self.with_conn(|conn| query_chat(conn, id))
    }

    pub fn is_participant(&self, chat_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
                    [chat_id.to_string(), user_id.to_string()],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn participant_ids(&self, chat_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM chat_participants WHERE chat_id = ?1 ORDER BY joined_at, user_id",
            )?;
            let ids = stmt
                .query_map([chat_id.to_string()], |row| uuid_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Participant ids joined against both identity sources in one query.
    pub fn participant_rows(&self, chat_id: Uuid) -> Result<Vec<ParticipantRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT cp.user_id, p.preferred_language, g.preferred_language
                 FROM chat_participants cp
                 LEFT JOIN profiles p ON p.id = cp.user_id
                 LEFT JOIN guest_sessions g ON g.id = cp.user_id
                 WHERE cp.chat_id = ?1
                 ORDER BY cp.joined_at, cp.user_id",
            )?;
            let rows = stmt
                .query_map([chat_id.to_string()], |row| {
                    Ok(ParticipantRow {
                        user_id: uuid_at(row, 0)?,
                        profile_language: row.get(1)?,
                        guest_language: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Schedule a chat for the reaper. Returns false if the chat does not exist.
    pub fn close_chat(&self, chat_id: Uuid, delete_after: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE chats SET is_ephemeral = 1, active = 0, delete_after = ?2 WHERE id = ?1",
                params![chat_id.to_string(), db_time(delete_after)],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Messages --

    /// Insert a message. `created_at` is assigned here and is strictly
    /// greater than every earlier message in the same chat.
    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<Message> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let last: Option<String> = tx.query_row(
                "SELECT MAX(created_at) FROM messages WHERE chat_id = ?1",
                [msg.chat_id.to_string()],
                |row| row.get(0),
            )?;
            let mut created_at = crate::now();
            if let Some(last) = last {
                let last = DateTime::parse_from_rfc3339(&last)
                    .with_context(|| format!("corrupt created_at '{}' in chat {}", last, msg.chat_id))?
                    .with_timezone(&Utc);
                if created_at <= last {
                    created_at = last + Duration::microseconds(1);
                }
            }

            tx.execute(
                "INSERT INTO messages (id, chat_id, sender_id, sender_type, original_text, source_language,
                                       attachment_url, attachment_type, reply_to_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    msg.id.to_string(),
                    msg.chat_id.to_string(),
                    msg.sender_id.to_string(),
                    msg.sender_type.as_str(),
                    msg.text,
                    msg.source_language,
                    msg.attachment.map(|a| a.url.as_str()),
                    msg.attachment.map(|a| a.kind.as_str()),
                    msg.reply_to_id.map(|id| id.to_string()),
                    db_time(created_at),
                ],
            )?;
            let message = query_message(&tx, msg.id)?.ok_or_else(|| anyhow!("message vanished"))?;
            tx.commit()?;
            Ok(message)
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Messages of a chat as `reader_id` sees them, oldest first.
    pub fn messages_for_reader(
        &self,
        chat_id: Uuid,
        reader_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<ReaderMessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS},
                    (SELECT t.target_language FROM message_translations t
                     WHERE t.message_id = m.id AND t.user_id = ?2 ORDER BY t.created_at DESC LIMIT 1),
                    (SELECT t.translated_text FROM message_translations t
                     WHERE t.message_id = m.id AND t.user_id = ?2 ORDER BY t.created_at DESC LIMIT 1)
                 FROM messages m
                 WHERE m.chat_id = ?1 AND m.deleted = 0 AND (?3 IS NULL OR m.created_at < ?3)
                 ORDER BY m.created_at DESC, m.rowid DESC
                 LIMIT ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(
                    params![chat_id.to_string(), reader_id.to_string(), before.map(db_time), limit],
                    |row| {
                        let language: Option<String> = row.get(11)?;
                        let text: Option<String> = row.get(12)?;
                        Ok(ReaderMessageRow {
                            message: message_from_row(row)?,
                            translation: language.zip(text).map(|(target_language, translated_text)| {
                                StoredTranslation { target_language, translated_text }
                            }),
                        })
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    // -- Translations --

    /// Translation rows are immutable: a second insert for the same
    /// (message, user, language) is ignored. Returns true if a row was written.
    pub fn insert_translation(&self, t: &MessageTranslation) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO message_translations
                    (message_id, user_id, target_language, translated_text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    t.message_id.to_string(),
                    t.user_id.to_string(),
                    t.target_language,
                    t.translated_text,
                    db_time(t.created_at)
                ],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn translations_for_message(&self, message_id: Uuid) -> Result<Vec<MessageTranslation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.message_id, m.chat_id, t.user_id, t.target_language, t.translated_text, t.created_at
                 FROM message_translations t
                 JOIN messages m ON m.id = t.message_id
                 WHERE t.message_id = ?1
                 ORDER BY t.created_at, t.user_id",
            )?;
            let rows = stmt
                .query_map([message_id.to_string()], translation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Translation cache --

    /// Look up a cached translation and refresh its `last_used`.
    pub fn cache_lookup(&self, hash: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let hit: Option<String> = conn
                .query_row(
                    "SELECT translated_text FROM translation_cache WHERE hash = ?1",
                    [hash],
                    |row| row.get(0),
                )
                .optional()?;
            if hit.is_some() {
                conn.execute(
                    "UPDATE translation_cache SET last_used = ?2 WHERE hash = ?1",
                    params![hash, db_time(now)],
                )?;
            }
            Ok(hit)
        })
    }

    /// Last write wins.
    pub fn cache_store(
        &self,
        hash: &str,
        source_text: &str,
        source_lang: &str,
        target_lang: &str,
        translated_text: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO translation_cache
                    (hash, source_text, source_lang, target_lang, translated_text, last_used)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(hash) DO UPDATE SET
                    translated_text = excluded.translated_text,
                    last_used = excluded.last_used",
                params![hash, source_text, source_lang, target_lang, translated_text, db_time(now)],
            )?;
            Ok(())
        })
    }

    // -- Reactions and receipts --

    /// Toggle a reaction: removes if it exists, inserts if not.
    /// Returns true when the reaction was added.
    pub fn toggle_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM message_reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                    params![message_id.to_string(), user_id.to_string(), emoji],
                    |row| row.get(0),
                )
                .optional()?;

            let added = if let Some(existing_id) = existing {
                tx.execute("DELETE FROM message_reactions WHERE id = ?1", [&existing_id])?;
                false
            } else {
                tx.execute(
                    "INSERT INTO message_reactions (id, message_id, user_id, emoji, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        Uuid::new_v4().to_string(),
                        message_id.to_string(),
                        user_id.to_string(),
                        emoji,
                        db_time(crate::now())
                    ],
                )?;
                true
            };
            tx.commit()?;
            Ok(added)
        })
    }

    /// Record that `user_id` read a message. Returns false if already recorded.
    pub fn mark_read(&self, message_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO message_read_receipts (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
                params![message_id.to_string(), user_id.to_string(), db_time(crate::now())],
            )?;
            Ok(changed == 1)
        })
    }
}

pub(crate) fn insert_participant(
    conn: &Connection,
    chat_id: Uuid,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO chat_participants (chat_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
        params![chat_id.to_string(), user_id.to_string(), db_time(now)],
    )?;
    Ok(())
}

pub(crate) fn query_chat(conn: &Connection, id: Uuid) -> Result<Option<Chat>> {
    let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1");
    Ok(conn.query_row(&sql, [id.to_string()], chat_from_row).optional()?)
}

fn query_message(conn: &Connection, id: Uuid) -> Result<Option<Message>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1");
    Ok(conn.query_row(&sql, [id.to_string()], message_from_row).optional()?)
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use lingo_types::models::{ChatKind, SenderType};

    fn seed_chat(db: &Database) -> (Uuid, Uuid, Uuid) {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        db.create_profile(a, "ana", "hash", "en").unwrap();
        db.create_profile(b, "beto", "hash", "es").unwrap();
        let chat = db
            .create_chat(
                &NewChat { id: Uuid::new_v4(), kind: ChatKind::Direct, name: None, created_by: a },
                &[a, b],
            )
            .unwrap();
        (chat.id, a, b)
    }

    fn send(db: &Database, chat_id: Uuid, sender: Uuid, text: &str) -> Message {
        db.insert_message(&NewMessage {
            id: Uuid::new_v4(),
            chat_id,
            sender_id: sender,
            sender_type: SenderType::User,
            text,
            source_language: "en",
            attachment: None,
            reply_to_id: None,
        })
        .unwrap()
    }

    #[test]
    fn duplicate_participant_rejects_chat() {
        let db = Database::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        let result = db.create_chat(
            &NewChat { id: Uuid::new_v4(), kind: ChatKind::Group, name: Some("g"), created_by: a },
            &[a, a],
        );
        assert!(result.is_err());
    }

    #[test]
    fn message_timestamps_strictly_increase() {
        let db = Database::open_in_memory().unwrap();
        let (chat_id, a, _) = seed_chat(&db);

        let mut last = None;
        for i in 0..20 {
            let m = send(&db, chat_id, a, &format!("m{i}"));
            if let Some(prev) = last {
                assert!(m.created_at > prev);
            }
            last = Some(m.created_at);
        }
    }

    #[test]
    fn participant_rows_resolve_profile_language() {
        let db = Database::open_in_memory().unwrap();
        let (chat_id, a, b) = seed_chat(&db);

        let rows = db.participant_rows(chat_id).unwrap();
        assert_eq!(rows.len(), 2);
        let b_row = rows.iter().find(|r| r.user_id == b).unwrap();
        assert_eq!(b_row.profile_language.as_deref(), Some("es"));
        assert!(b_row.guest_language.is_none());
        assert!(rows.iter().any(|r| r.user_id == a));
    }

    #[test]
    fn translation_rows_are_write_once() {
        let db = Database::open_in_memory().unwrap();
        let (chat_id, a, b) = seed_chat(&db);
        let m = send(&db, chat_id, a, "Hello");

        let t = MessageTranslation {
            message_id: m.id,
            chat_id,
            user_id: b,
            target_language: "es".into(),
            translated_text: "Hola".into(),
            created_at: crate::now(),
        };
        assert!(db.insert_translation(&t).unwrap());
        let again = MessageTranslation { translated_text: "Buenas".into(), ..t };
        assert!(!db.insert_translation(&again).unwrap());

        let stored = db.translations_for_message(m.id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].translated_text, "Hola");
        assert_eq!(stored[0].chat_id, chat_id);
    }

    #[test]
    fn reader_view_falls_back_to_original() {
        let db = Database::open_in_memory().unwrap();
        let (chat_id, a, b) = seed_chat(&db);
        let first = send(&db, chat_id, a, "Hello");
        send(&db, chat_id, a, "Bye");
        db.insert_translation(&MessageTranslation {
            message_id: first.id,
            chat_id,
            user_id: b,
            target_language: "es".into(),
            translated_text: "Hola".into(),
            created_at: crate::now(),
        })
        .unwrap();

        let rows = db.messages_for_reader(chat_id, b, None, 50).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].message.original_text, "Hello");
        assert_eq!(rows[0].translation.as_ref().unwrap().translated_text, "Hola");
        assert!(rows[1].translation.is_none());
    }

    #[test]
    fn cache_is_last_write_wins() {
        let db = Database::open_in_memory().unwrap();
        let now = crate::now();
        assert!(db.cache_lookup("k", now).unwrap().is_none());
        db.cache_store("k", "Hello", "en", "es", "Hola", now).unwrap();
        db.cache_store("k", "Hello", "en", "es", "Hola!", now).unwrap();
        assert_eq!(db.cache_lookup("k", now).unwrap().as_deref(), Some("Hola!"));
    }

    #[test]
    fn reaction_toggles() {
        let db = Database::open_in_memory().unwrap();
        let (chat_id, a, b) = seed_chat(&db);
        let m = send(&db, chat_id, a, "Hello");
        assert!(db.toggle_reaction(m.id, b, "👍").unwrap());
        assert!(!db.toggle_reaction(m.id, b, "👍").unwrap());
        assert!(db.mark_read(m.id, b).unwrap());
        assert!(!db.mark_read(m.id, b).unwrap());
    }

    #[test]
    fn corrupt_id_fails_loudly() {
        let db = Database::open_in_memory().unwrap();
        let (chat_id, _, _) = seed_chat(&db);
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_participants (chat_id, user_id, joined_at) VALUES (?1, 'not-a-uuid', ?2)",
                params![chat_id.to_string(), db_time(crate::now())],
            )?;
            Ok(())
        })
        .unwrap();
        assert!(db.participant_ids(chat_id).is_err());
    }

    #[test]
    fn only_unique_conflicts_count_as_taken() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.create_profile(Uuid::new_v4(), "ana", "hash", "en").unwrap());
        assert!(!db.create_profile(Uuid::new_v4(), "ana", "hash", "en").unwrap());

        let check = db
            .with_conn(|conn| {
                Ok(conn
                    .execute(
                        "INSERT INTO chats (id, kind, created_by, created_at) VALUES (?1, 'channel', ?2, ?3)",
                        params![Uuid::new_v4().to_string(), Uuid::new_v4().to_string(), db_time(crate::now())],
                    )
                    .map_err(|e| is_unique_violation(&e)))
            })
            .unwrap();
        assert_eq!(check, Err(false));
    }
}
