//! Typed rows. Every column is decoded explicitly; an id, timestamp or enum
//! that does not parse is a conversion error, not a default value.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use lingo_types::models::{
    Attachment, Chat, GuestInvite, GuestSession, Message, MessageTranslation, Profile,
};

/// Profile plus the password hash, which never leaves the DB layer's callers
/// in auth.
pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub password: String,
    pub preferred_language: String,
}

/// A participant id with whatever language each identity source knows for it.
pub struct ParticipantRow {
    pub user_id: Uuid,
    pub profile_language: Option<String>,
    pub guest_language: Option<String>,
}

/// A message with the reader's translation, if one was stored.
pub struct ReaderMessageRow {
    pub message: Message,
    pub translation: Option<StoredTranslation>,
}

pub struct StoredTranslation {
    pub target_language: String,
    pub translated_text: String,
}

pub struct NewMessage<'a> {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub sender_type: lingo_types::models::SenderType,
    pub text: &'a str,
    pub source_language: &'a str,
    pub attachment: Option<&'a Attachment>,
    pub reply_to_id: Option<Uuid>,
}

pub struct NewChat<'a> {
    pub id: Uuid,
    pub kind: lingo_types::models::ChatKind,
    pub name: Option<&'a str>,
    pub created_by: Uuid,
}

pub struct NewGuest<'a> {
    pub session_id: Uuid,
    pub chat_id: Uuid,
    pub display_name: &'a str,
    pub preferred_language: &'a str,
    pub session_expires_at: DateTime<Utc>,
    pub chat_delete_after: DateTime<Utc>,
}

/// What a successful guest admission created.
#[derive(Debug, Clone)]
pub struct GuestChat {
    pub chat: Chat,
    pub session: GuestSession,
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

pub(crate) fn uuid_at(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    s.parse().map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_uuid_at(row: &Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(s) => s.parse().map(Some).map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

pub(crate) fn time_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_time(&s).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_time_at(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(s) => parse_time(&s).map(Some).map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

pub(crate) fn enum_at<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e: String| conversion_error(idx, e))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

pub(crate) const CHAT_COLUMNS: &str =
    "id, kind, name, created_by, is_ephemeral, delete_after, guest_session_id, active, created_at";

pub(crate) fn chat_from_row(row: &Row) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: uuid_at(row, 0)?,
        kind: enum_at(row, 1)?,
        name: row.get(2)?,
        created_by: uuid_at(row, 3)?,
        is_ephemeral: row.get(4)?,
        delete_after: opt_time_at(row, 5)?,
        guest_session_id: opt_uuid_at(row, 6)?,
        active: row.get(7)?,
        created_at: time_at(row, 8)?,
    })
}

pub(crate) const MESSAGE_COLUMNS: &str = "m.id, m.chat_id, m.sender_id, m.sender_type, m.original_text, \
     m.source_language, m.attachment_url, m.attachment_type, m.reply_to_id, m.created_at, m.deleted";

pub(crate) fn message_from_row(row: &Row) -> rusqlite::Result<Message> {
    let attachment_url: Option<String> = row.get(6)?;
    let attachment_type: Option<String> = row.get(7)?;
    let attachment = attachment_url.map(|url| Attachment {
        url,
        kind: attachment_type.unwrap_or_else(|| "file".to_string()),
    });

    Ok(Message {
        id: uuid_at(row, 0)?,
        chat_id: uuid_at(row, 1)?,
        sender_id: uuid_at(row, 2)?,
        sender_type: enum_at(row, 3)?,
        original_text: row.get(4)?,
        source_language: row.get(5)?,
        attachment,
        reply_to_id: opt_uuid_at(row, 8)?,
        created_at: time_at(row, 9)?,
        deleted: row.get(10)?,
    })
}

pub(crate) fn translation_from_row(row: &Row) -> rusqlite::Result<MessageTranslation> {
    Ok(MessageTranslation {
        message_id: uuid_at(row, 0)?,
        chat_id: uuid_at(row, 1)?,
        user_id: uuid_at(row, 2)?,
        target_language: row.get(3)?,
        translated_text: row.get(4)?,
        created_at: time_at(row, 5)?,
    })
}

pub(crate) const INVITE_COLUMNS: &str =
    "id, token, inviter_id, expires_at, max_uses, used_count, created_at";

pub(crate) fn invite_from_row(row: &Row) -> rusqlite::Result<GuestInvite> {
    Ok(GuestInvite {
        id: uuid_at(row, 0)?,
        token: row.get(1)?,
        inviter_id: uuid_at(row, 2)?,
        expires_at: time_at(row, 3)?,
        max_uses: row.get(4)?,
        used_count: row.get(5)?,
        created_at: time_at(row, 6)?,
    })
}

pub(crate) const SESSION_COLUMNS: &str =
    "id, display_name, preferred_language, invite_id, expires_at, created_at, last_active_at";

pub(crate) fn session_from_row(row: &Row) -> rusqlite::Result<GuestSession> {
    Ok(GuestSession {
        id: uuid_at(row, 0)?,
        display_name: row.get(1)?,
        preferred_language: row.get(2)?,
        invite_id: opt_uuid_at(row, 3)?,
        expires_at: time_at(row, 4)?,
        created_at: time_at(row, 5)?,
        last_active_at: time_at(row, 6)?,
    })
}

pub(crate) const PROFILE_COLUMNS: &str =
    "id, username, preferred_language, qr_slug, qr_slug_rotated_at, created_at";

pub(crate) fn profile_from_row(row: &Row) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: uuid_at(row, 0)?,
        username: row.get(1)?,
        preferred_language: row.get(2)?,
        qr_slug: row.get(3)?,
        qr_slug_rotated_at: opt_time_at(row, 4)?,
        created_at: time_at(row, 5)?,
    })
}
