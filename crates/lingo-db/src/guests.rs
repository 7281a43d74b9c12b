use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use lingo_types::models::{ChatKind, GuestInvite, GuestSession, Profile};

use crate::models::{
    GuestChat, INVITE_COLUMNS, NewGuest, PROFILE_COLUMNS, SESSION_COLUMNS,
    chat_from_row, invite_from_row, profile_from_row, session_from_row, uuid_at,
};
use crate::queries::{insert_participant, is_unique_violation, query_chat};
use crate::{Database, db_time};

const GUEST_CHAT_COLUMNS: &str = "c.id, c.kind, c.name, c.created_by, c.is_ephemeral, c.delete_after, \
     c.guest_session_id, c.active, c.created_at";

impl Database {
    // -- Invites --

    pub fn create_invite(&self, invite: &GuestInvite) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO guest_invites (id, token, inviter_id, expires_at, max_uses, used_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    invite.id.to_string(),
                    invite.token,
                    invite.inviter_id.to_string(),
                    db_time(invite.expires_at),
                    invite.max_uses,
                    invite.used_count,
                    db_time(invite.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_invite_by_token(&self, token: &str) -> Result<Option<GuestInvite>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {INVITE_COLUMNS} FROM guest_invites WHERE token = ?1");
            Ok(conn.query_row(&sql, [token], invite_from_row).optional()?)
        })
    }

    /// Consume one use of an invite and admit a guest, all in one transaction.
    ///
    /// The use counter is bumped by a single conditional UPDATE, so concurrent
    /// accepts can never push `used_count` past `max_uses`. Returns `None`
    /// when the token is unknown, expired or used up; nothing is written then.
    pub fn accept_invite(
        &self,
        token: &str,
        guest: &NewGuest<'_>,
        now: DateTime<Utc>,
    ) -> Result<Option<GuestChat>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let consumed = tx
                .query_row(
                    "UPDATE guest_invites SET used_count = used_count + 1
                     WHERE token = ?1 AND used_count < max_uses AND expires_at > ?2
                     RETURNING id, inviter_id",
                    params![token, db_time(now)],
                    |row| Ok((uuid_at(row, 0)?, uuid_at(row, 1)?)),
                )
                .optional()?;

            let Some((invite_id, inviter_id)) = consumed else {
                return Ok(None);
            };

            let created = insert_guest_chat(&tx, inviter_id, Some(invite_id), guest, now)?;
            tx.commit()?;
            Ok(Some(created))
        })
    }

    /// Admit a guest without an invite row (QR-slug flow).
    pub fn create_guest_chat(
        &self,
        inviter_id: Uuid,
        guest: &NewGuest<'_>,
        now: DateTime<Utc>,
    ) -> Result<GuestChat> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let created = insert_guest_chat(&tx, inviter_id, None, guest, now)?;
            tx.commit()?;
            Ok(created)
        })
    }

    /// The guest chat `chat_id` if it is still open, was started with
    /// `inviter_id`, and holds exactly the inviter and live session `session_id`.
    pub fn find_reusable_guest_chat(
        &self,
        inviter_id: Uuid,
        chat_id: Uuid,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<GuestChat>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {GUEST_CHAT_COLUMNS} FROM chats c
                 JOIN guest_sessions g ON g.id = c.guest_session_id
                 WHERE c.id = ?3
                   AND g.id = ?4
                   AND c.created_by = ?1
                   AND c.is_ephemeral = 1
                   AND c.active = 1
                   AND (c.delete_after IS NULL OR c.delete_after > ?2)
                   AND g.expires_at > ?2
                   AND (SELECT COUNT(*) FROM chat_participants cp WHERE cp.chat_id = c.id) = 2
                   AND EXISTS (SELECT 1 FROM chat_participants cp WHERE cp.chat_id = c.id AND cp.user_id = c.created_by)
                   AND EXISTS (SELECT 1 FROM chat_participants cp WHERE cp.chat_id = c.id AND cp.user_id = g.id)
"
            );

            let chat = conn
                .query_row(
                    &sql,
                    params![
                        inviter_id.to_string(),
                        db_time(now),
                        chat_id.to_string(),
                        session_id.to_string()
                    ],
                    chat_from_row,
                )
                .optional()?;

            let Some(chat) = chat else {
                return Ok(None);
            };
            let session_id = chat
                .guest_session_id
                .ok_or_else(|| anyhow!("guest chat {} has no session", chat.id))?;
            let session = query_session(conn, session_id)?
                .ok_or_else(|| anyhow!("guest session {} vanished", session_id))?;
            Ok(Some(GuestChat { chat, session }))
        })
    }

    // -- Guest sessions --

    pub fn get_guest_session(&self, id: Uuid) -> Result<Option<GuestSession>> {
        self.with_conn(|conn| query_session(conn, id))
    }

    pub fn touch_guest_session(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE guest_sessions SET last_active_at = ?2 WHERE id = ?1",
                params![id.to_string(), db_time(now)],
            )?;
            Ok(())
        })
    }

    // -- QR slugs --

    pub fn get_profile_by_slug(&self, slug: &str) -> Result<Option<Profile>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE qr_slug = ?1");
            Ok(conn.query_row(&sql, [slug], profile_from_row).optional()?)
        })
    }

    /// Replace a profile's slug. Returns `false` if another profile already
    /// holds `slug`; errors if the profile does not exist.
    pub fn replace_qr_slug(&self, user_id: Uuid, slug: &str, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let result = conn.execute(
                "UPDATE profiles SET qr_slug = ?2, qr_slug_rotated_at = ?3 WHERE id = ?1",
                params![user_id.to_string(), slug, db_time(now)],
            );
            match result {
                Ok(1) => Ok(true),
                Ok(_) => Err(anyhow!("profile not found: {}", user_id)),
                Err(e) if is_unique_violation(&e) => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }

    // -- Rate limits --

    /// Count one hit in the fixed window starting at `window_start` (unix
    /// seconds) and return the new total. Atomic per (scope, subject, window).
    pub fn hit_rate_limit(&self, scope: &str, subject: &str, window_start: i64) -> Result<u32> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "INSERT INTO rate_limits (scope, subject, window_start, count) VALUES (?1, ?2, ?3, 1)
                 ON CONFLICT(scope, subject, window_start) DO UPDATE SET count = count + 1
                 RETURNING count",
                params![scope, subject, window_start],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

fn insert_guest_chat(
    conn: &Connection,
    inviter_id: Uuid,
    invite_id: Option<Uuid>,
    guest: &NewGuest<'_>,
    now: DateTime<Utc>,
) -> Result<GuestChat> {
    conn.execute(
        "INSERT INTO guest_sessions (id, display_name, preferred_language, invite_id, expires_at, created_at, last_active_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            guest.session_id.to_string(),
            guest.display_name,
            guest.preferred_language,
            invite_id.map(|id| id.to_string()),
            db_time(guest.session_expires_at),
            db_time(now),
        ],
    )?;

    conn.execute(
        "INSERT INTO chats (id, kind, created_by, is_ephemeral, delete_after, guest_session_id, created_at)
         VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6)",
        params![
            guest.chat_id.to_string(),
            ChatKind::Direct.as_str(),
            inviter_id.to_string(),
            db_time(guest.chat_delete_after),
            guest.session_id.to_string(),
            db_time(now),
        ],
    )?;

    insert_participant(conn, guest.chat_id, inviter_id, now)?;
    insert_participant(conn, guest.chat_id, guest.session_id, now)?;

    let chat = query_chat(conn, guest.chat_id)?.ok_or_else(|| anyhow!("guest chat vanished"))?;
    let session =
        query_session(conn, guest.session_id)?.ok_or_else(|| anyhow!("guest session vanished"))?;
    Ok(GuestChat { chat, session })
}

fn query_session(conn: &Connection, id: Uuid) -> Result<Option<GuestSession>> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM guest_sessions WHERE id = ?1");
    Ok(conn.query_row(&sql, [id.to_string()], session_from_row).optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn inviter(db: &Database) -> Uuid {
        let id = Uuid::new_v4();
        db.create_profile(id, &format!("u{}", &id.to_string()[..8]), "hash", "en").unwrap();
        id
    }

    fn invite(db: &Database, inviter_id: Uuid, max_uses: u32, ttl: Duration) -> GuestInvite {
        let now = crate::now();
        let invite = GuestInvite {
            id: Uuid::new_v4(),
            token: Uuid::new_v4().simple().to_string(),
            inviter_id,
            expires_at: now + ttl,
            max_uses,
            used_count: 0,
            created_at: now,
        };
        db.create_invite(&invite).unwrap();
        invite
    }

    fn guest<'a>(name: &'a str) -> NewGuest<'a> {
        let now = crate::now();
        NewGuest {
            session_id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            display_name: name,
            preferred_language: "fr",
            session_expires_at: now + Duration::hours(24),
            chat_delete_after: now + Duration::hours(24),
        }
    }

    #[test]
    fn accept_consumes_exactly_max_uses() {
        let db = Database::open_in_memory().unwrap();
        let u1 = inviter(&db);
        let inv = invite(&db, u1, 2, Duration::hours(1));

        let now = crate::now();
        assert!(db.accept_invite(&inv.token, &guest("a"), now).unwrap().is_some());
        assert!(db.accept_invite(&inv.token, &guest("b"), now).unwrap().is_some());
        assert!(db.accept_invite(&inv.token, &guest("c"), now).unwrap().is_none());

        let stored = db.get_invite_by_token(&inv.token).unwrap().unwrap();
        assert_eq!(stored.used_count, 2);
    }

    #[test]
    fn accepted_chat_has_inviter_and_guest() {
        let db = Database::open_in_memory().unwrap();
        let u1 = inviter(&db);
        let inv = invite(&db, u1, 1, Duration::hours(1));

        let created = db.accept_invite(&inv.token, &guest("Alex"), crate::now()).unwrap().unwrap();
        assert!(created.chat.is_ephemeral);
        assert_eq!(created.chat.kind, ChatKind::Direct);
        assert_eq!(created.session.invite_id, Some(inv.id));

        let members = db.participant_ids(created.chat.id).unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.contains(&u1));
        assert!(members.contains(&created.session.id));
    }

    #[test]
    fn expired_invite_is_never_consumed() {
        let db = Database::open_in_memory().unwrap();
        let u1 = inviter(&db);
        let inv = invite(&db, u1, 5, Duration::seconds(-5));

        assert!(db.accept_invite(&inv.token, &guest("a"), crate::now()).unwrap().is_none());
        assert_eq!(db.get_invite_by_token(&inv.token).unwrap().unwrap().used_count, 0);
    }

    #[test]
    fn failed_admission_rolls_back_the_use() {
        let db = Database::open_in_memory().unwrap();
        let u1 = inviter(&db);
        let inv = invite(&db, u1, 1, Duration::hours(1));

        // A chat id that already exists makes the insert fail after the counter bump.
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chats (id, kind, created_by, created_at) VALUES (?1, 'group', ?2, ?3)",
                params![Uuid::nil().to_string(), u1.to_string(), db_time(crate::now())],
            )?;
            Ok(())
        })
        .unwrap();
        let mut clash = guest("b");
        clash.chat_id = Uuid::nil();

        assert!(db.accept_invite(&inv.token, &clash, crate::now()).is_err());
        assert_eq!(db.get_invite_by_token(&inv.token).unwrap().unwrap().used_count, 0);
    }

    #[test]
    fn slug_collision_reports_false() {
        let db = Database::open_in_memory().unwrap();
        let a = inviter(&db);
        let b = inviter(&db);
        let now = crate::now();

        assert!(db.replace_qr_slug(a, "abc234", now).unwrap());
        assert!(!db.replace_qr_slug(b, "abc234", now).unwrap());
        assert_eq!(db.get_profile_by_slug("abc234").unwrap().unwrap().id, a);
        assert!(db.replace_qr_slug(Uuid::new_v4(), "zzz999", now).is_err());
    }

    #[test]
    fn reusable_chat_needs_matching_chat_and_session() {
        let db = Database::open_in_memory().unwrap();
        let u1 = inviter(&db);
        let u2 = inviter(&db);
        let now = crate::now();
        let created = db.create_guest_chat(u1, &guest("Alex"), now).unwrap();
        let other = db.create_guest_chat(u1, &guest("Alex"), now).unwrap();
        let (chat, session) = (created.chat.id, created.session.id);

        let found = db.find_reusable_guest_chat(u1, chat, session, now).unwrap().unwrap();
        assert_eq!(found.chat.id, chat);
        assert_eq!(found.session.id, session);

        assert!(db.find_reusable_guest_chat(u2, chat, session, now).unwrap().is_none());
        assert!(db.find_reusable_guest_chat(u1, chat, other.session.id, now).unwrap().is_none());

        db.close_chat(chat, now).unwrap();
        assert!(db.find_reusable_guest_chat(u1, chat, session, now).unwrap().is_none());
    }

    #[test]
    fn rate_limit_counts_per_window() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.hit_rate_limit("qr_start", "u1", 60).unwrap(), 1);
        assert_eq!(db.hit_rate_limit("qr_start", "u1", 60).unwrap(), 2);
        assert_eq!(db.hit_rate_limit("qr_start", "u1", 120).unwrap(), 1);
        assert_eq!(db.hit_rate_limit("qr_start", "u2", 60).unwrap(), 1);
    }
}
