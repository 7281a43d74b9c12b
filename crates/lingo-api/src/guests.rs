//! Guest session manager: invites, QR slugs, admission and close.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use lingo_db::models::{GuestChat, NewGuest};
use lingo_types::events::RelayEvent;
use lingo_types::models::{Chat, GuestInvite, GuestSession};

use crate::credentials::{mint_guest_credential, verify_guest_credential};
use crate::error::ApiError;
use crate::ratelimit;
use crate::state::{AppState, blocking};
use crate::tokens::{generate_invite_token, generate_slug};

pub const MAX_INVITE_TTL_HOURS: u32 = 168;
pub const MAX_INVITE_USES: u32 = 100;
pub const MAX_CLOSE_DELAY_MINUTES: i64 = 7 * 24 * 60;
const SLUG_ATTEMPTS: usize = 5;

/// A guest let into a chat, with the credential that scopes them to it.
#[derive(Debug)]
pub struct AdmittedGuest {
    pub chat: Chat,
    pub session: GuestSession,
    pub credential: String,
    pub reused: bool,
}

pub async fn issue_invite(
    state: &AppState,
    inviter_id: Uuid,
    ttl_hours: u32,
    max_uses: u32,
) -> Result<GuestInvite, ApiError> {
    if !(1..=MAX_INVITE_TTL_HOURS).contains(&ttl_hours) {
        return Err(ApiError::invalid(format!("ttlHours must be 1-{MAX_INVITE_TTL_HOURS}")));
    }
    if !(1..=MAX_INVITE_USES).contains(&max_uses) {
        return Err(ApiError::invalid(format!("maxUses must be 1-{MAX_INVITE_USES}")));
    }

    let now = lingo_db::now();
    let invite = GuestInvite {
        id: Uuid::new_v4(),
        token: generate_invite_token(),
        inviter_id,
        expires_at: now + Duration::hours(i64::from(ttl_hours)),
        max_uses,
        used_count: 0,
        created_at: now,
    };

    let row = invite.clone();
    let known = blocking(&state.db, move |db| {
        if db.get_profile(row.inviter_id)?.is_none() {
            return Ok(false);
        }
        db.create_invite(&row)?;
        Ok(true)
    })
    .await?;
    if !known {
        return Err(ApiError::invalid("unknown inviter"));
    }

    info!("{} issued invite {} ({} uses, expires {})", inviter_id, invite.id, max_uses, invite.expires_at);
    Ok(invite)
}

/// Consume one use of `token` and open a fresh ephemeral chat for the guest.
pub async fn accept_invite(
    state: &AppState,
    token: String,
    display_name: String,
    preferred_language: String,
) -> Result<AdmittedGuest, ApiError> {
    let secret = guest_secret(state)?;
    let now = lingo_db::now();
    let session_id = Uuid::new_v4();
    let chat_id = Uuid::new_v4();
    let (session_ttl, chat_ttl) = (state.policy.session_ttl, state.policy.chat_ttl);

    let lookup = token.clone();
    let admitted = blocking(&state.db, move |db| {
        let guest = NewGuest {
            session_id,
            chat_id,
            display_name: &display_name,
            preferred_language: &preferred_language,
            session_expires_at: now + session_ttl,
            chat_delete_after: now + chat_ttl,
        };
        match db.accept_invite(&token, &guest, now)? {
            Some(created) => Ok(Ok(created)),
            None => Ok(Err(db.get_invite_by_token(&token)?.is_some())),
        }
    })
    .await?;

    let created = admitted.map_err(|gone| {
        info!("Rejected invite {}...: {}", prefix(&lookup), if gone { "expired or used up" } else { "unknown" });
        ApiError::NotFoundOrExpired { gone }
    })?;

    info!("Guest {} joined chat {} by invite", created.session.id, created.chat.id);
    admit(state, &secret, created, false, now)
}

/// Start a guest chat through an inviter's QR slug. When reuse is enabled,
/// a caller holding a still-valid credential for an open chat with the same
/// inviter resumes that chat instead.
pub async fn start_guest_chat_from_slug(
    state: &AppState,
    slug: String,
    display_name: String,
    preferred_language: String,
    prior_credential: Option<String>,
) -> Result<AdmittedGuest, ApiError> {
    let secret = guest_secret(state)?;
    let now = lingo_db::now();

    let inviter_id = blocking(&state.db, move |db| db.get_profile_by_slug(&slug))
        .await?
        .ok_or(ApiError::NotFoundOrExpired { gone: false })?
        .id;

    let prior = prior_credential
        .filter(|_| state.policy.reuse_guest_chats)
        .and_then(|token| match verify_guest_credential(Some(&secret), &token) {
            Ok(claims) => Some(claims),
            Err(_) => {
                debug!("Ignoring invalid prior credential for slug start with {}", inviter_id);
                None
            }
        });
    if let Some(claims) = prior {
        let (chat_id, session_id) = (claims.chat_id, claims.sub);
        let existing = blocking(&state.db, move |db| {
            db.find_reusable_guest_chat(inviter_id, chat_id, session_id, now)
        })
        .await?;
        if let Some(existing) = existing {
            info!("Reusing guest chat {} for {}", existing.chat.id, inviter_id);
            return admit(state, &secret, existing, true, now);
        }
    }

    ratelimit::check(
        &state.db,
        ratelimit::QR_START,
        inviter_id.to_string(),
        state.policy.qr_starts_per_minute,
        now,
    )
    .await?;

    let (session_ttl, chat_ttl) = (state.policy.session_ttl, state.policy.chat_ttl);
    let created = blocking(&state.db, move |db| {
        let guest = NewGuest {
            session_id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            display_name: &display_name,
            preferred_language: &preferred_language,
            session_expires_at: now + session_ttl,
            chat_delete_after: now + chat_ttl,
        };
        db.create_guest_chat(inviter_id, &guest, now)
    })
    .await?;

    info!("Guest {} started chat {} with {} via QR", created.session.id, created.chat.id, inviter_id);
    admit(state, &secret, created, false, now)
}

pub async fn rotate_qr_slug(state: &AppState, user_id: Uuid) -> Result<String, ApiError> {
    rotate_qr_slug_with(state, user_id, generate_slug).await
}

/// Replace the user's slug with a fresh one from `next_slug`, retrying on
/// collision a bounded number of times.
pub async fn rotate_qr_slug_with<F>(state: &AppState, user_id: Uuid, mut next_slug: F) -> Result<String, ApiError>
where
    F: FnMut() -> String + Send + 'static,
{
    let outcome = blocking(&state.db, move |db| {
        if db.get_profile(user_id)?.is_none() {
            return Ok(Err(ApiError::Unauthorized));
        }
        for attempt in 1..=SLUG_ATTEMPTS {
            let slug = next_slug();
            if db.replace_qr_slug(user_id, &slug, lingo_db::now())? {
                return Ok(Ok(slug));
            }
            warn!("Slug collision for {} (attempt {}/{})", user_id, attempt, SLUG_ATTEMPTS);
        }
        Ok(Err(ApiError::Exhausted("slug generation")))
    })
    .await?;

    let slug = outcome?;
    info!("{} rotated QR slug", user_id);
    Ok(slug)
}

/// Schedule a chat for deletion. The reaper does the actual delete.
pub async fn close_guest_chat(
    state: &AppState,
    chat_id: Uuid,
    minutes_until_delete: i64,
) -> Result<DateTime<Utc>, ApiError> {
    if !(0..=MAX_CLOSE_DELAY_MINUTES).contains(&minutes_until_delete) {
        return Err(ApiError::invalid(format!(
            "minutesUntilDelete must be 0-{MAX_CLOSE_DELAY_MINUTES}"
        )));
    }
    let delete_after = lingo_db::now() + Duration::minutes(minutes_until_delete);

    let closed = blocking(&state.db, move |db| db.close_chat(chat_id, delete_after)).await?;
    if !closed {
        return Err(ApiError::NotFoundOrExpired { gone: false });
    }

    state
        .dispatcher
        .publish(RelayEvent::ChatClosed { chat_id, delete_after })
        .await;
    info!("Chat {} closed, deleting after {}", chat_id, delete_after);
    Ok(delete_after)
}

fn guest_secret(state: &AppState) -> Result<String, ApiError> {
    state.guest_secret.clone().ok_or_else(|| {
        warn!("Guest flow refused: no guest secret configured");
        ApiError::Dependency(anyhow::anyhow!("guest credential secret not configured"))
    })
}

fn admit(
    state: &AppState,
    secret: &str,
    created: GuestChat,
    reused: bool,
    now: DateTime<Utc>,
) -> Result<AdmittedGuest, ApiError> {
    let credential = mint_guest_credential(
        Some(secret),
        created.session.id,
        created.chat.id,
        now,
        state.policy.credential_ttl(),
    )?;
    Ok(AdmittedGuest {
        chat: created.chat,
        session: created.session,
        credential,
        reused,
    })
}

/// Enough of a token to correlate logs without leaking it.
fn prefix(token: &str) -> &str {
    token.get(..6).unwrap_or(token)
}
