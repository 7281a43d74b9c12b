use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use lingo_types::api::{
    Claims, GuestMessageResponse, MessageView, OkResponse, SendGuestMessageRequest,
    SendMessageRequest, SendMessageResponse, ToggleReactionRequest,
};
use lingo_types::events::RelayEvent;
use lingo_types::models::SenderType;

use crate::credentials::{authorize_guest_for_chat, verify_guest_credential};
use crate::error::{ApiError, ApiJson};
use crate::fanout::{self, OutgoingMessage};
use crate::middleware::bearer_token;
use crate::state::{AppState, blocking};
use crate::validate;

const MAX_PAGE: u32 = 200;
const MAX_EMOJI_CHARS: usize = 16;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// `created_at` of the oldest message already held; returns older ones.
    pub before: Option<DateTime<Utc>>,
}

fn default_limit() -> u32 {
    50
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let chat_id = validate::required(req.chat_id, "chatId")?;
    let text = validate::message_text(req.message, req.attachment.is_some())?;

    let source_language = match req.source_language {
        Some(lang) => validate::language(&lang)?,
        None => {
            let user_id = claims.sub;
            blocking(&state.db, move |db| db.get_profile(user_id))
                .await?
                .ok_or(ApiError::Unauthorized)?
                .preferred_language
        }
    };

    let (message, _) = fanout::send_message(
        &state,
        OutgoingMessage {
            chat_id,
            sender_id: claims.sub,
            sender_type: SenderType::User,
            text,
            source_language,
            reply_to_id: req.reply_to_id,
            attachment: req.attachment,
        },
    )
    .await?;

    Ok(Json(SendMessageResponse {
        success: true,
        message_id: message.id,
    }))
}

pub async fn send_guest_message(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SendGuestMessageRequest>,
) -> Result<Json<GuestMessageResponse>, ApiError> {
    let credential = req.guest_credential.ok_or(ApiError::Unauthorized)?;
    let claims = verify_guest_credential(state.guest_secret.as_deref(), &credential)?;
    let chat_id = validate::required(req.chat_id, "chatId")?;
    authorize_guest_for_chat(&claims, chat_id)?;
    let text = validate::message_text(req.message, req.attachment.is_some())?;

    let guest_id = claims.sub;
    let session = blocking(&state.db, move |db| {
        let session = db.get_guest_session(guest_id)?;
        if session.is_some() {
            db.touch_guest_session(guest_id, lingo_db::now())?;
        }
        Ok(session)
    })
    .await?
    .ok_or(ApiError::Unauthorized)?;

    let (message, _) = fanout::send_message(
        &state,
        OutgoingMessage {
            chat_id,
            sender_id: guest_id,
            sender_type: SenderType::Guest,
            text,
            source_language: session.preferred_language,
            reply_to_id: req.reply_to_id,
            attachment: req.attachment,
        },
    )
    .await?;

    Ok(Json(GuestMessageResponse {
        message_id: message.id,
        created_at: message.created_at,
    }))
}

/// History as the caller reads it: their translation where one exists,
/// otherwise the original text.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    history(&state, chat_id, claims.sub, query).await.map(Json)
}

/// Guest history. The guest credential rides in `Authorization: Bearer` and
/// must be bound to `chat_id`.
pub async fn get_guest_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let token = bearer_token(&headers).ok_or(ApiError::Unauthorized)?;
    let claims = verify_guest_credential(state.guest_secret.as_deref(), token)?;
    authorize_guest_for_chat(&claims, chat_id)?;
    history(&state, chat_id, claims.sub, query).await.map(Json)
}

async fn history(
    state: &AppState,
    chat_id: Uuid,
    reader: Uuid,
    query: HistoryQuery,
) -> Result<Vec<MessageView>, ApiError> {
    let limit = query.limit.clamp(1, MAX_PAGE);
    let rows = blocking(&state.db, move |db| {
        if !db.is_participant(chat_id, reader)? {
            return Ok(None);
        }
        db.messages_for_reader(chat_id, reader, query.before, limit).map(Some)
    })
    .await?
    .ok_or_else(|| ApiError::Forbidden("not a participant of this chat".into()))?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let m = row.message;
            let (text, target_language, translated) = match row.translation {
                Some(t) => (t.translated_text, Some(t.target_language), true),
                None => (m.original_text.clone(), None, false),
            };
            MessageView {
                id: m.id,
                chat_id: m.chat_id,
                sender_id: m.sender_id,
                sender_type: m.sender_type,
                text,
                original_text: m.original_text,
                source_language: m.source_language,
                target_language,
                translated,
                attachment: m.attachment,
                reply_to_id: m.reply_to_id,
                created_at: m.created_at,
            }
        })
        .collect())
}

pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path((chat_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<ToggleReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let emoji = req.emoji.trim().to_string();
    if emoji.is_empty() || emoji.chars().count() > MAX_EMOJI_CHARS {
        return Err(ApiError::invalid("emoji must be 1-16 characters"));
    }

    let user_id = claims.sub;
    let stored = emoji.clone();
    let added = blocking(&state.db, move |db| {
        ensure_message_in_chat(db, chat_id, message_id, user_id)?
            .map(|()| db.toggle_reaction(message_id, user_id, &stored))
            .transpose()
    })
    .await?
    .ok_or(ApiError::NotFoundOrExpired { gone: false })?;

    let event = if added {
        RelayEvent::ReactionAdd { chat_id, message_id, user_id, emoji }
    } else {
        RelayEvent::ReactionRemove { chat_id, message_id, user_id, emoji }
    };
    state.dispatcher.publish(event).await;

    Ok(Json(serde_json::json!({ "added": added })))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path((chat_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<OkResponse>, ApiError> {
    let user_id = claims.sub;
    let recorded = blocking(&state.db, move |db| {
        ensure_message_in_chat(db, chat_id, message_id, user_id)?
            .map(|()| db.mark_read(message_id, user_id))
            .transpose()
    })
    .await?
    .ok_or(ApiError::NotFoundOrExpired { gone: false })?;

    if !recorded {
        warn!("Read receipt for {} by {} already recorded", message_id, user_id);
    }
    Ok(Json(OkResponse { ok: true }))
}

/// `Some(())` when the reader belongs to the chat and the message is in it.
fn ensure_message_in_chat(
    db: &lingo_db::Database,
    chat_id: Uuid,
    message_id: Uuid,
    reader: Uuid,
) -> anyhow::Result<Option<()>> {
    if !db.is_participant(chat_id, reader)? {
        return Ok(None);
    }
    Ok(db
        .get_message(message_id)?
        .filter(|m| m.chat_id == chat_id && !m.deleted)
        .map(|_| ()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::mint_guest_credential;
    use crate::testing::{GUEST_SECRET, direct_chat, test_state, user};
    use chrono::Duration;
    use lingo_db::models::NewGuest;

    fn claims(id: Uuid) -> Extension<Claims> {
        Extension(Claims { sub: id, username: "t".into(), exp: usize::MAX })
    }

    #[tokio::test]
    async fn source_language_defaults_to_profile() {
        let (state, _) = test_state();
        let a = user(&state, "ana", "es");
        let b = user(&state, "bruno", "es");
        let chat = direct_chat(&state, a, b);

        let Json(resp) = send_message(
            State(state.clone()),
            claims(a),
            ApiJson(SendMessageRequest { chat_id: Some(chat), message: Some("Hola".into()), ..Default::default() }),
        )
        .await
        .unwrap();
        assert!(resp.success);
        let stored = state.db.get_message(resp.message_id).unwrap().unwrap();
        assert_eq!(stored.source_language, "es");
    }

    #[tokio::test]
    async fn missing_chat_id_is_invalid_input() {
        let (state, _) = test_state();
        let a = user(&state, "ana", "en");
        let err = send_message(
            State(state),
            claims(a),
            ApiJson(SendMessageRequest { message: Some("hi".into()), ..Default::default() }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn history_falls_back_to_original() {
        let (state, _) = test_state();
        let a = user(&state, "ana", "en");
        let b = user(&state, "bruno", "es");
        let chat = direct_chat(&state, a, b);
        send_message(
            State(state.clone()),
            claims(a),
            ApiJson(SendMessageRequest {
                chat_id: Some(chat),
                message: Some("Hello".into()),
                source_language: Some("en".into()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        let query = || Query(HistoryQuery { limit: 50, before: None });
        let Json(for_b) = get_messages(State(state.clone()), Path(chat), query(), claims(b)).await.unwrap();
        assert_eq!(for_b.len(), 1);
        assert_eq!(for_b[0].text, "Hola");
        assert!(for_b[0].translated);

        // Stored without a fan-out, so nobody has a translation row yet.
        state
            .db
            .insert_message(&lingo_db::models::NewMessage {
                id: Uuid::new_v4(),
                chat_id: chat,
                sender_id: a,
                sender_type: SenderType::User,
                text: "Good night",
                source_language: "en",
                attachment: None,
                reply_to_id: None,
            })
            .unwrap();
        let Json(for_b) = get_messages(State(state.clone()), Path(chat), query(), claims(b)).await.unwrap();
        assert_eq!(for_b.len(), 2);
        assert_eq!(for_b[1].text, "Good night");
        assert!(!for_b[1].translated);
        assert_eq!(for_b[1].target_language, None);

        let outsider = user(&state, "zed", "de");
        let denied = get_messages(State(state.clone()), Path(chat), query(), claims(outsider)).await;
        assert!(matches!(denied, Err(ApiError::Forbidden(_))));
    }

    #[tokio::test]
    async fn guest_message_requires_matching_credential() {
        let (state, _) = test_state();
        let host = user(&state, "host", "en");
        let now = lingo_db::now();
        let guest = NewGuest {
            session_id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            display_name: "Alex",
            preferred_language: "fr",
            session_expires_at: now + Duration::hours(24),
            chat_delete_after: now + Duration::hours(24),
        };
        let created = state.db.create_guest_chat(host, &guest, now).unwrap();
        let chat_id = created.chat.id;
        let credential =
            mint_guest_credential(Some(GUEST_SECRET), guest.session_id, chat_id, now, Duration::hours(4)).unwrap();

        let ok = send_guest_message(
            State(state.clone()),
            ApiJson(SendGuestMessageRequest {
                chat_id: Some(chat_id),
                message: Some("Salut".into()),
                guest_credential: Some(credential.clone()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        let stored = state.db.get_message(ok.0.message_id).unwrap().unwrap();
        assert_eq!(stored.sender_type, SenderType::Guest);
        assert_eq!(stored.source_language, "fr");
        let session = state.db.get_guest_session(guest.session_id).unwrap().unwrap();
        assert!(session.last_active_at >= now);

        let mismatch = send_guest_message(
            State(state.clone()),
            ApiJson(SendGuestMessageRequest {
                chat_id: Some(Uuid::new_v4()),
                message: Some("Salut".into()),
                guest_credential: Some(credential),
                ..Default::default()
            }),
        )
        .await;
        assert!(matches!(mismatch, Err(ApiError::Forbidden(_))));

        let missing = send_guest_message(
            State(state),
            ApiJson(SendGuestMessageRequest { chat_id: Some(chat_id), message: Some("x".into()), ..Default::default() }),
        )
        .await;
        assert!(matches!(missing, Err(ApiError::Unauthorized)));
    }

    #[tokio::test]
    async fn guest_reads_history_with_its_credential() {
        let (state, _) = test_state();
        let host = user(&state, "host", "en");
        let now = lingo_db::now();
        let guest = NewGuest {
            session_id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            display_name: "Alex",
            preferred_language: "fr",
            session_expires_at: now + Duration::hours(24),
            chat_delete_after: now + Duration::hours(24),
        };
        let chat_id = state.db.create_guest_chat(host, &guest, now).unwrap().chat.id;
        let credential =
            mint_guest_credential(Some(GUEST_SECRET), guest.session_id, chat_id, now, Duration::hours(4)).unwrap();

        send_message(
            State(state.clone()),
            claims(host),
            ApiJson(SendMessageRequest {
                chat_id: Some(chat_id),
                message: Some("Hello".into()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        // No fan-out for this one, so the guest has no translation row.
        state
            .db
            .insert_message(&lingo_db::models::NewMessage {
                id: Uuid::new_v4(),
                chat_id,
                sender_id: host,
                sender_type: SenderType::User,
                text: "See you soon",
                source_language: "en",
                attachment: None,
                reply_to_id: None,
            })
            .unwrap();

        let bearer = |token: &str| {
            let mut headers = HeaderMap::new();
            headers.insert(axum::http::header::AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
            headers
        };
        let query = || Query(HistoryQuery { limit: 50, before: None });

        let Json(seen) = get_guest_messages(State(state.clone()), Path(chat_id), query(), bearer(&credential))
            .await
            .unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].text, "Bonjour");
        assert_eq!(seen[0].target_language.as_deref(), Some("fr"));
        assert_eq!(seen[1].text, "See you soon");
        assert!(!seen[1].translated);

        let elsewhere = get_guest_messages(State(state.clone()), Path(Uuid::new_v4()), query(), bearer(&credential)).await;
        assert!(matches!(elsewhere, Err(ApiError::Forbidden(_))));

        let user_token = crate::middleware::create_user_token(&state.jwt_secret, host, "host").unwrap();
        let wrong_kind = get_guest_messages(State(state.clone()), Path(chat_id), query(), bearer(&user_token)).await;
        assert!(matches!(wrong_kind, Err(ApiError::Unauthorized)));

        let missing = get_guest_messages(State(state), Path(chat_id), query(), HeaderMap::new()).await;
        assert!(matches!(missing, Err(ApiError::Unauthorized)));
    }

    #[tokio::test]
    async fn reactions_toggle_and_publish() {
        let (state, _) = test_state();
        let a = user(&state, "ana", "en");
        let b = user(&state, "bruno", "en");
        let chat = direct_chat(&state, a, b);
        let Json(sent) = send_message(
            State(state.clone()),
            claims(a),
            ApiJson(SendMessageRequest { chat_id: Some(chat), message: Some("hi".into()), ..Default::default() }),
        )
        .await
        .unwrap();

        let (conn, mut rx) = state.dispatcher.register(a).await;
        state.dispatcher.subscribe(conn, chat).await;

        let react = || ApiJson(ToggleReactionRequest { emoji: "👍".into() });
        toggle_reaction(State(state.clone()), Path((chat, sent.message_id)), claims(b), react())
            .await
            .unwrap();
        toggle_reaction(State(state.clone()), Path((chat, sent.message_id)), claims(b), react())
            .await
            .unwrap();
        assert!(matches!(rx.try_recv(), Ok(RelayEvent::ReactionAdd { .. })));
        assert!(matches!(rx.try_recv(), Ok(RelayEvent::ReactionRemove { .. })));

        let wrong_chat = toggle_reaction(State(state.clone()), Path((Uuid::new_v4(), sent.message_id)), claims(b), react()).await;
        assert!(matches!(wrong_chat, Err(ApiError::NotFoundOrExpired { gone: false })));

        mark_read(State(state.clone()), Path((chat, sent.message_id)), claims(b)).await.unwrap();
        mark_read(State(state), Path((chat, sent.message_id)), claims(b)).await.unwrap();
    }
}
