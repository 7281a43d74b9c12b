use axum::{
    Extension, Json,
    extract::State,
    http::HeaderMap,
};

use lingo_types::api::{
    AcceptInviteRequest, AcceptInviteResponse, AcceptTokenRequest, AcceptTokenResponse, Claims,
    CloseGuestChatRequest, GuestInfo, IssueInviteRequest, IssueInviteResponse, OkResponse,
    RotateSlugResponse, ShareLinkResponse, SlugChatRequest, SlugChatResponse,
};
use lingo_types::models::DEFAULT_LANGUAGE;

use crate::credentials::{authorize_guest_for_chat, verify_guest_credential};
use crate::error::{ApiError, ApiJson};
use crate::guests::{self, AdmittedGuest};
use crate::middleware::bearer_claims;
use crate::ratelimit;
use crate::state::{AppState, blocking};
use crate::validate;

const DEFAULT_TTL_HOURS: u32 = 24;
const DEFAULT_MAX_USES: u32 = 1;
const DEFAULT_GUEST_NAME: &str = "Guest";

pub async fn issue_invite(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<IssueInviteRequest>,
) -> Result<Json<IssueInviteResponse>, ApiError> {
    let inviter_id = validate::required(req.inviter_id, "inviterId")?;
    if inviter_id != claims.sub {
        return Err(ApiError::Forbidden("inviterId must be the caller".into()));
    }
    let base = validate::base_url(req.base_url, &state.policy.public_base_url)?;

    let invite = guests::issue_invite(
        &state,
        inviter_id,
        req.ttl_hours.unwrap_or(DEFAULT_TTL_HOURS),
        req.max_uses.unwrap_or(DEFAULT_MAX_USES),
    )
    .await?;

    Ok(Json(IssueInviteResponse {
        invite_url: format!("{base}/invite/{}", invite.token),
        token: invite.token,
        expires_at: invite.expires_at,
    }))
}

/// One-use, 24-hour link for the caller.
pub async fn generate_share_link(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ShareLinkResponse>, ApiError> {
    let invite = guests::issue_invite(&state, claims.sub, DEFAULT_TTL_HOURS, DEFAULT_MAX_USES).await?;
    let base = state.policy.public_base_url.trim_end_matches('/');

    Ok(Json(ShareLinkResponse {
        share_url: format!("{base}/join/{}", invite.token),
        token: invite.token,
        expires_at: invite.expires_at,
        max_uses: invite.max_uses,
    }))
}

pub async fn accept_invite(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<AcceptInviteRequest>,
) -> Result<Json<AcceptInviteResponse>, ApiError> {
    let token = validate::required_text(req.token, "token")?;
    let name = validate::display_name(req.name, "name")?;
    let language = validate::language(&validate::required_text(req.preferred_language, "preferredLanguage")?)?;
    let base = validate::base_url(req.base_url, &state.policy.public_base_url)?;

    let admitted = guests::accept_invite(&state, token, name, language)
        .await
        .map_err(|e| match e {
            ApiError::NotFoundOrExpired { .. } => ApiError::invalid("invalid or expired invite"),
            other => other,
        })?;

    Ok(Json(AcceptInviteResponse {
        chat_id: admitted.chat.id,
        url: format!("{base}/guest/{}", admitted.chat.id),
        guest_info: guest_info(&admitted),
        guest_credential: admitted.credential,
    }))
}

/// Alternate token flow with a snake_case shape and a per-client quota.
/// Expiry surfaces as 404/410 here rather than 400.
pub async fn accept_invite_from_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<AcceptTokenRequest>,
) -> Result<Json<AcceptTokenResponse>, ApiError> {
    let now = lingo_db::now();
    ratelimit::check(
        &state.db,
        ratelimit::ACCEPT_TOKEN,
        client_key(&headers),
        state.policy.accepts_per_minute,
        now,
    )
    .await?;

    let token = validate::required_text(req.token, "token")?;
    let name = match req.display_name {
        Some(name) => validate::display_name(Some(name), "display_name")?,
        None => DEFAULT_GUEST_NAME.to_string(),
    };

    let admitted = guests::accept_invite(&state, token, name, DEFAULT_LANGUAGE.to_string()).await?;

    Ok(Json(AcceptTokenResponse {
        conversation_id: admitted.chat.id,
        guest_id: admitted.session.id,
        guest_jwt: admitted.credential,
    }))
}

pub async fn start_guest_chat_from_slug(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SlugChatRequest>,
) -> Result<Json<SlugChatResponse>, ApiError> {
    let slug = validate::required_text(req.slug, "slug")?;
    let name = validate::display_name(req.name, "name")?;
    let language = validate::language(&validate::required_text(req.preferred_language, "preferredLanguage")?)?;

    let admitted = guests::start_guest_chat_from_slug(&state, slug.to_ascii_lowercase(), name, language, req.guest_credential)
        .await
        .map_err(|e| match e {
            ApiError::NotFoundOrExpired { .. } => ApiError::invalid("invalid slug"),
            other => other,
        })?;

    Ok(Json(SlugChatResponse {
        chat_id: admitted.chat.id,
        guest_info: guest_info(&admitted),
        reused: admitted.reused,
        guest_credential: admitted.credential,
    }))
}

pub async fn rotate_slug(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<RotateSlugResponse>, ApiError> {
    let new_slug = guests::rotate_qr_slug(&state, claims.sub).await?;
    let base = state.policy.public_base_url.trim_end_matches('/');
    Ok(Json(RotateSlugResponse {
        join_url: format!("{base}/q/{new_slug}"),
        new_slug,
    }))
}

/// Either a participating user (bearer token) or the chat's guest
/// (credential in the body) may close it.
pub async fn close_guest_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<CloseGuestChatRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let chat_id = validate::required(req.chat_id, "chatId")?;

    if let Some(claims) = bearer_claims(&state.jwt_secret, &headers) {
        let user_id = claims.sub;
        let member = blocking(&state.db, move |db| db.is_participant(chat_id, user_id)).await?;
        if !member {
            return Err(ApiError::Forbidden("not a participant of this chat".into()));
        }
    } else if let Some(credential) = req.guest_credential {
        let claims = verify_guest_credential(state.guest_secret.as_deref(), &credential)?;
        authorize_guest_for_chat(&claims, chat_id)?;
    } else {
        return Err(ApiError::Unauthorized);
    }

    guests::close_guest_chat(&state, chat_id, req.minutes_until_delete.unwrap_or(0)).await?;
    Ok(Json(OkResponse { ok: true }))
}

fn guest_info(admitted: &AdmittedGuest) -> GuestInfo {
    GuestInfo {
        id: admitted.session.id,
        display_name: admitted.session.display_name.clone(),
        preferred_language: admitted.session.preferred_language.clone(),
        expires_at: admitted.session.expires_at,
    }
}

/// Best-effort client identity for the per-client quota.
fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
