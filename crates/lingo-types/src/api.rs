use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Attachment, ChatKind, SenderType};

// -- Credentials --

/// Bearer token claims for registered users. Shared by the REST
/// middleware and the gateway upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

pub const GUEST_SCOPE: &str = "guest_chat";

/// Guest credential claims. `sub` is the guest-session id; the token is
/// only valid for `chat_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestClaims {
    pub sub: Uuid,
    pub chat_id: Uuid,
    pub scope: String,
    pub iat: usize,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub preferred_language: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Chats --

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    /// Direct chat with one other profile.
    pub participant_id: Option<Uuid>,
    /// Group chat members (the caller is always added).
    pub participant_ids: Option<Vec<Uuid>>,
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub chat_id: Uuid,
    pub kind: ChatKind,
    pub participant_ids: Vec<Uuid>,
}

// -- Messages --

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub chat_id: Option<Uuid>,
    pub message: Option<String>,
    pub source_language: Option<String>,
    pub reply_to_id: Option<Uuid>,
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub success: bool,
    pub message_id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendGuestMessageRequest {
    pub chat_id: Option<Uuid>,
    pub message: Option<String>,
    pub guest_credential: Option<String>,
    pub reply_to_id: Option<Uuid>,
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestMessageResponse {
    pub message_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A message as one reader sees it: their translation when it exists,
/// the original otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub sender_type: SenderType,
    pub text: String,
    pub original_text: String,
    pub source_language: String,
    pub target_language: Option<String>,
    pub translated: bool,
    pub attachment: Option<Attachment>,
    pub reply_to_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

// -- Invites and guests --

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueInviteRequest {
    pub inviter_id: Option<Uuid>,
    pub ttl_hours: Option<u32>,
    pub max_uses: Option<u32>,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueInviteResponse {
    pub invite_url: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareLinkResponse {
    pub share_url: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub max_uses: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptInviteRequest {
    pub token: Option<String>,
    pub name: Option<String>,
    pub preferred_language: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestInfo {
    pub id: Uuid,
    pub display_name: String,
    pub preferred_language: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptInviteResponse {
    pub chat_id: Uuid,
    pub guest_credential: String,
    pub guest_info: GuestInfo,
    pub url: String,
}

/// Share-link flow. Field names are snake_case on the wire.
#[derive(Debug, Default, Deserialize)]
pub struct AcceptTokenRequest {
    pub token: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptTokenResponse {
    pub conversation_id: Uuid,
    pub guest_id: Uuid,
    pub guest_jwt: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlugChatRequest {
    pub slug: Option<String>,
    pub name: Option<String>,
    pub preferred_language: Option<String>,
    /// Credential from an earlier chat with the same inviter, to resume it.
    pub guest_credential: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlugChatResponse {
    pub chat_id: Uuid,
    pub guest_credential: String,
    pub guest_info: GuestInfo,
    pub reused: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateSlugResponse {
    pub new_slug: String,
    pub join_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseGuestChatRequest {
    pub chat_id: Option<Uuid>,
    pub minutes_until_delete: Option<i64>,
    pub guest_credential: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResponse {
    pub deleted_count: usize,
}
