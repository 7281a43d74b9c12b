use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade, ws::rejection::WebSocketUpgradeRejection},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use lingo_api::credentials::verify_guest_credential;
use lingo_api::error::ApiError;
use lingo_api::middleware::{decode_user_token, require_auth};
use lingo_api::state::AppState;
use lingo_api::{auth, chats, invites, messages, reaper};
use lingo_gateway::connection::{self, Identity};
use lingo_types::models::ParticipantKind;

pub fn app(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/accept-invite", post(invites::accept_invite))
        .route("/accept-invite-from-token", post(invites::accept_invite_from_token))
        .route("/start-guest-chat-from-slug", post(invites::start_guest_chat_from_slug))
        .route("/send-guest-message", post(messages::send_guest_message))
        .route("/guest/chats/{chat_id}/messages", get(messages::get_guest_messages))
        .route("/close-guest-chat", post(invites::close_guest_chat))
        .route("/sweep-ephemeral", post(reaper::sweep_ephemeral))
        .route("/gateway", get(ws_upgrade))
        .route("/health", get(health));

    let protected_routes = Router::new()
        .route("/chats", post(chats::create_chat))
        .route("/chats/{chat_id}/messages", get(messages::get_messages))
        .route("/send-message", post(messages::send_message))
        .route(
            "/chats/{chat_id}/messages/{message_id}/reactions",
            post(messages::toggle_reaction),
        )
        .route("/chats/{chat_id}/messages/{message_id}/read", post(messages::mark_read))
        .route("/issue-invite", post(invites::issue_invite))
        .route("/generate-share-link", post(invites::generate_share_link))
        .route("/rotate-slug", post(invites::rotate_slug))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token rides
/// in the query string. The token is checked before the upgrade itself.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let identity = match query.token.as_deref().map(|token| gateway_identity(&state, token)) {
        Some(Ok(identity)) => identity,
        Some(Err(e)) => return e.into_response(),
        None => return ApiError::Unauthorized.into_response(),
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let dispatcher = state.dispatcher.clone();
    let db = state.db.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, db, identity))
}

/// User tokens see every chat they belong to; guest credentials are pinned
/// to one chat. Either way the connection ends at the token's `exp`.
fn gateway_identity(state: &AppState, token: &str) -> Result<Identity, ApiError> {
    if let Ok(claims) = decode_user_token(&state.jwt_secret, token) {
        return Ok(Identity {
            participant_id: claims.sub,
            kind: ParticipantKind::User,
            chat_scope: None,
            expires_at: DateTime::from_timestamp(claims.exp as i64, 0),
        });
    }

    let claims = verify_guest_credential(state.guest_secret.as_deref(), token).map_err(|e| {
        debug!("Gateway upgrade rejected: {}", e);
        e
    })?;
    let expires_at = DateTime::<Utc>::from_timestamp(claims.exp as i64, 0).ok_or(ApiError::Unauthorized)?;
    Ok(Identity {
        participant_id: claims.sub,
        kind: ParticipantKind::Guest,
        chat_scope: Some(claims.chat_id),
        expires_at: Some(expires_at),
    })
}
