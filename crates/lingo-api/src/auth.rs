use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;
use uuid::Uuid;

use lingo_types::api::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use lingo_types::models::DEFAULT_LANGUAGE;

use crate::error::{ApiError, ApiJson};
use crate::middleware::create_user_token;
use crate::state::{AppState, blocking};
use crate::validate;

pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::invalid("username must be 3-32 characters"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::invalid("password must be at least 8 characters"));
    }
    let language = validate::language(req.preferred_language.as_deref().unwrap_or(DEFAULT_LANGUAGE))?;

    let username = req.username.clone();
    let taken = blocking(&state.db, move |db| Ok(db.get_user_by_username(&username)?.is_some())).await?;
    if taken {
        return Err(ApiError::invalid("username is taken"));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?
        .to_string();

    let user_id = Uuid::new_v4();
    let username = req.username.clone();
    let created = blocking(&state.db, move |db| {
        db.create_profile(user_id, &username, &password_hash, &language)
    })
    .await?;
    // Lost a race with a concurrent registration of the same name.
    if !created {
        return Err(ApiError::invalid("username is taken"));
    }

    let token = create_user_token(&state.jwt_secret, user_id, &req.username)?;
    info!("Registered user {} ({})", req.username, user_id);

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let username = req.username.clone();
    let user = blocking(&state.db, move |db| db.get_user_by_username(&username))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("stored password hash is malformed: {e}"))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let token = create_user_token(&state.jwt_secret, user.id, &user.username)?;

    Ok(Json(LoginResponse {
        user_id: user.id,
        username: user.username,
        token,
    }))
}
