//! Guest credentials: HS256 tokens bound to one chat and one guest session.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{debug, warn};
use uuid::Uuid;

use lingo_types::api::{GUEST_SCOPE, GuestClaims};

use crate::error::ApiError;

/// Sign a credential for `guest_id` in `chat_id`. Refuses when no dedicated
/// guest secret is configured.
pub fn mint_guest_credential(
    secret: Option<&str>,
    guest_id: Uuid,
    chat_id: Uuid,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<String, ApiError> {
    let Some(secret) = secret else {
        warn!("Refusing to mint guest credential: no guest secret configured");
        return Err(ApiError::Dependency(anyhow::anyhow!("guest credential secret not configured")));
    };

    let claims = GuestClaims {
        sub: guest_id,
        chat_id,
        scope: GUEST_SCOPE.to_string(),
        iat: now.timestamp() as usize,
        exp: (now + ttl).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| ApiError::Dependency(anyhow::anyhow!("failed to sign guest credential: {e}")))
}

/// Verify signature, expiry and scope. Chat binding is checked by
/// [`authorize_guest_for_chat`].
pub fn verify_guest_credential(secret: Option<&str>, token: &str) -> Result<GuestClaims, ApiError> {
    let Some(secret) = secret else {
        return Err(ApiError::Unauthorized);
    };

    let mut validation = Validation::default();
    validation.leeway = 0;
    let data = decode::<GuestClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|e| {
            debug!("Rejected guest credential: {}", e);
            ApiError::Unauthorized
        })?;

    if data.claims.scope != GUEST_SCOPE {
        return Err(ApiError::Unauthorized);
    }
    Ok(data.claims)
}

pub fn authorize_guest_for_chat(claims: &GuestClaims, chat_id: Uuid) -> Result<(), ApiError> {
    if claims.chat_id != chat_id {
        return Err(ApiError::Forbidden("credential is not valid for this chat".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: Option<&str> = Some("guest-secret-for-tests");

    #[test]
    fn credential_round_trips_with_its_binding() {
        let guest = Uuid::new_v4();
        let chat = Uuid::new_v4();
        let token = mint_guest_credential(SECRET, guest, chat, Utc::now(), Duration::hours(4)).unwrap();

        let claims = verify_guest_credential(SECRET, &token).unwrap();
        assert_eq!(claims.sub, guest);
        assert_eq!(claims.chat_id, chat);
        assert!(authorize_guest_for_chat(&claims, chat).is_ok());
        assert!(matches!(
            authorize_guest_for_chat(&claims, Uuid::new_v4()),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn expired_or_foreign_credentials_are_rejected() {
        let issued = Utc::now() - Duration::hours(5);
        let stale = mint_guest_credential(SECRET, Uuid::new_v4(), Uuid::new_v4(), issued, Duration::hours(4)).unwrap();
        assert!(matches!(verify_guest_credential(SECRET, &stale), Err(ApiError::Unauthorized)));

        let fresh = mint_guest_credential(SECRET, Uuid::new_v4(), Uuid::new_v4(), Utc::now(), Duration::hours(1)).unwrap();
        assert!(verify_guest_credential(Some("another-secret"), &fresh).is_err());
    }

    #[test]
    fn missing_secret_fails_closed() {
        assert!(mint_guest_credential(None, Uuid::new_v4(), Uuid::new_v4(), Utc::now(), Duration::hours(1)).is_err());
        let token = mint_guest_credential(SECRET, Uuid::new_v4(), Uuid::new_v4(), Utc::now(), Duration::hours(1)).unwrap();
        assert!(verify_guest_credential(None, &token).is_err());
    }
}
