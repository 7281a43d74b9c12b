use std::sync::Arc;

use chrono::Duration;
use tracing::error;

use lingo_db::Database;
use lingo_gateway::dispatcher::Dispatcher;

use crate::error::ApiError;
use crate::translation::TranslationService;

/// Hard ceiling on a guest credential's lifetime.
pub const MAX_CREDENTIAL_TTL: Duration = Duration::hours(4);

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub translations: TranslationService,
    pub jwt_secret: String,
    /// Dedicated guest-credential secret. `None` disables guest flows.
    pub guest_secret: Option<String>,
    pub policy: GuestPolicy,
    pub sweep_token: Option<String>,
}

/// Knobs for the guest-session lifecycle.
#[derive(Debug, Clone)]
pub struct GuestPolicy {
    pub credential_ttl: Duration,
    pub session_ttl: Duration,
    pub chat_ttl: Duration,
    pub qr_starts_per_minute: u32,
    pub accepts_per_minute: u32,
    pub reuse_guest_chats: bool,
    pub public_base_url: String,
}

impl GuestPolicy {
    /// Credential lifetime, clamped to [`MAX_CREDENTIAL_TTL`].
    pub fn credential_ttl(&self) -> Duration {
        self.credential_ttl.min(MAX_CREDENTIAL_TTL)
    }
}

impl Default for GuestPolicy {
    fn default() -> Self {
        Self {
            credential_ttl: MAX_CREDENTIAL_TTL,
            session_ttl: Duration::hours(24),
            chat_ttl: Duration::hours(24),
            qr_starts_per_minute: 5,
            accepts_per_minute: 20,
            reuse_guest_chats: true,
            public_base_url: "http://localhost:3000".to_string(),
        }
    }
}

/// Run blocking DB work off the async runtime.
pub async fn blocking<F, T>(db: &Arc<Database>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Dependency(anyhow::anyhow!("blocking task failed: {}", e))
        })?
        .map_err(ApiError::from)
}
