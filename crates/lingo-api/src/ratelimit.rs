use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use lingo_db::Database;

use crate::error::ApiError;
use crate::state::blocking;

/// New guest chats started through one inviter's QR slug.
pub const QR_START: &str = "qr_start";
/// Alt-flow invite accepts from one client.
pub const ACCEPT_TOKEN: &str = "accept_token";

const WINDOW_SECS: i64 = 60;

/// Count a hit against `(scope, subject)` in the current one-minute bucket.
pub async fn check(
    db: &Arc<Database>,
    scope: &'static str,
    subject: String,
    limit: u32,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    let ts = now.timestamp();
    let window_start = ts - ts.rem_euclid(WINDOW_SECS);
    let who = subject.clone();
    let count = blocking(db, move |db| db.hit_rate_limit(scope, &who, window_start)).await?;

    if count > limit {
        let retry_after_secs = (window_start + WINDOW_SECS - ts).max(1) as u64;
        warn!("Rate limit {} hit by {} ({} > {})", scope, subject, count, limit);
        return Err(ApiError::RateLimited { retry_after_secs });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn limit_applies_per_subject_and_window() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 10).unwrap();

        for _ in 0..3 {
            check(&db, QR_START, "u1".into(), 3, t0).await.unwrap();
        }
        match check(&db, QR_START, "u1".into(), 3, t0).await {
            Err(ApiError::RateLimited { retry_after_secs }) => assert_eq!(retry_after_secs, 50),
            other => panic!("expected rate limit, got {:?}", other),
        }

        check(&db, QR_START, "u2".into(), 3, t0).await.unwrap();
        check(&db, ACCEPT_TOKEN, "u1".into(), 3, t0).await.unwrap();

        let next_minute = t0 + chrono::Duration::seconds(60);
        check(&db, QR_START, "u1".into(), 3, next_minute).await.unwrap();
    }
}
