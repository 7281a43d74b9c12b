use std::time::Duration;

use axum::{Json, extract::State, http::HeaderMap};
use chrono::Duration as ChronoDuration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use lingo_types::api::SweepResponse;
use lingo_types::events::RelayEvent;

use crate::error::ApiError;
use crate::state::{AppState, blocking};

pub const SWEEP_TOKEN_HEADER: &str = "x-sweep-token";

/// Rate-limit buckets older than this are dropped by every sweep.
const RATE_LIMIT_RETENTION: ChronoDuration = ChronoDuration::hours(1);

/// Delete every ephemeral chat past its `delete_after`, children first.
/// Each chat is its own transaction; one failing chat is logged and the
/// rest still go. Returns how many chats were deleted.
pub async fn sweep(state: &AppState) -> Result<usize, ApiError> {
    let now = lingo_db::now();
    let expired = blocking(&state.db, move |db| db.expired_ephemeral_chats(now)).await?;

    let mut deleted = 0;
    for chat_id in expired {
        match blocking(&state.db, move |db| db.delete_chat_cascade(chat_id)).await {
            Ok(true) => {
                deleted += 1;
                state.dispatcher.publish(RelayEvent::ChatDeleted { chat_id }).await;
            }
            Ok(false) => debug!("Chat {} already gone", chat_id),
            Err(e) => warn!("Failed to delete expired chat {}, continuing: {}", chat_id, e),
        }
    }

    let cutoff = (now - RATE_LIMIT_RETENTION).timestamp();
    let housekeeping = blocking(&state.db, move |db| {
        Ok((
            db.purge_expired_guest_sessions(now)?,
            db.purge_expired_invites(now)?,
            db.purge_rate_limits(cutoff)?,
        ))
    })
    .await;
    match housekeeping {
        Ok((sessions, invites, buckets)) if sessions + invites + buckets > 0 => {
            debug!(
                "Purged {} guest sessions, {} invites and {} rate-limit buckets",
                sessions, invites, buckets
            )
        }
        Ok(_) => {}
        Err(e) => warn!("Sweep housekeeping failed: {}", e),
    }

    if deleted > 0 {
        info!("Reaper deleted {} expired chats", deleted);
    }
    Ok(deleted)
}

/// Run [`sweep`] every `period` until the task is dropped.
pub async fn run_reaper_loop(state: AppState, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Reaper running every {:?}", period);

    loop {
        ticker.tick().await;
        if let Err(e) = sweep(&state).await {
            error!("Reaper sweep failed: {}", e);
        }
    }
}

/// On-demand sweep. Guarded by a shared token when one is configured.
pub async fn sweep_ephemeral(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SweepResponse>, ApiError> {
    if let Some(expected) = &state.sweep_token {
        let given = headers.get(SWEEP_TOKEN_HEADER).and_then(|v| v.to_str().ok());
        if given != Some(expected.as_str()) {
            return Err(ApiError::Unauthorized);
        }
    }

    let deleted_count = sweep(&state).await?;
    Ok(Json(SweepResponse { deleted_count }))
}
