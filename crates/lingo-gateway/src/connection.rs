use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{Instant, sleep_until};
use tracing::{info, warn};
use uuid::Uuid;

use lingo_db::Database;
use lingo_types::events::{RelayCommand, RelayEvent};
use lingo_types::models::ParticipantKind;

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Who is on the other end of a connection. Built from a verified token at
/// the HTTP upgrade layer.
#[derive(Debug, Clone)]
pub struct Identity {
    pub participant_id: Uuid,
    pub kind: ParticipantKind,
    /// Guests are bound to exactly one chat.
    pub chat_scope: Option<Uuid>,
    /// `exp` of the token the connection was opened with.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// Time until the token expires, zero once it has.
    pub fn time_left(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|exp| (exp - now).to_std().unwrap_or(Duration::ZERO))
    }
}

/// May this identity receive events for `chat_id`?
pub fn may_subscribe(db: &Database, identity: &Identity, chat_id: Uuid) -> anyhow::Result<bool> {
    if identity.expires_at.is_some_and(|exp| exp <= Utc::now()) {
        return Ok(false);
    }
    if identity.chat_scope.is_some_and(|scope| scope != chat_id) {
        return Ok(false);
    }
    db.is_participant(chat_id, identity.participant_id)
}

/// Handle a pre-authenticated WebSocket connection until either side goes away.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    identity: Identity,
) {
    let (mut sender, mut receiver) = socket.split();
    let participant_id = identity.participant_id;

    info!("{} {} connected to gateway", identity.kind, participant_id);

    let ready = RelayEvent::Ready {
        participant_id,
        kind: identity.kind,
    };
    match serde_json::to_string(&ready) {
        Ok(text) => {
            if sender.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        Err(e) => {
            warn!("Failed to encode Ready event: {}", e);
            return;
        }
    }

    let (conn_id, mut events_rx) = dispatcher.register(participant_id).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let deadline = identity.time_left(Utc::now()).map(|left| Instant::now() + left);

    // Forward relay events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        let expiry = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                _ = &mut expiry => {
                    info!("{} token expired, closing gateway connection", participant_id);
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode relay event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_dispatcher = dispatcher.clone();
    let recv_identity = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<RelayCommand>(text.as_str()) {
                    Ok(cmd) => {
                        handle_command(&recv_dispatcher, &db, &recv_identity, conn_id, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            recv_identity.participant_id,
                            e,
                            text.as_str().chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister(conn_id).await;
    info!("{} {} disconnected from gateway", identity.kind, participant_id);
}

async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    identity: &Identity,
    conn_id: Uuid,
    cmd: RelayCommand,
) {
    match cmd {
        RelayCommand::Subscribe { chat_ids } => {
            let mut accepted = Vec::new();
            let mut rejected = Vec::new();
            for chat_id in chat_ids {
                let db = db.clone();
                let who = identity.clone();
                let allowed = tokio::task::spawn_blocking(move || may_subscribe(&db, &who, chat_id)).await;
                match allowed {
                    Ok(Ok(true)) => {
                        dispatcher.subscribe(conn_id, chat_id).await;
                        accepted.push(chat_id);
                    }
                    Ok(Ok(false)) => rejected.push(chat_id),
                    Ok(Err(e)) => {
                        warn!("Subscription check failed for chat {}: {:#}", chat_id, e);
                        rejected.push(chat_id);
                    }
                    Err(e) => {
                        warn!("spawn_blocking join error: {}", e);
                        rejected.push(chat_id);
                    }
                }
            }
            info!(
                "{} subscribed to {} chats ({} rejected)",
                identity.participant_id,
                accepted.len(),
                rejected.len()
            );
            dispatcher
                .send_to_connection(
                    conn_id,
                    RelayEvent::Subscribed {
                        chat_ids: accepted,
                        rejected,
                    },
                )
                .await;
        }

        RelayCommand::Unsubscribe { chat_ids } => {
            for chat_id in chat_ids {
                dispatcher.unsubscribe(conn_id, chat_id).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lingo_db::models::NewChat;
    use lingo_types::models::ChatKind;

    #[test]
    fn guests_are_confined_to_their_chat() {
        let db = Database::open_in_memory().unwrap();
        let owner = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let chat = db
            .create_chat(
                &NewChat { id: Uuid::new_v4(), kind: ChatKind::Direct, name: None, created_by: owner },
                &[owner, guest],
            )
            .unwrap();
        let other = db
            .create_chat(
                &NewChat { id: Uuid::new_v4(), kind: ChatKind::Group, name: Some("x"), created_by: owner },
                &[owner, guest],
            )
            .unwrap();

        let as_guest = Identity {
            participant_id: guest,
            kind: ParticipantKind::Guest,
            chat_scope: Some(chat.id),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        };
        assert!(may_subscribe(&db, &as_guest, chat.id).unwrap());
        assert!(!may_subscribe(&db, &as_guest, other.id).unwrap());

        let as_owner = Identity {
            participant_id: owner,
            kind: ParticipantKind::User,
            chat_scope: None,
            expires_at: None,
        };
        assert!(may_subscribe(&db, &as_owner, other.id).unwrap());

        let stranger = Identity {
            participant_id: Uuid::new_v4(),
            kind: ParticipantKind::User,
            chat_scope: None,
            expires_at: None,
        };
        assert!(!may_subscribe(&db, &stranger, chat.id).unwrap());

        let lapsed = Identity { expires_at: Some(Utc::now() - chrono::Duration::seconds(1)), ..as_guest };
        assert!(!may_subscribe(&db, &lapsed, chat.id).unwrap());
    }

    #[test]
    fn time_left_counts_down_to_zero() {
        let now = Utc::now();
        let identity = Identity {
            participant_id: Uuid::new_v4(),
            kind: ParticipantKind::Guest,
            chat_scope: Some(Uuid::new_v4()),
            expires_at: Some(now + chrono::Duration::seconds(90)),
        };
        assert_eq!(identity.time_left(now), Some(Duration::from_secs(90)));
        assert_eq!(identity.time_left(now + chrono::Duration::hours(1)), Some(Duration::ZERO));

        let open_ended = Identity { expires_at: None, ..identity };
        assert_eq!(open_ended.time_left(now), None);
    }
}
