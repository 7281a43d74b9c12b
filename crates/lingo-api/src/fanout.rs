//! Message ingest and per-reader translation fan-out.
//!
//! The message row is the source of truth. Translations are derived from it
//! one participant at a time, concurrently; a failure for one reader only
//! means that reader sees the original text.

use futures_util::future::join_all;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use lingo_db::models::NewMessage;
use lingo_types::events::RelayEvent;
use lingo_types::models::{Attachment, Message, MessageTranslation, Participant, SenderType};

use crate::error::ApiError;
use crate::resolver::resolve_participants;
use crate::state::{AppState, blocking};

/// A validated message ready to be stored.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub sender_type: SenderType,
    pub text: String,
    pub source_language: String,
    pub reply_to_id: Option<Uuid>,
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOutReport {
    pub translated: usize,
    pub passed_through: usize,
    pub failed: usize,
}

enum Delivery {
    Translated,
    PassedThrough,
    Failed,
}

pub fn same_language(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Store a message and fan it out. Fails only if the sender may not post
/// here or the message row itself cannot be written.
pub async fn send_message(state: &AppState, msg: OutgoingMessage) -> Result<(Message, FanOutReport), ApiError> {
    let (chat_id, sender_id, reply_to_id) = (msg.chat_id, msg.sender_id, msg.reply_to_id);
    let (chat, member, reply) = blocking(&state.db, move |db| {
        let chat = db.get_chat(chat_id)?;
        let member = db.is_participant(chat_id, sender_id)?;
        let reply = match reply_to_id {
            Some(id) => db.get_message(id)?,
            None => None,
        };
        Ok((chat, member, reply))
    })
    .await?;

    let Some(chat) = chat.filter(|_| member) else {
        return Err(ApiError::Forbidden("not a participant of this chat".into()));
    };
    if !chat.active {
        return Err(ApiError::Forbidden("chat is closed".into()));
    }
    if reply_to_id.is_some() && reply.is_none_or(|r| r.chat_id != chat_id) {
        return Err(ApiError::invalid("replyToId does not name a message in this chat"));
    }

    let message = blocking(&state.db, move |db| {
        db.insert_message(&NewMessage {
            id: Uuid::new_v4(),
            chat_id: msg.chat_id,
            sender_id: msg.sender_id,
            sender_type: msg.sender_type,
            text: &msg.text,
            source_language: &msg.source_language,
            attachment: msg.attachment.as_ref(),
            reply_to_id: msg.reply_to_id,
        })
    })
    .await?;

    state
        .dispatcher
        .publish(RelayEvent::MessageCreate { message: message.clone() })
        .await;

    let report = fan_out(state, &message).await;
    info!(
        "Message {} in chat {}: {} translated, {} passed through, {} failed",
        message.id, message.chat_id, report.translated, report.passed_through, report.failed
    );
    Ok((message, report))
}

/// Produce one translation row per participant of the message's chat.
pub async fn fan_out(state: &AppState, message: &Message) -> FanOutReport {
    let chat_id = message.chat_id;
    let participants = match blocking(&state.db, move |db| resolve_participants(db, chat_id)).await {
        Ok(participants) => participants,
        Err(e) => {
            error!("Could not resolve participants of chat {}: {}", chat_id, e);
            return FanOutReport::default();
        }
    };

    let outcomes = join_all(participants.iter().map(|p| deliver(state, message, p))).await;

    let mut report = FanOutReport::default();
    for outcome in outcomes {
        match outcome {
            Delivery::Translated => report.translated += 1,
            Delivery::PassedThrough => report.passed_through += 1,
            Delivery::Failed => report.failed += 1,
        }
    }
    report
}

async fn deliver(state: &AppState, message: &Message, reader: &Participant) -> Delivery {
    let pass_through = same_language(&reader.target_language, &message.source_language)
        || message.original_text.trim().is_empty();

    let (text, delivery) = if pass_through {
        (message.original_text.clone(), Delivery::PassedThrough)
    } else {
        match state
            .translations
            .translate(&message.original_text, &message.source_language, &reader.target_language)
            .await
        {
            Ok(text) => (text, Delivery::Translated),
            Err(e) => {
                warn!(
                    "Translation of message {} for {} ({} -> {}) failed: {:#}",
                    message.id, reader.id, message.source_language, reader.target_language, e
                );
                return Delivery::Failed;
            }
        }
    };

    let translation = MessageTranslation {
        message_id: message.id,
        chat_id: message.chat_id,
        user_id: reader.id,
        target_language: reader.target_language.clone(),
        translated_text: text,
        created_at: lingo_db::now(),
    };

    let row = translation.clone();
    match blocking(&state.db, move |db| db.insert_translation(&row)).await {
        Ok(true) => {
            state
                .dispatcher
                .publish(RelayEvent::TranslationCreate { translation })
                .await;
            delivery
        }
        Ok(false) => {
            debug!("Translation of {} for {} already stored", message.id, reader.id);
            delivery
        }
        Err(e) => {
            warn!("Storing translation of {} for {} failed: {}", message.id, reader.id, e);
            Delivery::Failed
        }
    }
}
