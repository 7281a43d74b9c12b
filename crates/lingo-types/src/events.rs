use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, MessageTranslation, ParticipantKind};

/// Events pushed over the realtime gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RelayEvent {
    /// Connection authenticated
    Ready {
        participant_id: Uuid,
        kind: ParticipantKind,
    },

    /// Result of a Subscribe command
    Subscribed {
        chat_ids: Vec<Uuid>,
        rejected: Vec<Uuid>,
    },

    /// A message row was inserted
    MessageCreate { message: Message },

    /// A translation row was inserted for one reader
    TranslationCreate { translation: MessageTranslation },

    ReactionAdd {
        chat_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    ReactionRemove {
        chat_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    /// A guest chat was scheduled for deletion
    ChatClosed {
        chat_id: Uuid,
        delete_after: DateTime<Utc>,
    },

    /// The reaper removed a chat; subscriptions to it are dropped
    ChatDeleted { chat_id: Uuid },
}

impl RelayEvent {
    /// Chat this event belongs to. Connection-level events return `None`.
    pub fn chat_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate { message } => Some(message.chat_id),
            Self::TranslationCreate { translation } => Some(translation.chat_id),
            Self::ReactionAdd { chat_id, .. }
            | Self::ReactionRemove { chat_id, .. }
            | Self::ChatClosed { chat_id, .. }
            | Self::ChatDeleted { chat_id } => Some(*chat_id),
            Self::Ready { .. } | Self::Subscribed { .. } => None,
        }
    }

    /// Translations are delivered only to the reader they were made for.
    pub fn recipient(&self) -> Option<Uuid> {
        match self {
            Self::TranslationCreate { translation } => Some(translation.user_id),
            _ => None,
        }
    }
}

/// Commands sent from a client to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RelayCommand {
    Subscribe { chat_ids: Vec<Uuid> },
    Unsubscribe { chat_ids: Vec<Uuid> },
}
