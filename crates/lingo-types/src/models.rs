use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fallback when neither a profile nor a guest session names a language.
pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Direct,
    Group,
}

/// Who authored a message. Guests write with their guest-session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    User,
    Guest,
}

/// Resolved identity behind a `chat_participants.user_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    User,
    Guest,
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} value '{}'", stringify!($ty), other)),
                }
            }
        }
    };
}

text_enum!(ChatKind { Direct => "direct", Group => "group" });
text_enum!(SenderType { User => "user", Guest => "guest" });
text_enum!(ParticipantKind { User => "user", Guest => "guest" });

impl From<ParticipantKind> for SenderType {
    fn from(kind: ParticipantKind) -> Self {
        match kind {
            ParticipantKind::User => SenderType::User,
            ParticipantKind::Guest => SenderType::Guest,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub kind: ChatKind,
    pub name: Option<String>,
    pub created_by: Uuid,
    pub is_ephemeral: bool,
    pub delete_after: Option<DateTime<Utc>>,
    pub guest_session_id: Option<Uuid>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub sender_type: SenderType,
    pub original_text: String,
    pub source_language: String,
    pub attachment: Option<Attachment>,
    pub reply_to_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub deleted: bool,
}

/// One per (message, participant). Written once, never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTranslation {
    pub message_id: Uuid,
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub target_language: String,
    pub translated_text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestInvite {
    pub id: Uuid,
    pub token: String,
    pub inviter_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub max_uses: u32,
    pub used_count: u32,
    pub created_at: DateTime<Utc>,
}

impl GuestInvite {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_used_up(&self) -> bool {
        self.used_count >= self.max_uses
    }
}

/// Stand-in profile for a participant without an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestSession {
    pub id: Uuid,
    pub display_name: String,
    pub preferred_language: String,
    pub invite_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    pub preferred_language: String,
    pub qr_slug: Option<String>,
    pub qr_slug_rotated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A chat member with the language their translations are produced in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: Uuid,
    pub target_language: String,
    pub kind: ParticipantKind,
}
