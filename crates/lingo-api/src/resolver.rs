use tracing::warn;
use uuid::Uuid;

use lingo_db::Database;
use lingo_db::models::ParticipantRow;
use lingo_types::models::{DEFAULT_LANGUAGE, Participant, ParticipantKind};

/// Every participant of a chat, once each, with the language they read in.
///
/// Profiles are consulted first, then guest sessions. A participant id that
/// resolves to neither falls back to [`DEFAULT_LANGUAGE`].
pub fn resolve_participants(db: &Database, chat_id: Uuid) -> anyhow::Result<Vec<Participant>> {
    let rows = db.participant_rows(chat_id)?;
    Ok(rows.into_iter().map(|row| resolve_row(chat_id, row)).collect())
}

fn resolve_row(chat_id: Uuid, row: ParticipantRow) -> Participant {
    let (kind, language) = match (row.profile_language, row.guest_language) {
        (Some(lang), _) => (ParticipantKind::User, lang),
        (None, Some(lang)) => (ParticipantKind::Guest, lang),
        (None, None) => {
            warn!(
                "Participant {} of chat {} has no profile or guest session, defaulting to {}",
                row.user_id, chat_id, DEFAULT_LANGUAGE
            );
            (ParticipantKind::User, DEFAULT_LANGUAGE.to_string())
        }
    };
    Participant {
        id: row.user_id,
        target_language: language.to_ascii_lowercase(),
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use lingo_db::models::{NewChat, NewGuest};
    use lingo_types::models::ChatKind;

    #[test]
    fn resolves_profiles_guests_and_orphans() {
        let db = Database::open_in_memory().unwrap();
        let host = Uuid::new_v4();
        db.create_profile(host, "host", "x", "de").unwrap();

        let now = lingo_db::now();
        let guest = NewGuest {
            session_id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            display_name: "Alex",
            preferred_language: "fr",
            session_expires_at: now + Duration::hours(24),
            chat_delete_after: now + Duration::hours(24),
        };
        let created = db.create_guest_chat(host, &guest, now).unwrap();

        let mut people = resolve_participants(&db, created.chat.id).unwrap();
        people.sort_by_key(|p| p.kind.as_str());
        assert_eq!(people.len(), 2);
        assert_eq!(people[0].kind, ParticipantKind::Guest);
        assert_eq!(people[0].target_language, "fr");
        assert_eq!(people[1].id, host);
        assert_eq!(people[1].target_language, "de");

        let orphan = Uuid::new_v4();
        let group = db
            .create_chat(
                &NewChat { id: Uuid::new_v4(), kind: ChatKind::Group, name: Some("g"), created_by: host },
                &[host, orphan],
            )
            .unwrap();
        let people = resolve_participants(&db, group.id).unwrap();
        let fallback = people.iter().find(|p| p.id == orphan).unwrap();
        assert_eq!(fallback.target_language, DEFAULT_LANGUAGE);
    }
}
