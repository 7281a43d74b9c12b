use std::collections::HashSet;

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;
use uuid::Uuid;

use lingo_db::models::NewChat;
use lingo_types::api::{ChatResponse, Claims, CreateChatRequest};
use lingo_types::models::ChatKind;

use crate::error::{ApiError, ApiJson};
use crate::state::{AppState, blocking};

const MAX_GROUP_SIZE: usize = 100;

/// Direct chat with `participantId`, or a named group with `participantIds`.
/// The caller is always a member.
pub async fn create_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<CreateChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let creator = claims.sub;
    let (kind, name, members) = match (req.participant_id, req.participant_ids) {
        (Some(other), None) => {
            if other == creator {
                return Err(ApiError::invalid("cannot open a direct chat with yourself"));
            }
            (ChatKind::Direct, None, vec![creator, other])
        }
        (None, Some(ids)) => {
            let name = req
                .name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .ok_or_else(|| ApiError::invalid("group chats need a name"))?;
            let mut seen = HashSet::from([creator]);
            let mut members = vec![creator];
            members.extend(ids.into_iter().filter(|id| seen.insert(*id)));
            if members.len() < 2 || members.len() > MAX_GROUP_SIZE {
                return Err(ApiError::invalid("group chats need 2-100 members"));
            }
            (ChatKind::Group, Some(name), members)
        }
        _ => return Err(ApiError::invalid("give exactly one of participantId or participantIds")),
    };

    let lookup = members.clone();
    let missing = blocking(&state.db, move |db| {
        let mut missing = Vec::new();
        for id in lookup {
            if db.get_profile(id)?.is_none() {
                missing.push(id);
            }
        }
        Ok(missing)
    })
    .await?;
    if !missing.is_empty() {
        return Err(ApiError::invalid(format!("unknown participants: {missing:?}")));
    }

    let chat_id = Uuid::new_v4();
    let rows = members.clone();
    let chat = blocking(&state.db, move |db| {
        db.create_chat(
            &NewChat { id: chat_id, kind, name: name.as_deref(), created_by: creator },
            &rows,
        )
    })
    .await?;

    info!("{} created {} chat {} with {} members", creator, chat.kind, chat.id, members.len());
    Ok((
        StatusCode::CREATED,
        Json(ChatResponse { chat_id: chat.id, kind: chat.kind, participant_ids: members }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_state, user};

    fn claims(id: Uuid) -> Extension<Claims> {
        Extension(Claims { sub: id, username: "t".into(), exp: usize::MAX })
    }

    #[tokio::test]
    async fn direct_chat_has_exactly_two_members() {
        let (state, _) = test_state();
        let a = user(&state, "ana", "en");
        let b = user(&state, "bruno", "es");

        create_chat(
            State(state.clone()),
            claims(a),
            ApiJson(CreateChatRequest { participant_id: Some(b), ..Default::default() }),
        )
        .await
        .unwrap();

        let err = create_chat(
            State(state.clone()),
            claims(a),
            ApiJson(CreateChatRequest { participant_id: Some(a), ..Default::default() }),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        let err = create_chat(
            State(state),
            claims(a),
            ApiJson(CreateChatRequest { participant_id: Some(Uuid::new_v4()), ..Default::default() }),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn group_members_are_deduplicated() {
        let (state, _) = test_state();
        let a = user(&state, "ana", "en");
        let b = user(&state, "bruno", "es");
        let c = user(&state, "chloe", "fr");

        create_chat(
            State(state.clone()),
            claims(a),
            ApiJson(CreateChatRequest {
                participant_ids: Some(vec![b, c, b, a]),
                name: Some("trip".into()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        let unnamed = create_chat(
            State(state),
            claims(a),
            ApiJson(CreateChatRequest { participant_ids: Some(vec![b]), ..Default::default() }),
        )
        .await;
        assert!(unnamed.is_err());
    }
}
