//! Shared fixtures for the service tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use uuid::Uuid;

use lingo_db::Database;
use lingo_db::models::NewChat;
use lingo_gateway::dispatcher::Dispatcher;
use lingo_translate::Translator;
use lingo_types::models::ChatKind;

use crate::state::{AppState, AppStateInner, GuestPolicy};
use crate::translation::TranslationService;

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const GUEST_SECRET: &str = "test-guest-secret";

/// In-process provider with a tiny dictionary. Target languages can be set
/// to fail outright or to hang until the caller's timeout fires.
#[derive(Default)]
pub struct ScriptedTranslator {
    fail: HashSet<String>,
    stall: HashSet<String>,
    calls: AtomicUsize,
}

impl ScriptedTranslator {
    pub fn fail_on(mut self, target_lang: &str) -> Self {
        self.fail.insert(target_lang.to_string());
        self
    }

    pub fn stall_on(mut self, target_lang: &str) -> Self {
        self.stall.insert(target_lang.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Translator for ScriptedTranslator {
    async fn translate(&self, text: &str, _source_lang: &str, target_lang: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stall.contains(target_lang) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail.contains(target_lang) {
            return Err(anyhow!("scripted failure for {target_lang}"));
        }
        Ok(match (text, target_lang) {
            ("Hello", "es") => "Hola".to_string(),
            ("Hello", "fr") => "Bonjour".to_string(),
            ("Hello", "de") => "Hallo".to_string(),
            _ => format!("[{target_lang}] {text}"),
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn test_state() -> (AppState, Arc<ScriptedTranslator>) {
    let translator = Arc::new(ScriptedTranslator::default());
    (test_state_with(translator.clone()), translator)
}

pub fn test_state_with(translator: Arc<ScriptedTranslator>) -> AppState {
    build_state(translator, GuestPolicy::default(), Some(GUEST_SECRET.to_string()))
}

pub fn build_state(
    translator: Arc<ScriptedTranslator>,
    policy: GuestPolicy,
    guest_secret: Option<String>,
) -> AppState {
    let db = Arc::new(Database::open_in_memory().expect("in-memory db"));
    Arc::new(AppStateInner {
        translations: TranslationService::new(translator, db.clone(), Duration::from_millis(200)),
        db,
        dispatcher: Dispatcher::new(),
        jwt_secret: JWT_SECRET.to_string(),
        guest_secret,
        policy,
        sweep_token: None,
    })
}

/// Create a profile and return its id.
pub fn user(state: &AppState, username: &str, language: &str) -> Uuid {
    let id = Uuid::new_v4();
    let created = state
        .db
        .create_profile(id, username, "not-a-real-hash", language)
        .expect("create profile");
    assert!(created, "username {username} already taken");
    id
}

pub fn direct_chat(state: &AppState, a: Uuid, b: Uuid) -> Uuid {
    state
        .db
        .create_chat(
            &NewChat { id: Uuid::new_v4(), kind: ChatKind::Direct, name: None, created_by: a },
            &[a, b],
        )
        .expect("create chat")
        .id
}
