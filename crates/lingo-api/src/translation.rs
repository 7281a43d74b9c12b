use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use tracing::{debug, warn};

use lingo_db::Database;
use lingo_translate::{Translator, cache_key};

/// Provider calls wrapped with the shared cache and a per-call timeout.
pub struct TranslationService {
    translator: Arc<dyn Translator>,
    db: Arc<Database>,
    timeout: Duration,
}

impl TranslationService {
    pub fn new(translator: Arc<dyn Translator>, db: Arc<Database>, timeout: Duration) -> Self {
        Self { translator, db, timeout }
    }

    pub fn provider(&self) -> &'static str {
        self.translator.name()
    }

    /// Translate `text`, consulting the cache first. Cache trouble is logged
    /// and skipped; only the provider call can fail the translation.
    pub async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> anyhow::Result<String> {
        let key = cache_key(text, source_lang, target_lang);

        match self.cached(key.clone()).await {
            Ok(Some(hit)) => {
                debug!("Translation cache hit {} -> {}", source_lang, target_lang);
                return Ok(hit);
            }
            Ok(None) => {}
            Err(e) => warn!("Translation cache lookup failed: {:#}", e),
        }

        let translated = tokio::time::timeout(
            self.timeout,
            self.translator.translate(text, source_lang, target_lang),
        )
        .await
        .map_err(|_| anyhow!("{} timed out after {:?}", self.translator.name(), self.timeout))??;

        let db = self.db.clone();
        let (source_text, src, tgt, out) = (
            text.to_string(),
            source_lang.to_string(),
            target_lang.to_string(),
            translated.clone(),
        );
        let stored = tokio::task::spawn_blocking(move || {
            db.cache_store(&key, &source_text, &src, &tgt, &out, lingo_db::now())
        })
        .await;
        match stored {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Translation cache store failed: {:#}", e),
            Err(e) => warn!("spawn_blocking join error: {}", e),
        }

        Ok(translated)
    }

    async fn cached(&self, key: String) -> anyhow::Result<Option<String>> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.cache_lookup(&key, lingo_db::now()))
            .await
            .context("cache lookup task panicked")?
    }
}
