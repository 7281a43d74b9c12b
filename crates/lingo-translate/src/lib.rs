//! Translation provider adapter.
//!
//! Stateless request/response: given text and a language pair, return the
//! text in the target language. Caching and timeouts live with the caller.

pub mod openai;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

pub use openai::OpenAiTranslator;

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String>;

    /// Short provider name for logs.
    fn name(&self) -> &'static str;
}

/// Provider used when no API key is configured. Every call fails, so
/// cross-language readers fall back to the original text.
pub struct DisabledTranslator;

#[async_trait]
impl Translator for DisabledTranslator {
    async fn translate(&self, _text: &str, _source_lang: &str, _target_lang: &str) -> Result<String> {
        Err(anyhow!("translation provider not configured"))
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Content key for the shared translation cache.
pub fn cache_key(text: &str, source_lang: &str, target_lang: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_lang.as_bytes());
    hasher.update([0u8]);
    hasher.update(target_lang.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
