use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Translator;

/// Translator backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiTranslator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiTranslator {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

fn system_prompt(source_lang: &str, target_lang: &str) -> String {
    format!(
        "You translate chat messages from language '{source_lang}' to language '{target_lang}'. \
         Reply with the translation only. Keep names, emoji, URLs and formatting unchanged."
    )
}

fn extract_text(resp: ChatResponse) -> Result<String> {
    let text = resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(anyhow!("provider returned an empty translation"));
    }
    Ok(text)
}

#[async_trait]
impl Translator for OpenAiTranslator {
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        let prompt = system_prompt(source_lang, target_lang);
        let body = ChatRequest {
            model: &self.model,
            temperature: 0.2,
            messages: [
                ChatMessage { role: "system", content: &prompt },
                ChatMessage { role: "user", content: text },
            ],
        };

        let resp: ChatResponse = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("translation request failed")?
            .error_for_status()
            .context("translation provider returned an error status")?
            .json()
            .await
            .context("malformed translation response")?;

        debug!("Translated {} chars {} -> {}", text.len(), source_lang, target_lang);
        extract_text(resp)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
