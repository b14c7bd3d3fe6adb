//! Local Ollama server, `/api/generate` without streaming.

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use polyglot_core::{translation_prompt, Provider, Translate, TranslateError};

use super::{agent, blocking_call, map_ureq_error, read_json, text_at};

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Translate for OllamaClient {
    async fn translate(
        &self,
        cancel: &CancellationToken,
        text: &str,
        hint: &str,
    ) -> Result<String, TranslateError> {
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "prompt": translation_prompt(text, hint),
            "stream": false,
            "options": {"temperature": 0.3},
        });

        blocking_call(cancel, move || {
            let response = agent()
                .post(&url)
                .send_json(body)
                .map_err(|e| map_ureq_error(Provider::Ollama, e))?;
            let body = read_json(Provider::Ollama, response)?;
            text_at(Provider::Ollama, &body, "/response")
        })
        .await
    }
}
