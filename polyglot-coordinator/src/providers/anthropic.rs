//! Anthropic Messages API.

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use polyglot_core::{translation_prompt, Provider, Translate, TranslateError};

use super::{agent, blocking_call, map_ureq_error, read_json, text_at};

const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Translate for AnthropicClient {
    async fn translate(
        &self,
        cancel: &CancellationToken,
        text: &str,
        hint: &str,
    ) -> Result<String, TranslateError> {
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let api_key = self.api_key.clone();
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{"role": "user", "content": translation_prompt(text, hint)}],
        });

        blocking_call(cancel, move || {
            let response = agent()
                .post(&url)
                .set("x-api-key", &api_key)
                .set("anthropic-version", API_VERSION)
                .send_json(body)
                .map_err(|e| map_ureq_error(Provider::Anthropic, e))?;
            let body = read_json(Provider::Anthropic, response)?;
            text_at(Provider::Anthropic, &body, "/content/0/text")
        })
        .await
    }
}
