//! OpenAI-style `/chat/completions` endpoints (OpenAI, Zhipu, DeepSeek).

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use polyglot_core::{translation_prompt, Provider, Translate, TranslateError};

use super::{agent, blocking_call, map_ureq_error, read_json, text_at};

#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    provider: Provider,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatCompletionsClient {
    pub fn new(
        provider: Provider,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Translate for ChatCompletionsClient {
    async fn translate(
        &self,
        cancel: &CancellationToken,
        text: &str,
        hint: &str,
    ) -> Result<String, TranslateError> {
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let provider = self.provider;
        let url = self.endpoint();
        let auth = format!("Bearer {}", self.api_key);
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": translation_prompt(text, hint)}],
            "temperature": 0.3,
        });

        blocking_call(cancel, move || {
            let response = agent()
                .post(&url)
                .set("Authorization", &auth)
                .send_json(body)
                .map_err(|e| map_ureq_error(provider, e))?;
            let body = read_json(provider, response)?;
            text_at(provider, &body, "/choices/0/message/content")
        })
        .await
    }
}
