//! Backend clients, one [`Translate`](polyglot_core::Translate) impl each.

pub mod anthropic;
pub mod llamacpp;
pub mod ollama;
pub mod openai_compat;
pub mod ssh;

use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use polyglot_core::{Provider, TranslateError};

pub use anthropic::AnthropicClient;
pub use llamacpp::LlamaCppRunner;
pub use ollama::OllamaClient;
pub use openai_compat::ChatCompletionsClient;
pub use ssh::SshTranslator;

/// Per-request timeout for hosted and local HTTP APIs.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Run a blocking HTTP call off the runtime, abandoning it on cancellation.
pub(crate) async fn blocking_call<F>(
    cancel: &CancellationToken,
    call: F,
) -> Result<String, TranslateError>
where
    F: FnOnce() -> Result<String, TranslateError> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(call);
    tokio::select! {
        joined = task => joined.map_err(|e| TranslateError::transport(format!("request task failed: {e}")))?,
        _ = cancel.cancelled() => Err(TranslateError::Cancelled),
    }
}

pub(crate) fn agent() -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(HTTP_TIMEOUT).build()
}

/// HTTP status failures are the provider's; everything else is transport.
pub(crate) fn map_ureq_error(provider: Provider, err: ureq::Error) -> TranslateError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            TranslateError::provider(format!("{provider} returned HTTP {code}: {}", body.trim()))
        }
        ureq::Error::Transport(transport) => {
            TranslateError::transport(format!("{provider} request failed: {transport}"))
        }
    }
}

pub(crate) fn read_json(provider: Provider, response: ureq::Response) -> Result<Value, TranslateError> {
    response
        .into_json::<Value>()
        .map_err(|e| TranslateError::transport(format!("{provider} response unreadable: {e}")))
}

/// Extract a string at `pointer`, rejecting missing or empty values.
pub(crate) fn text_at(provider: Provider, body: &Value, pointer: &str) -> Result<String, TranslateError> {
    let text = body
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if text.is_empty() {
        return Err(TranslateError::provider(format!(
            "{provider} returned an empty translation"
        )));
    }
    Ok(text.to_string())
}
