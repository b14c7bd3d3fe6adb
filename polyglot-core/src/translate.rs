//! The translation capability consumed by every caller of the core.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TranslateError;

/// `Translate(ctx, text, hint) -> (string, error)`.
///
/// `cancel` plays the role of the caller's context: implementations must
/// return [`TranslateError::Cancelled`] promptly once it fires.
#[async_trait]
pub trait Translate: Send + Sync {
    async fn translate(
        &self,
        cancel: &CancellationToken,
        text: &str,
        hint: &str,
    ) -> Result<String, TranslateError>;
}

#[async_trait]
impl<T: Translate + ?Sized> Translate for Arc<T> {
    async fn translate(
        &self,
        cancel: &CancellationToken,
        text: &str,
        hint: &str,
    ) -> Result<String, TranslateError> {
        (**self).translate(cancel, text, hint).await
    }
}

/// Literary translation prompt shared by the API and llama.cpp backends.
pub fn translation_prompt(text: &str, hint: &str) -> String {
    let context = if hint.trim().is_empty() {
        "Literary text"
    } else {
        hint
    };
    format!(
        "You are a professional literary translator.\n\
         Translate the following text faithfully and idiomatically.\n\
         \n\
         Guidelines:\n\
         1. Preserve the literary style and tone\n\
         2. Keep names of people and places unchanged unless they have standard equivalents\n\
         3. Preserve formatting, punctuation, and paragraph structure\n\
         4. Output only the translation\n\
         \n\
         Context: {context}\n\
         \n\
         Text:\n\
         {text}\n\
         \n\
         Translation:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_defaults_context_hint() {
        let prompt = translation_prompt("Привет", "  ");
        assert!(prompt.contains("Context: Literary text"));
        assert!(prompt.contains("Привет"));
    }

    #[test]
    fn prompt_uses_given_hint() {
        let prompt = translation_prompt("text", "chapter 3 dialogue");
        assert!(prompt.contains("Context: chapter 3 dialogue"));
    }
}
