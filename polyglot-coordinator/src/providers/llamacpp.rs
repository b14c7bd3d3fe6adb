//! Local llama.cpp binary, one process per request.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use polyglot_core::{translation_prompt, Translate, TranslateError};

/// Binary names probed on `PATH`, in order.
pub const BINARY_CANDIDATES: &[&str] = &["llama-cli", "llama-cpp", "main"];

#[derive(Debug, Clone)]
pub struct LlamaCppRunner {
    binary: PathBuf,
    model_path: PathBuf,
}

impl LlamaCppRunner {
    pub fn new(binary: impl Into<PathBuf>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            model_path: model_path.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn args(&self, prompt: String) -> Vec<String> {
        vec![
            "-m".to_string(),
            self.model_path.to_string_lossy().into_owned(),
            "-p".to_string(),
            prompt,
            "-n".to_string(),
            "4096".to_string(),
            "--temp".to_string(),
            "0.3".to_string(),
            "--top-p".to_string(),
            "0.9".to_string(),
            "--top-k".to_string(),
            "40".to_string(),
            "--repeat-penalty".to_string(),
            "1.1".to_string(),
            "--no-display-prompt".to_string(),
        ]
    }
}

/// First candidate found in the directories of `path_var`.
pub fn find_on_path(path_var: &str) -> Option<PathBuf> {
    std::env::split_paths(path_var).find_map(|dir| {
        BINARY_CANDIDATES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    })
}

#[async_trait]
impl Translate for LlamaCppRunner {
    async fn translate(
        &self,
        cancel: &CancellationToken,
        text: &str,
        hint: &str,
    ) -> Result<String, TranslateError> {
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let child = Command::new(&self.binary)
            .args(self.args(translation_prompt(text, hint)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TranslateError::transport(format!(
                    "failed to start {}: {e}",
                    self.binary.display()
                ))
            })?;

        let output = tokio::select! {
            out = child.wait_with_output() => out.map_err(|e| TranslateError::transport(e.to_string()))?,
            _ = cancel.cancelled() => return Err(TranslateError::Cancelled),
        };

        if !output.status.success() {
            return Err(TranslateError::provider(format!(
                "llama.cpp exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let translated = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if translated.is_empty() {
            return Err(TranslateError::provider("llama.cpp produced no output"));
        }
        Ok(translated)
    }
}
