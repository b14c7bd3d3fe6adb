//! `polyglot translate`: one translation through the discovered pool.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use tokio::sync::mpsc;

use polyglot_coordinator::from_environment;
use polyglot_core::{EventSink, ProgressEvent};

use super::{cancel_on_ctrl_c, load_config, resolve_root, runtime};

/// Arguments for `polyglot translate`.
#[derive(Args, Debug)]
pub struct TranslateArgs {
    /// Text to translate.
    #[arg(conflicts_with = "file")]
    pub text: Option<String>,

    /// Read the text from a file instead.
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Context hint passed to every backend.
    #[arg(long, default_value = "Literary text")]
    pub hint: String,

    /// Require this many instances to return identical output.
    #[arg(long)]
    pub consensus: Option<usize>,

    /// Local codebase used to pair SSH workers (defaults to the current directory).
    #[arg(long)]
    pub root: Option<PathBuf>,
}

impl TranslateArgs {
    pub fn run(self) -> Result<()> {
        let text = match (&self.text, &self.file) {
            (Some(text), _) => text.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
            (None, None) => bail!("provide the text to translate or --file <path>"),
        };
        let config = load_config()?;
        let root = resolve_root(self.root.clone())?;

        let translated = runtime()?.block_on(async {
            let cancel = cancel_on_ctrl_c();
            let (tx, rx) = mpsc::unbounded_channel::<ProgressEvent>();
            let logger = tokio::spawn(log_events(rx));

            let sink: Arc<dyn EventSink> = Arc::new(tx);
            let coordinator = from_environment(&config, Some(sink))
                .with_codebase(root, config.hash.clone());

            for (worker, outcome) in coordinator.pair_all(&cancel).await {
                match outcome {
                    Ok(check) => tracing::info!(worker = %worker, digest = %check.local, "worker paired"),
                    Err(err) => tracing::warn!(worker = %worker, error = %err, "worker unavailable"),
                }
            }

            let result = match self.consensus {
                Some(required) => {
                    coordinator
                        .translate_with_consensus(&cancel, &text, &self.hint, required)
                        .await
                }
                None => coordinator.translate_with_retry(&cancel, &text, &self.hint).await,
            };
            coordinator.shutdown();
            drop(coordinator);
            let _ = logger.await;
            result.context("translation failed")
        })?;

        println!("{translated}");
        Ok(())
    }
}

/// Mirror progress events into the log until the coordinator is dropped.
async fn log_events(mut rx: mpsc::UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = rx.recv().await {
        tracing::debug!(kind = event.kind.as_str(), data = %serde_json::Value::Object(event.data), "{}", event.message);
    }
}
