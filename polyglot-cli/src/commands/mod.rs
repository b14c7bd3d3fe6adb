pub mod hash;
pub mod instances;
pub mod sync;
pub mod translate;
pub mod verify;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use polyglot_core::config::{self, PolyglotConfig};
use polyglot_core::RemoteConfig;
use polyglot_remote::SshWorker;

pub(crate) fn load_config() -> Result<PolyglotConfig> {
    let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
    config::load_at(&home).context("failed to load ~/.polyglot/config.yaml")
}

/// `--root` if given, otherwise the working directory.
pub(crate) fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf> {
    match root {
        Some(root) => Ok(root),
        None => std::env::current_dir().context("could not determine current directory"),
    }
}

pub(crate) fn find_remote(config: &PolyglotConfig, id: &str) -> Result<RemoteConfig> {
    config.remote(id).cloned().with_context(|| {
        let known: Vec<&str> = config.remotes.iter().map(|r| r.id.as_str()).collect();
        if known.is_empty() {
            format!("unknown remote '{id}'; no remotes configured")
        } else {
            format!("unknown remote '{id}'; configured: {}", known.join(", "))
        }
    })
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

/// Token cancelled on Ctrl-C. Must be called inside the runtime.
pub(crate) fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

/// Open a session to `remote`.
pub(crate) async fn connect(remote: RemoteConfig, cancel: &CancellationToken) -> Result<Arc<SshWorker>> {
    let label = format!("{}@{}:{}", remote.username, remote.host, remote.port);
    let worker = Arc::new(SshWorker::new(remote));
    worker
        .connect(cancel)
        .await
        .with_context(|| format!("failed to connect to {label}"))?;
    worker
        .test_connection(cancel)
        .await
        .with_context(|| format!("connection test failed for {label}"))?;
    Ok(worker)
}
