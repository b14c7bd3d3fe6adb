//! `polyglot sync`: verify, repair once, re-verify.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use polyglot_remote::{CodebaseSync, RemoteShell};

use super::verify::print_check;
use super::{cancel_on_ctrl_c, connect, find_remote, load_config, resolve_root, runtime};

/// Arguments for `polyglot sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Id of a remote from `~/.polyglot/config.yaml`.
    pub remote: String,

    /// Codebase root (defaults to the current directory).
    #[arg(long)]
    pub root: Option<PathBuf>,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let config = load_config()?;
        let remote = find_remote(&config, &self.remote)?;
        let root = resolve_root(self.root)?;
        let build_command = remote.build_command.clone();

        let check = runtime()?.block_on(async {
            let cancel = cancel_on_ctrl_c();
            let worker = connect(remote, &cancel).await?;
            let shell: Arc<dyn RemoteShell> = worker.clone();
            let sync = CodebaseSync::new(shell, &root, config.hash.clone())
                .with_build_command(build_command);
            let check = sync
                .ensure_parity(&cancel)
                .await
                .with_context(|| format!("sync to '{}' failed", self.remote));
            worker.disconnect();
            check
        })?;

        print_check(&self.remote, &check);
        Ok(())
    }
}
