//! `polyglot verify`: compare local and remote digests without repairing.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use polyglot_remote::{CodebaseSync, RemoteShell, VersionCheck};

use super::{cancel_on_ctrl_c, connect, find_remote, load_config, resolve_root, runtime};

/// Arguments for `polyglot verify`.
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Id of a remote from `~/.polyglot/config.yaml`.
    pub remote: String,

    /// Codebase root (defaults to the current directory).
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct VerifyJson<'a> {
    remote: &'a str,
    equal: bool,
    local: &'a str,
    remote_digest: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_error: Option<&'a str>,
}

impl VerifyArgs {
    /// Exits non-zero when the digests differ, like `git diff --exit-code`.
    pub fn run(self) -> Result<()> {
        let config = load_config()?;
        let remote = find_remote(&config, &self.remote)?;
        let root = resolve_root(self.root)?;

        let check = runtime()?.block_on(async {
            let cancel = cancel_on_ctrl_c();
            let worker = connect(remote, &cancel).await?;
            let shell: Arc<dyn RemoteShell> = worker.clone();
            let sync = CodebaseSync::new(shell, &root, config.hash.clone());
            let check = sync
                .verify_codebase_version(&cancel)
                .await
                .context("version check failed");
            worker.disconnect();
            check
        })?;

        if self.json {
            print_json(&self.remote, &check)?;
        } else {
            print_check(&self.remote, &check);
        }

        if let Some(reason) = &check.remote_error {
            bail!("could not compute remote digest on '{}': {reason}", self.remote);
        }
        if !check.equal {
            bail!(
                "codebase drift on '{}' (local {}, remote {})",
                self.remote,
                check.local,
                check.remote
            );
        }
        Ok(())
    }
}

fn print_json(remote: &str, check: &VersionCheck) -> Result<()> {
    let payload = VerifyJson {
        remote,
        equal: check.equal,
        local: &check.local,
        remote_digest: &check.remote,
        remote_error: check.remote_error.as_deref(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize verify JSON")?
    );
    Ok(())
}

pub(crate) fn print_check(remote: &str, check: &VersionCheck) {
    let status = if check.equal {
        "IN SYNC".green().bold()
    } else {
        "DRIFT".red().bold()
    };
    println!("{status} '{remote}'");
    println!("  local  {}", check.local);
    if check.remote.is_empty() {
        println!("  remote {}", "unavailable".bright_black());
    } else {
        println!("  remote {}", check.remote);
    }
}
