//! `polyglot hash`: local codebase digest.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use polyglot_sync::CodebaseHasher;

use super::{load_config, resolve_root};

/// Arguments for `polyglot hash`.
#[derive(Args, Debug)]
pub struct HashArgs {
    /// Codebase root (defaults to the current directory).
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct HashJson {
    root: String,
    digest: String,
    files: usize,
}

impl HashArgs {
    pub fn run(self) -> Result<()> {
        let config = load_config()?;
        let root = resolve_root(self.root)?;
        let hasher = CodebaseHasher::new(&root, config.hash);

        let digest = hasher
            .calculate_hash()
            .with_context(|| format!("failed to hash {}", root.display()))?;
        let files = hasher
            .included_files()
            .with_context(|| format!("failed to list files under {}", root.display()))?
            .len();

        if self.json {
            let payload = HashJson {
                root: root.display().to_string(),
                digest,
                files,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize hash JSON")?
            );
            return Ok(());
        }

        println!("{}", digest.bold());
        println!(
            "{}",
            format!("{files} file(s) under {}", root.display()).bright_black()
        );
        Ok(())
    }
}
