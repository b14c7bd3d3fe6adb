//! Polyglot: codebase parity and multi-LLM translation CLI.
//!
//! # Usage
//!
//! ```text
//! polyglot hash [--root <dir>] [--json]
//! polyglot verify <remote-id> [--root <dir>] [--json]
//! polyglot sync <remote-id> [--root <dir>]
//! polyglot instances [--json]
//! polyglot translate [--hint <h>] [--consensus <n>] [--file <path> | <text>]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    hash::HashArgs, instances::InstancesArgs, sync::SyncArgs, translate::TranslateArgs,
    verify::VerifyArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "polyglot",
    version,
    about = "Keep remote workers in parity and translate across a pool of LLMs",
    long_about = None,
)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the content digest of the local codebase.
    Hash(HashArgs),

    /// Compare the local digest with a configured remote's.
    Verify(VerifyArgs),

    /// Verify a remote and repair drift by re-uploading the codebase.
    Sync(SyncArgs),

    /// List the LLM instances discovered from the environment.
    Instances(InstancesArgs),

    /// Translate text through the instance pool.
    Translate(TranslateArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Hash(args) => args.run(),
        Commands::Verify(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Instances(args) => args.run(),
        Commands::Translate(args) => args.run(),
    }
}

/// Logs go to stderr so stdout stays parseable.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
