//! # polyglot-remote
//!
//! Remote execution for SSH-attached workers and the codebase parity
//! protocol that must pass before a worker receives jobs.
//!
//! - [`worker::SshWorker`]: `ssh2` session with cancellable commands
//! - [`shell::RemoteShell`]: the seam both SSH and local harnesses implement
//! - [`transfer`]: base64 chunked upload, `cat` download
//! - [`parity::CodebaseSync`]: verify, repair, re-verify
//! - [`monitored::MonitoredShell`]: per-command progress events

pub mod error;
pub mod monitored;
pub mod parity;
pub mod shell;
pub mod transfer;
pub mod worker;

pub use error::RemoteError;
pub use monitored::MonitoredShell;
pub use parity::{CodebaseSync, VersionCheck};
pub use shell::{CommandResult, LocalShell, RemoteShell};
pub use worker::SshWorker;
