//! Version parity between the local tree and a remote worker.
//!
//! `verify` compares digests; `update_remote_codebase` packages the local
//! tree, uploads it, replaces the remote hashed roots and root-level files,
//! then rebuilds;
//! `ensure_parity` runs verify, then at most one repair, then verify again.
//! A worker that still disagrees after that is never trusted with work.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use polyglot_core::{EventKind, EventSink, HashSpec, ProgressEvent};
use polyglot_sync::archive::{self, ARCHIVE_NAME};
use polyglot_sync::script::{self, parse_digest, remote_digest_command};
use polyglot_sync::shell::{in_dir, quote};
use polyglot_sync::CodebaseHasher;

use crate::error::RemoteError;
use crate::shell::RemoteShell;
use crate::transfer;

/// Result of one digest comparison.
///
/// When the remote step fails, `remote` is empty, `equal` is false and
/// `remote_error` carries the reason; the local digest is still reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCheck {
    pub equal: bool,
    pub local: String,
    pub remote: String,
    pub remote_error: Option<String>,
}

pub struct CodebaseSync {
    shell: Arc<dyn RemoteShell>,
    local_root: PathBuf,
    spec: HashSpec,
    build_command: Option<String>,
    events: Option<Arc<dyn EventSink>>,
    session_id: Option<String>,
}

impl CodebaseSync {
    pub fn new(shell: Arc<dyn RemoteShell>, local_root: impl Into<PathBuf>, spec: HashSpec) -> Self {
        Self {
            shell,
            local_root: local_root.into(),
            spec,
            build_command: None,
            events: None,
            session_id: None,
        }
    }

    /// Command run in the remote directory after extraction.
    pub fn with_build_command(mut self, command: impl Into<String>) -> Self {
        let command = command.into();
        self.build_command = (!command.trim().is_empty()).then_some(command);
        self
    }

    pub fn with_events(mut self, sink: Arc<dyn EventSink>, session_id: Option<String>) -> Self {
        self.events = Some(sink);
        self.session_id = session_id;
        self
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub async fn local_digest(&self) -> Result<String, RemoteError> {
        let hasher = CodebaseHasher::new(self.local_root.clone(), self.spec.clone());
        let digest = tokio::task::spawn_blocking(move || hasher.calculate_hash()).await??;
        Ok(digest)
    }

    /// Digest of the remote tree as computed by the generated script.
    pub async fn remote_digest(&self, cancel: &CancellationToken) -> Result<String, RemoteError> {
        let command = remote_digest_command(&self.spec, self.shell.remote_dir());
        let result = self.shell.execute_checked(cancel, &command).await?;
        parse_digest(&result.stdout).ok_or_else(|| {
            RemoteError::Protocol(format!(
                "digest script printed {:?}",
                result.stdout.trim()
            ))
        })
    }

    pub async fn verify_codebase_version(
        &self,
        cancel: &CancellationToken,
    ) -> Result<VersionCheck, RemoteError> {
        let local = self.local_digest().await?;
        let check = match self.remote_digest(cancel).await {
            Ok(remote) => VersionCheck {
                equal: CodebaseHasher::compare_versions(&local, &remote),
                local,
                remote,
                remote_error: None,
            },
            Err(RemoteError::Cancelled) => return Err(RemoteError::Cancelled),
            Err(err) => {
                tracing::warn!(
                    worker = %self.shell.label(),
                    error = %err,
                    "remote digest unavailable"
                );
                VersionCheck {
                    equal: false,
                    local,
                    remote: String::new(),
                    remote_error: Some(err.to_string()),
                }
            }
        };
        tracing::info!(
            worker = %self.shell.label(),
            equal = check.equal,
            local = %check.local,
            remote = %check.remote,
            "codebase version checked"
        );
        Ok(check)
    }

    /// Package, upload, replace, extract and rebuild.
    pub async fn update_remote_codebase(&self, cancel: &CancellationToken) -> Result<(), RemoteError> {
        let root = self.local_root.clone();
        let spec = self.spec.clone();
        let packaged = tokio::task::spawn_blocking(move || archive::package_tree(&root, &spec)).await??;
        let bytes = packaged.read()?;

        let remote_dir = self.shell.remote_dir().to_string();
        let remote_archive = format!("{}/{ARCHIVE_NAME}", remote_dir.trim_end_matches('/'));
        transfer::upload_data(self.shell.as_ref(), cancel, &bytes, &remote_archive).await?;

        let mut steps = Vec::new();
        if !self.spec.roots.is_empty() {
            let roots: Vec<String> = self.spec.roots.iter().map(|r| quote(r)).collect();
            steps.push(format!("rm -rf {}", roots.join(" ")));
        }
        if let Some(clear) = script::clear_root_files_command(&self.spec, ARCHIVE_NAME) {
            steps.push(format!("{{ {clear}; }}"));
        }
        steps.push(format!("tar -xzf {ARCHIVE_NAME}"));
        let extract = format!(
            "{}; status=$?; rm -f {}; exit $status",
            in_dir(&remote_dir, &steps.join(" && ")),
            quote(&remote_archive)
        );
        self.shell.execute_checked(cancel, &extract).await?;

        if let Some(build) = &self.build_command {
            tracing::info!(worker = %self.shell.label(), command = %build, "rebuilding remote worker");
            self.shell
                .execute_checked(cancel, &in_dir(&remote_dir, build))
                .await?;
        }

        tracing::info!(
            worker = %self.shell.label(),
            method = packaged.method().as_str(),
            bytes = bytes.len(),
            "remote codebase updated"
        );
        Ok(())
    }

    /// Verify, repair once if needed, verify again.
    pub async fn ensure_parity(&self, cancel: &CancellationToken) -> Result<VersionCheck, RemoteError> {
        let first = self.verify_codebase_version(cancel).await?;
        if first.equal {
            self.publish(EventKind::ParityVerified, "remote codebase matches", &first);
            return Ok(first);
        }

        self.publish(EventKind::DriftDetected, "remote codebase differs", &first);
        self.update_remote_codebase(cancel).await?;

        let second = self.verify_codebase_version(cancel).await?;
        if second.equal {
            self.publish(EventKind::DriftRepaired, "remote codebase repaired", &second);
            return Ok(second);
        }

        tracing::error!(
            worker = %self.shell.label(),
            local = %second.local,
            remote = %second.remote,
            "drift survived repair"
        );
        Err(RemoteError::DriftUnrepairable {
            local: second.local,
            remote: second.remote,
        })
    }

    fn publish(&self, kind: EventKind, message: &str, check: &VersionCheck) {
        let Some(sink) = &self.events else {
            return;
        };
        let mut event = ProgressEvent::new(kind, self.session_id.as_deref(), message)
            .with("worker", self.shell.label())
            .with("local_digest", check.local.clone())
            .with("remote_digest", check.remote.clone());
        if let Some(err) = &check.remote_error {
            event = event.with("remote_error", Value::from(err.clone()));
        }
        sink.publish(event);
    }
}
