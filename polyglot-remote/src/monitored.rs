//! A [`RemoteShell`] decorator that reports every command to an event sink.
//!
//! Each command yields `remote_command_started` followed by either
//! `remote_command_finished` or `remote_command_failed`. Upload chunks make
//! for long command lines, so the `command` field is cut to a fixed prefix.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use polyglot_core::{EventKind, EventSink, ProgressEvent};

use crate::error::RemoteError;
use crate::shell::{CommandResult, RemoteShell};

const COMMAND_PREVIEW: usize = 160;

pub struct MonitoredShell {
    inner: Arc<dyn RemoteShell>,
    sink: Arc<dyn EventSink>,
    session_id: Option<String>,
}

impl MonitoredShell {
    pub fn new(
        inner: Arc<dyn RemoteShell>,
        sink: Arc<dyn EventSink>,
        session_id: Option<String>,
    ) -> Self {
        Self {
            inner,
            sink,
            session_id,
        }
    }

    fn event(&self, kind: EventKind, message: String, command: &str) -> ProgressEvent {
        ProgressEvent::new(kind, self.session_id.as_deref(), message)
            .with("worker", self.inner.label())
            .with("command", preview(command))
    }
}

fn preview(command: &str) -> String {
    match command.char_indices().nth(COMMAND_PREVIEW) {
        Some((cut, _)) => format!("{}...", &command[..cut]),
        None => command.to_string(),
    }
}

#[async_trait]
impl RemoteShell for MonitoredShell {
    fn remote_dir(&self) -> &str {
        self.inner.remote_dir()
    }

    fn label(&self) -> String {
        self.inner.label()
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        command: &str,
    ) -> Result<CommandResult, RemoteError> {
        let label = self.inner.label();
        self.sink.publish(self.event(
            EventKind::RemoteCommandStarted,
            format!("running command on {label}"),
            command,
        ));

        let started = Instant::now();
        let outcome = self.inner.execute(cancel, command).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let event = match &outcome {
            Ok(result) if result.success() => self
                .event(
                    EventKind::RemoteCommandFinished,
                    format!("command on {label} completed"),
                    command,
                )
                .with("exit_code", result.exit_code),
            Ok(result) => {
                let error = match &result.error {
                    Some(err) => err.clone(),
                    None => result.stderr.trim().to_string(),
                };
                self.event(
                    EventKind::RemoteCommandFailed,
                    format!("command on {label} exited with {}", result.exit_code),
                    command,
                )
                .with("exit_code", result.exit_code)
                .with("error", error)
            }
            Err(err) => self
                .event(
                    EventKind::RemoteCommandFailed,
                    format!("command on {label} failed"),
                    command,
                )
                .with("error", err.to_string()),
        };
        self.sink.publish(event.with("duration_ms", duration_ms));
        outcome
    }
}
