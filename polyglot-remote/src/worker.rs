//! SSH-attached worker: connection lifecycle and command execution.
//!
//! `ssh2` is blocking, so every network operation runs on the blocking pool.
//! One [`SshWorker`] owns one session; commands on it are serialised by a
//! mutex, and each command opens its own channel. The worker is shared as
//! `Arc<SshWorker>` between the parity protocol and the translate backend.
//!
//! [`SshWorker::disconnect`] never waits for that mutex: it cancels the
//! worker's closing token, which a running command notices at its next poll,
//! and the session is torn down once the last command lets go of it.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ssh2::{Channel, Session};
use tokio_util::sync::CancellationToken;

use polyglot_core::RemoteConfig;

use crate::error::{ssh_err, RemoteError};
use crate::shell::{CommandResult, RemoteShell};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const CONNECTION_PROBE: &str = "connection-test";

type SharedSession = Arc<Mutex<Session>>;

pub struct SshWorker {
    config: RemoteConfig,
    session: Mutex<Option<SharedSession>>,
    closing: Mutex<CancellationToken>,
}

impl std::fmt::Debug for SshWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshWorker")
            .field("id", &self.config.id)
            .field("host", &self.config.host)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl SshWorker {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
            closing: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.current_session().is_some()
    }

    fn current_session(&self) -> Option<SharedSession> {
        self.session.lock().ok().and_then(|slot| slot.clone())
    }

    fn closing_token(&self) -> CancellationToken {
        match self.closing.lock() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Dial, handshake and authenticate. Key auth is tried before password.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<(), RemoteError> {
        let port = self.config.validated_port()?;
        let has_key = self
            .config
            .private_key_path
            .as_ref()
            .is_some_and(|p| p.is_file());
        if !has_key && self.config.password.is_none() {
            return Err(RemoteError::NoAuthMethod {
                username: self.config.username.clone(),
                host: self.config.host.clone(),
            });
        }

        let config = self.config.clone();
        let task = tokio::task::spawn_blocking(move || open_session(&config, port));
        let session = tokio::select! {
            joined = task => joined??,
            _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
        };

        tracing::info!(
            worker = %self.config.id,
            host = %self.config.host,
            port,
            "ssh session established"
        );
        let mut slot = self
            .session
            .lock()
            .map_err(|_| RemoteError::Ssh("session lock poisoned".to_string()))?;
        *slot = Some(Arc::new(Mutex::new(session)));
        if let Ok(mut closing) = self.closing.lock() {
            *closing = CancellationToken::new();
        }
        Ok(())
    }

    /// Close the session without waiting for a running command. Safe to
    /// call when not connected.
    pub fn disconnect(&self) {
        self.closing_token().cancel();
        let Some(session) = self.session.lock().ok().and_then(|mut slot| slot.take()) else {
            return;
        };
        match session.try_lock() {
            Ok(session) => {
                if let Err(err) = session.disconnect(None, "polyglot worker closing", None) {
                    tracing::debug!(worker = %self.config.id, error = %err, "ssh disconnect");
                }
                tracing::info!(worker = %self.config.id, "ssh session closed");
            }
            Err(TryLockError::WouldBlock) => {
                tracing::info!(
                    worker = %self.config.id,
                    "ssh session busy, closing after the running command stops"
                );
            }
            Err(TryLockError::Poisoned(_)) => {
                tracing::debug!(worker = %self.config.id, "ssh session lock poisoned");
            }
        };
    }

    /// Run `echo connection-test` and check the echo.
    pub async fn test_connection(&self, cancel: &CancellationToken) -> Result<(), RemoteError> {
        let result = self
            .execute_checked(cancel, &format!("echo {CONNECTION_PROBE}"))
            .await?;
        if result.stdout.trim() != CONNECTION_PROBE {
            return Err(RemoteError::Protocol(format!(
                "connection test echoed {:?}",
                result.stdout.trim()
            )));
        }
        Ok(())
    }
}

impl Drop for SshWorker {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[async_trait]
impl RemoteShell for SshWorker {
    fn remote_dir(&self) -> &str {
        &self.config.remote_dir
    }

    fn label(&self) -> String {
        format!(
            "{}@{}:{}",
            self.config.username, self.config.host, self.config.port
        )
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        command: &str,
    ) -> Result<CommandResult, RemoteError> {
        let session = self.current_session().ok_or(RemoteError::NotConnected)?;
        let timeout = self.config.command_timeout();
        let owned = command.to_string();
        let stop = Stop {
            cancel: cancel.clone(),
            closing: self.closing_token(),
        };
        let closing = stop.closing.clone();
        let task =
            tokio::task::spawn_blocking(move || run_command(&session, &owned, &stop, timeout));

        // The blocking side notices the same tokens and closes the channel.
        let result = tokio::select! {
            joined = task => joined??,
            _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
            _ = closing.cancelled() => return Err(RemoteError::NotConnected),
        };
        tracing::debug!(
            worker = %self.config.id,
            exit_code = result.exit_code,
            "remote command finished"
        );
        Ok(result)
    }
}

fn open_session(config: &RemoteConfig, port: u16) -> Result<Session, RemoteError> {
    let connect_err = |message: String| RemoteError::Connect {
        host: format!("{}:{}", config.host, port),
        message,
    };
    let timeout = config.connect_timeout();

    let addrs = (config.host.as_str(), port)
        .to_socket_addrs()
        .map_err(|e| connect_err(e.to_string()))?;
    let mut last = String::from("host resolved to no addresses");
    let mut tcp = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                tcp = Some(stream);
                break;
            }
            Err(err) => last = err.to_string(),
        }
    }
    let tcp = tcp.ok_or_else(|| connect_err(last))?;
    tcp.set_read_timeout(Some(timeout)).ok();
    tcp.set_write_timeout(Some(timeout)).ok();

    let mut session = Session::new().map_err(ssh_err)?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    session.handshake().map_err(|e| connect_err(e.to_string()))?;

    if let Some(key) = config.private_key_path.as_deref().filter(|p| p.is_file()) {
        if let Err(err) = session.userauth_pubkey_file(&config.username, None, key, None) {
            tracing::warn!(
                worker = %config.id,
                key = %key.display(),
                error = %err,
                "private key rejected, trying password"
            );
        }
    }
    if !session.authenticated() {
        if let Some(password) = config.password.as_deref() {
            if let Err(err) = session.userauth_password(&config.username, password) {
                tracing::warn!(worker = %config.id, error = %err, "password auth failed");
            }
        }
    }
    if !session.authenticated() {
        return Err(RemoteError::AuthFailed {
            username: config.username.clone(),
            host: config.host.clone(),
        });
    }

    // Commands run without a timeout of their own unless configured.
    session.set_timeout(0);
    Ok(session)
}

/// The two ways a running command is stopped from outside: the caller's
/// token and the worker being disconnected.
struct Stop {
    cancel: CancellationToken,
    closing: CancellationToken,
}

impl Stop {
    fn check(&self) -> Result<(), RemoteError> {
        if self.closing.is_cancelled() {
            return Err(RemoteError::NotConnected);
        }
        if self.cancel.is_cancelled() {
            return Err(RemoteError::Cancelled);
        }
        Ok(())
    }
}

fn run_command(
    session: &Mutex<Session>,
    command: &str,
    stop: &Stop,
    timeout: Option<Duration>,
) -> Result<CommandResult, RemoteError> {
    let session = session
        .lock()
        .map_err(|_| RemoteError::Ssh("session lock poisoned".to_string()))?;
    // Queued behind another command while the worker was closed.
    stop.check()?;

    session.set_blocking(true);
    let mut channel = session.channel_session().map_err(ssh_err)?;
    channel.exec(command).map_err(ssh_err)?;

    session.set_blocking(false);
    let pumped = pump(&mut channel, command, stop, timeout);
    session.set_blocking(true);

    let (stdout, stderr, stream_error) = match pumped {
        Ok(streams) => streams,
        Err(err) => {
            let _ = channel.close();
            return Err(err);
        }
    };

    let mut error = stream_error;
    if let Err(err) = channel.wait_close() {
        error.get_or_insert_with(|| err.to_string());
    }
    let exit_code = match channel.exit_status() {
        Ok(code) => code,
        Err(err) => {
            error.get_or_insert_with(|| err.to_string());
            -1
        }
    };

    Ok(CommandResult {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        error,
    })
}

type Streams = (Vec<u8>, Vec<u8>, Option<String>);

/// Drain stdout and stderr until EOF, a stop or timeout.
fn pump(
    channel: &mut Channel,
    command: &str,
    stop: &Stop,
    timeout: Option<Duration>,
) -> Result<Streams, RemoteError> {
    let started = Instant::now();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = [0u8; 8192];

    loop {
        stop.check()?;
        if let Some(after) = timeout {
            if started.elapsed() > after {
                return Err(RemoteError::Timeout {
                    command: command.to_string(),
                    after,
                });
            }
        }

        let mut progressed = false;
        match channel.read(&mut buf) {
            Ok(n) if n > 0 => {
                stdout.extend_from_slice(&buf[..n]);
                progressed = true;
            }
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => return Ok((stdout, stderr, Some(format!("stdout read failed: {err}")))),
        }
        match channel.stderr().read(&mut buf) {
            Ok(n) if n > 0 => {
                stderr.extend_from_slice(&buf[..n]);
                progressed = true;
            }
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => return Ok((stdout, stderr, Some(format!("stderr read failed: {err}")))),
        }

        if channel.eof() && !progressed {
            return Ok((stdout, stderr, None));
        }
        if !progressed {
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_rejects_out_of_range_port() {
        let mut config = RemoteConfig::new("w1", "127.0.0.1", "worker");
        config.port = 70_000;
        config.password = Some("secret".into());
        let worker = SshWorker::new(config);
        let err = worker.connect(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RemoteError::Config(_)), "got {err}");
    }

    #[tokio::test]
    async fn connect_requires_an_auth_method() {
        let mut config = RemoteConfig::new("w1", "127.0.0.1", "worker");
        config.private_key_path = Some("/nonexistent/id_ed25519".into());
        let worker = SshWorker::new(config);
        let err = worker.connect(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RemoteError::NoAuthMethod { .. }), "got {err}");
    }

    #[tokio::test]
    async fn execute_before_connect_fails() {
        let worker = SshWorker::new(RemoteConfig::new("w1", "127.0.0.1", "worker"));
        let err = worker
            .execute(&CancellationToken::new(), "true")
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::NotConnected), "got {err}");
        assert!(!worker.is_connected());
    }

    #[test]
    fn disconnect_cancels_running_commands() {
        let worker = SshWorker::new(RemoteConfig::new("w1", "127.0.0.1", "worker"));
        let closing = worker.closing_token();
        worker.disconnect();
        assert!(closing.is_cancelled());
    }

    #[test]
    fn disconnect_does_not_wait_for_a_busy_session() {
        let worker = SshWorker::new(RemoteConfig::new("w1", "127.0.0.1", "worker"));
        let session: SharedSession = Arc::new(Mutex::new(Session::new().unwrap()));
        *worker.session.lock().unwrap() = Some(session.clone());
        assert!(worker.is_connected());

        // Stands in for a command holding the session.
        let busy = session.lock().unwrap();
        worker.disconnect();
        assert!(!worker.is_connected());
        assert!(worker.closing_token().is_cancelled());
        drop(busy);
        assert_eq!(Arc::strong_count(&session), 1);
    }

    #[test]
    fn closing_wins_over_cancellation() {
        let stop = Stop {
            cancel: CancellationToken::new(),
            closing: CancellationToken::new(),
        };
        assert!(stop.check().is_ok());
        stop.cancel.cancel();
        assert!(matches!(stop.check(), Err(RemoteError::Cancelled)));
        stop.closing.cancel();
        assert!(matches!(stop.check(), Err(RemoteError::NotConnected)));
    }
}
