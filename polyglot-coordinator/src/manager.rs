//! The narrow surface the API layer needs from a distributed pool.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use polyglot_remote::{CodebaseSync, MonitoredShell, RemoteShell, SshWorker, VersionCheck};

use crate::coordinator::MultiLlmCoordinator;
use crate::error::CoordinationError;
use crate::instance::{Instance, InstanceStatus};

#[async_trait]
pub trait DistributedManager: Send + Sync {
    fn status(&self) -> Vec<InstanceStatus>;

    /// Connect to a worker and certify it once parity holds.
    async fn pair(
        &self,
        cancel: &CancellationToken,
        worker_id: &str,
    ) -> Result<VersionCheck, CoordinationError>;

    /// Take a worker out of rotation and close its session.
    async fn unpair(&self, worker_id: &str) -> Result<(), CoordinationError>;

    async fn translate(
        &self,
        cancel: &CancellationToken,
        text: &str,
        hint: &str,
    ) -> Result<String, CoordinationError>;
}

impl MultiLlmCoordinator {
    fn remote_instance(&self, worker_id: &str) -> Result<(&Arc<Instance>, &Arc<SshWorker>), CoordinationError> {
        self.instances()
            .iter()
            .find_map(|instance| {
                let worker = instance.worker()?;
                let matches = worker.config().id == worker_id || instance.id().0 == worker_id;
                matches.then_some((instance, worker))
            })
            .ok_or_else(|| CoordinationError::UnknownWorker(worker_id.to_string()))
    }

    /// Build the parity protocol for one worker against the local tree.
    /// With a sink configured, every command on the worker is reported too.
    pub fn codebase_sync(&self, worker: Arc<dyn RemoteShell>, build_command: &str) -> Result<CodebaseSync, CoordinationError> {
        let root = match &self.codebase.root {
            Some(root) => root.clone(),
            None => std::env::current_dir().map_err(CoordinationError::CodebaseRoot)?,
        };
        let Some(sink) = self.reporter().sink() else {
            return Ok(CodebaseSync::new(worker, root, self.codebase.spec.clone())
                .with_build_command(build_command));
        };
        let session_id = self.reporter().session_id();
        let shell: Arc<dyn RemoteShell> =
            Arc::new(MonitoredShell::new(worker, sink.clone(), session_id.clone()));
        Ok(CodebaseSync::new(shell, root, self.codebase.spec.clone())
            .with_build_command(build_command)
            .with_events(sink, session_id))
    }

    /// Pair every SSH-backed instance; failures leave that worker out of
    /// rotation and are returned alongside the worker id.
    pub async fn pair_all(&self, cancel: &CancellationToken) -> Vec<(String, Result<VersionCheck, CoordinationError>)> {
        let ids: Vec<String> = self
            .instances()
            .iter()
            .filter_map(|i| i.worker().map(|w| w.config().id.clone()))
            .collect();
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = DistributedManager::pair(self, cancel, &id).await;
            if let Err(err) = &outcome {
                tracing::warn!(worker = %id, error = %err, "worker left out of rotation");
            }
            outcomes.push((id, outcome));
        }
        outcomes
    }
}

#[async_trait]
impl DistributedManager for MultiLlmCoordinator {
    fn status(&self) -> Vec<InstanceStatus> {
        MultiLlmCoordinator::status(self)
    }

    async fn pair(
        &self,
        cancel: &CancellationToken,
        worker_id: &str,
    ) -> Result<VersionCheck, CoordinationError> {
        let (instance, worker) = self.remote_instance(worker_id)?;
        instance.decertify();

        if !worker.is_connected() {
            worker.connect(cancel).await?;
        }
        worker.test_connection(cancel).await?;

        let build_command = worker.config().build_command.clone();
        let shell: Arc<dyn RemoteShell> = worker.clone();
        let check = self
            .codebase_sync(shell, &build_command)?
            .ensure_parity(cancel)
            .await?;

        instance.certify();
        tracing::info!(worker = %worker_id, digest = %check.local, "worker certified");
        Ok(check)
    }

    async fn unpair(&self, worker_id: &str) -> Result<(), CoordinationError> {
        let (instance, worker) = self.remote_instance(worker_id)?;
        instance.decertify();
        worker.disconnect();
        Ok(())
    }

    async fn translate(
        &self,
        cancel: &CancellationToken,
        text: &str,
        hint: &str,
    ) -> Result<String, CoordinationError> {
        self.translate_with_retry(cancel, text, hint).await
    }
}
