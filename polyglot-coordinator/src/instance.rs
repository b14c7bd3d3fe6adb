//! One addressable backend in the coordinator pool.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use polyglot_core::{InstanceId, Provider, Translate};
use polyglot_remote::SshWorker;

#[derive(Debug, Default)]
struct Timeline {
    last_used: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    cooldown_until: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Snapshot for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceStatus {
    pub id: InstanceId,
    pub provider: Provider,
    pub model: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub struct Instance {
    id: InstanceId,
    provider: Provider,
    model: String,
    backend: Arc<dyn Translate>,
    worker: Option<Arc<SshWorker>>,
    available: AtomicBool,
    /// Only meaningful for SSH-backed instances; set once parity is proven.
    certified: AtomicBool,
    timeline: Mutex<Timeline>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("available", &self.is_available())
            .finish()
    }
}

impl Instance {
    pub fn new(
        id: impl Into<InstanceId>,
        provider: Provider,
        model: impl Into<String>,
        backend: Arc<dyn Translate>,
    ) -> Self {
        Self {
            id: id.into(),
            provider,
            model: model.into(),
            backend,
            worker: None,
            available: AtomicBool::new(true),
            certified: AtomicBool::new(false),
            timeline: Mutex::new(Timeline::default()),
        }
    }

    /// An instance backed by a remote worker. It stays out of rotation
    /// until [`certify`](Instance::certify) is called.
    pub fn remote(
        id: impl Into<InstanceId>,
        model: impl Into<String>,
        backend: Arc<dyn Translate>,
        worker: Arc<SshWorker>,
    ) -> Self {
        let mut instance = Self::new(id, Provider::Ssh, model, backend);
        instance.worker = Some(worker);
        instance
    }

    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn backend(&self) -> &Arc<dyn Translate> {
        &self.backend
    }

    pub fn worker(&self) -> Option<&Arc<SshWorker>> {
        self.worker.as_ref()
    }

    pub fn requires_parity(&self) -> bool {
        self.worker.is_some()
    }

    pub fn is_certified(&self) -> bool {
        self.certified.load(Ordering::SeqCst)
    }

    /// Selectable by the rotation cursor.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst) && (!self.requires_parity() || self.is_certified())
    }

    pub fn certify(&self) {
        self.certified.store(true, Ordering::SeqCst);
    }

    pub fn decertify(&self) {
        self.certified.store(false, Ordering::SeqCst);
    }

    pub(crate) fn mark_used(&self) {
        self.timeline().last_used = Some(Utc::now());
    }

    /// Take the instance out of rotation for `cooldown`.
    pub(crate) fn mark_failed(&self, error: &str, cooldown: Duration) {
        self.available.store(false, Ordering::SeqCst);
        let now = Utc::now();
        let mut timeline = self.timeline();
        timeline.last_failure_at = Some(now);
        timeline.cooldown_until = chrono::Duration::from_std(cooldown)
            .ok()
            .map(|delta| now + delta);
        timeline.last_error = Some(error.to_string());
    }

    pub(crate) fn reenable(&self) {
        self.available.store(true, Ordering::SeqCst);
        self.timeline().cooldown_until = None;
    }

    pub fn status(&self) -> InstanceStatus {
        let timeline = self.timeline();
        InstanceStatus {
            id: self.id.clone(),
            provider: self.provider,
            model: self.model.clone(),
            available: self.is_available(),
            certified: self.requires_parity().then(|| self.is_certified()),
            last_used: timeline.last_used,
            last_failure_at: timeline.last_failure_at,
            cooldown_until: timeline.cooldown_until,
            last_error: timeline.last_error.clone(),
        }
    }

    fn timeline(&self) -> MutexGuard<'_, Timeline> {
        self.timeline.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use polyglot_core::{RemoteConfig, TranslateError};
    use tokio_util::sync::CancellationToken;

    struct Echo;

    #[async_trait]
    impl Translate for Echo {
        async fn translate(
            &self,
            _cancel: &CancellationToken,
            text: &str,
            _hint: &str,
        ) -> Result<String, TranslateError> {
            Ok(text.to_string())
        }
    }

    #[test]
    fn failure_sets_cooldown_and_reenable_clears_it() {
        let instance = Instance::new("openai-1", Provider::OpenAi, "gpt-4", Arc::new(Echo));
        assert!(instance.is_available());

        instance.mark_failed("429 too many requests", Duration::from_secs(2));
        let status = instance.status();
        assert!(!status.available);
        assert!(status.cooldown_until.is_some());
        assert_eq!(status.last_error.as_deref(), Some("429 too many requests"));

        instance.reenable();
        let status = instance.status();
        assert!(status.available);
        assert!(status.cooldown_until.is_none());
        assert!(status.last_failure_at.is_some());
    }

    #[test]
    fn remote_instance_needs_certification() {
        let worker = Arc::new(SshWorker::new(RemoteConfig::new("w1", "10.0.0.5", "worker")));
        let instance = Instance::remote("ssh-w1", "remote", Arc::new(Echo), worker);
        assert!(!instance.is_available());
        assert_eq!(instance.status().certified, Some(false));

        instance.certify();
        assert!(instance.is_available());

        instance.decertify();
        assert!(!instance.is_available());
    }
}
