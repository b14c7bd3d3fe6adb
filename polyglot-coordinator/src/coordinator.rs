//! Multi-instance coordination: round-robin selection, retry with cooldown,
//! and consensus across independently invoked instances.
//!
//! ## Selection
//!
//! A shared cursor advances modulo the pool size and skips instances that
//! are unavailable or already tried in the current call. Concurrent callers
//! may interleave on the cursor; selection is load spreading only.
//!
//! ## Cooldown
//!
//! A failed instance leaves rotation and a timer re-enables it after
//! `retry_delay`. Timers are children of the coordinator's shutdown token,
//! so [`MultiLlmCoordinator::shutdown`] (or drop) cancels all of them.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use polyglot_core::{
    CoordinatorSettings, EventKind, EventSink, HashSpec, InstanceId, ProgressEvent, Translate,
    TranslateError,
};

use crate::error::CoordinationError;
use crate::instance::{Instance, InstanceStatus};

/// Event sink plus the session id stamped on every event.
#[derive(Clone, Default)]
pub(crate) struct Reporter {
    sink: Option<Arc<dyn EventSink>>,
    session_id: Option<String>,
}

impl Reporter {
    pub(crate) fn new(sink: Option<Arc<dyn EventSink>>, session_id: Option<String>) -> Self {
        Self { sink, session_id }
    }

    pub(crate) fn sink(&self) -> Option<Arc<dyn EventSink>> {
        self.sink.clone()
    }

    pub(crate) fn session_id(&self) -> Option<String> {
        self.session_id.clone()
    }

    pub(crate) fn emit(&self, kind: EventKind, message: impl Into<String>, data: &[(&str, Value)]) {
        let Some(sink) = &self.sink else {
            return;
        };
        let mut event = ProgressEvent::new(kind, self.session_id.as_deref(), message);
        for (key, value) in data {
            event = event.with(key, value.clone());
        }
        sink.publish(event);
    }
}

/// Where the local tree lives, for parity checks against remote workers.
#[derive(Debug, Clone)]
pub(crate) struct LocalCodebase {
    pub(crate) root: Option<PathBuf>,
    pub(crate) spec: HashSpec,
}

pub struct MultiLlmCoordinator {
    instances: Vec<Arc<Instance>>,
    cursor: AtomicUsize,
    settings: CoordinatorSettings,
    reporter: Reporter,
    pub(crate) codebase: LocalCodebase,
    shutdown: CancellationToken,
}

impl MultiLlmCoordinator {
    pub fn new(instances: Vec<Instance>, settings: CoordinatorSettings) -> Self {
        Self::with_events(instances, settings, None)
    }

    /// Like [`new`](Self::new), publishing lifecycle events to `sink`
    /// under `settings.session_id`.
    pub fn with_events(
        instances: Vec<Instance>,
        settings: CoordinatorSettings,
        sink: Option<Arc<dyn EventSink>>,
    ) -> Self {
        let reporter = Reporter::new(sink, settings.session_id.clone());
        reporter.emit(
            EventKind::MultiLlmInit,
            format!("initializing coordinator with {} instance(s)", instances.len()),
            &[("instance_count", Value::from(instances.len()))],
        );

        let coordinator = Self {
            instances: instances.into_iter().map(Arc::new).collect(),
            cursor: AtomicUsize::new(0),
            settings,
            reporter,
            codebase: LocalCodebase {
                root: None,
                spec: HashSpec::default(),
            },
            shutdown: CancellationToken::new(),
        };

        if coordinator.instances.is_empty() {
            tracing::warn!("no LLM instances could be initialized");
            coordinator.reporter.emit(
                EventKind::MultiLlmWarning,
                "no LLM instances could be initialized",
                &[],
            );
        }
        let providers: HashSet<_> = coordinator.instances.iter().map(|i| i.provider()).collect();
        tracing::info!(
            instances = coordinator.instances.len(),
            providers = providers.len(),
            "multi-LLM coordinator ready"
        );
        coordinator.reporter.emit(
            EventKind::MultiLlmReady,
            format!(
                "coordinator ready with {} instance(s)",
                coordinator.instances.len()
            ),
            &[
                ("instance_count", Value::from(coordinator.instances.len())),
                ("available_count", Value::from(coordinator.available_count())),
            ],
        );
        coordinator
    }

    /// Local tree and hash spec used when pairing remote workers.
    /// Defaults to the current directory and the default spec.
    pub fn with_codebase(mut self, root: impl Into<PathBuf>, spec: HashSpec) -> Self {
        self.codebase = LocalCodebase {
            root: Some(root.into()),
            spec,
        };
        self
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn instances(&self) -> &[Arc<Instance>] {
        &self.instances
    }

    pub fn instance(&self, id: &str) -> Option<&Arc<Instance>> {
        self.instances.iter().find(|i| i.id().0 == id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn available_count(&self) -> usize {
        self.instances.iter().filter(|i| i.is_available()).count()
    }

    pub fn status(&self) -> Vec<InstanceStatus> {
        self.instances.iter().map(|i| i.status()).collect()
    }

    pub(crate) fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Next available instance in round-robin order.
    pub fn next_instance(&self) -> Option<Arc<Instance>> {
        self.select(&HashSet::new())
    }

    fn select(&self, tried: &HashSet<InstanceId>) -> Option<Arc<Instance>> {
        let len = self.instances.len();
        for _ in 0..len {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
            let instance = &self.instances[index];
            if instance.is_available() && !tried.contains(instance.id()) {
                return Some(Arc::clone(instance));
            }
        }
        None
    }

    pub async fn translate_with_retry(
        &self,
        cancel: &CancellationToken,
        text: &str,
        hint: &str,
    ) -> Result<String, CoordinationError> {
        self.retry_with(&self.reporter, cancel, text, hint).await
    }

    pub async fn translate_with_consensus(
        &self,
        cancel: &CancellationToken,
        text: &str,
        hint: &str,
        required_agreement: usize,
    ) -> Result<String, CoordinationError> {
        self.consensus_with(&self.reporter, cancel, text, hint, required_agreement)
            .await
    }

    /// Retry-based translation reporting to a caller-supplied sink.
    pub async fn translate_with_progress(
        &self,
        cancel: &CancellationToken,
        text: &str,
        hint: &str,
        sink: Arc<dyn EventSink>,
        session_id: Option<String>,
    ) -> Result<String, CoordinationError> {
        let reporter = Reporter::new(Some(sink), session_id);
        self.retry_with(&reporter, cancel, text, hint).await
    }

    async fn retry_with(
        &self,
        reporter: &Reporter,
        cancel: &CancellationToken,
        text: &str,
        hint: &str,
    ) -> Result<String, CoordinationError> {
        if self.instances.is_empty() {
            return Err(CoordinationError::NoInstancesAvailable);
        }

        let max_attempts = self.settings.max_retries.max(1);
        let mut tried = HashSet::new();
        let mut last: Option<(InstanceId, TranslateError)> = None;
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(CoordinationError::Cancelled);
            }
            let Some(instance) = self.select(&tried) else {
                reporter.emit(EventKind::MultiLlmWarning, "all LLM instances exhausted", &[]);
                break;
            };
            tried.insert(instance.id().clone());
            attempts = attempt;

            reporter.emit(
                EventKind::TranslationAttempt,
                format!("attempting translation with {} (attempt {attempt})", instance.id()),
                &[
                    ("instance_id", Value::from(instance.id().to_string())),
                    ("provider", Value::from(instance.provider().as_str())),
                    ("attempt", Value::from(attempt)),
                ],
            );

            match invoke(&instance, cancel, text, hint).await {
                Ok(translated) => {
                    instance.mark_used();
                    tracing::debug!(instance = %instance.id(), attempt, "translation succeeded");
                    reporter.emit(
                        EventKind::TranslationSuccess,
                        format!("translation successful with {}", instance.id()),
                        &[
                            ("instance_id", Value::from(instance.id().to_string())),
                            ("attempt", Value::from(attempt)),
                        ],
                    );
                    return Ok(translated);
                }
                Err(TranslateError::Cancelled) => return Err(CoordinationError::Cancelled),
                Err(err) => {
                    tracing::warn!(
                        instance = %instance.id(),
                        attempt,
                        error = %err,
                        "translation attempt failed"
                    );
                    reporter.emit(
                        EventKind::TranslationFailed,
                        format!("translation failed with {}: {err}", instance.id()),
                        &[
                            ("instance_id", Value::from(instance.id().to_string())),
                            ("attempt", Value::from(attempt)),
                            ("error", Value::from(err.to_string())),
                        ],
                    );
                    self.cool_down(&instance, &err, reporter);
                    last = Some((instance.id().clone(), err));
                }
            }
        }

        match last {
            Some((instance, source)) => Err(CoordinationError::RetriesExhausted {
                attempts,
                instance,
                source,
            }),
            None => Err(CoordinationError::NoInstancesAvailable),
        }
    }

    async fn consensus_with(
        &self,
        reporter: &Reporter,
        cancel: &CancellationToken,
        text: &str,
        hint: &str,
        required: usize,
    ) -> Result<String, CoordinationError> {
        if self.instances.is_empty() {
            return Err(CoordinationError::NoInstancesAvailable);
        }

        let available = self.available_count();
        if required == 0 || available < required {
            return self
                .consensus_fallback(reporter, cancel, text, hint, required, available)
                .await;
        }

        let mut tried = HashSet::new();
        let mut selected = Vec::with_capacity(required);
        while selected.len() < required {
            let Some(instance) = self.select(&tried) else {
                break;
            };
            tried.insert(instance.id().clone());
            selected.push(instance);
        }
        if selected.len() < required {
            // Lost a race with a concurrent failure.
            let available = selected.len();
            return self
                .consensus_fallback(reporter, cancel, text, hint, required, available)
                .await;
        }

        let mut calls = JoinSet::new();
        for instance in selected {
            let cancel = cancel.clone();
            let text = text.to_string();
            let hint = hint.to_string();
            calls.spawn(async move {
                let result = invoke(&instance, &cancel, &text, &hint).await;
                (instance, result)
            });
        }

        let mut answers: Vec<(InstanceId, String)> = Vec::new();
        let mut failed = 0;
        while let Some(joined) = calls.join_next().await {
            let (instance, result) = match joined {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::error!(error = %err, "consensus task failed");
                    failed += 1;
                    continue;
                }
            };
            match result {
                Ok(translated) => {
                    instance.mark_used();
                    answers.push((instance.id().clone(), translated));
                }
                Err(TranslateError::Cancelled) => return Err(CoordinationError::Cancelled),
                Err(err) => {
                    tracing::warn!(instance = %instance.id(), error = %err, "consensus member failed");
                    self.cool_down(&instance, &err, reporter);
                    failed += 1;
                }
            }
        }

        let mut groups: HashMap<&str, usize> = HashMap::new();
        for (_, answer) in &answers {
            *groups.entry(answer.as_str()).or_default() += 1;
        }
        let winner = groups
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(answer, count)| (answer.to_string(), *count));

        match winner {
            Some((answer, agreeing)) if agreeing >= required => {
                reporter.emit(
                    EventKind::ConsensusReached,
                    format!("{agreeing} instance(s) agreed"),
                    &[
                        ("required", Value::from(required)),
                        ("agreeing", Value::from(agreeing)),
                    ],
                );
                Ok(answer)
            }
            other => {
                let agreeing = other.map(|(_, count)| count).unwrap_or(0);
                let dissenting = answers.len() - agreeing;
                reporter.emit(
                    EventKind::ConsensusFailed,
                    format!("consensus not reached ({agreeing}/{required})"),
                    &[
                        ("required", Value::from(required)),
                        ("agreeing", Value::from(agreeing)),
                        ("dissenting", Value::from(dissenting)),
                        ("failed", Value::from(failed)),
                    ],
                );
                Err(CoordinationError::ConsensusFailure {
                    required,
                    agreeing,
                    dissenting,
                    failed,
                })
            }
        }
    }

    async fn consensus_fallback(
        &self,
        reporter: &Reporter,
        cancel: &CancellationToken,
        text: &str,
        hint: &str,
        required: usize,
        available: usize,
    ) -> Result<String, CoordinationError> {
        tracing::info!(required, available, "consensus falling back to single instance");
        reporter.emit(
            EventKind::ConsensusFallback,
            format!("only {available} instance(s) available for consensus of {required}"),
            &[
                ("required", Value::from(required)),
                ("available", Value::from(available)),
            ],
        );
        self.retry_with(reporter, cancel, text, hint).await
    }

    /// Take `instance` out of rotation and schedule its re-enable.
    fn cool_down(&self, instance: &Arc<Instance>, err: &TranslateError, reporter: &Reporter) {
        let delay = self.settings.retry_delay();
        instance.mark_failed(&err.to_string(), delay);
        reporter.emit(
            EventKind::InstanceDisabled,
            format!("{} disabled for {}ms", instance.id(), delay.as_millis()),
            &[
                ("instance_id", Value::from(instance.id().to_string())),
                ("cooldown_ms", Value::from(self.settings.retry_delay_ms)),
            ],
        );

        let token = self.shutdown.child_token();
        let instance = Arc::clone(instance);
        let reporter = reporter.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    instance.reenable();
                    tracing::debug!(instance = %instance.id(), "instance re-enabled");
                    reporter.emit(
                        EventKind::InstanceReenabled,
                        format!("{} re-enabled", instance.id()),
                        &[("instance_id", Value::from(instance.id().to_string()))],
                    );
                }
            }
        });
    }

    /// Cancel pending cooldown timers and close SSH sessions.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for instance in &self.instances {
            if let Some(worker) = instance.worker() {
                worker.disconnect();
            }
        }
    }
}

impl Drop for MultiLlmCoordinator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// One backend call; a blank answer to a non-blank input is a provider
/// failure.
async fn invoke(
    instance: &Instance,
    cancel: &CancellationToken,
    text: &str,
    hint: &str,
) -> Result<String, TranslateError> {
    let translated = instance.backend().translate(cancel, text, hint).await?;
    if translated.trim().is_empty() && !text.trim().is_empty() {
        return Err(TranslateError::provider(format!(
            "{} returned an empty translation",
            instance.id()
        )));
    }
    Ok(translated)
}

#[async_trait]
impl Translate for MultiLlmCoordinator {
    async fn translate(
        &self,
        cancel: &CancellationToken,
        text: &str,
        hint: &str,
    ) -> Result<String, TranslateError> {
        Ok(self.translate_with_retry(cancel, text, hint).await?)
    }
}
