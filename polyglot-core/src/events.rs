//! Progress events published by the coordinator and the sync protocol.
//!
//! The event bus itself lives outside this workspace; the core only needs
//! a publish hook, modelled as [`EventSink`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MultiLlmInit,
    MultiLlmReady,
    MultiLlmWarning,
    TranslationAttempt,
    TranslationSuccess,
    TranslationFailed,
    InstanceDisabled,
    InstanceReenabled,
    ConsensusReached,
    ConsensusFailed,
    ConsensusFallback,
    ParityVerified,
    DriftDetected,
    DriftRepaired,
    RemoteCommandStarted,
    RemoteCommandFinished,
    RemoteCommandFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MultiLlmInit => "multi_llm_init",
            EventKind::MultiLlmReady => "multi_llm_ready",
            EventKind::MultiLlmWarning => "multi_llm_warning",
            EventKind::TranslationAttempt => "translation_attempt",
            EventKind::TranslationSuccess => "translation_success",
            EventKind::TranslationFailed => "translation_failed",
            EventKind::InstanceDisabled => "instance_disabled",
            EventKind::InstanceReenabled => "instance_reenabled",
            EventKind::ConsensusReached => "consensus_reached",
            EventKind::ConsensusFailed => "consensus_failed",
            EventKind::ConsensusFallback => "consensus_fallback",
            EventKind::ParityVerified => "parity_verified",
            EventKind::DriftDetected => "drift_detected",
            EventKind::DriftRepaired => "drift_repaired",
            EventKind::RemoteCommandStarted => "remote_command_started",
            EventKind::RemoteCommandFinished => "remote_command_finished",
            EventKind::RemoteCommandFailed => "remote_command_failed",
        }
    }
}

/// One structured progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(kind: EventKind, session_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind,
            session_id: session_id.map(str::to_owned),
            message: message.into(),
            data: Map::new(),
            at: Utc::now(),
        }
    }

    /// Builder-style `data` entry.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

/// Publish hook. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ProgressEvent);
}

impl EventSink for mpsc::UnboundedSender<ProgressEvent> {
    fn publish(&self, event: ProgressEvent) {
        // A dropped receiver means nobody is listening any more.
        let _ = self.send(event);
    }
}

impl EventSink for broadcast::Sender<ProgressEvent> {
    fn publish(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_to_wire_name() {
        for kind in [
            EventKind::MultiLlmInit,
            EventKind::InstanceReenabled,
            EventKind::ConsensusFallback,
            EventKind::DriftRepaired,
            EventKind::RemoteCommandFailed,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, Value::String(kind.as_str().to_string()));
        }
    }

    #[test]
    fn event_carries_session_and_data() {
        let event = ProgressEvent::new(EventKind::TranslationAttempt, Some("s-1"), "attempt")
            .with("attempt", 2)
            .with("instance_id", "openai-1");
        assert_eq!(event.session_id.as_deref(), Some("s-1"));
        assert_eq!(event.data["attempt"], Value::from(2));
        assert_eq!(event.data["instance_id"], Value::from("openai-1"));
    }

    #[tokio::test]
    async fn unbounded_sender_is_a_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: &dyn EventSink = &tx;
        sink.publish(ProgressEvent::new(EventKind::MultiLlmReady, None, "ready"));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.kind, EventKind::MultiLlmReady);
    }
}
