//! Operator-facing Kubernetes events
//!
//! Backup state transitions are recorded as events on the volume the backup
//! belongs to, so `kubectl describe volume` shows the backup history.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

use crate::crd::cluster::Volume;

/// Event severity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

/// Sink for events correlated to a volume. Publishing is best effort.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, volume_name: &str, kind: EventKind, reason: &str, message: &str);
}

/// Publishes events through the Kubernetes events API
pub struct KubeEventPublisher {
    client: Client,
    namespace: String,
    reporter: Reporter,
}

impl KubeEventPublisher {
    pub fn new(client: Client, namespace: impl Into<String>, controller_id: &str) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            reporter: Reporter {
                controller: "volume-backup-controller".to_string(),
                instance: Some(controller_id.to_string()),
            },
        }
    }

    fn volume_ref(&self, volume_name: &str) -> ObjectReference {
        ObjectReference {
            api_version: Some(<Volume as kube::Resource>::api_version(&()).into_owned()),
            kind: Some(<Volume as kube::Resource>::kind(&()).into_owned()),
            name: Some(volume_name.to_string()),
            namespace: Some(self.namespace.clone()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, volume_name: &str, kind: EventKind, reason: &str, message: &str) {
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            self.volume_ref(volume_name),
        );
        let event = Event {
            type_: match kind {
                EventKind::Normal => EventType::Normal,
                EventKind::Warning => EventType::Warning,
            },
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: "Backup".to_string(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(event).await {
            warn!(volume = %volume_name, reason = %reason, error = %e, "Failed to publish event");
        }
    }
}

/// Drops every event. Used when event recording is disabled.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _volume_name: &str, _kind: EventKind, _reason: &str, _message: &str) {}
}
