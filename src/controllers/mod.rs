//! Kubernetes controller for Backup resources
//!
//! This module holds the shared controller context and the kube-runtime
//! controller driving the Backup reconciler.

mod backup_controller;

pub use backup_controller::{error_policy, reconcile, run, RetryTracker};

use std::sync::Arc;
use std::time::Duration;

use kube::Client;

use crate::adapters::{CliBackupTargetClientFactory, CliEngineClientFactory};
use crate::clients::{BackupTargetClientFactory, EngineClientFactory};
use crate::config::OperatorConfig;
use crate::datastore::{DataStore, KubeDataStore};
use crate::events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};
use crate::reconcilers::monitor::BACKUP_STATUS_POLL_INTERVAL;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(5);
const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Shared context of the backup controller
pub struct Context {
    /// Object store (trait object for testability)
    pub store: Arc<dyn DataStore>,
    /// Backup target clients
    pub targets: Arc<dyn BackupTargetClientFactory>,
    /// Engine clients
    pub engines: Arc<dyn EngineClientFactory>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Identity of this controller replica
    pub controller_id: String,
    /// Namespace holding the backup resources
    pub namespace: String,
    /// Interval between two transfer progress polls
    pub poll_interval: Duration,
    /// Failure counts of Backups being retried
    pub retries: RetryTracker,
}

impl Context {
    /// Create the production context talking to the Kubernetes API
    pub fn new(client: Client, config: &OperatorConfig) -> Self {
        let events: Arc<dyn EventPublisher> = if config.disable_events {
            Arc::new(NoopEventPublisher)
        } else {
            Arc::new(KubeEventPublisher::new(
                client.clone(),
                &config.namespace,
                &config.controller_id,
            ))
        };

        Self {
            store: Arc::new(KubeDataStore::new(client.clone(), &config.namespace)),
            targets: Arc::new(CliBackupTargetClientFactory::new(
                client.clone(),
                &config.namespace,
                &config.backup_store_binary,
            )),
            engines: Arc::new(CliEngineClientFactory::new(
                client,
                &config.namespace,
                &config.engine_binary,
            )),
            events,
            controller_id: config.controller_id.clone(),
            namespace: config.namespace.clone(),
            poll_interval: config.poll_interval(),
            retries: RetryTracker::new(
                config.max_retries,
                config.retry_base_delay(),
                config.retry_max_delay(),
            ),
        }
    }

    /// Create a context from explicit collaborators.
    ///
    /// Used by tests, where no Kubernetes API is available.
    pub fn with_collaborators(
        store: Arc<dyn DataStore>,
        targets: Arc<dyn BackupTargetClientFactory>,
        engines: Arc<dyn EngineClientFactory>,
        events: Arc<dyn EventPublisher>,
        controller_id: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            targets,
            engines,
            events,
            controller_id: controller_id.into(),
            namespace: namespace.into(),
            poll_interval: BACKUP_STATUS_POLL_INTERVAL,
            retries: RetryTracker::new(
                DEFAULT_MAX_RETRIES,
                DEFAULT_RETRY_BASE_DELAY,
                DEFAULT_RETRY_MAX_DELAY,
            ),
        }
    }

    /// Override the transfer poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the retry budget and backoff of failing Backups
    pub fn retry_policy(mut self, max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        self.retries = RetryTracker::new(max_retries, base_delay, max_delay);
        self
    }
}
