//! Snapshot transfer progress monitor
//!
//! A monitor is spawned once per transfer, detached from the controller. It
//! owns an immutable [`TransferTask`] and never shares mutable state with the
//! reconciler: every write starts from a fresh read of the Backup, so a
//! concurrent reconcile can at worst make the monitor's write conflict, in
//! which case the write is dropped and the next watch event re-derives state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::status::write_if_changed;
use crate::clients::{EngineClient, TransferRequest};
use crate::crd::{BackupState, DEFAULT_BACKUP_TARGET_NAME};
use crate::datastore::DataStore;
use crate::events::{EventKind, EventPublisher};
use crate::metrics;

/// Interval between two progress polls
pub const BACKUP_STATUS_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Progress value at which a transfer is complete
const TRANSFER_COMPLETE: u8 = 100;

/// Everything a monitor needs, captured when the transfer is launched
#[derive(Clone, Debug)]
pub struct TransferTask {
    pub backup_name: String,
    pub volume_name: String,
    pub request: TransferRequest,
}

impl TransferTask {
    fn event_message(&self, err: Option<&str>) -> String {
        let base = format!(
            "Snapshot {} backup {} label {:?}",
            self.request.snapshot_name, self.backup_name, self.request.labels
        );
        match err {
            Some(err) => format!("{}: {}", base, err),
            None => base,
        }
    }
}

/// Watches one transfer until it completes, fails or disappears
pub struct ProgressMonitor {
    store: Arc<dyn DataStore>,
    engine: Arc<dyn EngineClient>,
    events: Arc<dyn EventPublisher>,
    poll_interval: Duration,
}

/// Keeps the active-monitor gauge accurate on every exit path
struct ActiveGuard;

impl ActiveGuard {
    fn new() -> Self {
        metrics::ACTIVE_TRANSFER_MONITORS.inc();
        ActiveGuard
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        metrics::ACTIVE_TRANSFER_MONITORS.dec();
    }
}

impl ProgressMonitor {
    pub fn new(
        store: Arc<dyn DataStore>,
        engine: Arc<dyn EngineClient>,
        events: Arc<dyn EventPublisher>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            events,
            poll_interval,
        }
    }

    /// Spawn the monitor as an independent task
    pub fn launch(self, task: TransferTask) -> JoinHandle<BackupState> {
        tokio::spawn(async move { self.run(task).await })
    }

    /// Drive the transfer to a final state and persist it.
    ///
    /// Never fails: every error is turned into an Error or Unknown state.
    pub async fn run(&self, task: TransferTask) -> BackupState {
        let _active = ActiveGuard::new();

        let state = self.transfer(&task).await;
        self.persist_state(&task, state).await;
        if state == BackupState::Completed {
            self.wake_siblings(&task).await;
        }
        state
    }

    async fn transfer(&self, task: &TransferTask) -> BackupState {
        if let Err(e) = self.engine.start_transfer(&task.request).await {
            warn!(backup = %task.backup_name, error = %e, "Failed to start snapshot transfer");
            self.record(task, BackupState::Error, Some(&e.to_string())).await;
            return BackupState::Error;
        }

        loop {
            let statuses = match self.engine.list_transfer_status(&task.volume_name).await {
                Ok(statuses) => statuses,
                Err(e) => {
                    warn!(backup = %task.backup_name, error = %e, "Failed to list transfer status");
                    self.record(task, BackupState::Unknown, Some(&e.to_string())).await;
                    return BackupState::Unknown;
                }
            };

            let Some(status) = statuses
                .into_iter()
                .find(|s| s.snapshot_name == task.request.snapshot_name)
            else {
                warn!(
                    backup = %task.backup_name,
                    snapshot = %task.request.snapshot_name,
                    "Transfer status disappeared"
                );
                self.record(task, BackupState::Unknown, Some("transfer status not found"))
                    .await;
                return BackupState::Unknown;
            };

            if !status.error.is_empty() {
                warn!(backup = %task.backup_name, error = %status.error, "Snapshot transfer failed");
                self.record(task, BackupState::Error, Some(&status.error)).await;
                return BackupState::Error;
            }

            if status.progress < TRANSFER_COMPLETE {
                debug!(
                    backup = %task.backup_name,
                    progress = status.progress,
                    "Snapshot transfer in progress"
                );
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            info!(backup = %task.backup_name, volume = %task.volume_name, "Snapshot transfer completed");
            self.record(task, BackupState::Completed, None).await;
            return BackupState::Completed;
        }
    }

    async fn record(&self, task: &TransferTask, state: BackupState, err: Option<&str>) {
        metrics::BACKUP_STATE_TRANSITIONS
            .with_label_values(&[state.as_str()])
            .inc();
        let kind = match state {
            BackupState::Error | BackupState::Unknown => EventKind::Warning,
            _ => EventKind::Normal,
        };
        self.events
            .publish(&task.volume_name, kind, state.as_str(), &task.event_message(err))
            .await;
    }

    /// Apply the final state to a freshly read Backup.
    async fn persist_state(&self, task: &TransferTask, state: BackupState) {
        let mut backup = match self.store.get_backup(&task.backup_name).await {
            Ok(backup) => backup,
            Err(e) if e.is_not_found() => {
                debug!(backup = %task.backup_name, "Backup deleted while transferring");
                return;
            }
            Err(e) => {
                error!(backup = %task.backup_name, error = %e, "Error getting backup");
                return;
            }
        };

        let current = backup.state();
        if !current.can_transition_to(state) {
            debug!(
                backup = %task.backup_name,
                current = %current,
                next = %state,
                "Skipping backup state update"
            );
            return;
        }

        let pre_image = backup.status.clone();
        backup.status_mut().state = state;
        match write_if_changed(self.store.as_ref(), pre_image.as_ref(), &backup).await {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                debug!(backup = %task.backup_name, error = %e, "Dropped backup state update on conflict");
            }
            Err(e) => {
                error!(backup = %task.backup_name, error = %e, "Error updating backup status");
            }
        }
    }

    /// Ask the BackupVolume (or, before it exists, the BackupTarget) to
    /// re-sync so it picks up the new backup promptly.
    async fn wake_siblings(&self, task: &TransferTask) {
        let now = Utc::now();
        match self.store.get_backup_volume(&task.volume_name).await {
            Ok(mut backup_volume) => {
                backup_volume.spec.sync_requested_at = Some(now);
                if let Err(e) = self.store.update_backup_volume(&backup_volume).await {
                    if !e.is_conflict() {
                        error!(volume = %task.volume_name, error = %e, "Error updating backup volume spec");
                    }
                }
            }
            Err(e) if e.is_not_found() => {
                let mut target = match self.store.get_backup_target(DEFAULT_BACKUP_TARGET_NAME).await {
                    Ok(target) => target,
                    Err(e) => {
                        warn!(error = %e, "Failed to get backup target");
                        return;
                    }
                };
                target.spec.sync_requested_at = Some(now);
                if let Err(e) = self.store.update_backup_target(&target).await {
                    if !e.is_conflict() {
                        warn!(error = %e, "Failed to update backup target");
                    }
                }
            }
            Err(e) => {
                warn!(volume = %task.volume_name, error = %e, "Failed to get backup volume");
            }
        }
    }
}
