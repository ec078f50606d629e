//! Backup reconciler
//!
//! Drives a Backup through its lifecycle:
//! - Ownership claim
//! - Remote cleanup and finalizer removal on deletion
//! - Transfer launch for new backups
//! - Status sync from the backup target for existing or imported backups

use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use super::monitor::{ProgressMonitor, TransferTask};
use super::ownership::OwnershipResolver;
use super::status::write_if_changed;
use crate::clients::{encode_backup_url, BackupInfo, TransferRequest};
use crate::controllers::Context;
use crate::crd::cluster::SETTING_DEFAULT_ENGINE_IMAGE;
use crate::crd::{Backup, BackupState, BackupTarget, BackupVolume, DEFAULT_BACKUP_TARGET_NAME};
use crate::error::{Error, Result};
use crate::events::EventKind;
use crate::metrics;

/// Reconcile the Backup with the given name for this controller replica.
///
/// Returns `Action::await_change()` for every outcome that needs no retry:
/// the Backup is gone, another replica owns it, or the work was handed to a
/// monitor. A write that lost an optimistic-concurrency race asks for an
/// immediate requeue instead of an error.
#[instrument(skip(ctx), fields(controller = %ctx.controller_id))]
pub async fn reconcile(name: &str, ctx: &Context) -> Result<Action> {
    let store = ctx.store.as_ref();

    let mut backup = match store.get_backup(name).await {
        Ok(backup) => backup,
        Err(e) if e.is_not_found() => return Ok(Action::await_change()),
        Err(e) => return Err(e),
    };

    let default_engine_image = store.get_setting(SETTING_DEFAULT_ENGINE_IMAGE).await?;
    let resolver = OwnershipResolver::new(store, &ctx.controller_id);
    match resolver.is_responsible(&backup, &default_engine_image).await {
        Ok(true) => {}
        Ok(false) => return Ok(Action::await_change()),
        Err(e) => {
            warn!(backup = %name, error = %e, "Failed to resolve backup ownership");
            return Ok(Action::await_change());
        }
    }

    if backup.owner_id() != ctx.controller_id {
        backup.status_mut().owner_id = ctx.controller_id.clone();
        backup = match store.update_backup_status(&backup).await {
            Ok(updated) => updated,
            Err(e) if e.is_conflict() => {
                debug!(backup = %name, "Another controller claimed the backup first");
                return Ok(Action::await_change());
            }
            Err(e) => return Err(e),
        };
        info!(backup = %name, "Claimed backup ownership");
    }

    if !backup.is_deleting() && !backup.has_finalizer() {
        backup = match store.add_backup_finalizer(&backup).await {
            Ok(updated) => updated,
            Err(e) if e.is_conflict() => return Ok(requeue_now()),
            Err(e) => return Err(e),
        };
    }

    let target = match store.get_backup_target(DEFAULT_BACKUP_TARGET_NAME).await {
        Ok(target) => target,
        Err(e) if e.is_not_found() => {
            warn!(backup = %name, "Cannot find the {} backup target", DEFAULT_BACKUP_TARGET_NAME);
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e),
    };

    let volume_name = match backup.backup_volume_name() {
        Ok(volume_name) => volume_name,
        Err(e) if e.is_not_found() => {
            warn!(backup = %name, error = %e, "Cannot find backup volume name");
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e),
    };

    if backup.is_deleting() {
        cleanup(&backup, &target, &volume_name, ctx).await?;
        return Ok(Action::await_change());
    }

    if !backup.spec.snapshot_name.is_empty() && backup.state() == BackupState::Unset {
        return start_transfer(backup, &target, &volume_name, ctx).await;
    }

    let sync_time = Utc::now();
    let pre_image = backup.status.clone();
    sync(&mut backup, &target, &volume_name, sync_time, ctx).await?;

    match write_if_changed(store, pre_image.as_ref(), &backup).await {
        Ok(_) => Ok(Action::await_change()),
        Err(e) if e.is_conflict() => {
            debug!(backup = %name, "Requeue due to conflict");
            Ok(requeue_now())
        }
        Err(e) => Err(e),
    }
}

/// Retry right away, against a fresh read
fn requeue_now() -> Action {
    Action::requeue(Duration::ZERO)
}

/// Delete the remote backup, wake the backup volume and release the finalizer.
async fn cleanup(
    backup: &Backup,
    target: &BackupTarget,
    volume_name: &str,
    ctx: &Context,
) -> Result<()> {
    let store = ctx.store.as_ref();
    let name = backup.name_any();

    let backup_volume = match store.get_backup_volume(volume_name).await {
        Ok(backup_volume) => Some(backup_volume),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };

    let volume_alive = backup_volume.as_ref().is_some_and(|bv| !bv.is_deleting());
    if !target.spec.backup_target_url.is_empty() && volume_alive && backup.has_remote_presence() {
        let client = match ctx.targets.client_for(target).await {
            Ok(client) => client,
            Err(e) => {
                error!(backup = %name, error = %e, "Error init backup target client");
                return Ok(());
            }
        };

        let backup_url = encode_backup_url(&name, volume_name, client.url())?;
        if let Err(e) = client.delete_backup(&backup_url).await {
            error!(backup = %name, error = %e, "Error deleting remote backup");
            return Err(e);
        }
        info!(backup = %name, url = %backup_url, "Deleted remote backup");
    }

    if let Some(backup_volume) = backup_volume {
        if backup_volume.last_backup_name() == name {
            request_volume_sync(backup_volume, ctx).await;
        }
    }

    store.remove_backup_finalizer(backup).await?;
    metrics::CLEANUPS.with_label_values(&["Backup"]).inc();
    info!(backup = %name, "Removed backup finalizer");
    Ok(())
}

/// Best effort: the backup volume controller re-derives its state on its
/// own schedule anyway.
async fn request_volume_sync(mut backup_volume: BackupVolume, ctx: &Context) {
    backup_volume.spec.sync_requested_at = Some(Utc::now());
    if let Err(e) = ctx.store.update_backup_volume(&backup_volume).await {
        if !e.is_conflict() {
            error!(
                volume = %backup_volume.name_any(),
                error = %e,
                "Error updating backup volume spec"
            );
        }
    }
}

/// Mark the Backup InProgress and hand the transfer to a monitor.
///
/// The InProgress state is persisted before the monitor is spawned, so a
/// reconcile racing this one sees a conflict instead of starting a second
/// transfer.
async fn start_transfer(
    mut backup: Backup,
    target: &BackupTarget,
    volume_name: &str,
    ctx: &Context,
) -> Result<Action> {
    let store = ctx.store.as_ref();
    let name = backup.name_any();

    let target_client = match ctx.targets.client_for(target).await {
        Ok(client) => client,
        Err(e) => {
            error!(backup = %name, error = %e, "Error init backup target client");
            return Ok(Action::await_change());
        }
    };
    let engine = ctx.engines.client_for_volume(volume_name).await?;
    let (backing_image_name, backing_image_checksum) =
        backing_image_for(engine.volume_name(), ctx).await?;

    let pre_image = backup.status.clone();
    backup.status_mut().state = BackupState::InProgress;
    match write_if_changed(store, pre_image.as_ref(), &backup).await {
        Ok(_) => {}
        Err(e) if e.is_conflict() => {
            debug!(backup = %name, "Requeue due to conflict");
            return Ok(requeue_now());
        }
        Err(e) => return Err(e),
    }
    metrics::BACKUP_STATE_TRANSITIONS
        .with_label_values(&[BackupState::InProgress.as_str()])
        .inc();

    let task = TransferTask {
        backup_name: name.clone(),
        volume_name: engine.volume_name().to_string(),
        request: TransferRequest {
            backup_name: name.clone(),
            snapshot_name: backup.spec.snapshot_name.clone(),
            backup_target_url: target_client.url().to_string(),
            backing_image_name,
            backing_image_checksum,
            labels: backup.spec.labels.clone(),
            credential: target_client.credential().clone(),
        },
    };

    info!(
        backup = %name,
        volume = %task.volume_name,
        snapshot = %task.request.snapshot_name,
        "Starting snapshot backup"
    );
    ctx.events
        .publish(
            &task.volume_name,
            EventKind::Normal,
            BackupState::InProgress.as_str(),
            &format!(
                "Snapshot {} backup {} label {:?}",
                task.request.snapshot_name, name, task.request.labels
            ),
        )
        .await;

    ProgressMonitor::new(
        ctx.store.clone(),
        engine,
        ctx.events.clone(),
        ctx.poll_interval,
    )
    .launch(task);
    Ok(Action::await_change())
}

/// Backing image name and checksum to send with the transfer.
///
/// Fails when the backup volume already holds backups made from a backing
/// image with a different checksum.
async fn backing_image_for(volume_name: &str, ctx: &Context) -> Result<(String, String)> {
    let store = ctx.store.as_ref();
    let volume = store.get_volume(volume_name).await?;
    let backing_image = volume.spec.backing_image;
    if backing_image.is_empty() {
        return Ok((String::new(), String::new()));
    }

    let checksum = store.get_backing_image_checksum(&backing_image).await?;
    match store.get_backup_volume(volume_name).await {
        Ok(backup_volume) => {
            let stored = backup_volume.backing_image_checksum();
            if !stored.is_empty() && !checksum.is_empty() && stored != checksum {
                return Err(Error::validation(format!(
                    "the backing image {} checksum {} in the backup volume doesn't match the current checksum {}",
                    backing_image, stored, checksum
                )));
            }
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }
    Ok((backing_image, checksum))
}

/// Refresh the status from the backup target if a sync is pending.
///
/// Target errors are logged and swallowed: the next sync request or watch
/// event retries.
async fn sync(
    backup: &mut Backup,
    target: &BackupTarget,
    volume_name: &str,
    sync_time: DateTime<Utc>,
    ctx: &Context,
) -> Result<()> {
    if backup.is_synced() {
        return Ok(());
    }
    let name = backup.name_any();

    let client = match ctx.targets.client_for(target).await {
        Ok(client) => client,
        Err(e) => {
            error!(backup = %name, error = %e, "Error init backup target client");
            return Ok(());
        }
    };

    let backup_url = match encode_backup_url(&name, volume_name, client.url()) {
        Ok(url) => url,
        Err(e) => {
            error!(backup = %name, error = %e, "Error encoding backup URL");
            return Ok(());
        }
    };

    let info = match client.inspect_backup(&backup_url).await {
        Ok(Some(info)) => info,
        Ok(None) => return Ok(()),
        Err(e) if e.is_in_progress() => return Ok(()),
        Err(e) => {
            error!(backup = %name, error = %e, "Error inspecting backup config");
            return Ok(());
        }
    };

    if backup.state() != BackupState::Completed {
        metrics::BACKUP_STATE_TRANSITIONS
            .with_label_values(&[BackupState::Completed.as_str()])
            .inc();
    }
    apply_backup_info(backup, info, sync_time);
    Ok(())
}

/// Copy remote metadata into the status and mark the Backup Completed
fn apply_backup_info(backup: &mut Backup, info: BackupInfo, sync_time: DateTime<Utc>) {
    let status = backup.status_mut();
    status.state = BackupState::Completed;
    status.url = info.url;
    status.snapshot_name = info.snapshot_name;
    status.snapshot_created_at = info.snapshot_created;
    status.backup_created_at = info.created;
    status.size = info.size;
    status.labels = info.labels;
    status.messages = info.messages;
    status.volume_name = info.volume_name;
    status.volume_size = info.volume_size;
    status.volume_created = info.volume_created;
    status.volume_backing_image_name = info.volume_backing_image_name;
    status.last_synced_at = Some(sync_time);
}
