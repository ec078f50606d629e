//! Idempotent status persistence

use kube::ResourceExt;
use tracing::debug;

use crate::crd::{Backup, BackupStatus};
use crate::datastore::DataStore;
use crate::error::Result;

/// Persist the status of `backup` if it differs from `pre_image`.
///
/// Returns `Ok(false)` without touching the store when nothing changed. All
/// errors are returned as-is, including conflicts: whether a conflict is
/// benign depends on the caller.
pub async fn write_if_changed(
    store: &dyn DataStore,
    pre_image: Option<&BackupStatus>,
    backup: &Backup,
) -> Result<bool> {
    let empty = BackupStatus::default();
    let before = pre_image.unwrap_or(&empty);
    let after = backup.status.as_ref().unwrap_or(&empty);
    if before == after {
        return Ok(false);
    }
    store.update_backup_status(backup).await?;
    debug!(
        backup = %backup.name_any(),
        state = %backup.state(),
        "Updated backup status"
    );
    Ok(true)
}
