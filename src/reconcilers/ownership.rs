//! Ownership resolution
//!
//! Decides whether this controller replica should act on a Backup. The
//! answer is re-derived on every reconcile from cluster readiness and the
//! recorded owner; nothing is cached.

use tracing::debug;

use crate::crd::Backup;
use crate::datastore::DataStore;
use crate::error::Result;

/// Inputs of the ownership decision
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OwnershipSignals {
    /// At least one ready node runs the default engine image
    pub capability_available: bool,
    /// This replica is the canonical owner by the tie-break rule
    pub canonical_owner: bool,
    /// This replica is the recorded owner
    pub is_recorded_owner: bool,
    /// This replica runs the default engine image
    pub local_capable: bool,
    /// The recorded owner runs the default engine image
    pub owner_capable: bool,
}

impl OwnershipSignals {
    pub fn is_responsible(&self) -> bool {
        if !self.capability_available {
            return false;
        }
        let preferred = self.canonical_owner && self.local_capable;
        let continuity = self.is_recorded_owner && self.local_capable;
        let takeover = self.local_capable && !self.owner_capable;
        preferred || continuity || takeover
    }
}

/// Resolves responsibility for one controller replica
pub struct OwnershipResolver<'a> {
    store: &'a dyn DataStore,
    controller_id: &'a str,
}

impl<'a> OwnershipResolver<'a> {
    pub fn new(store: &'a dyn DataStore, controller_id: &'a str) -> Self {
        Self {
            store,
            controller_id,
        }
    }

    /// Gather the ownership signals for a Backup.
    pub async fn signals(
        &self,
        backup: &Backup,
        default_engine_image: &str,
    ) -> Result<OwnershipSignals> {
        let ready_nodes = self
            .store
            .list_ready_nodes_with_engine_image(default_engine_image)
            .await?;
        if ready_nodes.is_empty() {
            return Ok(OwnershipSignals::default());
        }

        let owner = backup.owner_id();
        let is_recorded_owner = owner == self.controller_id;
        // Tie-break: keep a live owner, otherwise any replica may claim
        let canonical_owner = is_recorded_owner || self.store.is_node_down_or_deleted(owner).await?;
        let owner_capable = self
            .store
            .check_engine_image_readiness(default_engine_image, owner)
            .await?;
        let local_capable = self
            .store
            .check_engine_image_readiness(default_engine_image, self.controller_id)
            .await?;

        Ok(OwnershipSignals {
            capability_available: true,
            canonical_owner,
            is_recorded_owner,
            local_capable,
            owner_capable,
        })
    }

    /// Whether this replica is responsible for the Backup
    pub async fn is_responsible(&self, backup: &Backup, default_engine_image: &str) -> Result<bool> {
        let signals = self.signals(backup, default_engine_image).await?;
        let responsible = signals.is_responsible();
        debug!(
            controller = %self.controller_id,
            owner = %backup.owner_id(),
            signals = ?signals,
            responsible,
            "Resolved backup ownership"
        );
        Ok(responsible)
    }
}
