//! Volume Backup Kubernetes Operator
//!
//! This operator drives volume `Backup` resources through their lifecycle:
//! it decides which controller replica owns each backup, starts snapshot
//! transfers to the backup target, tracks their progress, syncs status from
//! the target, and removes remote data before a Backup is deleted.

pub mod adapters;
pub mod clients;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod datastore;
pub mod error;
pub mod events;
pub mod metrics;
pub mod reconcilers;

pub use error::{Error, Result};
