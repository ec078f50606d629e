//! Reconcilers for Backup resources
//!
//! This module contains the business logic of the backup controller:
//! - Ownership resolution between controller replicas
//! - Idempotent status writes
//! - The per-Backup state machine
//! - Transfer progress monitoring

pub mod backup;
pub mod monitor;
pub mod ownership;
pub mod status;
