//! Adapters to the systems the controller drives
//!
//! Production implementations of the client traits in [`crate::clients`],
//! plus Kubernetes secret helpers.

pub mod engine_cli;
pub mod secrets;
pub mod target_cli;

pub use engine_cli::{CliEngineClient, CliEngineClientFactory};
pub use target_cli::{CliBackupTargetClient, CliBackupTargetClientFactory};
