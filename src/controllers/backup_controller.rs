//! Backup controller
//!
//! Watches Backup resources in the operator namespace and triggers
//! reconciliation, retrying failures a bounded number of times.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{
        controller::{self, Action, Controller},
        watcher::Config as WatcherConfig,
    },
    Api, Client, ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use crate::controllers::Context;
use crate::crd::Backup;
use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::backup as backup_reconciler;

/// Watcher timeout (seconds), below the client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Run the Backup controller until SIGTERM/SIGINT
pub async fn run(client: Client, context: Arc<Context>, workers: u16) {
    let api: Api<Backup> = Api::namespaced(client, &context.namespace);

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("Backup CRD not installed: {}", e);
        return;
    }

    info!(namespace = %context.namespace, workers, "Starting Backup controller");
    metrics::set_ready(true);

    Controller::new(api, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .with_config(controller::Config::default().concurrency(workers))
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => debug!(name = %obj.name, "Reconciled Backup"),
                Err(e) => warn!(error = %e, "Backup controller error"),
            }
        })
        .await;

    metrics::set_ready(false);
    info!("Backup controller stopped");
}

/// Reconcile one Backup and reset its retry budget on success
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
pub async fn reconcile(obj: Arc<Backup>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&["Backup"])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&["Backup"]).inc();

    if obj.namespace().as_deref() != Some(ctx.namespace.as_str()) {
        return Ok(Action::await_change());
    }

    let name = obj.name_any();
    let action = backup_reconciler::reconcile(&name, &ctx).await?;
    ctx.retries.reset(&name);
    Ok(action)
}

/// Back off on failures, and give up on a Backup after `max_retries`.
///
/// A dropped Backup is picked up again on its next change.
pub fn error_policy(obj: Arc<Backup>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    metrics::RECONCILIATION_ERRORS
        .with_label_values(&["Backup"])
        .inc();

    match ctx.retries.next_backoff(&name) {
        Some(delay) => {
            warn!(name = %name, error = %error, ?delay, "Error syncing backup");
            Action::requeue(delay)
        }
        None => {
            warn!(name = %name, error = %error, "Giving up on backup after max retries");
            metrics::DROPPED_KEYS.with_label_values(&["Backup"]).inc();
            Action::await_change()
        }
    }
}

/// Per-Backup failure counts driving the retry backoff
#[derive(Debug)]
pub struct RetryTracker {
    failures: Mutex<HashMap<String, u32>>,
    base_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
}

impl RetryTracker {
    /// Exponential backoff from `base_delay`, capped at `max_delay`
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            base_delay,
            max_delay,
            max_retries,
        }
    }

    fn failures(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a failure. Returns the delay before the next attempt, or `None`
    /// once the budget is spent, which also resets the count.
    pub fn next_backoff(&self, name: &str) -> Option<Duration> {
        let mut failures = self.failures();
        let count = failures.entry(name.to_string()).or_insert(0);
        if *count >= self.max_retries {
            failures.remove(name);
            return None;
        }
        let exponent = (*count).min(31);
        *count += 1;
        Some(
            self.base_delay
                .checked_mul(1u32 << exponent)
                .map_or(self.max_delay, |d| d.min(self.max_delay)),
        )
    }

    /// Failures recorded since the last success
    pub fn failure_count(&self, name: &str) -> u32 {
        self.failures().get(name).copied().unwrap_or(0)
    }

    pub fn reset(&self, name: &str) {
        self.failures().remove(name);
    }
}
