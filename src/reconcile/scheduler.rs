//! Periodic background expiry pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::ExpiryReconciler;

/// Run a pass every `interval` until `cancel` fires.
///
/// Cancellation is only observed between passes; a pass that has started
/// always runs to completion.
pub fn spawn_reconcile_loop(
    reconciler: Arc<ExpiryReconciler>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = interval.as_secs(), "Started expiry reconcile loop");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = reconciler.reconcile(Utc::now()).await;
            if !result.is_success() {
                tracing::warn!(
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Scheduled expiry pass failed"
                );
            }
        }

        tracing::info!("Expiry reconcile loop stopped");
    })
}
