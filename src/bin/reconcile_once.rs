//! One-shot expiry pass against the configured store.
//!
//! Meant for cron or other external schedulers. Exits non-zero when the pass
//! reports an error.

use std::sync::Arc;

use chrono::Utc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use todo_tracker::notify::Notifier;
use todo_tracker::{store, Config, ExpiryReconciler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "todo_tracker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let store = store::open(&config.storage)?;

    // No listeners in this process; events are discarded.
    let (notifier, _dispatcher) = Notifier::spawn_with_send_timeout(
        Arc::clone(&store),
        config.listener_buffer,
        config.listener_send_timeout,
    );
    let reconciler = ExpiryReconciler::new(store, notifier);

    let result = reconciler.reconcile(Utc::now()).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.is_success() {
        anyhow::bail!(
            "expiry pass failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
