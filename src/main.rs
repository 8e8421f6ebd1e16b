//! Todo Tracker server.

use todo_tracker::{api, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "todo_tracker=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        storage = ?config.storage,
        reconcile_interval_secs = config.reconcile_interval.as_secs(),
        "Starting Todo Tracker"
    );

    api::serve(config).await
}
