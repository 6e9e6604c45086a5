use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use easel_api::{load_catalog, GeminiImageClient, ImageGenerator};
use easel_core::EaselConfig;
use easel_session::{ChatTransport, MediaGroupAggregator, SessionOrchestrator};
use easel_telegram::{Bot, TelegramAdapter, TelegramTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "easel_bot=info,easel_store=info,easel_api=info,easel_session=info,easel_telegram=info"
                    .into()
            }),
        )
        .init();

    // load config: explicit EASEL_CONFIG path > ~/.easel/easel.toml, then
    // EASEL_* env overrides on top
    let config_path = std::env::var("EASEL_CONFIG").ok();
    let config = EaselConfig::load(config_path.as_deref())?;

    // single SQLite file for settings, stashed photos and tracked messages
    ensure_parent_dir(&config.storage.db_path);
    info!(path = %config.storage.db_path, "opening SQLite database");
    let db = rusqlite::Connection::open(&config.storage.db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    easel_store::db::init_db(&db)?;
    let store = Arc::new(easel_store::SessionStore::new(db));

    // the catalog is fetched once at startup; selections that go stale later
    // fall back to the menu
    let catalog = load_catalog(
        &config.api.base_url,
        &config.api.api_key,
        config.api.request_timeout(),
        &config.models,
    )
    .await?;
    info!(models = %catalog.ids().join(", "), "model catalog ready");

    let generator: Arc<dyn ImageGenerator> = Arc::new(GeminiImageClient::new(
        &config.api.base_url,
        &config.api.api_key,
        config.api.request_timeout(),
    )?);

    let bot = Bot::new(&config.telegram.bot_token);
    let transport: Arc<dyn ChatTransport> =
        Arc::new(TelegramTransport::new(bot.clone(), &config.storage.temp_dir));

    let (aggregator, mut batch_rx) =
        MediaGroupAggregator::new(Duration::from_millis(config.batching.quiet_period_ms));
    let orchestrator = Arc::new(SessionOrchestrator::new(store, catalog, generator, transport));

    // album batches flow in from the aggregator; one task per batch keeps
    // users independent of each other
    let batch_orchestrator = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        while let Some(batch) = batch_rx.recv().await {
            let orchestrator = Arc::clone(&batch_orchestrator);
            tokio::spawn(async move {
                let user = batch.user;
                if let Err(e) = orchestrator
                    .process_batch(batch.user, batch.chat_id, batch.snapshots)
                    .await
                {
                    error!(user = user.0, error = %e, "album batch failed");
                }
            });
        }
    });

    TelegramAdapter::new(bot, orchestrator, aggregator).run().await;
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
