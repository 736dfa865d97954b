use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing_subscriber::EnvFilter;

mod bot;
mod config;
mod db;
mod media;
mod session;
mod telegram;

#[cfg(test)]
mod testing;

use config::AppConfig;
use db::Database;
use media::pipeline::Pipeline;
use media::tools::ExternalTools;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("📥 Starting downloader bot...");

    // Load config
    let config = AppConfig::from_env()?;
    tracing::info!(
        "Config loaded. Media dir: {}, upload limit: {} bytes",
        config.media_dir.display(),
        config.max_upload_bytes
    );

    // Initialize database
    let db = Database::connect(&config.database_url).await?;
    db.run_migrations().await?;
    db.seed_admins(&config.admin_ids).await?;
    tracing::info!("Database connected and migrations applied.");

    // Media pipeline
    let tools = ExternalTools::new(&config)?;
    let pipeline = Pipeline::new(
        Arc::new(tools),
        config.media_dir.clone(),
        config.max_upload_bytes,
    );
    pipeline.prepare().await?;

    // Create the Telegram bot
    let bot = Bot::new(&config.telegram_bot_token);
    if let Err(e) = bot.set_my_commands(bot::BotCommand::bot_commands()).await {
        tracing::warn!("Failed to register bot commands: {}", e);
    }

    // Build shared application state
    let state = Arc::new(bot::AppState {
        config: config.clone(),
        gateway: Arc::new(bot.clone()),
        store: Arc::new(db),
        sessions: session::SessionStore::new(),
        pipeline,
        shutdown: CancellationToken::new(),
        tasks: TaskTracker::new(),
    });

    bot::spawn_sweeper(state.clone());

    // Build the dispatcher
    let handler = bot::build_handler();

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state.clone()])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    // Drain background work
    tracing::info!("Dispatcher stopped, waiting for background tasks...");
    state.shutdown.cancel();
    state.tasks.close();
    if tokio::time::timeout(config.shutdown_grace, state.tasks.wait())
        .await
        .is_err()
    {
        tracing::warn!(
            "{} background tasks still running after {:?}, abandoning them",
            state.tasks.len(),
            config.shutdown_grace
        );
    }

    Ok(())
}
