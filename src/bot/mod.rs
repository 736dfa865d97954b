pub mod admin;
pub mod backup;
pub mod callbacks;
pub mod download;
pub mod handlers;
pub mod router;
pub mod subscription;


use std::sync::Arc;
use std::time::Duration;

use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::dptree;
use teloxide::macros::BotCommands;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId, ReplyMarkup};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::AppConfig;
use crate::db::Store;
use crate::media::pipeline::Pipeline;
use crate::session::SessionStore;
use crate::telegram::Gateway;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared application state, accessible from all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub gateway: Arc<dyn Gateway>,
    pub store: Arc<dyn Store>,
    pub sessions: SessionStore,
    pub pipeline: Pipeline,
    /// Cancelled once the dispatcher stops; background jobs watch it.
    pub shutdown: CancellationToken,
    /// Broadcasts, backups and the sweeper run here so shutdown can drain them.
    pub tasks: TaskTracker,
}

impl AppState {
    /// Send a plain message, logging instead of failing.
    pub async fn notify(&self, chat: ChatId, text: &str) -> Option<MessageId> {
        self.notify_with(chat, text, None).await
    }

    pub async fn notify_with(
        &self,
        chat: ChatId,
        text: &str,
        markup: Option<ReplyMarkup>,
    ) -> Option<MessageId> {
        match self.gateway.send_text(chat, text, markup).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!("Failed to send message to chat {}: {}", chat, e);
                None
            }
        }
    }

    pub async fn delete_quietly(&self, chat: ChatId, message_id: MessageId) {
        if let Err(e) = self.gateway.delete_message(chat, message_id).await {
            tracing::warn!("Failed to delete message {} in chat {}: {}", message_id.0, chat, e);
        }
    }
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Buyruqlar:")]
pub enum BotCommand {
    #[command(description = "Botni ishga tushirish")]
    Start,
    #[command(description = "Admin paneli")]
    Admin,
    #[command(description = "Amalni bekor qilish")]
    Cancel,
}

/// Build the teloxide update handler tree.
///
/// Commands are not filtered here: a pending admin prompt must see
/// `/start` or `/admin` as plain input, so all text goes through one endpoint.
pub fn build_handler() -> UpdateHandler<HandlerError> {
    let callback_handler = Update::filter_callback_query().endpoint(callbacks::handle_callback);

    let message_handler = Update::filter_message().endpoint(handlers::handle_message);

    dptree::entry()
        .branch(callback_handler)
        .branch(message_handler)
}

/// Periodically evict stale catalogs, interactive anchors and staged files.
pub fn spawn_sweeper(state: Arc<AppState>) {
    let interval = state.config.sweep_interval.max(Duration::from_secs(1));
    let tasks = state.tasks.clone();
    tasks.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let evicted = state.sessions.sweep(state.config.session_ttl);
            match state.pipeline.sweep_staged(state.config.session_ttl).await {
                Ok(files) if evicted + files > 0 => {
                    tracing::info!("Sweeper evicted {} session entries and {} staged files", evicted, files);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Staged file sweep failed: {}", e),
            }
        }
        tracing::debug!("Sweeper stopped");
    });
}
