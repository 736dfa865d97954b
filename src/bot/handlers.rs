use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{ChatId, UserId};

use crate::bot::router::{self, Command, TextRoute};
use crate::bot::{admin, download, subscription, AppState, HandlerError};
use crate::session::PendingInput;

/// A text message, reduced to what the handlers need.
#[derive(Debug, Clone)]
pub struct IncomingText {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub first_name: String,
    pub username: Option<String>,
    pub text: String,
}

/// Main message handler. Non-text updates are ignored.
pub async fn handle_message(msg: Message, state: Arc<AppState>) -> Result<(), HandlerError> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };

    let incoming = IncomingText {
        chat_id: msg.chat.id,
        user_id: from.id,
        first_name: from.first_name.clone(),
        username: from.username.clone(),
        text: text.to_string(),
    };

    if let Err(e) = handle_text(&state, incoming).await {
        tracing::error!("Message handling failed: {:#}", e);
    }
    Ok(())
}

pub async fn handle_text(state: &AppState, msg: IncomingText) -> anyhow::Result<()> {
    let chat = msg.chat_id.0;

    // ── 1. A pending prompt consumes the text, whatever it says ────

    if let Some(pending) = state.sessions.take_pending(chat) {
        tracing::debug!("Chat {} answered pending {:?}", chat, pending);
        return match pending {
            PendingInput::BroadcastText if router::is_cancel(&msg.text) => {
                state.notify(msg.chat_id, "Habar yuborish bekor qilindi.").await;
                Ok(())
            }
            PendingInput::BroadcastText => admin::start_broadcast(state, msg.chat_id, &msg.text).await,
            PendingInput::ChannelLink => admin::add_channel(state, msg.chat_id, &msg.text).await,
            PendingInput::AdminIdAdd => admin::add_admin(state, msg.chat_id, &msg.text).await,
            PendingInput::AdminIdRemove => admin::remove_admin(state, msg.chat_id, &msg.text).await,
        };
    }

    // ── 2. Otherwise route by content ─────────────────────────────

    match router::classify_text(&msg.text) {
        TextRoute::Command(Command::Start) => subscription::start(state, &msg).await,
        TextRoute::Command(Command::Admin) => admin::show_menu(state, msg.chat_id).await,
        TextRoute::Link(source) => {
            if subscription::ensure_subscribed(state, msg.chat_id, msg.user_id).await? {
                download::handle_link(state, msg.chat_id, source, msg.text.trim()).await;
            }
            Ok(())
        }
        TextRoute::AdminButton(button) => admin::handle_button(state, msg.chat_id, button).await,
        TextRoute::Ignore => {
            tracing::debug!("Ignoring text from chat {}", chat);
            Ok(())
        }
    }
}
