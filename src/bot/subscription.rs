//! Channel-membership gate in front of `/start` and link submissions.

use teloxide::types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, ReplyMarkup, UserId};

use crate::bot::callbacks::{CallbackCommand, IncomingCallback};
use crate::bot::handlers::IncomingText;
use crate::bot::AppState;

pub const SUBSCRIBE_PROMPT: &str = "Iltimos, kanallarga azo bo'ling.";

pub fn welcome_text(first_name: &str) -> String {
    format!(
        "👋 Assalomu alaykum {}, botimizga xush kelibsiz.\n\n\
         Men sizga Instagram, TikTok va YouTube'dan videolarni yuklashda yordam beruvchi botman.\n\n\
         Iltimos menga video havolasini yuboring.",
        first_name
    )
}

pub fn subscription_keyboard(channels: &[String]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = channels
        .iter()
        .filter_map(|channel| {
            let url = format!("https://t.me/{}", channel).parse().ok()?;
            Some(vec![InlineKeyboardButton::url("Kanalga azo bo'lish", url)])
        })
        .collect();
    rows.push(vec![InlineKeyboardButton::callback(
        "Azo bo'ldim",
        CallbackCommand::CheckSubscription.encode(),
    )]);
    InlineKeyboardMarkup::new(rows)
}

/// True when the user is in every allowed channel. Lookup errors count as
/// not subscribed.
pub async fn is_subscribed(state: &AppState, user: UserId, channels: &[String]) -> bool {
    for channel in channels {
        match state.gateway.is_channel_member(channel, user).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!("User {} is not subscribed to {}", user, channel);
                return false;
            }
            Err(e) => {
                tracing::warn!("Membership check for {} in {} failed: {}", user, channel, e);
                return false;
            }
        }
    }
    true
}

async fn send_prompt(state: &AppState, chat: ChatId, channels: &[String]) {
    let markup = ReplyMarkup::InlineKeyboard(subscription_keyboard(channels));
    state.notify_with(chat, SUBSCRIBE_PROMPT, Some(markup)).await;
}

pub async fn start(state: &AppState, msg: &IncomingText) -> anyhow::Result<()> {
    tracing::info!("Registering user {}", msg.user_id);
    state
        .store
        .add_user(msg.user_id.0 as i64, msg.username.as_deref())
        .await?;

    let channels = state.store.list_allowed_channels().await?;
    if is_subscribed(state, msg.user_id, &channels).await {
        state.notify(msg.chat_id, &welcome_text(&msg.first_name)).await;
    } else {
        send_prompt(state, msg.chat_id, &channels).await;
    }
    Ok(())
}

/// Gate a link submission. Sends the prompt and returns false when the
/// user still has channels to join.
pub async fn ensure_subscribed(state: &AppState, chat: ChatId, user: UserId) -> anyhow::Result<bool> {
    let channels = state.store.list_allowed_channels().await?;
    if is_subscribed(state, user, &channels).await {
        return Ok(true);
    }
    send_prompt(state, chat, &channels).await;
    Ok(false)
}

/// "Azo bo'ldim" pressed.
pub async fn recheck(state: &AppState, q: &IncomingCallback) -> anyhow::Result<()> {
    let channels = state.store.list_allowed_channels().await?;
    if is_subscribed(state, q.user_id, &channels).await {
        if let Some(message_id) = q.message_id {
            state.delete_quietly(q.chat_id, message_id).await;
        }
        state.notify(q.chat_id, &welcome_text(&q.first_name)).await;
    } else {
        send_prompt(state, q.chat_id, &channels).await;
    }
    Ok(())
}
