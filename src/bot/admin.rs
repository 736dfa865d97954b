//! Admin console: reply-keyboard menu, prompts, and the operations behind them.
//!
//! Every entry point checks `Store::is_admin` again; nothing caches it.

use teloxide::types::{
    ChatId, InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup,
    ReplyMarkup,
};
use tokio_util::sync::CancellationToken;

use crate::bot::callbacks::{CallbackCommand, IncomingCallback};
use crate::bot::router::AdminButton;
use crate::bot::{backup, AppState};
use crate::session::PendingInput;
use crate::telegram::Gateway;

pub const NOT_ADMIN: &str = "Siz admin emassiz.";
const INVALID_ADMIN_ID: &str = "Noto'g'ri admin ID formati.";
const INVALID_CHANNEL: &str =
    "Kanal linki noto'g'ri. Masalan: https://t.me/your_channel yoki @your_channel";

/// Reduce `https://t.me/name`, `@name` or `name` to a bare channel username.
pub fn normalize_channel(input: &str) -> Option<String> {
    let mut name = input.trim();
    for prefix in ["https://t.me/", "http://t.me/", "t.me/"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            name = rest;
            break;
        }
    }
    let name = name.trim_start_matches('@').trim_end_matches('/');

    let valid = (1..=32).contains(&name.len())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| name.to_string())
}

pub fn admin_keyboard() -> KeyboardMarkup {
    let rows: Vec<Vec<KeyboardButton>> = AdminButton::ALL
        .chunks(2)
        .map(|pair| pair.iter().map(|b| KeyboardButton::new(b.label())).collect())
        .collect();
    KeyboardMarkup::new(rows)
}

async fn require_admin(state: &AppState, chat: ChatId) -> anyhow::Result<bool> {
    if state.store.is_admin(chat.0).await? {
        return Ok(true);
    }
    tracing::info!("Chat {} tried an admin operation", chat);
    state.notify(chat, NOT_ADMIN).await;
    Ok(false)
}

pub async fn show_menu(state: &AppState, chat: ChatId) -> anyhow::Result<()> {
    if !require_admin(state, chat).await? {
        return Ok(());
    }
    let markup = ReplyMarkup::Keyboard(admin_keyboard());
    state
        .notify_with(chat, "Admin buyrug'lari:", Some(markup))
        .await;
    Ok(())
}

pub async fn handle_button(state: &AppState, chat: ChatId, button: AdminButton) -> anyhow::Result<()> {
    if !require_admin(state, chat).await? {
        return Ok(());
    }

    match button {
        AdminButton::Statistics => send_statistics(state, chat).await?,
        AdminButton::Broadcast => {
            prompt(
                state,
                chat,
                PendingInput::BroadcastText,
                "Iltimos, yubormoqchi bo'lgan habaringizni kiriting (Bekor qilish uchun /cancel):",
            )
            .await
        }
        AdminButton::AddChannel => {
            prompt(
                state,
                chat,
                PendingInput::ChannelLink,
                "Kanal linkini yuboring (masalan, https://t.me/your_channel):",
            )
            .await
        }
        AdminButton::RemoveChannel => list_channels_for_deletion(state, chat).await?,
        AdminButton::AddAdmin => {
            prompt(
                state,
                chat,
                PendingInput::AdminIdAdd,
                "Iltimos, yangi admin ID sini yuboring:",
            )
            .await
        }
        AdminButton::RemoveAdmin => {
            prompt(
                state,
                chat,
                PendingInput::AdminIdRemove,
                "Iltimos, admin ID sini o'chirish uchun yuboring:",
            )
            .await
        }
        AdminButton::Backup => {
            state.notify(chat, "BackUp olinmoqda...").await;
            backup::spawn_backup(state);
        }
    }
    Ok(())
}

async fn prompt(state: &AppState, chat: ChatId, input: PendingInput, text: &str) {
    if let Some(previous) = state.sessions.pending(chat.0) {
        tracing::debug!("Chat {} switched from {:?} to {:?}", chat, previous, input);
    }
    state.sessions.set_pending(chat.0, input);
    state.notify(chat, text).await;
}

// ── Statistics ─────────────────────────────────────────────────────

pub fn statistics_text(today: i64, month: i64, total: i64) -> String {
    format!(
        "Foydalanuvchilar statistikasi:\n\n\
         Bugun qo'shilgan foydalanuvchilar: {}\n\
         Oxirgi 1 oy ichida qo'shilgan foydalanuvchilar: {}\n\
         Umumiy foydalanuvchilar soni: {}",
        today, month, total
    )
}

async fn send_statistics(state: &AppState, chat: ChatId) -> anyhow::Result<()> {
    let counts = async {
        let today = state.store.count_users_today().await?;
        let month = state.store.count_users_last_month().await?;
        let total = state.store.count_users_total().await?;
        anyhow::Ok((today, month, total))
    }
    .await;

    match counts {
        Ok((today, month, total)) => {
            state.notify(chat, &statistics_text(today, month, total)).await;
        }
        Err(e) => {
            tracing::error!("Failed to load statistics: {:#}", e);
            state
                .notify(chat, "Statistikani olishda xatolik yuz berdi.")
                .await;
        }
    }
    Ok(())
}

// ── Pending-input consumers ────────────────────────────────────────

pub async fn add_channel(state: &AppState, chat: ChatId, text: &str) -> anyhow::Result<()> {
    if !require_admin(state, chat).await? {
        return Ok(());
    }
    let Some(name) = normalize_channel(text) else {
        state.notify(chat, INVALID_CHANNEL).await;
        return Ok(());
    };

    match state.store.add_allowed_channel(&name).await {
        Ok(()) => {
            tracing::info!("Channel {} added by {}", name, chat);
            state.notify(chat, "Kanal muvaffaqiyatli qo'shildi.").await;
        }
        Err(e) => {
            tracing::error!("Failed to add channel {}: {:#}", name, e);
            state
                .notify(chat, "Kanalni qo'shishda xatolik yuz berdi.")
                .await;
        }
    }
    Ok(())
}

fn parse_admin_id(text: &str) -> Option<i64> {
    text.trim().parse().ok()
}

pub async fn add_admin(state: &AppState, chat: ChatId, text: &str) -> anyhow::Result<()> {
    if !require_admin(state, chat).await? {
        return Ok(());
    }
    let Some(id) = parse_admin_id(text) else {
        state.notify(chat, INVALID_ADMIN_ID).await;
        return Ok(());
    };

    match state.store.add_admin(id).await {
        Ok(()) => {
            tracing::info!("Admin {} added by {}", id, chat);
            state.notify(chat, "Admin muvaffaqiyatli qo'shildi.").await;
        }
        Err(e) => {
            tracing::error!("Failed to add admin {}: {:#}", id, e);
            state.notify(chat, "Admin qo'shishda xatolik yuz berdi.").await;
        }
    }
    Ok(())
}

pub async fn remove_admin(state: &AppState, chat: ChatId, text: &str) -> anyhow::Result<()> {
    if !require_admin(state, chat).await? {
        return Ok(());
    }
    let Some(id) = parse_admin_id(text) else {
        state.notify(chat, INVALID_ADMIN_ID).await;
        return Ok(());
    };

    match state.store.remove_admin(id).await {
        Ok(true) => {
            tracing::info!("Admin {} removed by {}", id, chat);
            // A half-finished prompt of the removed admin must not linger.
            state.sessions.clear_pending(id);
            state.notify(chat, "Admin muvaffaqiyatli o'chirildi.").await;
        }
        Ok(false) => {
            state.notify(chat, "Bunday admin topilmadi.").await;
        }
        Err(e) => {
            tracing::error!("Failed to remove admin {}: {:#}", id, e);
            state.notify(chat, "Admin o'chirishda xatolik yuz berdi.").await;
        }
    }
    Ok(())
}

// ── Broadcast ──────────────────────────────────────────────────────

pub async fn start_broadcast(state: &AppState, chat: ChatId, text: &str) -> anyhow::Result<()> {
    if !require_admin(state, chat).await? {
        return Ok(());
    }

    let users = match state.store.list_users().await {
        Ok(users) => users,
        Err(e) => {
            tracing::error!("Failed to load users for broadcast: {:#}", e);
            state
                .notify(chat, "Foydalanuvchilarni olishda xatolik yuz berdi.")
                .await;
            return Ok(());
        }
    };

    let recipients: Vec<ChatId> = users.iter().map(|u| ChatId(u.id)).collect();
    state
        .notify(
            chat,
            &format!("Habar {} foydalanuvchilarga yuborilmoqda...", recipients.len()),
        )
        .await;

    let gateway = state.gateway.clone();
    let shutdown = state.shutdown.clone();
    let interval = state.config.broadcast_interval;
    let text = text.to_string();
    state.tasks.spawn(async move {
        let outcome = broadcast(gateway.as_ref(), &recipients, &text, interval, &shutdown).await;
        let report = if outcome.interrupted {
            format!(
                "Habar yuborish to'xtatildi. {} ta foydalanuvchiga yuborildi.",
                outcome.delivered
            )
        } else {
            format!(
                "Habar yuborish yakunlandi. {} ta foydalanuvchiga yuborildi.",
                outcome.delivered
            )
        };
        if let Err(e) = gateway.send_text(chat, &report, None).await {
            tracing::warn!("Failed to report broadcast result to {}: {}", chat, e);
        }
    });
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub interrupted: bool,
}

/// Send `text` to each recipient, one every `interval`. Failures are skipped.
pub async fn broadcast(
    gateway: &dyn Gateway,
    recipients: &[ChatId],
    text: &str,
    interval: std::time::Duration,
    shutdown: &CancellationToken,
) -> BroadcastOutcome {
    let mut pacer = tokio::time::interval(interval.max(std::time::Duration::from_millis(1)));
    let mut delivered = 0;

    for recipient in recipients {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::warn!("Broadcast interrupted after {} deliveries", delivered);
                return BroadcastOutcome { delivered, interrupted: true };
            }
            _ = pacer.tick() => {}
        }

        match gateway.send_text(*recipient, text, None).await {
            Ok(_) => delivered += 1,
            Err(e) => tracing::warn!("Broadcast to {} failed: {}", recipient, e),
        }
    }

    tracing::info!("Broadcast finished: {}/{} delivered", delivered, recipients.len());
    BroadcastOutcome {
        delivered,
        interrupted: false,
    }
}

// ── Channel deletion ───────────────────────────────────────────────

async fn list_channels_for_deletion(state: &AppState, chat: ChatId) -> anyhow::Result<()> {
    let channels = match state.store.list_allowed_channels().await {
        Ok(channels) => channels,
        Err(e) => {
            tracing::error!("Failed to load channels: {:#}", e);
            state
                .notify(chat, "Kanallarni olishda xatolik yuz berdi.")
                .await;
            return Ok(());
        }
    };

    if channels.is_empty() {
        state.notify(chat, "Hozircha kanallar yo'q.").await;
        return Ok(());
    }

    let rows = channels
        .into_iter()
        .map(|name| {
            let data = CallbackCommand::DeleteChannel(name.clone()).encode();
            vec![InlineKeyboardButton::callback(name, data)]
        })
        .collect::<Vec<_>>();
    let markup = ReplyMarkup::InlineKeyboard(InlineKeyboardMarkup::new(rows));
    state
        .notify_with(chat, "O'chirilishi kerak bo'lgan kanalni tanlang:", Some(markup))
        .await;
    Ok(())
}

pub async fn ask_channel_deletion(
    state: &AppState,
    q: &IncomingCallback,
    channel: &str,
) -> anyhow::Result<()> {
    if !require_admin(state, q.chat_id).await? {
        return Ok(());
    }

    let markup = InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback(
            "Ha",
            CallbackCommand::ConfirmDeleteChannel(channel.to_string()).encode(),
        ),
        InlineKeyboardButton::callback("Yo'q", CallbackCommand::CancelDeleteChannel.encode()),
    ]]);
    state
        .notify_with(
            q.chat_id,
            &format!("{} kanalini o'chirmoqchimisiz?", channel),
            Some(ReplyMarkup::InlineKeyboard(markup)),
        )
        .await;

    if let Some(message_id) = q.message_id {
        state.delete_quietly(q.chat_id, message_id).await;
    }
    Ok(())
}

pub async fn delete_channel(
    state: &AppState,
    q: &IncomingCallback,
    channel: &str,
) -> anyhow::Result<()> {
    if !require_admin(state, q.chat_id).await? {
        return Ok(());
    }

    let reply = match state.store.remove_allowed_channel(channel).await {
        Ok(true) => {
            tracing::info!("Channel {} removed by {}", channel, q.chat_id);
            format!("{} kanali muvaffaqiyatli o'chirildi.", channel)
        }
        Ok(false) => format!("{} kanali allaqachon o'chirilgan.", channel),
        Err(e) => {
            tracing::error!("Failed to remove channel {}: {:#}", channel, e);
            "Kanalni o'chirishda xatolik yuz berdi.".to_string()
        }
    };
    state.notify(q.chat_id, &reply).await;

    if let Some(message_id) = q.message_id {
        state.delete_quietly(q.chat_id, message_id).await;
    }
    Ok(())
}

pub async fn cancel_channel_deletion(state: &AppState, q: &IncomingCallback) -> anyhow::Result<()> {
    state.notify(q.chat_id, "Kanal o'chirish bekor qilindi.").await;
    if let Some(message_id) = q.message_id {
        state.delete_quietly(q.chat_id, message_id).await;
    }
    Ok(())
}
