use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId, UserId};

use crate::bot::{admin, download, subscription, AppState, HandlerError};
use crate::media::SourceKind;

/// Separator between a payload's command part and its argument.
pub const PAYLOAD_SEPARATOR: char = '|';

/// Telegram refuses `callback_data` longer than this.
pub const MAX_PAYLOAD_LEN: usize = 64;

const DELETE_CHANNEL: &str = "delete_channel_";
const CONFIRM_DELETE_CHANNEL: &str = "confirm_delete_channel_";
const CANCEL_DELETE_CHANNEL: &str = "cancel_delete_channel";
const CHECK_SUBSCRIPTION: &str = "check_subscription";
const SELECT_FORMAT: &str = "youtube_download";

/// Every button payload the bot emits, decoded once at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackCommand {
    DeleteChannel(String),
    ConfirmDeleteChannel(String),
    CancelDeleteChannel,
    CheckSubscription,
    DownloadAudio { source: SourceKind, file: String },
    SkipAudio { source: SourceKind, file: String },
    SelectFormat(String),
}

impl CallbackCommand {
    pub fn parse(data: &str) -> Option<Self> {
        if data == CANCEL_DELETE_CHANNEL {
            return Some(Self::CancelDeleteChannel);
        }
        if data == CHECK_SUBSCRIPTION {
            return Some(Self::CheckSubscription);
        }
        if let Some(name) = data.strip_prefix(CONFIRM_DELETE_CHANNEL) {
            return non_empty(name).map(|n| Self::ConfirmDeleteChannel(n.to_string()));
        }
        if let Some(name) = data.strip_prefix(DELETE_CHANNEL) {
            return non_empty(name).map(|n| Self::DeleteChannel(n.to_string()));
        }

        let (head, arg) = data.split_once(PAYLOAD_SEPARATOR)?;
        let arg = non_empty(arg)?.to_string();
        if head == SELECT_FORMAT {
            return Some(Self::SelectFormat(arg));
        }
        if let Some(tag) = head
            .strip_prefix("download_")
            .and_then(|rest| rest.strip_suffix("_audio"))
        {
            let source = SourceKind::from_tag(tag)?;
            return Some(Self::DownloadAudio { source, file: arg });
        }
        if let Some(tag) = head
            .strip_prefix("skip_")
            .and_then(|rest| rest.strip_suffix("_audio"))
        {
            let source = SourceKind::from_tag(tag)?;
            return Some(Self::SkipAudio { source, file: arg });
        }
        None
    }

    pub fn encode(&self) -> String {
        let data = match self {
            Self::DeleteChannel(name) => format!("{}{}", DELETE_CHANNEL, name),
            Self::ConfirmDeleteChannel(name) => format!("{}{}", CONFIRM_DELETE_CHANNEL, name),
            Self::CancelDeleteChannel => CANCEL_DELETE_CHANNEL.to_string(),
            Self::CheckSubscription => CHECK_SUBSCRIPTION.to_string(),
            Self::DownloadAudio { source, file } => {
                format!("download_{}_audio{}{}", source.tag(), PAYLOAD_SEPARATOR, file)
            }
            Self::SkipAudio { source, file } => {
                format!("skip_{}_audio{}{}", source.tag(), PAYLOAD_SEPARATOR, file)
            }
            Self::SelectFormat(format_id) => {
                debug_assert!(
                    !format_id.contains(PAYLOAD_SEPARATOR),
                    "format id {format_id:?} contains the payload separator"
                );
                format!("{}{}{}", SELECT_FORMAT, PAYLOAD_SEPARATOR, format_id)
            }
        };
        if data.len() > MAX_PAYLOAD_LEN {
            tracing::warn!("Callback payload is {} bytes, Telegram will reject it: {}", data.len(), data);
        }
        data
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

/// A button press, reduced to what the handlers need.
#[derive(Debug, Clone)]
pub struct IncomingCallback {
    pub id: String,
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub first_name: String,
    pub message_id: Option<MessageId>,
    pub data: String,
}

pub async fn handle_callback(
    q: CallbackQuery,
    state: Arc<AppState>,
) -> Result<(), HandlerError> {
    let data = match q.data.as_deref() {
        Some(d) => d.to_string(),
        None => return Ok(()),
    };

    let (chat_id, message_id) = match q.message.as_ref() {
        Some(m) => (m.chat().id, Some(m.id())),
        None => (ChatId(q.from.id.0 as i64), None),
    };

    let incoming = IncomingCallback {
        id: q.id.clone(),
        chat_id,
        user_id: q.from.id,
        first_name: q.from.first_name.clone(),
        message_id,
        data,
    };

    if let Err(e) = dispatch_callback(&state, incoming).await {
        tracing::error!("Callback handling failed: {:#}", e);
    }
    Ok(())
}

pub async fn dispatch_callback(state: &AppState, q: IncomingCallback) -> anyhow::Result<()> {
    if let Err(e) = state.gateway.answer_callback(&q.id).await {
        tracing::warn!("Failed to answer callback {}: {}", q.id, e);
    }

    let Some(command) = CallbackCommand::parse(&q.data) else {
        tracing::warn!("Unknown callback data from chat {}: {}", q.chat_id, q.data);
        return Ok(());
    };
    tracing::debug!("Callback from chat {}: {:?}", q.chat_id, command);

    match command {
        CallbackCommand::CheckSubscription => {
            subscription::recheck(state, &q).await?;
        }
        CallbackCommand::DeleteChannel(channel) => {
            admin::ask_channel_deletion(state, &q, &channel).await?;
        }
        CallbackCommand::ConfirmDeleteChannel(channel) => {
            admin::delete_channel(state, &q, &channel).await?;
        }
        CallbackCommand::CancelDeleteChannel => {
            admin::cancel_channel_deletion(state, &q).await?;
        }
        CallbackCommand::DownloadAudio { source, file } => {
            download::deliver_audio(state, q.chat_id, source, &file).await;
        }
        CallbackCommand::SkipAudio { source, file } => {
            download::skip_audio(state, q.chat_id, source, &file).await;
        }
        CallbackCommand::SelectFormat(format_id) => {
            download::deliver_chosen_format(state, q.chat_id, q.message_id, &format_id).await;
        }
    }

    Ok(())
}
