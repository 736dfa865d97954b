//! Link submissions and the follow-up buttons: format choice and audio offer.

use teloxide::types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ReplyMarkup};

use crate::bot::callbacks::CallbackCommand;
use crate::bot::AppState;
use crate::media::formats::{format_choice_keyboard, format_duration, select_formats};
use crate::media::pipeline::{remove_staged, Acquisition, ArtifactKind, DeliveredArtifact};
use crate::media::SourceKind;
use crate::session::CachedSubmission;

pub const LOADING: &str = "⏳ Yuklanmoqda...";
pub const DELIVERED_CAPTION: &str = "Siz so‘ragan video.";
const AUDIO_OFFER: &str = "Audiosini yuklashni istaysizmi?";
const NO_FORMATS: &str = "Yuklab olish uchun mos format topilmadi.";
const SEND_FAILED: &str = "Faylni yuborishda xatolik yuz berdi.";

pub fn audio_offer_keyboard(source: SourceKind, file: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback(
            "Ha",
            CallbackCommand::DownloadAudio {
                source,
                file: file.to_string(),
            }
            .encode(),
        ),
        InlineKeyboardButton::callback(
            "Yo'q",
            CallbackCommand::SkipAudio {
                source,
                file: file.to_string(),
            }
            .encode(),
        ),
    ]])
}

pub async fn handle_link(state: &AppState, chat: ChatId, source: SourceKind, link: &str) {
    tracing::info!("Chat {} submitted {:?} link {}", chat, source, link);
    state.sessions.clear_submission(chat.0);
    if source.is_multi_format() {
        offer_formats(state, chat, link).await;
    } else {
        deliver_direct(state, chat, source, link).await;
    }
}

async fn deliver_direct(state: &AppState, chat: ChatId, source: SourceKind, link: &str) {
    let loading = state.notify(chat, LOADING).await;
    let result = state
        .pipeline
        .acquire(Acquisition::Direct { source, link })
        .await;
    if let Some(id) = loading {
        state.delete_quietly(chat, id).await;
    }

    match result {
        Ok(artifact) => {
            let caption = format!("{}\n\n{}", DELIVERED_CAPTION, AUDIO_OFFER);
            send_with_audio_offer(state, chat, source, artifact, &caption).await;
        }
        Err(e) => {
            tracing::error!("{:?} acquisition for chat {} failed: {}", source, chat, e);
            state.notify(chat, &e.user_message()).await;
        }
    }
}

/// Probe once, cache the catalog and offer one button per usable format.
async fn offer_formats(state: &AppState, chat: ChatId, link: &str) {
    let loading = state.notify(chat, LOADING).await;
    let probed = state.pipeline.probe(link).await;
    if let Some(id) = loading {
        state.delete_quietly(chat, id).await;
    }

    let metadata = match probed {
        Ok(metadata) => metadata,
        Err(e) => {
            tracing::error!("Probe of {} for chat {} failed: {}", link, chat, e);
            state.notify(chat, &e.user_message()).await;
            return;
        }
    };

    let selection = select_formats(&metadata.formats);
    if selection.is_empty() {
        state.notify(chat, NO_FORMATS).await;
        return;
    }

    let text = format!(
        "{}\nDuration: {}\nChoose format to download:",
        metadata.title,
        format_duration(metadata.duration_secs)
    );
    state
        .sessions
        .cache_submission(chat.0, CachedSubmission::new(link, metadata));

    let markup = ReplyMarkup::InlineKeyboard(format_choice_keyboard(&selection));
    if let Some(id) = state.notify_with(chat, &text, Some(markup)).await {
        state.sessions.remember_interactive(chat.0, id);
    }
}

/// A format button was pressed. Ids outside the chat's current catalog are
/// ignored, and a hit consumes the catalog.
pub async fn deliver_chosen_format(
    state: &AppState,
    chat: ChatId,
    menu: Option<MessageId>,
    format_id: &str,
) {
    let Some((submission, candidate)) = state.sessions.take_format(chat.0, format_id) else {
        tracing::info!("Ignoring format {} for chat {}: not in current catalog", format_id, chat);
        return;
    };

    let anchor = state.sessions.take_interactive(chat.0);
    if let Some(id) = menu.or(anchor) {
        state.delete_quietly(chat, id).await;
    }

    let loading = state.notify(chat, LOADING).await;
    let result = state
        .pipeline
        .acquire(Acquisition::Format {
            link: &submission.url,
            candidate: &candidate,
        })
        .await;
    if let Some(id) = loading {
        state.delete_quietly(chat, id).await;
    }

    let artifact = match result {
        Ok(artifact) => artifact,
        Err(e) => {
            tracing::error!("Format {} of {} failed: {}", format_id, submission.url, e);
            state.notify(chat, &e.user_message()).await;
            return;
        }
    };

    let title = &submission.metadata.title;
    match artifact.kind {
        ArtifactKind::Audio => {
            if let Err(e) = state.gateway.send_audio(chat, &artifact.path, title).await {
                tracing::warn!("Failed to send audio to chat {}: {}", chat, e);
                state.notify(chat, SEND_FAILED).await;
            }
            artifact.remove().await;
        }
        ArtifactKind::Video => {
            let caption = format!("{}\n\n{}", title, AUDIO_OFFER);
            send_with_audio_offer(state, chat, SourceKind::YouTube, artifact, &caption).await;
        }
    }
}

async fn send_with_audio_offer(
    state: &AppState,
    chat: ChatId,
    source: SourceKind,
    artifact: DeliveredArtifact,
    caption: &str,
) {
    tracing::info!(
        "Sending {} ({} bytes) to chat {}",
        artifact.path.display(),
        artifact.size,
        chat
    );
    let keyboard = audio_offer_keyboard(source, &artifact.file_name());
    match state
        .gateway
        .send_video(chat, &artifact.path, caption, Some(keyboard))
        .await
    {
        Ok(id) => state.sessions.remember_interactive(chat.0, id),
        Err(e) => {
            tracing::warn!("Failed to send video to chat {}: {}", chat, e);
            artifact.remove().await;
            state.notify(chat, SEND_FAILED).await;
        }
    }
}

/// "Ha" on the audio offer: extract, send, then clean up both files.
pub async fn deliver_audio(state: &AppState, chat: ChatId, source: SourceKind, file: &str) {
    match state.pipeline.staged(file) {
        Some(video) => {
            match state.pipeline.extract_audio(&video).await {
                Ok(audio) => {
                    if let Err(e) = state.gateway.send_audio(chat, &audio.path, "").await {
                        tracing::warn!("Failed to send audio to chat {}: {}", chat, e);
                        state.notify(chat, SEND_FAILED).await;
                    }
                    audio.remove().await;
                }
                Err(e) => {
                    tracing::error!("Audio extraction of {} failed: {}", video.display(), e);
                    state.notify(chat, &e.user_message()).await;
                }
            }
            remove_staged(&video).await;
        }
        None => {
            tracing::warn!("{:?} audio requested for {} but it is no longer staged", source, file);
        }
    }
    finalize_interactive(state, chat).await;
}

/// "Yo'q" on the audio offer.
pub async fn skip_audio(state: &AppState, chat: ChatId, source: SourceKind, file: &str) {
    match state.pipeline.staged(file) {
        Some(video) => remove_staged(&video).await,
        None => tracing::debug!("{:?} skip for {}: already gone", source, file),
    }
    finalize_interactive(state, chat).await;
}

/// Strip the audio-offer buttons from the last interactive message.
async fn finalize_interactive(state: &AppState, chat: ChatId) {
    let Some(message_id) = state.sessions.take_interactive(chat.0) else {
        tracing::warn!("No interactive message stored for chat {}", chat);
        return;
    };
    if let Err(e) = state
        .gateway
        .edit_caption(chat, message_id, DELIVERED_CAPTION)
        .await
    {
        tracing::warn!("Failed to update caption in chat {}: {}", chat, e);
    }
}
