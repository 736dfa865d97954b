//! Outbound side of the chat transport.
//!
//! Handlers talk to [`Gateway`] instead of `teloxide::Bot` directly so the
//! routing and delivery logic can run against a recording double in tests.

use std::path::Path;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, InputFile, MessageId, Recipient, ReplyMarkup};

#[async_trait]
pub trait Gateway: Send + Sync {
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        markup: Option<ReplyMarkup>,
    ) -> anyhow::Result<MessageId>;

    async fn send_video(
        &self,
        chat: ChatId,
        path: &Path,
        caption: &str,
        markup: Option<InlineKeyboardMarkup>,
    ) -> anyhow::Result<MessageId>;

    async fn send_audio(&self, chat: ChatId, path: &Path, caption: &str)
        -> anyhow::Result<MessageId>;

    async fn send_document(&self, chat: ChatId, path: &Path) -> anyhow::Result<MessageId>;

    async fn delete_message(&self, chat: ChatId, message_id: MessageId) -> anyhow::Result<()>;

    /// Replace a media caption and drop its inline keyboard.
    async fn edit_caption(
        &self,
        chat: ChatId,
        message_id: MessageId,
        caption: &str,
    ) -> anyhow::Result<()>;

    async fn answer_callback(&self, callback_id: &str) -> anyhow::Result<()>;

    /// Whether `user` is currently a member of the public `@channel`.
    async fn is_channel_member(&self, channel: &str, user: UserId) -> anyhow::Result<bool>;
}

#[async_trait]
impl Gateway for Bot {
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        markup: Option<ReplyMarkup>,
    ) -> anyhow::Result<MessageId> {
        let mut req = self.send_message(chat, text);
        if let Some(markup) = markup {
            req = req.reply_markup(markup);
        }
        Ok(req.await?.id)
    }

    async fn send_video(
        &self,
        chat: ChatId,
        path: &Path,
        caption: &str,
        markup: Option<InlineKeyboardMarkup>,
    ) -> anyhow::Result<MessageId> {
        let mut req = Requester::send_video(self, chat, InputFile::file(path)).caption(caption);
        if let Some(markup) = markup {
            req = req.reply_markup(markup);
        }
        Ok(req.await?.id)
    }

    async fn send_audio(
        &self,
        chat: ChatId,
        path: &Path,
        caption: &str,
    ) -> anyhow::Result<MessageId> {
        let sent = Requester::send_audio(self, chat, InputFile::file(path))
            .caption(caption)
            .await?;
        Ok(sent.id)
    }

    async fn send_document(&self, chat: ChatId, path: &Path) -> anyhow::Result<MessageId> {
        let sent = Requester::send_document(self, chat, InputFile::file(path)).await?;
        Ok(sent.id)
    }

    async fn delete_message(&self, chat: ChatId, message_id: MessageId) -> anyhow::Result<()> {
        Requester::delete_message(self, chat, message_id).await?;
        Ok(())
    }

    async fn edit_caption(
        &self,
        chat: ChatId,
        message_id: MessageId,
        caption: &str,
    ) -> anyhow::Result<()> {
        self.edit_message_caption(chat, message_id)
            .caption(caption)
            .reply_markup(InlineKeyboardMarkup::default())
            .await?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> anyhow::Result<()> {
        self.answer_callback_query(callback_id).await?;
        Ok(())
    }

    async fn is_channel_member(&self, channel: &str, user: UserId) -> anyhow::Result<bool> {
        let chat = self
            .get_chat(Recipient::ChannelUsername(format!("@{}", channel)))
            .await?;
        let member = self.get_chat_member(chat.id, user).await?;
        Ok(member.kind.is_present())
    }
}
