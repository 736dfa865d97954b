//! Per-chat conversation state.
//!
//! Everything here is in-memory and lost on restart. Each concern lives in
//! its own sharded map so unrelated chats never contend, and no shard lock is
//! ever held across an `.await`: callers get owned copies back.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use teloxide::types::MessageId;

use crate::media::formats::{FormatCandidate, MediaMetadata};

/// What the next text message from a chat is expected to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingInput {
    BroadcastText,
    ChannelLink,
    AdminIdAdd,
    AdminIdRemove,
}

/// The latest multi-format submission from a chat.
#[derive(Debug, Clone)]
pub struct CachedSubmission {
    pub url: String,
    pub metadata: MediaMetadata,
    pub cached_at: Instant,
}

impl CachedSubmission {
    pub fn new(url: impl Into<String>, metadata: MediaMetadata) -> Self {
        Self {
            url: url.into(),
            metadata,
            cached_at: Instant::now(),
        }
    }

    pub fn candidate(&self, format_id: &str) -> Option<&FormatCandidate> {
        self.metadata
            .formats
            .iter()
            .find(|f| f.format_id == format_id)
    }
}

#[derive(Debug, Default)]
pub struct SessionStore {
    pending: DashMap<i64, PendingInput>,
    interactive: DashMap<i64, (MessageId, Instant)>,
    submissions: DashMap<i64, CachedSubmission>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Pending input ──────────────────────────────────────────────

    /// Replaces whatever the chat was previously waiting for.
    pub fn set_pending(&self, chat_id: i64, input: PendingInput) {
        self.pending.insert(chat_id, input);
    }

    pub fn pending(&self, chat_id: i64) -> Option<PendingInput> {
        self.pending.get(&chat_id).map(|p| *p)
    }

    /// Atomically read and clear the chat's pending tag.
    pub fn take_pending(&self, chat_id: i64) -> Option<PendingInput> {
        self.pending.remove(&chat_id).map(|(_, p)| p)
    }

    pub fn clear_pending(&self, chat_id: i64) {
        self.pending.remove(&chat_id);
    }

    // ── Interactive message anchor ─────────────────────────────────

    pub fn remember_interactive(&self, chat_id: i64, message_id: MessageId) {
        self.interactive.insert(chat_id, (message_id, Instant::now()));
    }

    pub fn take_interactive(&self, chat_id: i64) -> Option<MessageId> {
        self.interactive.remove(&chat_id).map(|(_, (id, _))| id)
    }

    // ── Format catalog ─────────────────────────────────────────────

    pub fn cache_submission(&self, chat_id: i64, submission: CachedSubmission) {
        self.submissions.insert(chat_id, submission);
    }

    /// Forget the chat's catalog. Called on every new link so an older menu
    /// never outlives a newer submission, whatever became of it.
    pub fn clear_submission(&self, chat_id: i64) {
        self.submissions.remove(&chat_id);
    }

    /// Look up a format in the chat's current catalog only. A hit removes
    /// the catalog so each menu delivers at most once.
    pub fn take_format(
        &self,
        chat_id: i64,
        format_id: &str,
    ) -> Option<(CachedSubmission, FormatCandidate)> {
        let (_, submission) = self
            .submissions
            .remove_if(&chat_id, |_, s| s.candidate(format_id).is_some())?;
        let candidate = submission.candidate(format_id)?.clone();
        Some((submission, candidate))
    }

    /// Drop catalogs and interactive anchors older than `max_age`.
    /// Pending tags are left alone; the next message clears them.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let mut evicted = 0;
        self.submissions.retain(|_, s| {
            let keep = s.cached_at.elapsed() < max_age;
            evicted += usize::from(!keep);
            keep
        });
        self.interactive.retain(|_, (_, at)| {
            let keep = at.elapsed() < max_age;
            evicted += usize::from(!keep);
            keep
        });
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::formats::MediaClass;

    fn meta(ids: &[&str]) -> MediaMetadata {
        MediaMetadata {
            title: "clip".to_string(),
            duration_secs: 10.0,
            formats: ids
                .iter()
                .map(|id| FormatCandidate {
                    format_id: id.to_string(),
                    media_class: MediaClass::Video,
                    container: "mp4".to_string(),
                    resolution: 360,
                    size_bytes: 1,
                })
                .collect(),
        }
    }

    #[test]
    fn new_prompt_replaces_previous_tag() {
        let store = SessionStore::new();
        store.set_pending(7, PendingInput::ChannelLink);
        store.set_pending(7, PendingInput::AdminIdAdd);
        assert_eq!(store.pending(7), Some(PendingInput::AdminIdAdd));
        assert_eq!(store.take_pending(7), Some(PendingInput::AdminIdAdd));
        assert_eq!(store.take_pending(7), None);
    }

    #[test]
    fn pending_tags_are_per_chat() {
        let store = SessionStore::new();
        store.set_pending(1, PendingInput::BroadcastText);
        store.set_pending(2, PendingInput::AdminIdRemove);
        assert_eq!(store.take_pending(1), Some(PendingInput::BroadcastText));
        assert_eq!(store.pending(1), None);
        assert_eq!(store.pending(2), Some(PendingInput::AdminIdRemove));
    }

    #[test]
    fn newer_submission_hides_older_format_ids() {
        let store = SessionStore::new();
        store.cache_submission(5, CachedSubmission::new("https://youtu.be/a", meta(&["18", "22"])));
        store.cache_submission(5, CachedSubmission::new("https://youtu.be/b", meta(&["137"])));
        assert!(store.take_format(5, "22").is_none());
        let (sub, candidate) = store.take_format(5, "137").unwrap();
        assert_eq!(sub.url, "https://youtu.be/b");
        assert_eq!(candidate.format_id, "137");
    }

    #[test]
    fn cleared_pending_tag_is_gone() {
        let store = SessionStore::new();
        store.set_pending(4, PendingInput::AdminIdRemove);
        store.clear_pending(4);
        store.clear_pending(4);
        assert_eq!(store.take_pending(4), None);
    }

    #[test]
    fn cleared_catalog_resolves_nothing() {
        let store = SessionStore::new();
        store.cache_submission(5, CachedSubmission::new("https://youtu.be/a", meta(&["22"])));
        store.clear_submission(5);
        assert!(store.take_format(5, "22").is_none());
    }

    #[test]
    fn taken_format_consumes_the_catalog() {
        let store = SessionStore::new();
        store.cache_submission(5, CachedSubmission::new("https://youtu.be/a", meta(&["18", "22"])));

        // A miss leaves the catalog in place.
        assert!(store.take_format(5, "999").is_none());
        let (sub, candidate) = store.take_format(5, "22").unwrap();
        assert_eq!(sub.url, "https://youtu.be/a");
        assert_eq!(candidate.format_id, "22");

        assert!(store.take_format(5, "22").is_none());
        assert!(store.take_format(5, "18").is_none());
    }

    #[test]
    fn interactive_anchor_is_overwritten() {
        let store = SessionStore::new();
        store.remember_interactive(3, MessageId(10));
        store.remember_interactive(3, MessageId(11));
        assert_eq!(store.take_interactive(3), Some(MessageId(11)));
        assert_eq!(store.take_interactive(3), None);
    }

    #[test]
    fn sweep_evicts_only_expired_entries() {
        let store = SessionStore::new();
        store.cache_submission(1, CachedSubmission::new("u", meta(&["1"])));
        store.remember_interactive(1, MessageId(1));
        store.set_pending(1, PendingInput::ChannelLink);

        assert_eq!(store.sweep(Duration::from_secs(3600)), 0);
        assert_eq!(store.sweep(Duration::ZERO), 2);
        assert!(store.take_format(1, "1").is_none());
        assert_eq!(store.pending(1), Some(PendingInput::ChannelLink));
    }

    #[test]
    fn sweep_tolerates_concurrent_writers() {
        let store = SessionStore::new();
        let stop = std::sync::atomic::AtomicBool::new(false);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                let mut chat = 0i64;
                while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                    store.remember_interactive(chat % 64, MessageId(1));
                    store.cache_submission(chat % 64, CachedSubmission::new("u", meta(&["1"])));
                    chat += 1;
                }
            });
            for _ in 0..2_000 {
                assert_eq!(store.sweep(Duration::from_secs(3600)), 0);
            }
            stop.store(true, std::sync::atomic::Ordering::Relaxed);
        });
        assert!(store.sweep(Duration::ZERO) <= 128);
    }
}
