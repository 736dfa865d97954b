//! In-memory doubles for the store, the chat transport and the media tools.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teloxide::types::{
    ChatId, InlineKeyboardButtonKind, InlineKeyboardMarkup, MessageId, ReplyMarkup, UserId,
};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::bot::AppState;
use crate::config::AppConfig;
use crate::db::{models, Store};
use crate::media::formats::{FormatCandidate, MediaClass, MediaMetadata};
use crate::media::pipeline::{AcquisitionError, Pipeline};
use crate::media::tools::MediaTools;
use crate::media::SourceKind;
use crate::session::SessionStore;
use crate::telegram::Gateway;

// ── Store ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStore {
    users: Mutex<Vec<models::User>>,
    admins: Mutex<BTreeSet<i64>>,
    channels: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn with_admin(id: i64) -> Self {
        let store = Self::default();
        store.admins.lock().unwrap().insert(id);
        store
    }

    pub fn insert_user_at(&self, id: i64, created_at: DateTime<Utc>) {
        self.users.lock().unwrap().push(models::User {
            id,
            username: None,
            created_at,
        });
    }

    pub fn insert_channel(&self, name: &str) {
        self.channels.lock().unwrap().push(name.to_string());
    }

    pub fn channels(&self) -> Vec<String> {
        self.channels.lock().unwrap().clone()
    }

    pub fn admin_ids(&self) -> Vec<i64> {
        self.admins.lock().unwrap().iter().copied().collect()
    }

    pub fn user_ids(&self) -> Vec<i64> {
        self.users.lock().unwrap().iter().map(|u| u.id).collect()
    }

    fn count_since(&self, since: DateTime<Utc>) -> i64 {
        self.users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.created_at >= since)
            .count() as i64
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn is_admin(&self, chat_id: i64) -> anyhow::Result<bool> {
        Ok(self.admins.lock().unwrap().contains(&chat_id))
    }

    async fn add_user(&self, chat_id: i64, username: Option<&str>) -> anyhow::Result<()> {
        let mut users = self.users.lock().unwrap();
        if !users.iter().any(|u| u.id == chat_id) {
            users.push(models::User {
                id: chat_id,
                username: username.map(str::to_string),
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn list_users(&self) -> anyhow::Result<Vec<models::User>> {
        Ok(self.users.lock().unwrap().clone())
    }

    async fn add_admin(&self, chat_id: i64) -> anyhow::Result<()> {
        self.admins.lock().unwrap().insert(chat_id);
        Ok(())
    }

    async fn remove_admin(&self, chat_id: i64) -> anyhow::Result<bool> {
        Ok(self.admins.lock().unwrap().remove(&chat_id))
    }

    async fn list_admins(&self) -> anyhow::Result<Vec<i64>> {
        Ok(self.admins.lock().unwrap().iter().copied().collect())
    }

    async fn add_allowed_channel(&self, name: &str) -> anyhow::Result<()> {
        let mut channels = self.channels.lock().unwrap();
        if !channels.iter().any(|c| c == name) {
            channels.push(name.to_string());
        }
        Ok(())
    }

    async fn remove_allowed_channel(&self, name: &str) -> anyhow::Result<bool> {
        let mut channels = self.channels.lock().unwrap();
        let before = channels.len();
        channels.retain(|c| c != name);
        Ok(channels.len() != before)
    }

    async fn list_allowed_channels(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.channels())
    }

    async fn count_users_total(&self) -> anyhow::Result<i64> {
        Ok(self.users.lock().unwrap().len() as i64)
    }

    async fn count_users_today(&self) -> anyhow::Result<i64> {
        let midnight = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        Ok(self.count_since(midnight))
    }

    async fn count_users_last_month(&self) -> anyhow::Result<i64> {
        Ok(self.count_since(Utc::now() - chrono::Duration::days(30)))
    }
}

// ── Gateway ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Sent {
    Text {
        chat: ChatId,
        text: String,
        markup: Option<ReplyMarkup>,
    },
    Video {
        chat: ChatId,
        id: MessageId,
        path: PathBuf,
        caption: String,
        markup: Option<InlineKeyboardMarkup>,
    },
    Audio {
        chat: ChatId,
        path: PathBuf,
        caption: String,
    },
    Document {
        chat: ChatId,
        path: PathBuf,
    },
    Deleted {
        chat: ChatId,
        message_id: MessageId,
    },
    CaptionEdited {
        chat: ChatId,
        message_id: MessageId,
        caption: String,
    },
    Answered(String),
}

#[derive(Debug)]
pub struct RecordingGateway {
    log: Mutex<Vec<Sent>>,
    next_id: AtomicI32,
    members: AtomicBool,
    failing: Mutex<HashSet<i64>>,
}

impl Default for RecordingGateway {
    fn default() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            next_id: AtomicI32::new(100),
            members: AtomicBool::new(true),
            failing: Mutex::new(HashSet::new()),
        }
    }
}

impl RecordingGateway {
    pub fn set_member(&self, member: bool) {
        self.members.store(member, Ordering::SeqCst);
    }

    /// Every send to `chat` fails from now on.
    pub fn fail_chat(&self, chat: i64) {
        self.failing.lock().unwrap().insert(chat);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.log.lock().unwrap().clone()
    }

    pub fn texts_to(&self, chat: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { chat: c, text, .. } if c.0 == chat => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn last_text_to(&self, chat: i64) -> Option<String> {
        self.texts_to(chat).pop()
    }

    pub fn videos(&self) -> Vec<(MessageId, PathBuf, InlineKeyboardMarkup)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Video { id, path, markup, .. } => Some((id, path, markup.unwrap_or_default())),
                _ => None,
            })
            .collect()
    }

    pub fn audios(&self) -> Vec<PathBuf> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Audio { path, .. } => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn caption_edits(&self) -> Vec<(MessageId, String)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::CaptionEdited {
                    message_id, caption, ..
                } => Some((message_id, caption)),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<MessageId> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Deleted { message_id, .. } => Some(message_id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, chat: ChatId, entry: impl FnOnce(MessageId) -> Sent) -> anyhow::Result<MessageId> {
        if self.failing.lock().unwrap().contains(&chat.0) {
            anyhow::bail!("chat {} blocked the bot", chat);
        }
        let id = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.log.lock().unwrap().push(entry(id));
        Ok(id)
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        markup: Option<ReplyMarkup>,
    ) -> anyhow::Result<MessageId> {
        self.record(chat, |_| Sent::Text {
            chat,
            text: text.to_string(),
            markup,
        })
    }

    async fn send_video(
        &self,
        chat: ChatId,
        path: &Path,
        caption: &str,
        markup: Option<InlineKeyboardMarkup>,
    ) -> anyhow::Result<MessageId> {
        anyhow::ensure!(path.is_file(), "{} does not exist", path.display());
        self.record(chat, |id| Sent::Video {
            chat,
            id,
            path: path.to_path_buf(),
            caption: caption.to_string(),
            markup,
        })
    }

    async fn send_audio(
        &self,
        chat: ChatId,
        path: &Path,
        caption: &str,
    ) -> anyhow::Result<MessageId> {
        anyhow::ensure!(path.is_file(), "{} does not exist", path.display());
        self.record(chat, |_| Sent::Audio {
            chat,
            path: path.to_path_buf(),
            caption: caption.to_string(),
        })
    }

    async fn send_document(&self, chat: ChatId, path: &Path) -> anyhow::Result<MessageId> {
        self.record(chat, |_| Sent::Document {
            chat,
            path: path.to_path_buf(),
        })
    }

    async fn delete_message(&self, chat: ChatId, message_id: MessageId) -> anyhow::Result<()> {
        self.record(chat, |_| Sent::Deleted { chat, message_id })?;
        Ok(())
    }

    async fn edit_caption(
        &self,
        chat: ChatId,
        message_id: MessageId,
        caption: &str,
    ) -> anyhow::Result<()> {
        self.record(chat, |_| Sent::CaptionEdited {
            chat,
            message_id,
            caption: caption.to_string(),
        })?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> anyhow::Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(Sent::Answered(callback_id.to_string()));
        Ok(())
    }

    async fn is_channel_member(&self, _channel: &str, _user: UserId) -> anyhow::Result<bool> {
        Ok(self.members.load(Ordering::SeqCst))
    }
}

/// Callback payloads of an inline keyboard, row by row.
pub fn callback_payloads(markup: &InlineKeyboardMarkup) -> Vec<String> {
    markup
        .inline_keyboard
        .iter()
        .flatten()
        .filter_map(|b| match &b.kind {
            InlineKeyboardButtonKind::CallbackData(data) => Some(data.clone()),
            _ => None,
        })
        .collect()
}

// ── Media tools ────────────────────────────────────────────────────

/// Writes `video_size` bytes for every fetch and a short stub for audio.
#[derive(Debug)]
pub struct FakeTools {
    video_size: AtomicU64,
    fail_fetch: AtomicBool,
    fail_probe: AtomicBool,
    fail_extract: AtomicBool,
    metadata: Mutex<MediaMetadata>,
    fetches: AtomicUsize,
}

impl FakeTools {
    pub fn with_video_size(size: u64) -> Self {
        Self {
            video_size: AtomicU64::new(size),
            fail_fetch: AtomicBool::new(false),
            fail_probe: AtomicBool::new(false),
            fail_extract: AtomicBool::new(false),
            metadata: Mutex::new(demo_metadata()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fail_fetch(&self) {
        self.fail_fetch.store(true, Ordering::SeqCst);
    }

    pub fn fail_probe(&self) {
        self.fail_probe.store(true, Ordering::SeqCst);
    }

    /// Extraction writes a partial file, then fails.
    pub fn fail_extract(&self) {
        self.fail_extract.store(true, Ordering::SeqCst);
    }

    pub fn set_metadata(&self, metadata: MediaMetadata) {
        *self.metadata.lock().unwrap() = metadata;
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    async fn write_fetch(&self, dest: &Path) -> Result<(), AcquisitionError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            tokio::fs::write(dest, b"partial").await?;
            return Err(AcquisitionError::Fetch("connection reset".to_string()));
        }
        let size = self.video_size.load(Ordering::SeqCst) as usize;
        tokio::fs::write(dest, vec![0u8; size]).await?;
        Ok(())
    }
}

pub fn candidate(id: &str, media_class: MediaClass, container: &str, resolution: u32, size: u64) -> FormatCandidate {
    FormatCandidate {
        format_id: id.to_string(),
        media_class,
        container: container.to_string(),
        resolution,
        size_bytes: size,
    }
}

pub fn demo_metadata() -> MediaMetadata {
    MediaMetadata {
        title: "Demo clip".to_string(),
        duration_secs: 75.0,
        formats: vec![
            candidate("18", MediaClass::Video, "mp4", 360, 1000),
            candidate("22", MediaClass::Video, "mp4", 720, 2000),
            candidate("140", MediaClass::AudioOnly, "m4a", 0, 500),
        ],
    }
}

#[async_trait]
impl MediaTools for FakeTools {
    async fn resolve_direct(
        &self,
        source: SourceKind,
        link: &str,
    ) -> Result<String, AcquisitionError> {
        Ok(format!("https://cdn.example/{}/{}", source.tag(), link.len()))
    }

    async fn download(&self, _url: &str, dest: &Path) -> Result<(), AcquisitionError> {
        self.write_fetch(dest).await
    }

    async fn probe(&self, _link: &str) -> Result<MediaMetadata, AcquisitionError> {
        if self.fail_probe.load(Ordering::SeqCst) {
            return Err(AcquisitionError::Metadata("yt-dlp exited with 1".to_string()));
        }
        Ok(self.metadata.lock().unwrap().clone())
    }

    async fn fetch_format(
        &self,
        _link: &str,
        _format_id: &str,
        dest: &Path,
    ) -> Result<(), AcquisitionError> {
        self.write_fetch(dest).await
    }

    async fn extract_audio(&self, video: &Path, dest: &Path) -> Result<(), AcquisitionError> {
        if !video.is_file() {
            return Err(AcquisitionError::Extraction(format!(
                "{} is missing",
                video.display()
            )));
        }
        if self.fail_extract.load(Ordering::SeqCst) {
            tokio::fs::write(dest, b"ID3").await?;
            return Err(AcquisitionError::Extraction("ffmpeg exited with 1".to_string()));
        }
        tokio::fs::write(dest, b"ID3audio").await?;
        Ok(())
    }
}

// ── State ──────────────────────────────────────────────────────────

pub const UPLOAD_LIMIT: u64 = 5000;

pub fn test_config(dir: &Path) -> AppConfig {
    AppConfig {
        telegram_bot_token: "test-token".to_string(),
        database_url: "postgres://localhost/test".to_string(),
        admin_ids: Vec::new(),
        instagram_api_url: "http://127.0.0.1:9/insta?url=".to_string(),
        tiktok_api_url: "http://127.0.0.1:9/tiktok".to_string(),
        media_dir: dir.to_path_buf(),
        backup_dir: dir.join("backups"),
        ytdlp_bin: "yt-dlp".to_string(),
        ffmpeg_bin: "ffmpeg".to_string(),
        pg_dump_bin: "pg_dump".to_string(),
        max_upload_bytes: UPLOAD_LIMIT,
        http_timeout: Duration::from_secs(5),
        tool_timeout: Duration::from_secs(5),
        broadcast_interval: Duration::from_millis(1),
        session_ttl: Duration::from_secs(60),
        sweep_interval: Duration::from_secs(60),
        shutdown_grace: Duration::from_secs(1),
    }
}

pub struct Harness {
    pub state: AppState,
    pub gateway: Arc<RecordingGateway>,
    pub store: Arc<MemoryStore>,
    pub tools: Arc<FakeTools>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(store: MemoryStore, tools: FakeTools) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let gateway = Arc::new(RecordingGateway::default());
        let store = Arc::new(store);
        let tools = Arc::new(tools);

        let media_tools: Arc<dyn MediaTools> = tools.clone();
        let pipeline = Pipeline::new(media_tools, config.media_dir.clone(), config.max_upload_bytes);

        let state = AppState {
            config,
            gateway: gateway.clone(),
            store: store.clone(),
            sessions: SessionStore::new(),
            pipeline,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        };

        Self {
            state,
            gateway,
            store,
            tools,
            dir,
        }
    }

    /// Names of the files currently staged in the media directory.
    pub fn staged_files(&self) -> Vec<String> {
        std::fs::read_dir(self.dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect()
    }

    /// Wait for broadcasts and backups spawned so far.
    pub async fn drain_tasks(&self) {
        self.state.tasks.close();
        tokio::time::timeout(Duration::from_secs(5), self.state.tasks.wait())
            .await
            .unwrap();
    }
}
