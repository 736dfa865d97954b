use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub telegram_bot_token: String,
    pub database_url: String,

    /// Comma-separated Telegram chat IDs seeded into the admin roster
    pub admin_ids: Vec<i64>,

    /// Instagram resolver, the post link is appended verbatim
    pub instagram_api_url: String,
    /// TikTok resolver, called as `<url>?url=<post link>`
    pub tiktok_api_url: String,

    /// Directory for staged downloads
    pub media_dir: PathBuf,
    pub backup_dir: PathBuf,

    pub ytdlp_bin: String,
    pub ffmpeg_bin: String,
    pub pg_dump_bin: String,

    /// Largest file the bot will upload, in bytes
    pub max_upload_bytes: u64,

    pub http_timeout: Duration,
    pub tool_timeout: Duration,
    pub broadcast_interval: Duration,

    /// Cached submissions and staged files older than this are swept
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
    pub shutdown_grace: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let admin_ids_str = std::env::var("ADMIN_IDS").unwrap_or_default();
        let admin_ids: Vec<i64> = admin_ids_str
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();

        let max_upload_mb: u64 = env_or("MAX_UPLOAD_MB", 50);

        Ok(Self {
            telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN")?,
            database_url: std::env::var("DATABASE_URL")?,
            admin_ids,
            instagram_api_url: std::env::var("INSTAGRAM_API_URL")
                .unwrap_or_else(|_| "https://api.instagram.com".to_string()),
            tiktok_api_url: std::env::var("TIKTOK_API_URL")
                .unwrap_or_else(|_| "https://tikwm.com/api/".to_string()),
            media_dir: std::env::var("MEDIA_DIR")
                .unwrap_or_else(|_| "./media".to_string())
                .into(),
            backup_dir: std::env::var("BACKUP_DIR")
                .unwrap_or_else(|_| "./backups".to_string())
                .into(),
            ytdlp_bin: std::env::var("YTDLP_BIN").unwrap_or_else(|_| "yt-dlp".to_string()),
            ffmpeg_bin: std::env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()),
            pg_dump_bin: std::env::var("PG_DUMP_BIN").unwrap_or_else(|_| "pg_dump".to_string()),
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            http_timeout: Duration::from_secs(env_or("HTTP_TIMEOUT_SECS", 120)),
            tool_timeout: Duration::from_secs(env_or("TOOL_TIMEOUT_SECS", 300)),
            broadcast_interval: Duration::from_millis(env_or("BROADCAST_INTERVAL_MS", 200)),
            session_ttl: Duration::from_secs(env_or("SESSION_TTL_SECS", 86_400)),
            sweep_interval: Duration::from_secs(env_or("SWEEP_INTERVAL_SECS", 600)),
            shutdown_grace: Duration::from_secs(env_or("SHUTDOWN_GRACE_SECS", 30)),
        })
    }
}

/// Parse an optional numeric variable, falling back on absence or garbage.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
