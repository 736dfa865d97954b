use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::AppConfig;
use crate::media::formats::{parse_probe_output, MediaMetadata};
use crate::media::pipeline::AcquisitionError;
use crate::media::SourceKind;

static TIKTOK_VIDEO_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:https?://)?(?:www\.|vm\.|vt\.)?tiktok\.com/(?:.*/)?([a-zA-Z0-9_-]+)")
        .expect("TikTok id regex is valid")
});

/// Pull the trailing video id out of a TikTok link.
pub fn tiktok_video_id(link: &str) -> Option<&str> {
    TIKTOK_VIDEO_ID
        .captures(link)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Everything the pipeline needs from the outside world: HTTP resolvers,
/// the metadata probe and the transcoder.
#[async_trait]
pub trait MediaTools: Send + Sync {
    /// Single lookup returning one downloadable URL.
    async fn resolve_direct(&self, source: SourceKind, link: &str)
        -> Result<String, AcquisitionError>;

    async fn download(&self, url: &str, dest: &Path) -> Result<(), AcquisitionError>;

    async fn probe(&self, link: &str) -> Result<MediaMetadata, AcquisitionError>;

    async fn fetch_format(
        &self,
        link: &str,
        format_id: &str,
        dest: &Path,
    ) -> Result<(), AcquisitionError>;

    async fn extract_audio(&self, video: &Path, dest: &Path) -> Result<(), AcquisitionError>;
}

#[derive(Debug, Deserialize)]
struct InstagramResponse {
    #[serde(default)]
    status: String,
    data: Option<InstagramData>,
}

#[derive(Debug, Deserialize)]
struct InstagramData {
    #[serde(rename = "videoUrl", default)]
    video_url: String,
}

#[derive(Debug, Deserialize)]
struct TikTokResponse {
    data: Option<TikTokData>,
}

#[derive(Debug, Deserialize)]
struct TikTokData {
    #[serde(default)]
    play: String,
}

/// Production tools: reqwest for the resolvers, `yt-dlp` and `ffmpeg`
/// as child processes, each bounded by a timeout.
pub struct ExternalTools {
    client: Client,
    instagram_api: String,
    tiktok_api: String,
    ytdlp_bin: String,
    ffmpeg_bin: String,
    tool_timeout: Duration,
}

impl ExternalTools {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self {
            client,
            instagram_api: config.instagram_api_url.clone(),
            tiktok_api: config.tiktok_api_url.clone(),
            ytdlp_bin: config.ytdlp_bin.clone(),
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            tool_timeout: config.tool_timeout,
        })
    }

    /// Run a tool to completion, returning stdout. Non-zero exit carries stderr.
    async fn run(&self, bin: &str, args: &[&str]) -> Result<Vec<u8>, ToolFailure> {
        let child = Command::new(bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolFailure::Failed(format!("failed to start {}: {}", bin, e)))?;

        let output = tokio::time::timeout(self.tool_timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolFailure::TimedOut(self.tool_timeout))?
            .map_err(|e| ToolFailure::Failed(format!("{} failed: {}", bin, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolFailure::Failed(format!(
                "{} exited with {}: {}",
                bin,
                output.status,
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }

    async fn resolve_instagram(&self, link: &str) -> Result<String, AcquisitionError> {
        let resp = self
            .client
            .get(format!("{}{}", self.instagram_api, link))
            .send()
            .await
            .map_err(metadata_error)?;

        if !resp.status().is_success() {
            return Err(AcquisitionError::Metadata(format!(
                "Instagram resolver returned {}",
                resp.status()
            )));
        }

        let body: InstagramResponse = resp.json().await.map_err(metadata_error)?;
        match body.data {
            Some(data) if body.status == "success" && !data.video_url.is_empty() => {
                Ok(data.video_url)
            }
            _ => Err(AcquisitionError::Metadata(format!(
                "Instagram resolver status '{}' without a video URL",
                body.status
            ))),
        }
    }

    async fn resolve_tiktok(&self, link: &str) -> Result<String, AcquisitionError> {
        if tiktok_video_id(link).is_none() {
            return Err(AcquisitionError::InvalidLink(link.to_string()));
        }

        let resp = self
            .client
            .get(&self.tiktok_api)
            .query(&[("url", link)])
            .send()
            .await
            .map_err(metadata_error)?;

        if !resp.status().is_success() {
            return Err(AcquisitionError::Metadata(format!(
                "TikTok resolver returned {}",
                resp.status()
            )));
        }

        let body: TikTokResponse = resp.json().await.map_err(metadata_error)?;
        body.data
            .map(|d| d.play)
            .filter(|play| !play.is_empty())
            .ok_or_else(|| AcquisitionError::Metadata("video URL not found in the response".into()))
    }
}

enum ToolFailure {
    TimedOut(Duration),
    Failed(String),
}

impl ToolFailure {
    fn into_fetch(self) -> AcquisitionError {
        match self {
            Self::TimedOut(d) => AcquisitionError::Timeout(d),
            Self::Failed(msg) => AcquisitionError::Fetch(msg),
        }
    }

    fn into_metadata(self) -> AcquisitionError {
        match self {
            Self::TimedOut(d) => AcquisitionError::Timeout(d),
            Self::Failed(msg) => AcquisitionError::Metadata(msg),
        }
    }

    fn into_extraction(self) -> AcquisitionError {
        match self {
            Self::TimedOut(d) => AcquisitionError::Timeout(d),
            Self::Failed(msg) => AcquisitionError::Extraction(msg),
        }
    }
}

fn metadata_error(e: reqwest::Error) -> AcquisitionError {
    AcquisitionError::Metadata(e.to_string())
}

fn fetch_error(e: reqwest::Error) -> AcquisitionError {
    AcquisitionError::Fetch(e.to_string())
}

#[async_trait]
impl MediaTools for ExternalTools {
    async fn resolve_direct(
        &self,
        source: SourceKind,
        link: &str,
    ) -> Result<String, AcquisitionError> {
        match source {
            SourceKind::Instagram => self.resolve_instagram(link).await,
            SourceKind::TikTok => self.resolve_tiktok(link).await,
            SourceKind::YouTube => Err(AcquisitionError::InvalidLink(format!(
                "{} has no direct resolver",
                link
            ))),
        }
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), AcquisitionError> {
        let mut resp = self.client.get(url).send().await.map_err(fetch_error)?;
        if !resp.status().is_success() {
            return Err(AcquisitionError::Fetch(format!(
                "bad status code: {}",
                resp.status()
            )));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = resp.chunk().await.map_err(fetch_error)? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn probe(&self, link: &str) -> Result<MediaMetadata, AcquisitionError> {
        let stdout = self
            .run(&self.ytdlp_bin, &["--dump-json", "--no-playlist", link])
            .await
            .map_err(ToolFailure::into_metadata)?;
        parse_probe_output(&stdout)
            .map_err(|e| AcquisitionError::Metadata(format!("probe JSON parse error: {}", e)))
    }

    async fn fetch_format(
        &self,
        link: &str,
        format_id: &str,
        dest: &Path,
    ) -> Result<(), AcquisitionError> {
        let dest = dest.to_string_lossy();
        self.run(
            &self.ytdlp_bin,
            &["-f", format_id, "--no-playlist", "-o", &dest, link],
        )
        .await
        .map_err(ToolFailure::into_fetch)?;
        Ok(())
    }

    async fn extract_audio(&self, video: &Path, dest: &Path) -> Result<(), AcquisitionError> {
        let video = video.to_string_lossy();
        let dest = dest.to_string_lossy();
        self.run(
            &self.ffmpeg_bin,
            &["-i", &video, "-vn", "-acodec", "libmp3lame", "-y", &dest],
        )
        .await
        .map_err(ToolFailure::into_extraction)?;
        Ok(())
    }
}
