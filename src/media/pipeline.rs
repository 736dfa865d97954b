//! Turns a submitted link into a size-checked local file.
//!
//! Every artifact gets a fresh `<uuid>.<ext>` name inside the media
//! directory, so concurrent submissions never share a path and the bare file
//! name is enough to find the artifact again from a button payload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use uuid::Uuid;

use crate::media::formats::{FormatCandidate, MediaClass, MediaMetadata};
use crate::media::tools::MediaTools;
use crate::media::SourceKind;

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("unsupported or malformed link: {0}")]
    InvalidLink(String),
    #[error("metadata lookup failed: {0}")]
    Metadata(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("artifact is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
    #[error("audio extraction failed: {0}")]
    Extraction(String),
    #[error("external call timed out after {0:?}")]
    Timeout(Duration),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AcquisitionError {
    /// Localized text shown to the chat.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidLink(_) => {
                "❌ Havola noto'g'ri. Iltimos, boshqa linkni sinab ko'ring.".to_string()
            }
            Self::Metadata(_) => "❌ Video ma'lumotlarini olishda xatolik yuz berdi.".to_string(),
            Self::Fetch(_) | Self::Io(_) | Self::Timeout(_) => {
                "❌ Video yuklab olishda xatolik yuz berdi.".to_string()
            }
            Self::TooLarge { limit, .. } => format!(
                "Kechirasiz, fayl hajmi {}mb dan oshdi. Jo'nata olmayman.",
                limit / 1024 / 1024
            ),
            Self::Extraction(_) => "❌ Audio ajratishda xatolik yuz berdi.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Video,
    Audio,
}

/// A staged file. Whoever holds it is responsible for calling [`remove`].
///
/// [`remove`]: DeliveredArtifact::remove
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredArtifact {
    pub path: PathBuf,
    pub size: u64,
    pub kind: ArtifactKind,
}

impl DeliveredArtifact {
    /// File name as embedded in callback payloads.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub async fn remove(&self) {
        remove_staged(&self.path).await;
    }
}

pub async fn remove_staged(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::info!("Removed staged file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove staged file {}: {}", path.display(), e),
    }
}

pub enum Acquisition<'a> {
    /// One lookup yields one downloadable URL.
    Direct { source: SourceKind, link: &'a str },
    /// A format already chosen from the probed catalog.
    Format {
        link: &'a str,
        candidate: &'a FormatCandidate,
    },
}

pub struct Pipeline {
    tools: Arc<dyn MediaTools>,
    media_dir: PathBuf,
    max_upload_bytes: u64,
}

impl Pipeline {
    pub fn new(tools: Arc<dyn MediaTools>, media_dir: PathBuf, max_upload_bytes: u64) -> Self {
        Self {
            tools,
            media_dir,
            max_upload_bytes,
        }
    }

    pub async fn prepare(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.media_dir).await
    }

    fn staging_path(&self, ext: &str) -> PathBuf {
        self.media_dir
            .join(format!("{}.{}", Uuid::new_v4().simple(), ext))
    }

    /// Map a payload file name back to a staged path. Anything that is not a
    /// bare file name, or no longer exists, yields `None`.
    pub fn staged(&self, file_name: &str) -> Option<PathBuf> {
        if !is_bare_file_name(file_name) {
            return None;
        }
        let path = self.media_dir.join(file_name);
        path.is_file().then_some(path)
    }

    pub async fn probe(&self, link: &str) -> Result<MediaMetadata, AcquisitionError> {
        self.tools.probe(link).await
    }

    pub async fn acquire(
        &self,
        acquisition: Acquisition<'_>,
    ) -> Result<DeliveredArtifact, AcquisitionError> {
        let (path, kind) = match acquisition {
            Acquisition::Direct { source, link } => {
                let url = self.tools.resolve_direct(source, link).await?;
                let path = self.staging_path("mp4");
                tracing::info!("Fetching {:?} media for {} into {}", source, link, path.display());
                let fetched = self.tools.download(&url, &path).await;
                (self.settle(fetched, path).await?, ArtifactKind::Video)
            }
            Acquisition::Format { link, candidate } => {
                let (ext, kind) = match candidate.media_class {
                    MediaClass::AudioOnly => (candidate.container.as_str(), ArtifactKind::Audio),
                    MediaClass::Video => ("mp4", ArtifactKind::Video),
                };
                let ext = if ext.is_empty() { "bin" } else { ext };
                let path = self.staging_path(ext);
                tracing::info!(
                    "Fetching format {} of {} into {}",
                    candidate.format_id,
                    link,
                    path.display()
                );
                let fetched = self
                    .tools
                    .fetch_format(link, &candidate.format_id, &path)
                    .await;
                (self.settle(fetched, path).await?, kind)
            }
        };

        self.verify(path, kind).await
    }

    /// Extract the audio track of a staged video into `<stem>.mp3`.
    pub async fn extract_audio(&self, video: &Path) -> Result<DeliveredArtifact, AcquisitionError> {
        let dest = video.with_extension("mp3");
        let extracted = self.tools.extract_audio(video, &dest).await;
        let dest = self.settle(extracted, dest).await?;
        self.verify(dest, ArtifactKind::Audio).await
    }

    /// Leave no partial file behind when a fetch fails.
    async fn settle(
        &self,
        result: Result<(), AcquisitionError>,
        path: PathBuf,
    ) -> Result<PathBuf, AcquisitionError> {
        match result {
            Ok(()) => Ok(path),
            Err(e) => {
                remove_staged(&path).await;
                Err(e)
            }
        }
    }

    /// Confirm the artifact exists and enforce the upload ceiling.
    pub async fn verify(
        &self,
        path: PathBuf,
        kind: ArtifactKind,
    ) -> Result<DeliveredArtifact, AcquisitionError> {
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AcquisitionError::Fetch(format!(
                    "expected output {} is missing",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let size = meta.len();
        if size > self.max_upload_bytes {
            tracing::warn!(
                "{} is {} bytes, over the {} byte limit",
                path.display(),
                size,
                self.max_upload_bytes
            );
            remove_staged(&path).await;
            return Err(AcquisitionError::TooLarge {
                size,
                limit: self.max_upload_bytes,
            });
        }

        Ok(DeliveredArtifact { path, size, kind })
    }

    /// Delete staged files whose last modification is older than `max_age`.
    pub async fn sweep_staged(&self, max_age: Duration) -> std::io::Result<usize> {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.media_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let now = SystemTime::now();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age >= max_age {
                remove_staged(&entry.path()).await;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn is_bare_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.starts_with('.')
}
