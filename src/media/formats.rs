use serde::Deserialize;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::bot::callbacks::{CallbackCommand, PAYLOAD_SEPARATOR};

/// Resolutions offered to the user, in button order.
pub const RESOLUTION_TIERS: [u32; 4] = [360, 480, 720, 1080];

/// Only this container is offered for video tiers.
pub const ACCEPTED_CONTAINER: &str = "mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaClass {
    Video,
    AudioOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormatCandidate {
    pub format_id: String,
    pub media_class: MediaClass,
    pub container: String,
    /// Pixel height, meaningful for video only.
    pub resolution: u32,
    /// Exact or approximate size; 0 when the probe did not report one.
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaMetadata {
    pub title: String,
    pub duration_secs: f64,
    pub formats: Vec<FormatCandidate>,
}

/// Result of the format policy: best video per tier (ascending) and best audio.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatSelection {
    pub by_tier: Vec<(u32, FormatCandidate)>,
    pub audio: Option<FormatCandidate>,
}

impl FormatSelection {
    pub fn is_empty(&self) -> bool {
        self.by_tier.is_empty() && self.audio.is_none()
    }
}

// ── yt-dlp --dump-json ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ProbeDocument {
    #[serde(default)]
    title: String,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    formats: Vec<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    format_id: String,
    #[serde(default)]
    ext: String,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    filesize: Option<f64>,
    #[serde(default)]
    filesize_approx: Option<f64>,
    #[serde(default)]
    vcodec: Option<String>,
    #[serde(default)]
    acodec: Option<String>,
}

impl ProbeFormat {
    fn has_codec(codec: &Option<String>) -> bool {
        codec.as_deref().is_some_and(|c| c != "none")
    }

    /// `None` for entries carrying neither stream, such as storyboards.
    fn into_candidate(self) -> Option<FormatCandidate> {
        let size = match (self.filesize, self.filesize_approx) {
            (Some(exact), _) if exact > 0.0 => exact,
            (_, Some(approx)) if approx > 0.0 => approx,
            _ => 0.0,
        };
        let media_class = match self.vcodec.as_deref() {
            Some("none") if Self::has_codec(&self.acodec) => MediaClass::AudioOnly,
            Some("none") => {
                tracing::debug!("Skipping format '{}' without audio or video", self.format_id);
                return None;
            }
            _ => MediaClass::Video,
        };
        Some(FormatCandidate {
            format_id: self.format_id,
            media_class,
            container: self.ext,
            resolution: self.height.unwrap_or(0),
            size_bytes: size as u64,
        })
    }
}

/// Parse a metadata probe document. Formats whose id collides with the
/// callback separator are dropped, they could never be round-tripped.
pub fn parse_probe_output(raw: &[u8]) -> serde_json::Result<MediaMetadata> {
    let doc: ProbeDocument = serde_json::from_slice(raw)?;
    let formats = doc
        .formats
        .into_iter()
        .filter(|f| {
            let usable = !f.format_id.is_empty() && !f.format_id.contains(PAYLOAD_SEPARATOR);
            if !usable {
                tracing::debug!("Skipping format with unusable id '{}'", f.format_id);
            }
            usable
        })
        .filter_map(ProbeFormat::into_candidate)
        .collect();

    Ok(MediaMetadata {
        title: doc.title,
        duration_secs: doc.duration.unwrap_or(0.0),
        formats,
    })
}

// ── Selection policy ───────────────────────────────────────────────

/// Known sizes beat unknown ones; among known sizes only a strictly larger
/// one replaces the incumbent, so equal sizes keep catalog order.
fn should_replace(current: Option<&FormatCandidate>, challenger: &FormatCandidate) -> bool {
    match current {
        None => true,
        Some(current) => match (current.size_bytes, challenger.size_bytes) {
            (_, 0) => false,
            (0, _) => true,
            (cur, new) => new > cur,
        },
    }
}

pub fn select_formats(candidates: &[FormatCandidate]) -> FormatSelection {
    let mut best: [Option<&FormatCandidate>; RESOLUTION_TIERS.len()] = [None; RESOLUTION_TIERS.len()];
    let mut audio: Option<&FormatCandidate> = None;

    for candidate in candidates {
        match candidate.media_class {
            MediaClass::AudioOnly => {
                if should_replace(audio, candidate) {
                    audio = Some(candidate);
                }
            }
            MediaClass::Video => {
                if candidate.container != ACCEPTED_CONTAINER {
                    continue;
                }
                let Some(slot) = RESOLUTION_TIERS
                    .iter()
                    .position(|tier| *tier == candidate.resolution)
                else {
                    continue;
                };
                if should_replace(best[slot], candidate) {
                    best[slot] = Some(candidate);
                }
            }
        }
    }

    FormatSelection {
        by_tier: RESOLUTION_TIERS
            .iter()
            .zip(best)
            .filter_map(|(tier, c)| c.map(|c| (*tier, c.clone())))
            .collect(),
        audio: audio.cloned(),
    }
}

// ── Presentation ───────────────────────────────────────────────────

pub fn size_label(bytes: u64) -> String {
    format!("{:.1}MB", bytes as f64 / 1024.0 / 1024.0)
}

/// Seconds as `HH:MM:SS`.
pub fn format_duration(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

pub fn format_choice_keyboard(selection: &FormatSelection) -> InlineKeyboardMarkup {
    let mut rows = Vec::new();
    for (tier, candidate) in &selection.by_tier {
        rows.push(vec![InlineKeyboardButton::callback(
            format!("{}p - {}", tier, size_label(candidate.size_bytes)),
            CallbackCommand::SelectFormat(candidate.format_id.clone()).encode(),
        )]);
    }
    if let Some(audio) = &selection.audio {
        rows.push(vec![InlineKeyboardButton::callback(
            format!("Audio - {}", size_label(audio.size_bytes)),
            CallbackCommand::SelectFormat(audio.format_id.clone()).encode(),
        )]);
    }
    InlineKeyboardMarkup::new(rows)
}
