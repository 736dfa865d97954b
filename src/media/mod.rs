pub mod formats;
pub mod pipeline;
pub mod tools;

/// Supported link sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Instagram,
    TikTok,
    YouTube,
}

impl SourceKind {
    /// Short tag embedded in audio-offer payloads.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Instagram => "insta",
            Self::TikTok => "tiktok",
            Self::YouTube => "youtube",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "insta" => Some(Self::Instagram),
            "tiktok" => Some(Self::TikTok),
            "youtube" => Some(Self::YouTube),
            _ => None,
        }
    }

    /// Instagram and TikTok resolve to one URL; YouTube needs a format menu.
    pub fn is_multi_format(&self) -> bool {
        matches!(self, Self::YouTube)
    }
}
