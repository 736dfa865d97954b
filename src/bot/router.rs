//! Text classification. Pure functions; the pending-input check that runs
//! before any of this lives in [`crate::bot::handlers`].

use crate::media::SourceKind;

pub const CANCEL_KEYWORD: &str = "/cancel";

/// Link prefixes per source, matched case-insensitively in table order.
const LINK_PREFIXES: &[(&str, SourceKind)] = &[
    ("https://www.instagram.com/", SourceKind::Instagram),
    ("https://instagram.com/", SourceKind::Instagram),
    ("instagram", SourceKind::Instagram),
    ("https://www.tiktok.com/", SourceKind::TikTok),
    ("https://vm.tiktok.com/", SourceKind::TikTok),
    ("https://vt.tiktok.com/", SourceKind::TikTok),
    ("tiktok", SourceKind::TikTok),
    ("https://www.youtube.com/", SourceKind::YouTube),
    ("https://youtube.com/", SourceKind::YouTube),
    ("https://m.youtube.com/", SourceKind::YouTube),
    ("https://youtu.be/", SourceKind::YouTube),
    ("youtube", SourceKind::YouTube),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Admin,
}

/// Reply-keyboard labels of the admin console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminButton {
    Statistics,
    Broadcast,
    AddChannel,
    RemoveChannel,
    AddAdmin,
    RemoveAdmin,
    Backup,
}

impl AdminButton {
    pub const ALL: [AdminButton; 7] = [
        Self::Statistics,
        Self::Broadcast,
        Self::AddChannel,
        Self::RemoveChannel,
        Self::AddAdmin,
        Self::RemoveAdmin,
        Self::Backup,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Statistics => "Statistika",
            Self::Broadcast => "Habar yuborish",
            Self::AddChannel => "Kanal qo'shish",
            Self::RemoveChannel => "Kanal o'chirish",
            Self::AddAdmin => "Admin qo'shish",
            Self::RemoveAdmin => "Admin o'chirish",
            Self::Backup => "BackUp olish",
        }
    }

    pub fn from_label(text: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.label() == text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextRoute {
    Command(Command),
    Link(SourceKind),
    AdminButton(AdminButton),
    Ignore,
}

pub fn classify_link(text: &str) -> Option<SourceKind> {
    let lower = text.trim().to_lowercase();
    LINK_PREFIXES
        .iter()
        .find(|(prefix, _)| lower.starts_with(prefix))
        .map(|(_, kind)| *kind)
}

/// Route free text that arrived with no pending input.
pub fn classify_text(text: &str) -> TextRoute {
    match text.trim() {
        "/start" => return TextRoute::Command(Command::Start),
        "/admin" => return TextRoute::Command(Command::Admin),
        _ => {}
    }
    if let Some(kind) = classify_link(text) {
        return TextRoute::Link(kind);
    }
    match AdminButton::from_label(text.trim()) {
        Some(button) => TextRoute::AdminButton(button),
        None => TextRoute::Ignore,
    }
}

pub fn is_cancel(text: &str) -> bool {
    text.trim() == CANCEL_KEYWORD
}
