use serde::Serialize;

/// What kind of chat attachment a file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundFileKind {
    Document,
    Photo,
    Video,
    Audio,
    Voice,
    Sticker { animated: bool, video: bool },
    Animation,
    VideoNote,
}

impl InboundFileKind {
    fn fallback_name(self, unique_id: &str) -> String {
        match self {
            Self::Document => format!("document_{unique_id}"),
            Self::Photo => format!("photo_{unique_id}.jpg"),
            Self::Video => format!("video_{unique_id}.mp4"),
            Self::Audio => format!("audio_{unique_id}.mp3"),
            Self::Voice => format!("voice_{unique_id}.ogg"),
            Self::Sticker { animated: true, .. } => format!("sticker_{unique_id}.tgs"),
            Self::Sticker { video: true, .. } => format!("sticker_{unique_id}.webm"),
            Self::Sticker { .. } => format!("sticker_{unique_id}.webp"),
            Self::Animation => format!("animation_{unique_id}.gif"),
            Self::VideoNote => format!("video_note_{unique_id}.mp4"),
        }
    }

    /// Kinds whose sender-supplied filename is kept when present.
    fn keeps_sender_name(self) -> bool {
        matches!(
            self,
            Self::Document | Self::Video | Self::Audio | Self::Animation
        )
    }
}

/// A file announced by the chat layer, not yet downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundFile {
    pub kind: InboundFileKind,
    /// Opaque handle the chat layer downloads the content with.
    pub file_id: String,
    pub suggested_name: String,
}

impl InboundFile {
    pub fn new(
        kind: InboundFileKind,
        file_id: impl Into<String>,
        unique_id: &str,
        file_name: Option<&str>,
    ) -> Self {
        let name = match file_name.map(str::trim) {
            Some(name) if kind.keeps_sender_name() && !name.is_empty() => name.to_string(),
            _ => kind.fallback_name(unique_id),
        };
        Self {
            kind,
            file_id: file_id.into(),
            suggested_name: sanitize_filename(&name),
        }
    }
}

/// Makes a sender-controlled name safe to use as a single path component.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim();
    match cleaned {
        "" => "file".to_string(),
        "." | ".." => cleaned.replace('.', "_"),
        _ => cleaned.to_string(),
    }
}
