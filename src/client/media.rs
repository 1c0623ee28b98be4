//! Media classification and naming helpers shared by the send and download paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::BridgeError;

/// Attachment category, as stored in the `media_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
        }
    }
}

impl FromStr for MediaKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            "document" => Ok(MediaKind::Document),
            other => Err(BridgeError::InvalidInput(format!(
                "unsupported media type: {}",
                other
            ))),
        }
    }
}

/// Kind and MIME type for an outgoing file, decided by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaFormat {
    pub kind: MediaKind,
    pub mime_type: &'static str,
}

impl MediaFormat {
    /// Voice notes get duration and waveform attached.
    pub fn is_ogg(&self) -> bool {
        self.mime_type.contains("ogg")
    }
}

/// Classify a file by extension (case-insensitive). Unknown extensions are documents.
pub fn classify(path: &Path) -> MediaFormat {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let (kind, mime_type) = match ext.as_str() {
        "jpg" | "jpeg" => (MediaKind::Image, "image/jpeg"),
        "png" => (MediaKind::Image, "image/png"),
        "gif" => (MediaKind::Image, "image/gif"),
        "webp" => (MediaKind::Image, "image/webp"),
        "ogg" => (MediaKind::Audio, "audio/ogg; codecs=opus"),
        "mp3" => (MediaKind::Audio, "audio/mpeg"),
        "m4a" => (MediaKind::Audio, "audio/mp4"),
        "wav" => (MediaKind::Audio, "audio/wav"),
        "mp4" => (MediaKind::Video, "video/mp4"),
        "avi" => (MediaKind::Video, "video/avi"),
        "mov" => (MediaKind::Video, "video/quicktime"),
        _ => (MediaKind::Document, "application/octet-stream"),
    };

    MediaFormat { kind, mime_type }
}

/// Filename for an incoming attachment that arrived without one.
///
/// Documents keep their own name when the sender supplied it.
pub fn default_filename(kind: MediaKind, received_at: DateTime<Utc>, supplied: Option<&str>) -> String {
    let stamp = received_at.format("%Y%m%d_%H%M%S");
    match kind {
        MediaKind::Image => format!("image_{}.jpg", stamp),
        MediaKind::Video => format!("video_{}.mp4", stamp),
        MediaKind::Audio => format!("audio_{}.ogg", stamp),
        MediaKind::Document => match supplied {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => format!("document_{}", stamp),
        },
    }
}

/// CDN direct path from a media URL: the part after `.net/`, query dropped, with a
/// leading `/`. URLs without `.net/` come back unchanged.
pub fn direct_path_from_url(url: &str) -> String {
    match url.split_once(".net/") {
        Some((_, path)) => {
            let path = path.split('?').next().unwrap_or(path);
            format!("/{}", path)
        }
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_classify_by_extension() {
        let ogg = classify(Path::new("/tmp/note.OGG"));
        assert_eq!(ogg.kind, MediaKind::Audio);
        assert_eq!(ogg.mime_type, "audio/ogg; codecs=opus");
        assert!(ogg.is_ogg());

        assert_eq!(classify(Path::new("a.jpeg")).mime_type, "image/jpeg");
        assert_eq!(classify(Path::new("clip.mov")).kind, MediaKind::Video);
        assert!(!classify(Path::new("song.mp3")).is_ogg());

        let doc = classify(Path::new("report.pdf"));
        assert_eq!(doc.kind, MediaKind::Document);
        assert_eq!(doc.mime_type, "application/octet-stream");
        assert_eq!(classify(Path::new("no_extension")).kind, MediaKind::Document);
    }

    #[test]
    fn test_default_filenames() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(default_filename(MediaKind::Image, at, None), "image_20240309_140507.jpg");
        assert_eq!(default_filename(MediaKind::Audio, at, None), "audio_20240309_140507.ogg");
        assert_eq!(default_filename(MediaKind::Document, at, Some("")), "document_20240309_140507");
        assert_eq!(default_filename(MediaKind::Document, at, Some("cv.pdf")), "cv.pdf");
    }

    #[test]
    fn test_direct_path_from_url() {
        assert_eq!(
            direct_path_from_url("https://mmg.whatsapp.net/v/t62.7118-24/abc_n.enc?ccb=11-4&oh=x"),
            "/v/t62.7118-24/abc_n.enc"
        );
        assert_eq!(direct_path_from_url("https://example.com/file"), "https://example.com/file");
    }

    #[test]
    fn test_media_kind_round_trip_names() {
        assert_eq!("audio".parse::<MediaKind>().unwrap(), MediaKind::Audio);
        assert!("sticker".parse::<MediaKind>().is_err());
    }
}
