// Common data models for the pipeline

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Container format of a stream or deliverable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    WebM,
    M4a,
    Matroska,
    Mp3,
    Ogg,
    Flv,
    #[serde(rename = "3gp")]
    ThreeGp,
    Unknown,
}

impl Container {
    /// Map an extractor file extension to a container
    pub fn from_ext(ext: &str) -> Self {
        match ext.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "mp4" | "m4v" | "mov" => Self::Mp4,
            "webm" => Self::WebM,
            "m4a" | "aac" => Self::M4a,
            "mkv" => Self::Matroska,
            "mp3" => Self::Mp3,
            "ogg" | "opus" | "oga" => Self::Ogg,
            "flv" => Self::Flv,
            "3gp" => Self::ThreeGp,
            _ => Self::Unknown,
        }
    }

    /// File extension used for temp files and suggested filenames
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::WebM => "webm",
            Self::M4a => "m4a",
            Self::Matroska => "mkv",
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
            Self::Flv => "flv",
            Self::ThreeGp => "3gp",
            Self::Unknown => "bin",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::WebM => "video/webm",
            Self::M4a => "audio/mp4",
            Self::Matroska => "video/x-matroska",
            Self::Mp3 => "audio/mpeg",
            Self::Ogg => "audio/ogg",
            Self::Flv => "video/x-flv",
            Self::ThreeGp => "video/3gpp",
            Self::Unknown => "application/octet-stream",
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// One selectable encoded track offered by a source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatDescriptor {
    /// Unique within one resolution response (e.g. "137", "140")
    pub format_id: String,
    pub container: Container,
    pub has_video: bool,
    pub has_audio: bool,
    /// Display resolution (e.g. "1920x1080", "audio only")
    pub resolution: Option<String>,
    /// Primary codec: video codec when video is present, else audio codec
    pub codec: Option<String>,
    pub approx_size_bytes: Option<u64>,
    pub height: Option<u32>,
    /// Human-readable note from the extractor, with bitrate when known
    pub note: String,

    /// Audio bitrate for audio streams, else total bitrate (kbps)
    #[serde(skip)]
    pub bitrate_kbps: Option<f32>,
    #[serde(skip)]
    pub video_codec: Option<String>,
    #[serde(skip)]
    pub audio_codec: Option<String>,
    /// Transfer protocol reported by the extractor (https, m3u8_native, ...)
    #[serde(skip)]
    pub protocol: Option<String>,
    /// Direct media URL, when the extractor exposed one
    #[serde(skip)]
    pub direct_url: Option<String>,
    /// Headers the source expects on the media request
    #[serde(skip)]
    pub http_headers: BTreeMap<String, String>,
}

impl FormatDescriptor {
    /// "video", "audio", or "combined"
    pub fn kind(&self) -> &'static str {
        match (self.has_video, self.has_audio) {
            (true, true) => "combined",
            (true, false) => "video",
            _ => "audio",
        }
    }

    pub fn is_combined(&self) -> bool {
        self.has_video && self.has_audio
    }

    pub fn is_video_only(&self) -> bool {
        self.has_video && !self.has_audio
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }

    /// Check if video is H.264 (avc1)
    pub fn is_h264(&self) -> bool {
        self.video_codec
            .as_deref()
            .is_some_and(|v| v.starts_with("avc1") || v.starts_with("h264"))
    }

    /// Check if audio is AAC (mp4a)
    pub fn is_aac(&self) -> bool {
        self.audio_codec
            .as_deref()
            .is_some_and(|a| a.starts_with("mp4a") || a == "aac")
    }

    /// Check if audio is Opus or Vorbis (WebM-native)
    pub fn is_webm_audio(&self) -> bool {
        self.audio_codec
            .as_deref()
            .is_some_and(|a| a.starts_with("opus") || a.starts_with("vorbis"))
    }

    /// Whether the bytes can be fetched with a plain HTTP GET
    pub fn is_direct_http(&self) -> bool {
        self.direct_url.is_some()
            && matches!(self.protocol.as_deref(), None | Some("http") | Some("https"))
    }
}

/// Serializable view of a descriptor for API responses
#[derive(Debug, Serialize)]
pub struct FormatView<'a> {
    #[serde(flatten)]
    pub format: &'a FormatDescriptor,
    #[serde(rename = "type")]
    pub kind: FormatKind<'a>,
}

#[derive(Debug)]
pub struct FormatKind<'a>(pub &'a FormatDescriptor);

impl Serialize for FormatKind<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.kind())
    }
}

impl<'a> From<&'a FormatDescriptor> for FormatView<'a> {
    fn from(format: &'a FormatDescriptor) -> Self {
        Self {
            format,
            kind: FormatKind(format),
        }
    }
}

/// Resolver output: source metadata plus ordered formats
#[derive(Debug, Clone)]
pub struct MediaCatalog {
    pub title: String,
    pub thumbnail: Option<String>,
    pub formats: Vec<FormatDescriptor>,
}

/// Caller-supplied download request
#[derive(Debug, Clone, Default)]
pub struct SelectionRequest {
    pub source_url: String,
    /// Format id, or a quality hint such as "1080p" or "best"
    pub desired_format_id: Option<String>,
    /// Explicit (video, audio) format ids, bypassing the selector policy
    pub explicit_pair: Option<(String, String)>,
    /// Per-request proxy override
    pub proxy: Option<String>,
}

impl SelectionRequest {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format_id: Option<String>) -> Self {
        self.desired_format_id = format_id;
        self
    }

    pub fn with_pair(mut self, video: String, audio: String) -> Self {
        self.explicit_pair = Some((video, audio));
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }
}

/// Outcome of stream selection
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Already muxed; delivered as downloaded
    Combined(FormatDescriptor),
    /// Separate tracks that must be muxed
    Pair {
        video: FormatDescriptor,
        audio: FormatDescriptor,
    },
}

impl Selection {
    pub fn needs_mux(&self) -> bool {
        matches!(self, Self::Pair { .. })
    }

    /// Format ids in (video, audio) order, for logging
    pub fn format_ids(&self) -> String {
        match self {
            Self::Combined(f) => f.format_id.clone(),
            Self::Pair { video, audio } => format!("{}+{}", video.format_id, audio.format_id),
        }
    }
}

/// Lifecycle of a download job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Created,
    Fetching,
    Muxing,
    Ready,
    Streaming,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_from_ext() {
        assert_eq!(Container::from_ext("MP4"), Container::Mp4);
        assert_eq!(Container::from_ext(".webm"), Container::WebM);
        assert_eq!(Container::from_ext("opus"), Container::Ogg);
        assert_eq!(Container::from_ext("mhtml"), Container::Unknown);
        assert_eq!(Container::Unknown.mime_type(), "application/octet-stream");
    }

    #[test]
    fn test_format_view_hides_internal_fields() {
        let format = FormatDescriptor {
            format_id: "22".to_string(),
            container: Container::Mp4,
            has_video: true,
            has_audio: true,
            resolution: Some("1280x720".to_string()),
            codec: Some("avc1.64001F".to_string()),
            approx_size_bytes: Some(1024),
            height: Some(720),
            note: "720p".to_string(),
            bitrate_kbps: Some(1500.0),
            video_codec: Some("avc1.64001F".to_string()),
            audio_codec: Some("mp4a.40.2".to_string()),
            protocol: Some("https".to_string()),
            direct_url: Some("https://cdn.example/secret".to_string()),
            http_headers: BTreeMap::new(),
        };

        let json = serde_json::to_value(FormatView::from(&format)).unwrap();
        assert_eq!(json["type"], "combined");
        assert_eq!(json["container"], "mp4");
        assert!(json.get("direct_url").is_none());
        assert!(!json.to_string().contains("secret"));
    }
}
