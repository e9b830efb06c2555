// Error taxonomy for the download-merge-stream pipeline

use std::fmt;

use thiserror::Error;

use super::extractors::{diagnose_error, BlockingReason};

/// Failure while resolving the format catalog for a URL
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    /// URL is empty, unparsable, or not http(s)
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The extractor does not know how to handle this site
    #[error("Unsupported source: {0}")]
    Unsupported(String),

    /// Content exists but cannot be fetched (private, removed, DRM, geo, age)
    #[error("Content unavailable: {0}")]
    Unavailable(String),

    /// The extractor ran but returned no usable formats
    #[error("No downloadable formats found")]
    NoFormats,

    /// Transient network condition (timeout, refused, rate limited)
    #[error("Network error during extraction: {0}")]
    Network(String),

    /// Extractor binary missing, crashed, or produced unparsable output
    #[error("Extractor failure: {0}")]
    Tool(String),
}

impl ExtractionError {
    /// Whether retrying the same request later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Classify extractor stderr into a taxonomy entry
    pub fn from_stderr(stderr: &str) -> Self {
        let lower = stderr.to_lowercase();
        let line = first_error_line(stderr);

        if lower.contains("unsupported url") || lower.contains("no suitable extractor") {
            return Self::Unsupported(line);
        }
        if lower.contains("is not a valid url") || lower.contains("invalid url") {
            return Self::InvalidUrl(line);
        }

        match diagnose_error(stderr) {
            Some(reason) if reason.is_network() => Self::Network(reason.description().to_string()),
            Some(BlockingReason::Unknown) | None => Self::Tool(line),
            Some(reason) => Self::Unavailable(reason.description().to_string()),
        }
    }
}

/// Picks the most relevant line of tool output
fn first_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .find(|l| l.to_lowercase().starts_with("error"))
        .or_else(|| stderr.lines().map(str::trim).find(|l| !l.is_empty()))
        .unwrap_or("unknown error")
        .chars()
        .take(300)
        .collect()
}

/// No viable stream selection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("Requested format '{0}' does not exist")]
    UnknownFormat(String),

    #[error("No combination of formats yields both video and audio")]
    NoViableCombination,
}

/// Which selected stream a fetch error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    Video,
    Audio,
    Combined,
}

impl StreamRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Combined => "combined",
        }
    }
}

impl fmt::Display for StreamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailure {
    SizeLimit,
    Timeout,
    Network,
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SizeLimit => write!(f, "SIZE_LIMIT"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Network => write!(f, "NETWORK"),
        }
    }
}

/// Download of a selected stream failed
#[derive(Debug, Clone, Error)]
#[error("Fetch of {role} stream failed ({reason}): {detail}")]
pub struct FetchError {
    pub role: StreamRole,
    pub reason: FetchFailure,
    pub detail: String,
}

impl FetchError {
    pub fn new(role: StreamRole, reason: FetchFailure, detail: impl Into<String>) -> Self {
        Self {
            role,
            reason,
            detail: detail.into(),
        }
    }

    pub fn network(role: StreamRole, detail: impl Into<String>) -> Self {
        Self::new(role, FetchFailure::Network, detail)
    }

    pub fn size_limit(role: StreamRole, limit: u64) -> Self {
        Self::new(
            role,
            FetchFailure::SizeLimit,
            format!("stream exceeds {} bytes", limit),
        )
    }

    pub fn timeout(role: StreamRole, secs: u64) -> Self {
        Self::new(
            role,
            FetchFailure::Timeout,
            format!("no completion within {}s", secs),
        )
    }
}

/// Muxer rejected the inputs or produced no output
#[derive(Debug, Clone, Error)]
#[error("Mux failed (exit code {exit_code:?}): {stderr_excerpt}")]
pub struct MuxError {
    pub exit_code: Option<i32>,
    pub stderr_excerpt: String,
}

impl MuxError {
    /// Maximum characters of stderr retained in the error
    pub const EXCERPT_LEN: usize = 512;

    pub fn new(exit_code: Option<i32>, stderr: &str) -> Self {
        // ffmpeg prints the cause last
        let trimmed = stderr.trim();
        let skip = trimmed.chars().count().saturating_sub(Self::EXCERPT_LEN);
        Self {
            exit_code,
            stderr_excerpt: trimmed.chars().skip(skip).collect(),
        }
    }
}

/// Streaming the deliverable to the client was interrupted
#[derive(Debug, Clone, Error)]
#[error("Delivery interrupted: {0}")]
pub struct DeliveryError(pub String);

/// Any failure of a download job
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Mux(#[from] MuxError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Stable machine-readable kind for API responses
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::Extraction(_) => "ExtractionError",
            Self::Selection(_) => "SelectionError",
            Self::Fetch(_) => "FetchError",
            Self::Mux(_) => "MuxError",
            Self::Delivery(_) => "DeliveryError",
            Self::Io(_) => "InternalError",
        }
    }

    /// Whether the caller can fix the request (bad URL, missing format, too large)
    pub fn is_user_correctable(&self) -> bool {
        match self {
            Self::InvalidRequest(_) | Self::Selection(_) => true,
            Self::Extraction(e) => matches!(
                e,
                ExtractionError::InvalidUrl(_)
                    | ExtractionError::Unsupported(_)
                    | ExtractionError::Unavailable(_)
                    | ExtractionError::NoFormats
            ),
            Self::Fetch(e) => e.reason == FetchFailure::SizeLimit,
            Self::Mux(_) | Self::Delivery(_) | Self::Io(_) => false,
        }
    }

    /// Client-safe message: never contains temp paths or tool stderr
    pub fn public_message(&self) -> String {
        match self {
            Self::Fetch(e) => match e.reason {
                FetchFailure::SizeLimit => {
                    format!("The {} stream exceeds the maximum allowed size", e.role)
                }
                FetchFailure::Timeout => format!("Downloading the {} stream timed out", e.role),
                FetchFailure::Network => {
                    format!("Network error while downloading the {} stream", e.role)
                }
            },
            Self::Mux(e) => match e.exit_code {
                Some(code) => format!("Merging video and audio failed (exit code {})", code),
                None => "Merging video and audio failed".to_string(),
            },
            Self::Extraction(ExtractionError::Tool(_)) => {
                "The media extractor failed to process this URL".to_string()
            }
            Self::Delivery(_) => "Streaming the file was interrupted".to_string(),
            Self::Io(_) => "Internal storage error".to_string(),
            other => other.to_string(),
        }
    }
}
