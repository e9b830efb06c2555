// FormatExtractor trait and the raw metadata it returns

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::downloader::errors::ExtractionError;

/// Configuration for info extraction
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// SOCKS5/HTTP proxy URL
    pub proxy: Option<String>,
    /// Path to a Netscape cookies.txt file
    pub cookies_path: Option<String>,
    /// Whole-call timeout in seconds
    pub timeout_seconds: u64,
    /// Per-socket timeout handed to the extractor
    pub socket_timeout_seconds: u32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            cookies_path: None,
            timeout_seconds: 60,
            socket_timeout_seconds: 15,
        }
    }
}

impl ExtractorConfig {
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_cookies_path(mut self, path: Option<String>) -> Self {
        self.cookies_path = path;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}

/// One format entry exactly as the extractor reported it
#[derive(Debug, Clone, Default)]
pub struct RawFormat {
    pub format_id: String,
    pub ext: Option<String>,
    pub resolution: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<u64>,
    /// Total bitrate in kbps
    pub tbr: Option<f32>,
    /// Audio bitrate in kbps
    pub abr: Option<f32>,
    pub format_note: Option<String>,
    pub protocol: Option<String>,
    pub url: Option<String>,
    pub http_headers: BTreeMap<String, String>,
}

/// Extractor output for one source URL
#[derive(Debug, Clone, Default)]
pub struct RawMediaInfo {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    /// Top-level fields used when a site exposes a single direct file
    pub url: Option<String>,
    pub ext: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub filesize: Option<u64>,
    pub formats: Vec<RawFormat>,
}

impl RawMediaInfo {
    /// Parse the extractor's JSON document
    pub fn from_json(json: &serde_json::Value) -> Self {
        let str_field = |v: &serde_json::Value, key: &str| {
            v[key]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let u32_field = |v: &serde_json::Value, key: &str| v[key].as_u64().map(|n| n as u32);
        // extractors emit sizes as integers or floats depending on the site
        let size_field = |v: &serde_json::Value, key: &str| {
            v[key]
                .as_u64()
                .or_else(|| v[key].as_f64().filter(|n| *n >= 0.0).map(|n| n as u64))
        };

        let thumbnail = str_field(json, "thumbnail").or_else(|| {
            json["thumbnails"]
                .as_array()
                .and_then(|thumbs| thumbs.last())
                .and_then(|t| str_field(t, "url"))
        });

        let formats = json["formats"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|f| {
                        let format_id = str_field(f, "format_id")?;
                        let http_headers = f["http_headers"]
                            .as_object()
                            .map(|h| {
                                h.iter()
                                    .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                                    .collect()
                            })
                            .unwrap_or_default();

                        Some(RawFormat {
                            format_id,
                            ext: str_field(f, "ext"),
                            resolution: str_field(f, "resolution"),
                            width: u32_field(f, "width"),
                            height: u32_field(f, "height"),
                            vcodec: str_field(f, "vcodec"),
                            acodec: str_field(f, "acodec"),
                            filesize: size_field(f, "filesize"),
                            filesize_approx: size_field(f, "filesize_approx"),
                            tbr: f["tbr"].as_f64().map(|t| t as f32),
                            abr: f["abr"].as_f64().map(|a| a as f32),
                            format_note: str_field(f, "format_note"),
                            protocol: str_field(f, "protocol"),
                            url: str_field(f, "url"),
                            http_headers,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            title: str_field(json, "title"),
            thumbnail,
            url: str_field(json, "url"),
            ext: str_field(json, "ext"),
            width: u32_field(json, "width"),
            height: u32_field(json, "height"),
            filesize: size_field(json, "filesize"),
            formats,
        }
    }
}

/// External capability turning a URL into raw stream metadata
#[async_trait]
pub trait FormatExtractor: Send + Sync {
    /// Name of the extractor (for logging)
    fn name(&self) -> &'static str;

    /// Check if this extractor is available
    async fn is_available(&self) -> bool;

    /// Extract metadata and formats; called once per resolution
    async fn extract(
        &self,
        url: &str,
        config: &ExtractorConfig,
    ) -> Result<RawMediaInfo, ExtractionError>;
}
