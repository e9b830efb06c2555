// Format Catalog Resolver
//
// Normalizes raw extractor output into an ordered list of descriptors:
// known heights descending, unknown heights after them in extractor order.

use std::sync::Arc;

use tracing::{debug, info};
use url::Url;

use super::errors::ExtractionError;
use super::extractors::{ExtractorConfig, FormatExtractor, RawFormat, RawMediaInfo};
use super::models::{Container, FormatDescriptor, MediaCatalog};

/// Validate that the input is a usable http(s) URL
pub fn validate_source_url(input: &str) -> Result<Url, ExtractionError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ExtractionError::InvalidUrl("URL is empty".to_string()));
    }

    let url = Url::parse(trimmed).map_err(|e| ExtractionError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        scheme => Err(ExtractionError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            scheme
        ))),
    }
}

pub struct CatalogResolver {
    extractor: Arc<dyn FormatExtractor>,
    config: ExtractorConfig,
}

impl CatalogResolver {
    pub fn new(extractor: Arc<dyn FormatExtractor>, config: ExtractorConfig) -> Self {
        Self { extractor, config }
    }

    pub fn extractor(&self) -> &Arc<dyn FormatExtractor> {
        &self.extractor
    }

    /// Resolve a URL into its catalog; one extractor call
    pub async fn resolve(
        &self,
        source_url: &str,
        proxy: Option<&str>,
    ) -> Result<MediaCatalog, ExtractionError> {
        let url = validate_source_url(source_url)?;

        let mut config = self.config.clone();
        if let Some(p) = proxy.filter(|p| !p.trim().is_empty()) {
            config.proxy = Some(p.trim().to_string());
        }

        debug!(extractor = self.extractor.name(), %url, "resolving formats");
        let raw = self.extractor.extract(url.as_str(), &config).await?;
        let catalog = normalize(raw)?;

        info!(
            %url,
            title = %catalog.title,
            formats = catalog.formats.len(),
            "resolved format catalog"
        );
        Ok(catalog)
    }
}

/// Translate raw extractor output into a catalog
pub fn normalize(raw: RawMediaInfo) -> Result<MediaCatalog, ExtractionError> {
    let mut formats: Vec<FormatDescriptor> =
        raw.formats.iter().filter_map(describe).collect();

    // Some sites expose a single direct file instead of a format list
    if raw.formats.is_empty() {
        if let Some(url) = raw.url.as_ref() {
            formats.push(synthetic_default(&raw, url));
        }
    }

    if formats.is_empty() {
        return Err(ExtractionError::NoFormats);
    }

    // Stable: equal or unknown heights keep extractor order
    formats.sort_by_key(|f| std::cmp::Reverse(f.height.map_or(0, |h| h as u64 + 1)));

    Ok(MediaCatalog {
        title: raw.title.unwrap_or_else(|| "video".to_string()),
        thumbnail: raw.thumbnail,
        formats,
    })
}

fn codec_present(codec: Option<&str>) -> bool {
    codec.is_some_and(|c| !c.is_empty() && c != "none")
}

fn describe(f: &RawFormat) -> Option<FormatDescriptor> {
    let has_video = codec_present(f.vcodec.as_deref());
    let has_audio = codec_present(f.acodec.as_deref());
    if !has_video && !has_audio {
        // storyboards, manifests without codec info
        return None;
    }

    let resolution = if has_video {
        f.resolution
            .clone()
            .or_else(|| match (f.width, f.height) {
                (Some(w), Some(h)) => Some(format!("{}x{}", w, h)),
                (None, Some(h)) => Some(format!("{}p", h)),
                _ => None,
            })
    } else {
        Some("audio only".to_string())
    };

    let bitrate_kbps = if has_video { f.tbr } else { f.abr.or(f.tbr) };
    let mut note = f.format_note.clone().unwrap_or_default();
    if let Some(rate) = bitrate_kbps {
        note = format!("{} ({}kbps)", note, rate as u32).trim().to_string();
    }

    let video_codec = f.vcodec.clone().filter(|_| has_video);
    let audio_codec = f.acodec.clone().filter(|_| has_audio);

    Some(FormatDescriptor {
        format_id: f.format_id.clone(),
        container: Container::from_ext(f.ext.as_deref().unwrap_or_default()),
        has_video,
        has_audio,
        resolution,
        codec: video_codec.clone().or_else(|| audio_codec.clone()),
        approx_size_bytes: f.filesize.or(f.filesize_approx),
        height: f.height.filter(|_| has_video),
        note,
        bitrate_kbps,
        video_codec,
        audio_codec,
        protocol: f.protocol.clone(),
        direct_url: f.url.clone(),
        http_headers: f.http_headers.clone(),
    })
}

fn synthetic_default(raw: &RawMediaInfo, url: &str) -> FormatDescriptor {
    let resolution = match (raw.width, raw.height) {
        (Some(w), Some(h)) => Some(format!("{}x{}", w, h)),
        _ => None,
    };

    FormatDescriptor {
        format_id: "default".to_string(),
        container: Container::from_ext(raw.ext.as_deref().unwrap_or("mp4")),
        has_video: true,
        has_audio: true,
        resolution,
        codec: None,
        approx_size_bytes: raw.filesize,
        height: raw.height,
        note: "Default Source".to_string(),
        bitrate_kbps: None,
        video_codec: None,
        audio_codec: None,
        protocol: None,
        direct_url: Some(url.to_string()),
        http_headers: Default::default(),
    }
}
