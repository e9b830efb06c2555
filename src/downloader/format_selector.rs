// FormatSelector - deterministic stream selection
//
// Picks either one combined format or a (video-only, audio-only) pair.
// Handles:
// - Explicit format ids (combined, video-only or audio-only)
// - Quality hints ("1080p", "720", "best")
// - Independent best-audio choice
// - Combined fallback when no pair exists
//
// Ties are broken so that identical catalogs always yield identical picks:
// video prefers H.264, then bitrate, then catalog order; audio prefers
// bitrate, then AAC, then the smaller file, then catalog order.

use std::cmp::Ordering;

use lazy_static::lazy_static;
use regex::Regex;

use super::errors::SelectionError;
use super::models::{FormatDescriptor, Selection};

lazy_static! {
    static ref QUALITY_RE: Regex = Regex::new(r"^(?i)(\d{2,4})p?$").unwrap();
}

/// Interpretation of the caller's hint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityHint {
    /// Highest available
    Best,
    /// Highest at or below this height
    MaxHeight(u32),
}

impl QualityHint {
    /// Parse "best", "1080p", "720"; None for anything else
    pub fn parse(hint: &str) -> Option<Self> {
        let hint = hint.trim();
        if hint.eq_ignore_ascii_case("best") {
            return Some(Self::Best);
        }
        QUALITY_RE
            .captures(hint)
            .and_then(|caps| caps.get(1)?.as_str().parse().ok())
            .map(Self::MaxHeight)
    }
}

/// Format selector with a fixed best-match policy
pub struct FormatSelector;

impl FormatSelector {
    /// Select streams for a catalog and optional hint
    pub fn select(
        formats: &[FormatDescriptor],
        hint: Option<&str>,
    ) -> Result<Selection, SelectionError> {
        let hint = hint.map(str::trim).filter(|h| !h.is_empty());

        let quality = match hint {
            None => QualityHint::Best,
            Some(id) => {
                if let Some(format) = formats.iter().find(|f| f.format_id == id) {
                    return Self::select_by_id(formats, format);
                }
                QualityHint::parse(id)
                    .ok_or_else(|| SelectionError::UnknownFormat(id.to_string()))?
            }
        };

        Self::select_by_quality(formats, quality)
    }

    /// Select an explicit (video, audio) pair by ids
    pub fn select_pair(
        formats: &[FormatDescriptor],
        video_id: &str,
        audio_id: &str,
    ) -> Result<Selection, SelectionError> {
        let find = |id: &str| {
            formats
                .iter()
                .find(|f| f.format_id == id)
                .ok_or_else(|| SelectionError::UnknownFormat(id.to_string()))
        };
        let video = find(video_id)?;
        let audio = find(audio_id)?;

        if !video.has_video || !audio.has_audio {
            return Err(SelectionError::NoViableCombination);
        }
        if video.format_id == audio.format_id && video.is_combined() {
            return Ok(Selection::Combined(video.clone()));
        }

        Ok(Selection::Pair {
            video: video.clone(),
            audio: audio.clone(),
        })
    }

    fn select_by_id(
        formats: &[FormatDescriptor],
        chosen: &FormatDescriptor,
    ) -> Result<Selection, SelectionError> {
        if chosen.is_combined() {
            return Ok(Selection::Combined(chosen.clone()));
        }

        if chosen.is_video_only() {
            let audio = Self::find_best_audio(&Self::audio_only(formats))
                .ok_or(SelectionError::NoViableCombination)?;
            return Ok(Selection::Pair {
                video: chosen.clone(),
                audio: audio.clone(),
            });
        }

        let video = Self::find_video(&Self::video_only(formats), QualityHint::Best)
            .ok_or(SelectionError::NoViableCombination)?;
        Ok(Selection::Pair {
            video: video.clone(),
            audio: chosen.clone(),
        })
    }

    fn select_by_quality(
        formats: &[FormatDescriptor],
        quality: QualityHint,
    ) -> Result<Selection, SelectionError> {
        let video = Self::find_video(&Self::video_only(formats), quality);
        let audio = Self::find_best_audio(&Self::audio_only(formats));

        if let (Some(video), Some(audio)) = (video, audio) {
            return Ok(Selection::Pair {
                video: video.clone(),
                audio: audio.clone(),
            });
        }

        let combined: Vec<&FormatDescriptor> = formats.iter().filter(|f| f.is_combined()).collect();
        Self::find_video(&combined, quality)
            .map(|f| Selection::Combined(f.clone()))
            .ok_or(SelectionError::NoViableCombination)
    }

    fn video_only(formats: &[FormatDescriptor]) -> Vec<&FormatDescriptor> {
        formats.iter().filter(|f| f.is_video_only()).collect()
    }

    fn audio_only(formats: &[FormatDescriptor]) -> Vec<&FormatDescriptor> {
        formats.iter().filter(|f| f.is_audio_only()).collect()
    }

    /// Highest height within the hint; lowest available when nothing fits
    fn find_video<'a>(
        candidates: &[&'a FormatDescriptor],
        quality: QualityHint,
    ) -> Option<&'a FormatDescriptor> {
        let height = |f: &FormatDescriptor| f.height.unwrap_or(0);

        let fitting: Vec<&'a FormatDescriptor> = match quality {
            QualityHint::Best => candidates.to_vec(),
            QualityHint::MaxHeight(max) => {
                let below: Vec<_> = candidates
                    .iter()
                    .copied()
                    .filter(|f| height(*f) <= max)
                    .collect();
                if below.is_empty() {
                    let lowest = candidates.iter().map(|f| height(*f)).min()?;
                    candidates
                        .iter()
                        .copied()
                        .filter(|f| height(*f) == lowest)
                        .collect()
                } else {
                    below
                }
            }
        };

        // max_by returns the last maximum; iterate reversed so the earliest wins ties
        fitting.into_iter().rev().max_by(|a, b| Self::compare_video(a, b))
    }

    fn compare_video(a: &FormatDescriptor, b: &FormatDescriptor) -> Ordering {
        a.height
            .unwrap_or(0)
            .cmp(&b.height.unwrap_or(0))
            .then_with(|| a.is_h264().cmp(&b.is_h264()))
            .then_with(|| cmp_bitrate(a, b))
    }

    /// Find best audio format: bitrate, then AAC, then smaller size
    fn find_best_audio<'a>(candidates: &[&'a FormatDescriptor]) -> Option<&'a FormatDescriptor> {
        candidates.iter().rev().copied().max_by(|a, b| {
            cmp_bitrate(a, b)
                .then_with(|| a.is_aac().cmp(&b.is_aac()))
                .then_with(|| {
                    // unknown sizes rank below known ones
                    let size = |f: &FormatDescriptor| f.approx_size_bytes.unwrap_or(u64::MAX);
                    size(b).cmp(&size(a))
                })
        })
    }
}

fn cmp_bitrate(a: &FormatDescriptor, b: &FormatDescriptor) -> Ordering {
    let rate = |f: &FormatDescriptor| f.bitrate_kbps.unwrap_or(0.0);
    rate(a).total_cmp(&rate(b))
}
