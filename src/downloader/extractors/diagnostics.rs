// Extractor diagnostics - classifies tool error output
//
// The extractor reports failures as free text on stderr. Patterns are
// checked from most to least specific so that e.g. a DRM notice that also
// mentions "403" is reported as DRM.

use serde::{Deserialize, Serialize};

/// Reasons why a source refuses to hand out formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockingReason {
    /// DRM-protected or paid content
    DrmProtected,
    /// Requires a channel membership or subscription
    MembersOnly,
    /// Requires a logged-in adult account
    AgeRestricted,
    PrivateVideo,
    /// Removed or never existed
    VideoUnavailable,
    GeoBlocked,
    RateLimited,
    /// Captcha or automated-access detection
    BotDetection,
    Http403Forbidden,
    NetworkTimeout,
    Unknown,
}

impl BlockingReason {
    /// Transient conditions that may clear on retry
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::NetworkTimeout | Self::RateLimited | Self::BotDetection | Self::Http403Forbidden
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::DrmProtected => "content is DRM-protected",
            Self::MembersOnly => "content is restricted to members",
            Self::AgeRestricted => "content is age-restricted",
            Self::PrivateVideo => "content is private",
            Self::VideoUnavailable => "content has been removed or does not exist",
            Self::GeoBlocked => "content is not available in this region",
            Self::RateLimited => "source is rate-limiting requests",
            Self::BotDetection => "source flagged the request as automated",
            Self::Http403Forbidden => "source denied access (HTTP 403)",
            Self::NetworkTimeout => "source did not respond in time",
            Self::Unknown => "unknown extractor failure",
        }
    }
}

/// Analyze error output and return the blocking reason, if any text was given
pub fn diagnose_error(error: &str) -> Option<BlockingReason> {
    let lower = error.to_lowercase();
    let has = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

    if has(&[
        "drm",
        "widevine",
        "playready",
        "fairplay",
        "encrypted media",
        "requires purchase",
        "rental",
        "requires payment",
    ]) {
        return Some(BlockingReason::DrmProtected);
    }

    if has(&["members only", "members-only", "join this channel", "available to members"]) {
        return Some(BlockingReason::MembersOnly);
    }

    if has(&["age-restricted", "confirm your age", "age_verification"]) {
        return Some(BlockingReason::AgeRestricted);
    }

    if has(&["private video", "video is private", "granted access"]) {
        return Some(BlockingReason::PrivateVideo);
    }

    if has(&[
        "video unavailable",
        "has been removed",
        "no longer available",
        "is unavailable",
        "http error 404",
    ]) {
        return Some(BlockingReason::VideoUnavailable);
    }

    if has(&["not available in your country", "geo restrict", "blocked in your country"]) {
        return Some(BlockingReason::GeoBlocked);
    }

    if has(&["429", "rate limit", "too many requests"]) {
        return Some(BlockingReason::RateLimited);
    }

    if has(&["captcha", "unusual traffic", "not a bot", "automated"]) {
        return Some(BlockingReason::BotDetection);
    }

    if has(&["403", "forbidden"]) {
        return Some(BlockingReason::Http403Forbidden);
    }

    if has(&[
        "timeout",
        "timed out",
        "connection refused",
        "connection reset",
        "network unreachable",
        "temporary failure in name resolution",
    ]) {
        return Some(BlockingReason::NetworkTimeout);
    }

    if !error.trim().is_empty() {
        return Some(BlockingReason::Unknown);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_403_detection() {
        let error = "ERROR: HTTP Error 403: Forbidden";
        assert_eq!(diagnose_error(error), Some(BlockingReason::Http403Forbidden));
    }

    #[test]
    fn test_timeout_detection() {
        let error = "Timed out after 30s";
        assert_eq!(diagnose_error(error), Some(BlockingReason::NetworkTimeout));
    }

    #[test]
    fn test_geo_detection() {
        let error = "Video not available in your country";
        assert_eq!(diagnose_error(error), Some(BlockingReason::GeoBlocked));
    }

    #[test]
    fn test_drm_wins_over_403() {
        let error = "HTTP Error 403: Widevine encrypted content";
        assert_eq!(diagnose_error(error), Some(BlockingReason::DrmProtected));
    }

    #[test]
    fn test_private_detection() {
        let error = "ERROR: [vimeo] 123: Private video. Sign in if you've been granted access";
        assert_eq!(diagnose_error(error), Some(BlockingReason::PrivateVideo));
    }

    #[test]
    fn test_empty_is_none() {
        assert_eq!(diagnose_error("   "), None);
    }

    #[test]
    fn test_network_set() {
        assert!(BlockingReason::RateLimited.is_network());
        assert!(!BlockingReason::PrivateVideo.is_network());
        assert!(!BlockingReason::DrmProtected.is_network());
        assert!(BlockingReason::Http403Forbidden.is_network());
    }
}
