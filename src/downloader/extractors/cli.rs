// CLI FormatExtractor - uses the native `yt-dlp` binary
//
// One `--dump-json` call per resolution. The JSON carries both the
// metadata (title, thumbnail) and every format with its direct URL.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use super::traits::{ExtractorConfig, FormatExtractor, RawMediaInfo};
use crate::downloader::errors::ExtractionError;
use crate::downloader::utils::{
    get_cookie_args, get_proxy_args, get_timeout_args, run_output_with_timeout, RunError,
};

/// CLI-based extractor using the yt-dlp binary
pub struct YtDlpExtractor {
    ytdlp_path: PathBuf,
}

impl YtDlpExtractor {
    pub fn new(ytdlp_path: PathBuf) -> Self {
        Self { ytdlp_path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.ytdlp_path
    }

    /// Build command arguments
    fn build_args(&self, url: &str, config: &ExtractorConfig) -> Vec<String> {
        let mut args = vec![
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--retries".to_string(),
            "2".to_string(),
        ];
        args.extend(get_timeout_args(config.socket_timeout_seconds));
        args.extend(get_cookie_args(config.cookies_path.as_deref()));
        args.extend(get_proxy_args(config.proxy.as_deref()));

        // "--" keeps a URL starting with '-' from being read as an option
        args.push("--".to_string());
        args.push(url.to_string());
        args
    }

    fn parse_json(stdout: &[u8]) -> Result<RawMediaInfo, ExtractionError> {
        // --dump-json prints one document per line; playlists are disabled
        let text = String::from_utf8_lossy(stdout);
        let first = text
            .lines()
            .find(|l| !l.trim().is_empty())
            .ok_or(ExtractionError::NoFormats)?;
        let json: serde_json::Value = serde_json::from_str(first)
            .map_err(|e| ExtractionError::Tool(format!("Invalid JSON: {}", e)))?;

        Ok(RawMediaInfo::from_json(&json))
    }
}

#[async_trait]
impl FormatExtractor for YtDlpExtractor {
    fn name(&self) -> &'static str {
        "cli-yt-dlp"
    }

    async fn is_available(&self) -> bool {
        run_output_with_timeout(
            &self.ytdlp_path,
            &["--version".to_string()],
            Duration::from_secs(10),
        )
        .await
        .map(|out| out.status.success())
        .unwrap_or(false)
    }

    async fn extract(
        &self,
        url: &str,
        config: &ExtractorConfig,
    ) -> Result<RawMediaInfo, ExtractionError> {
        let args = self.build_args(url, config);
        debug!(tool = %self.ytdlp_path.display(), ?args, "running extractor");

        let output = run_output_with_timeout(
            &self.ytdlp_path,
            &args,
            Duration::from_secs(config.timeout_seconds),
        )
        .await
        .map_err(|e| match e {
            RunError::Timeout(secs) => {
                ExtractionError::Network(format!("extractor timed out after {}s", secs))
            }
            other => ExtractionError::Tool(other.to_string()),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let err = ExtractionError::from_stderr(&stderr);
            if err.is_recoverable() {
                warn!(
                    url,
                    status = ?output.status.code(),
                    "extractor failed, may clear on retry: {}",
                    stderr.trim()
                );
            } else {
                error!(url, status = ?output.status.code(), "extractor failed: {}", stderr.trim());
            }
            return Err(err);
        }

        Self::parse_json(&output.stdout)
    }
}
