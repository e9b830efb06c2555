// Service configuration: command line with environment fallbacks

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tracing::info;

use crate::downloader::fetch::FetchConfig;
use crate::downloader::orchestrator::DeliveryConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "mergestream")]
#[command(about = "Resolve media formats from a URL, merge video and audio, stream the result")]
pub struct Args {
    /// Address to bind
    #[arg(long, env = "MERGESTREAM_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// HTTP server port
    #[arg(short, long, env = "MERGESTREAM_PORT", default_value = "8000")]
    pub port: u16,

    /// Root directory for job temp files
    #[arg(long, env = "MERGESTREAM_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Path to the ffmpeg binary (discovered when omitted)
    #[arg(long, env = "MERGESTREAM_FFMPEG")]
    pub ffmpeg: Option<PathBuf>,

    /// Path to the yt-dlp binary (discovered when omitted)
    #[arg(long, env = "MERGESTREAM_YTDLP")]
    pub ytdlp: Option<PathBuf>,

    /// Default proxy for extraction and fetching
    #[arg(long, env = "MERGESTREAM_PROXY")]
    pub proxy: Option<String>,

    /// Netscape cookies file passed to yt-dlp
    #[arg(long, env = "MERGESTREAM_COOKIES")]
    pub cookies: Option<PathBuf>,

    /// Cookies file content, written to the temp root at startup
    #[arg(long, env = "COOKIES_CONTENT", hide_env_values = true)]
    pub cookies_content: Option<String>,

    /// Per-stream byte limit (0 disables)
    #[arg(long, env = "MERGESTREAM_MAX_BYTES", default_value = "4294967296")]
    pub max_bytes: u64,

    /// Per-stream fetch deadline in seconds
    #[arg(long, env = "MERGESTREAM_FETCH_TIMEOUT", default_value = "600")]
    pub fetch_timeout: u64,

    /// Retries for transient network errors while fetching
    #[arg(long, env = "MERGESTREAM_FETCH_RETRIES", default_value = "2")]
    pub fetch_retries: u32,

    /// Muxer deadline in seconds
    #[arg(long, env = "MERGESTREAM_MUX_TIMEOUT", default_value = "600")]
    pub mux_timeout: u64,

    /// Extractor deadline in seconds
    #[arg(long, env = "MERGESTREAM_EXTRACT_TIMEOUT", default_value = "60")]
    pub extract_timeout: u64,

    /// Jobs older than this many seconds are swept
    #[arg(long, env = "MERGESTREAM_JOB_MAX_AGE", default_value = "3600")]
    pub job_max_age: u64,

    /// Seconds between background sweeps
    #[arg(long, env = "MERGESTREAM_SWEEP_INTERVAL", default_value = "600")]
    pub sweep_interval: u64,

    /// Response body chunk size in bytes
    #[arg(long, env = "MERGESTREAM_CHUNK_SIZE", default_value = "1048576")]
    pub chunk_size: usize,

    /// Longest suggested filename stem, in characters
    #[arg(long, env = "MERGESTREAM_MAX_FILENAME", default_value = "200")]
    pub max_filename_len: usize,
}

/// Resolved service configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub temp_root: PathBuf,
    pub ffmpeg_path: Option<PathBuf>,
    pub ytdlp_path: Option<PathBuf>,
    pub proxy: Option<String>,
    pub cookies_path: Option<PathBuf>,
    pub cookies_content: Option<String>,
    pub max_bytes: Option<u64>,
    pub fetch_timeout: Duration,
    pub fetch_retries: u32,
    pub mux_timeout: Duration,
    pub extract_timeout: Duration,
    pub job_max_age: Duration,
    pub sweep_interval: Duration,
    pub chunk_size: usize,
    pub max_filename_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            temp_root: std::env::temp_dir().join("anystreampro"),
            ffmpeg_path: None,
            ytdlp_path: None,
            proxy: None,
            cookies_path: None,
            cookies_content: None,
            max_bytes: Some(4 * 1024 * 1024 * 1024),
            fetch_timeout: Duration::from_secs(600),
            fetch_retries: 2,
            mux_timeout: Duration::from_secs(600),
            extract_timeout: Duration::from_secs(60),
            job_max_age: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(600),
            chunk_size: 1024 * 1024,
            max_filename_len: 200,
        }
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        let defaults = Config::default();
        Self {
            bind: SocketAddr::new(args.host, args.port),
            temp_root: args.temp_dir.unwrap_or(defaults.temp_root),
            ffmpeg_path: args.ffmpeg,
            ytdlp_path: args.ytdlp,
            proxy: args.proxy.filter(|p| !p.trim().is_empty()),
            cookies_path: args.cookies,
            cookies_content: args.cookies_content.filter(|c| !c.trim().is_empty()),
            max_bytes: Some(args.max_bytes).filter(|b| *b > 0),
            fetch_timeout: Duration::from_secs(args.fetch_timeout),
            fetch_retries: args.fetch_retries,
            mux_timeout: Duration::from_secs(args.mux_timeout),
            extract_timeout: Duration::from_secs(args.extract_timeout),
            job_max_age: Duration::from_secs(args.job_max_age),
            sweep_interval: Duration::from_secs(args.sweep_interval.max(1)),
            chunk_size: args.chunk_size.max(1),
            max_filename_len: args.max_filename_len.max(1),
        }
    }
}

impl Config {
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = root.into();
        self
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig::default()
            .with_max_bytes(self.max_bytes)
            .with_timeout(self.fetch_timeout)
            .with_retries(self.fetch_retries)
    }

    pub fn delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            chunk_size: self.chunk_size,
            max_filename_len: self.max_filename_len,
            default_proxy: self.proxy.clone(),
        }
    }

    /// Cookies file for yt-dlp: an explicit path wins, otherwise inline
    /// content is written into the temp root once
    pub fn prepare_cookies(&self) -> std::io::Result<Option<PathBuf>> {
        if let Some(path) = &self.cookies_path {
            return Ok(Some(path.clone()));
        }
        match &self.cookies_content {
            Some(content) => {
                let path = cookies_file(&self.temp_root);
                std::fs::create_dir_all(&self.temp_root)?;
                std::fs::write(&path, content)?;
                info!(path = %path.display(), "cookies written from environment");
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }
}

fn cookies_file(root: &Path) -> PathBuf {
    root.join("cookies.txt")
}
