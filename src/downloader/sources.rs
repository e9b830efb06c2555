// Stream sources - where the bytes of a selected format come from
//
// Formats with a direct http(s) URL are fetched with reqwest. Segmented
// formats (HLS/DASH) are piped through `yt-dlp -o -`, which reassembles
// them on stdout.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command as TokioCommand};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::errors::{FetchError, StreamRole};
use super::traits::{FetchTarget, OpenedStream, StreamSource};
use super::utils::{get_cookie_args, get_proxy_args};

const USER_AGENT: &str = concat!("mergestream/", env!("CARGO_PKG_VERSION"));

/// Plain HTTP GET of the format's direct URL
pub struct HttpSource {
    client: reqwest::Client,
    connect_timeout: Duration,
}

impl HttpSource {
    pub fn new(connect_timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: Self::builder(connect_timeout).build()?,
            connect_timeout,
        })
    }

    fn builder(connect_timeout: Duration) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout)
    }

    /// Proxies are per client in reqwest, so a proxied request gets its own
    fn client_for(&self, proxy: Option<&str>, role: StreamRole) -> Result<reqwest::Client, FetchError> {
        match proxy {
            None => Ok(self.client.clone()),
            Some(p) => {
                let proxy = reqwest::Proxy::all(p)
                    .map_err(|e| FetchError::network(role, format!("invalid proxy: {}", e)))?;
                Self::builder(self.connect_timeout)
                    .proxy(proxy)
                    .build()
                    .map_err(|e| FetchError::network(role, e.to_string()))
            }
        }
    }
}

/// Headers the extractor says the media host expects; invalid entries are skipped
fn header_map(target: &FetchTarget<'_>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in &target.format.http_headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => debug!(header = %name, "skipping invalid media header"),
        }
    }
    headers
}

#[async_trait]
impl StreamSource for HttpSource {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn open(
        &self,
        target: FetchTarget<'_>,
        role: StreamRole,
    ) -> Result<OpenedStream, FetchError> {
        let url = target
            .format
            .direct_url
            .as_deref()
            .ok_or_else(|| FetchError::network(role, "format has no direct URL"))?;

        let response = self
            .client_for(target.proxy, role)?
            .get(url)
            .headers(header_map(&target))
            .send()
            .await
            .map_err(|e| FetchError::network(role, e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::network(role, format!("HTTP {}", status)));
        }

        let content_length = response.content_length();
        let body = response
            .bytes_stream()
            .map_err(move |e| FetchError::network(role, e.without_url().to_string()))
            .boxed();

        Ok(OpenedStream {
            content_length,
            body,
        })
    }
}

/// `yt-dlp -f <id> -o -` with stdout as the byte stream
pub struct YtDlpPipeSource {
    ytdlp_path: PathBuf,
    cookies_path: Option<String>,
}

impl YtDlpPipeSource {
    pub fn new(ytdlp_path: PathBuf) -> Self {
        Self {
            ytdlp_path,
            cookies_path: None,
        }
    }

    pub fn with_cookies_path(mut self, path: Option<String>) -> Self {
        self.cookies_path = path;
        self
    }

    fn build_args(&self, target: &FetchTarget<'_>) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            target.format.format_id.clone(),
            "-o".to_string(),
            "-".to_string(),
            "--no-playlist".to_string(),
            "--no-part".to_string(),
            "--quiet".to_string(),
            "--no-warnings".to_string(),
        ];
        args.extend(get_cookie_args(self.cookies_path.as_deref()));
        args.extend(get_proxy_args(target.proxy));
        args.push("--".to_string());
        args.push(target.source_url.to_string());
        args
    }
}

/// Keep the last few KiB of stderr so the pipe never fills up
fn drain_stderr(mut pipe: tokio::process::ChildStderr) -> JoinHandle<String> {
    const KEEP: usize = 4096;
    tokio::spawn(async move {
        let mut kept = Vec::new();
        let mut buf = [0u8; 1024];
        while let Ok(n) = pipe.read(&mut buf).await {
            if n == 0 {
                break;
            }
            kept.extend_from_slice(&buf[..n]);
            if kept.len() > KEEP {
                kept.drain(..kept.len() - KEEP);
            }
        }
        String::from_utf8_lossy(&kept).into_owned()
    })
}

struct PipeState {
    reader: ReaderStream<ChildStdout>,
    child: Option<Child>,
    stderr: Option<JoinHandle<String>>,
    role: StreamRole,
}

impl PipeState {
    /// Called once stdout hits EOF: a clean EOF only counts if the tool succeeded
    async fn finish(&mut self) -> Option<FetchError> {
        let mut child = self.child.take()?;
        let status = child.wait().await;
        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        match status {
            Ok(status) if status.success() => None,
            Ok(status) => {
                let line = stderr
                    .lines()
                    .map(str::trim)
                    .rfind(|l| !l.is_empty())
                    .unwrap_or("no diagnostic output")
                    .to_string();
                warn!(role = %self.role, %status, "yt-dlp pipe failed: {}", line);
                Some(FetchError::network(
                    self.role,
                    format!("yt-dlp exited with {}: {}", status, line),
                ))
            }
            Err(e) => Some(FetchError::network(self.role, e.to_string())),
        }
    }
}

#[async_trait]
impl StreamSource for YtDlpPipeSource {
    fn name(&self) -> &'static str {
        "yt-dlp-pipe"
    }

    async fn open(
        &self,
        target: FetchTarget<'_>,
        role: StreamRole,
    ) -> Result<OpenedStream, FetchError> {
        let mut child = TokioCommand::new(&self.ytdlp_path)
            .args(self.build_args(&target))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FetchError::network(role, format!("failed to start yt-dlp: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FetchError::network(role, "yt-dlp stdout unavailable"))?;
        let stderr = child.stderr.take().map(drain_stderr);

        let state = PipeState {
            reader: ReaderStream::new(stdout),
            child: Some(child),
            stderr,
            role,
        };

        let body = futures::stream::unfold(state, |mut state| async move {
            match state.reader.next().await {
                Some(chunk) => {
                    let chunk = chunk.map_err(|e| FetchError::network(state.role, e.to_string()));
                    Some((chunk, state))
                }
                None => state.finish().await.map(|e| (Err(e), state)),
            }
        })
        .boxed();

        Ok(OpenedStream {
            content_length: None,
            body,
        })
    }
}

/// Routes each format to the source that can fetch it
pub struct AutoSource {
    http: HttpSource,
    pipe: YtDlpPipeSource,
}

impl AutoSource {
    pub fn new(http: HttpSource, pipe: YtDlpPipeSource) -> Self {
        Self { http, pipe }
    }
}

#[async_trait]
impl StreamSource for AutoSource {
    fn name(&self) -> &'static str {
        "auto"
    }

    async fn open(
        &self,
        target: FetchTarget<'_>,
        role: StreamRole,
    ) -> Result<OpenedStream, FetchError> {
        if target.format.is_direct_http() {
            self.http.open(target, role).await
        } else {
            debug!(
                format_id = %target.format.format_id,
                protocol = ?target.format.protocol,
                "segmented format, piping through yt-dlp"
            );
            self.pipe.open(target, role).await
        }
    }
}
