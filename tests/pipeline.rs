// End-to-end pipeline tests with fake collaborators

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use bytes::Bytes;
use futures::StreamExt;
use tower::ServiceExt;

use mergestream::downloader::errors::{FetchFailure, PipelineError, StreamRole};
use mergestream::downloader::extractors::{ExtractorConfig, FormatExtractor, RawFormat, RawMediaInfo};
use mergestream::downloader::{
    CatalogResolver, DeliveryConfig, Downloader, ExitResult, ExtractionError, FetchConfig,
    FetchError, FetchStage, FetchTarget, JobTracker, MuxStage, Muxer, OpenedStream,
    SelectionRequest, StreamSource,
};
use mergestream::server::{router, AppState};

const SOURCE_URL: &str = "https://media.example/watch?v=42";
const MERGED: &[u8] = b"merged-output";

struct FakeExtractor {
    info: RawMediaInfo,
}

#[async_trait]
impl FormatExtractor for FakeExtractor {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn extract(
        &self,
        _url: &str,
        _config: &ExtractorConfig,
    ) -> Result<RawMediaInfo, ExtractionError> {
        Ok(self.info.clone())
    }
}

/// Serves `size` bytes per format id in 100-byte chunks. Stalled ids send
/// one chunk and then nothing more.
struct FakeSource {
    sizes: HashMap<String, usize>,
    stalled: HashSet<String>,
}

#[async_trait]
impl StreamSource for FakeSource {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn open(
        &self,
        target: FetchTarget<'_>,
        role: StreamRole,
    ) -> Result<OpenedStream, FetchError> {
        let size = *self
            .sizes
            .get(&target.format.format_id)
            .ok_or_else(|| FetchError::network(role, "no such stream"))?;
        if self.stalled.contains(&target.format.format_id) {
            let first = futures::stream::iter([Ok::<_, FetchError>(Bytes::from(vec![b'x'; 100]))]);
            return Ok(OpenedStream {
                content_length: None,
                body: first.chain(futures::stream::pending()).boxed(),
            });
        }
        let chunks = (0..size).step_by(100).map(move |start| {
            let len = (size - start).min(100);
            Ok::<_, FetchError>(Bytes::from(vec![b'x'; len]))
        });
        Ok(OpenedStream {
            content_length: None,
            body: futures::stream::iter(chunks.collect::<Vec<_>>()).boxed(),
        })
    }
}

/// Writes a fixed payload to the output argument, fails after a partial
/// write, or never finishes
#[derive(Default)]
struct FakeMuxer {
    fail: bool,
    hang: bool,
    unavailable: bool,
    calls: AtomicUsize,
}

#[async_trait]
impl Muxer for FakeMuxer {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn is_available(&self) -> bool {
        !self.unavailable
    }

    async fn invoke(&self, args: &[String]) -> std::io::Result<ExitResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let output = args.last().expect("output argument");
        if self.hang {
            tokio::fs::write(output, b"partial").await?;
            std::future::pending::<()>().await;
        }
        if self.fail {
            tokio::fs::write(output, b"partial").await?;
            return Ok(ExitResult {
                exit_code: Some(1),
                stderr: format!("{}: Invalid data found when processing input", output),
            });
        }
        tokio::fs::write(output, MERGED).await?;
        Ok(ExitResult {
            exit_code: Some(0),
            stderr: String::new(),
        })
    }
}

fn video(id: &str, height: u32) -> RawFormat {
    RawFormat {
        format_id: id.to_string(),
        ext: Some("mp4".to_string()),
        height: Some(height),
        vcodec: Some("avc1.640028".to_string()),
        acodec: Some("none".to_string()),
        tbr: Some(2500.0),
        ..Default::default()
    }
}

fn audio(id: &str, abr: f32) -> RawFormat {
    RawFormat {
        format_id: id.to_string(),
        ext: Some("m4a".to_string()),
        vcodec: Some("none".to_string()),
        acodec: Some("mp4a.40.2".to_string()),
        abr: Some(abr),
        ..Default::default()
    }
}

fn combined(id: &str, height: u32) -> RawFormat {
    RawFormat {
        acodec: Some("mp4a.40.2".to_string()),
        ..video(id, height)
    }
}

struct Harness {
    _tmp: tempfile::TempDir,
    tracker: Arc<JobTracker>,
    muxer: Arc<FakeMuxer>,
    downloader: Arc<Downloader>,
}

impl Harness {
    fn new(formats: Vec<RawFormat>, sizes: &[(&str, usize)], muxer: FakeMuxer, fetch: FetchConfig) -> Self {
        Self::build(formats, sizes, &[], muxer, fetch, 1024 * 1024)
    }

    fn with_chunk_size(
        formats: Vec<RawFormat>,
        sizes: &[(&str, usize)],
        muxer: FakeMuxer,
        fetch: FetchConfig,
        chunk_size: usize,
    ) -> Self {
        Self::build(formats, sizes, &[], muxer, fetch, chunk_size)
    }

    fn with_stalled(formats: Vec<RawFormat>, sizes: &[(&str, usize)], stalled: &[&str]) -> Self {
        Self::build(formats, sizes, stalled, FakeMuxer::default(), FetchConfig::default(), 1024 * 1024)
    }

    fn build(
        formats: Vec<RawFormat>,
        sizes: &[(&str, usize)],
        stalled: &[&str],
        muxer: FakeMuxer,
        fetch: FetchConfig,
        chunk_size: usize,
    ) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let tracker =
            Arc::new(JobTracker::new(tmp.path().join("jobs"), Duration::from_secs(3600)).unwrap());
        let info = RawMediaInfo {
            title: Some("Launch: Day 1/2".to_string()),
            formats,
            ..Default::default()
        };
        let resolver = CatalogResolver::new(
            Arc::new(FakeExtractor { info }),
            ExtractorConfig::default(),
        );
        let source = FakeSource {
            sizes: sizes.iter().map(|(id, n)| (id.to_string(), *n)).collect(),
            stalled: stalled.iter().map(|id| id.to_string()).collect(),
        };
        let muxer = Arc::new(muxer);
        let downloader = Downloader::new(
            resolver,
            FetchStage::new(Arc::new(source), fetch),
            MuxStage::new(muxer.clone(), Duration::from_secs(5)),
            Arc::clone(&tracker),
            DeliveryConfig {
                chunk_size,
                ..DeliveryConfig::default()
            },
        );

        Self {
            _tmp: tmp,
            tracker,
            muxer,
            downloader: Arc::new(downloader),
        }
    }

    fn mux_calls(&self) -> usize {
        self.muxer.calls.load(Ordering::SeqCst)
    }

    fn assert_clean(&self) {
        assert!(self.tracker.is_empty(), "tracker still holds jobs");
        assert_eq!(dir_entries(self.tracker.root()), 0, "temp files left behind");
    }

    fn app(&self) -> axum::Router {
        router(AppState {
            downloader: Arc::clone(&self.downloader),
            ffmpeg_path: "/nonexistent/ffmpeg".into(),
            ytdlp_path: "/nonexistent/yt-dlp".into(),
        })
    }
}

fn dir_entries(path: &Path) -> usize {
    std::fs::read_dir(path).map(|d| d.count()).unwrap_or(0)
}

fn standard_formats() -> Vec<RawFormat> {
    vec![
        video("v1", 1080),
        video("v2", 720),
        audio("a1", 128.0),
        audio("a2", 48.0),
    ]
}

/// v1 1080p video-only, a1 audio-only, v0 720p combined
fn scenario_formats() -> Vec<RawFormat> {
    vec![video("v1", 1080), audio("a1", 128.0), combined("v0", 720)]
}

fn standard_sizes() -> Vec<(&'static str, usize)> {
    vec![("v1", 3000), ("v2", 2000), ("a1", 800), ("a2", 300), ("v0", 5000)]
}

async fn body_bytes(response: axum::response::Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

#[tokio::test]
async fn pair_1080p_is_merged_and_leaves_no_residue() {
    let h = Harness::new(scenario_formats(), &standard_sizes(), FakeMuxer::default(), FetchConfig::default());

    let request = SelectionRequest::new(SOURCE_URL).with_format(Some("1080p".to_string()));
    let response = h.downloader.download(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(headers[header::CONTENT_LENGTH], MERGED.len().to_string().as_str());
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.contains("filename=\"Launch Day 1 2.mp4\""), "{}", disposition);

    let body = body_bytes(response).await;
    assert_eq!(&body[..], MERGED);
    assert_eq!(h.mux_calls(), 1);
    h.assert_clean();
}

#[tokio::test]
async fn combined_format_skips_muxer() {
    let h = Harness::new(scenario_formats(), &standard_sizes(), FakeMuxer::default(), FetchConfig::default());

    let response = h
        .downloader
        .download(SelectionRequest::new(SOURCE_URL).with_format(Some("v0".to_string())))
        .await
        .unwrap();

    let body = body_bytes(response).await;
    assert_eq!(body.len(), 5000);
    assert_eq!(h.mux_calls(), 0);
    h.assert_clean();
}

#[tokio::test]
async fn disconnect_mid_stream_cleans_up() {
    let formats = vec![combined("v0", 720)];
    let h = Harness::with_chunk_size(
        formats,
        &standard_sizes(),
        FakeMuxer::default(),
        FetchConfig::default(),
        256,
    );

    let response = h.downloader.download(SelectionRequest::new(SOURCE_URL)).await.unwrap();
    assert_eq!(h.tracker.len(), 1);

    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.unwrap().unwrap();
    assert!(!first.is_empty() && first.len() <= 256);
    drop(body);

    h.assert_clean();
}

#[tokio::test]
async fn mux_failure_leaves_no_output() {
    let muxer = FakeMuxer {
        fail: true,
        ..Default::default()
    };
    let h = Harness::new(standard_formats(), &standard_sizes(), muxer, FetchConfig::default());

    let err = h
        .downloader
        .download(SelectionRequest::new(SOURCE_URL))
        .await
        .unwrap_err();

    match &err {
        PipelineError::Mux(e) => assert_eq!(e.exit_code, Some(1)),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.public_message().contains(h.tracker.root().to_str().unwrap()));
    h.assert_clean();
}

#[tokio::test]
async fn audio_over_limit_fails_and_removes_video() {
    let sizes = [("v1", 500), ("a1", 5000)];
    let fetch = FetchConfig::default().with_max_bytes(Some(1000));
    let h = Harness::new(scenario_formats(), &sizes, FakeMuxer::default(), fetch);

    let request = SelectionRequest::new(SOURCE_URL).with_format(Some("1080p".to_string()));
    let err = h.downloader.download(request).await.unwrap_err();

    match err {
        PipelineError::Fetch(e) => {
            assert_eq!(e.reason, FetchFailure::SizeLimit);
            assert_eq!(e.role, StreamRole::Audio);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.mux_calls(), 0);
    h.assert_clean();
}

#[tokio::test]
async fn cancelled_while_fetching_cleans_up() {
    let h = Harness::with_stalled(scenario_formats(), &standard_sizes(), &["a1"]);

    let request = SelectionRequest::new(SOURCE_URL).with_format(Some("1080p".to_string()));
    let outcome = tokio::time::timeout(Duration::from_millis(200), h.downloader.download(request)).await;

    assert!(outcome.is_err(), "download should still be waiting on audio");
    assert_eq!(h.mux_calls(), 0);
    h.assert_clean();
}

#[tokio::test]
async fn cancelled_while_muxing_cleans_up() {
    let muxer = FakeMuxer {
        hang: true,
        ..Default::default()
    };
    let h = Harness::new(scenario_formats(), &standard_sizes(), muxer, FetchConfig::default());

    let request = SelectionRequest::new(SOURCE_URL).with_format(Some("1080p".to_string()));
    let outcome = tokio::time::timeout(Duration::from_millis(200), h.downloader.download(request)).await;

    assert!(outcome.is_err(), "download should still be waiting on the muxer");
    assert_eq!(h.mux_calls(), 1);
    h.assert_clean();
}

#[tokio::test]
async fn concurrent_jobs_do_not_collide() {
    let h = Harness::new(standard_formats(), &standard_sizes(), FakeMuxer::default(), FetchConfig::default());

    let tasks: Vec<_> = ["1080p", "720p", "best", "v2"]
        .into_iter()
        .map(|hint| {
            let downloader = Arc::clone(&h.downloader);
            tokio::spawn(async move {
                let request = SelectionRequest::new(SOURCE_URL).with_format(Some(hint.to_string()));
                let response = downloader.download(request).await.unwrap();
                body_bytes(response).await
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(&task.await.unwrap()[..], MERGED);
    }
    assert_eq!(h.mux_calls(), 4);
    h.assert_clean();
}

#[tokio::test]
async fn api_formats_lists_typed_formats() {
    let h = Harness::new(standard_formats(), &standard_sizes(), FakeMuxer::default(), FetchConfig::default());

    let response = h
        .app()
        .oneshot(
            Request::post("/api/formats")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(format!(r#"{{"url": "{}"}}"#, SOURCE_URL)))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["status"], "success");
    assert_eq!(json["title"], "Launch: Day 1/2");
    let formats = json["formats"].as_array().unwrap();
    assert_eq!(formats.len(), 4);
    assert_eq!(formats[0]["format_id"], "v1");
    assert_eq!(formats[0]["type"], "video");
    assert_eq!(formats[3]["type"], "audio");
}

#[tokio::test]
async fn api_download_errors_are_structured() {
    let h = Harness::new(standard_formats(), &standard_sizes(), FakeMuxer::default(), FetchConfig::default());

    let response = h
        .app()
        .oneshot(
            Request::post("/api/download")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(format!(
                    r#"{{"url": "{}", "format_id": "nope"}}"#,
                    SOURCE_URL
                )))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["error"], "SelectionError");
    assert_eq!(json["user_correctable"], true);

    let response = h
        .app()
        .oneshot(
            Request::post("/api/download")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"url": "ftp://media.example/x"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = h
        .app()
        .oneshot(
            Request::post("/api/download")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["error"], "InvalidRequest");

    h.assert_clean();
}

#[tokio::test]
async fn api_download_streams_merged_file() {
    let h = Harness::new(standard_formats(), &standard_sizes(), FakeMuxer::default(), FetchConfig::default());

    let response = h
        .app()
        .oneshot(
            Request::post("/api/download")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(format!(
                    r#"{{"url": "{}", "video_format": "v2", "audio_format": "a2"}}"#,
                    SOURCE_URL
                )))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&body_bytes(response).await[..], MERGED);
    h.assert_clean();
}

async fn health_json(h: &Harness) -> serde_json::Value {
    let response = h
        .app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn health_reports_wired_backends_and_jobs() {
    let h = Harness::new(standard_formats(), &standard_sizes(), FakeMuxer::default(), FetchConfig::default());

    let json = health_json(&h).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["muxer"]["available"], true);
    assert_eq!(json["extractor"]["available"], true);
    // binaries at the configured paths do not exist, so no version
    assert!(json["muxer"]["version"].is_null());
    assert_eq!(json["jobs"]["active"], 0);
}

#[tokio::test]
async fn health_degraded_when_muxer_unavailable() {
    let muxer = FakeMuxer {
        unavailable: true,
        ..Default::default()
    };
    let h = Harness::new(standard_formats(), &standard_sizes(), muxer, FetchConfig::default());

    let json = health_json(&h).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["muxer"]["available"], false);
    assert_eq!(json["extractor"]["available"], true);
}
