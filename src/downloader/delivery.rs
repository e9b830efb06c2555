// Delivery Stage - streams the deliverable to the client
//
// The response body owns the job guard. Whether the body is drained, fails
// mid-read, or is dropped because the client went away, the job is cleaned
// up when the body goes.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::Stream;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use super::errors::{DeliveryError, PipelineError};
use super::jobs::JobGuard;
use super::models::{Container, JobState};

/// Characters never allowed in a suggested filename
const FORBIDDEN: &[char] = &['/', '\\', '<', '>', ':', '"', '|', '?', '*'];

/// Build a filesystem-safe filename from a media title
pub fn sanitize_filename(title: &str, container: Container, max_len: usize) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| {
            if c.is_control() || FORBIDDEN.contains(&c) {
                ' '
            } else {
                c
            }
        })
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut stem: String = collapsed
        .trim_matches(|c: char| c == '.' || c.is_whitespace())
        .chars()
        .take(max_len)
        .collect();
    stem = stem
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string();

    if stem.is_empty() {
        stem = "download".to_string();
    }
    format!("{}.{}", stem, container.extension())
}

fn ascii_fallback(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ' | '(' | ')') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = ascii.trim();
    if trimmed.is_empty() {
        "download.bin".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Attachment header with an ASCII fallback and the UTF-8 name
pub fn content_disposition(filename: &str) -> String {
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii_fallback(filename),
        urlencoding::encode(filename)
    )
}

/// The finished file plus what the client should call it
#[derive(Debug, Clone)]
pub struct Deliverable {
    pub path: PathBuf,
    pub container: Container,
    pub filename: String,
}

/// Chunked file body that owns its job
pub struct DeliveryStream {
    // dropped before the guard so the file is closed when cleanup runs
    inner: ReaderStream<File>,
    guard: Option<JobGuard>,
    sent: u64,
    total: u64,
}

impl DeliveryStream {
    pub fn new(file: File, chunk_size: usize, total: u64, guard: JobGuard) -> Self {
        Self {
            inner: ReaderStream::with_capacity(file, chunk_size),
            guard: Some(guard),
            sent: 0,
            total,
        }
    }

    fn finish(&mut self, state: JobState) {
        if let Some(guard) = self.guard.take() {
            guard.mark(state);
            match state {
                JobState::Done => info!(job_id = %guard.id(), bytes = self.sent, "delivery complete"),
                _ => warn!(job_id = %guard.id(), sent = self.sent, total = self.total, "delivery failed"),
            }
        }
    }
}

impl Stream for DeliveryStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish(JobState::Failed);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                // the reader is released at EOF, so cleanup can run now
                this.finish(JobState::Done);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for DeliveryStream {
    fn drop(&mut self) {
        if let Some(guard) = &self.guard {
            warn!(
                job_id = %guard.id(),
                sent = self.sent,
                total = self.total,
                "client disconnected before delivery finished"
            );
        }
    }
}

/// Open the deliverable and build the streaming response
pub async fn into_response(
    deliverable: Deliverable,
    job: JobGuard,
    chunk_size: usize,
) -> Result<Response, PipelineError> {
    let file = File::open(&deliverable.path)
        .await
        .map_err(|e| DeliveryError(format!("cannot open deliverable: {}", e)))?;
    let total = file
        .metadata()
        .await
        .map_err(|e| DeliveryError(e.to_string()))?
        .len();

    job.mark(JobState::Streaming);
    info!(
        job_id = %job.id(),
        filename = %deliverable.filename,
        bytes = total,
        "streaming deliverable"
    );

    let disposition = HeaderValue::from_str(&content_disposition(&deliverable.filename))
        .map_err(|e| DeliveryError(e.to_string()))?;
    let stream = DeliveryStream::new(file, chunk_size.max(1), total, job);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, deliverable.container.mime_type())
        .header(header::CONTENT_LENGTH, total)
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from_stream(stream))
        .map_err(|e| DeliveryError(e.to_string()).into())
}
