// Fetch Stage
//
// Downloads the selected stream(s) into the job directory, bounded by a
// byte limit and a per-stream deadline. Both streams of a pair run
// concurrently; the first failure cancels the other and each partial
// file is removed as its future is dropped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::errors::{FetchError, FetchFailure, PipelineError, StreamRole};
use super::jobs::{ArtifactRole, JobGuard};
use super::models::{Container, FormatDescriptor, Selection};
use super::traits::{FetchTarget, StreamSource};

/// Log a progress line every this many bytes
const PROGRESS_STEP: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Per-stream byte ceiling; None disables the check
    pub max_bytes: Option<u64>,
    /// Deadline for one stream, retries included
    pub stream_timeout: Duration,
    /// Extra attempts after a network failure
    pub retries: u32,
    pub retry_backoff: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_bytes: Some(4 * 1024 * 1024 * 1024),
            stream_timeout: Duration::from_secs(600),
            retries: 2,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl FetchConfig {
    pub fn with_max_bytes(mut self, max_bytes: Option<u64>) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// A fully downloaded stream, owned by its job
#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub path: PathBuf,
    pub container: Container,
    pub bytes: u64,
}

/// Fetched files, each pair member alongside the format it was fetched as
#[derive(Debug)]
pub enum Fetched<'s> {
    Combined(FetchedFile),
    Pair {
        video: (&'s FormatDescriptor, FetchedFile),
        audio: (&'s FormatDescriptor, FetchedFile),
    },
}

pub struct FetchStage {
    source: Arc<dyn StreamSource>,
    config: FetchConfig,
}

impl FetchStage {
    pub fn new(source: Arc<dyn StreamSource>, config: FetchConfig) -> Self {
        Self { source, config }
    }

    /// Fetch everything a selection needs. A combined format is written
    /// straight to the output slot since it is delivered as is.
    pub async fn fetch_selection<'s>(
        &self,
        job: &JobGuard,
        source_url: &str,
        proxy: Option<&str>,
        selection: &'s Selection,
    ) -> Result<Fetched<'s>, PipelineError> {
        match selection {
            Selection::Combined(format) => {
                let target = FetchTarget {
                    source_url,
                    format,
                    proxy,
                };
                let file = self.fetch_stream(job, target, StreamRole::Combined).await?;
                Ok(Fetched::Combined(file))
            }
            Selection::Pair { video, audio } => {
                let video_target = FetchTarget {
                    source_url,
                    format: video,
                    proxy,
                };
                let audio_target = FetchTarget {
                    source_url,
                    format: audio,
                    proxy,
                };
                let (video_file, audio_file) = tokio::try_join!(
                    self.fetch_stream(job, video_target, StreamRole::Video),
                    self.fetch_stream(job, audio_target, StreamRole::Audio),
                )?;
                Ok(Fetched::Pair {
                    video: (video, video_file),
                    audio: (audio, audio_file),
                })
            }
        }
    }

    /// Fetch one stream into its artifact file
    pub async fn fetch_stream(
        &self,
        job: &JobGuard,
        target: FetchTarget<'_>,
        role: StreamRole,
    ) -> Result<FetchedFile, PipelineError> {
        let container = target.format.container;
        let artifact = job.begin_artifact(artifact_role(role), container)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(artifact.path())
            .await?;

        let deadline = Instant::now() + self.config.stream_timeout;
        let mut attempt = 0;
        let bytes = loop {
            let run = self.transfer(&mut file, target, role);
            let result = match tokio::time::timeout_at(deadline, run).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::timeout(role, self.config.stream_timeout.as_secs()).into()),
            };

            match result {
                Ok(bytes) => break bytes,
                Err(PipelineError::Fetch(e))
                    if e.reason == FetchFailure::Network && attempt < self.config.retries =>
                {
                    attempt += 1;
                    warn!(
                        job_id = %job.id(),
                        %role,
                        attempt,
                        "fetch failed, retrying: {}",
                        e.detail
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    file.set_len(0).await?;
                    file.rewind().await?;
                }
                Err(e) => return Err(e),
            }
        };

        file.flush().await?;
        drop(file);

        info!(
            job_id = %job.id(),
            %role,
            format_id = %target.format.format_id,
            source = self.source.name(),
            bytes,
            "stream fetched"
        );

        Ok(FetchedFile {
            path: artifact.keep(),
            container,
            bytes,
        })
    }

    /// One attempt: open, check the declared size, drain into the file
    async fn transfer(
        &self,
        file: &mut tokio::fs::File,
        target: FetchTarget<'_>,
        role: StreamRole,
    ) -> Result<u64, PipelineError> {
        let mut opened = self.source.open(target, role).await?;

        if let (Some(limit), Some(declared)) = (self.config.max_bytes, opened.content_length) {
            if declared > limit {
                return Err(FetchError::size_limit(role, limit).into());
            }
        }

        let mut written: u64 = 0;
        let mut next_report = PROGRESS_STEP;
        while let Some(chunk) = opened.body.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            if let Some(limit) = self.config.max_bytes {
                if written > limit {
                    return Err(FetchError::size_limit(role, limit).into());
                }
            }
            file.write_all(&chunk).await?;

            if written >= next_report {
                debug!(
                    %role,
                    written,
                    total = ?opened.content_length,
                    "fetch progress"
                );
                next_report += PROGRESS_STEP;
            }
        }

        if written == 0 {
            return Err(FetchError::network(role, "source returned no data").into());
        }
        Ok(written)
    }
}

fn artifact_role(role: StreamRole) -> ArtifactRole {
    match role {
        StreamRole::Video => ArtifactRole::Video,
        StreamRole::Audio => ArtifactRole::Audio,
        StreamRole::Combined => ArtifactRole::Output,
    }
}
