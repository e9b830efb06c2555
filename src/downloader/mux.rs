// Mux Stage - merges a video-only and an audio-only file with ffmpeg
//
// Streams are copied without re-encoding video. Audio is copied when it
// already fits the output container and transcoded otherwise.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};

use super::errors::{MuxError, PipelineError};
use super::fetch::FetchedFile;
use super::jobs::{ArtifactRole, JobGuard};
use super::models::{Container, FormatDescriptor};
use super::traits::{ExitResult, Muxer};
use super::utils::run_output_with_timeout;

/// ffmpeg invoked as a child process
pub struct FfmpegMuxer {
    ffmpeg_path: PathBuf,
}

impl FfmpegMuxer {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        Self { ffmpeg_path }
    }

    pub fn path(&self) -> &Path {
        &self.ffmpeg_path
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn is_available(&self) -> bool {
        run_output_with_timeout(
            &self.ffmpeg_path,
            &["-version".to_string()],
            Duration::from_secs(10),
        )
        .await
        .map(|out| out.status.success())
        .unwrap_or(false)
    }

    async fn invoke(&self, args: &[String]) -> std::io::Result<ExitResult> {
        // killed if the stage is cancelled or times out
        let child = TokioCommand::new(&self.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = child.wait_with_output().await?;
        Ok(ExitResult {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Audio handling for the merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Copy,
    Aac,
    Opus,
}

impl AudioCodec {
    fn ffmpeg_name(&self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Aac => "aac",
            Self::Opus => "libopus",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxPlan {
    pub container: Container,
    pub audio: AudioCodec,
}

impl MuxPlan {
    /// WebM video stays WebM (Opus/Vorbis audio); everything else becomes MP4 (AAC)
    pub fn for_pair(video: &FormatDescriptor, audio: &FormatDescriptor) -> Self {
        if video.container == Container::WebM {
            let audio = if audio.is_webm_audio() {
                AudioCodec::Copy
            } else {
                AudioCodec::Opus
            };
            Self {
                container: Container::WebM,
                audio,
            }
        } else {
            let audio = if audio.is_aac() {
                AudioCodec::Copy
            } else {
                AudioCodec::Aac
            };
            Self {
                container: Container::Mp4,
                audio,
            }
        }
    }

    /// Fixed argument template; paths are separate argv entries
    pub fn build_args(&self, video: &Path, audio: &Path, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-nostdin",
            "-loglevel",
            "error",
            "-n",
            "-i",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(video.display().to_string());
        args.push("-i".to_string());
        args.push(audio.display().to_string());
        args.extend(
            ["-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-c:a"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(self.audio.ffmpeg_name().to_string());
        if self.container == Container::Mp4 {
            args.push("-movflags".to_string());
            args.push("+faststart".to_string());
        }
        args.push(output.display().to_string());
        args
    }
}

pub struct MuxStage {
    muxer: Arc<dyn Muxer>,
    timeout: Duration,
}

impl MuxStage {
    pub fn new(muxer: Arc<dyn Muxer>, timeout: Duration) -> Self {
        Self { muxer, timeout }
    }

    pub fn muxer(&self) -> &Arc<dyn Muxer> {
        &self.muxer
    }

    /// Merge the pair into the job's output file. Inputs are removed on
    /// success; a failed run leaves no output behind.
    pub async fn merge(
        &self,
        job: &JobGuard,
        video: (&FormatDescriptor, &FetchedFile),
        audio: (&FormatDescriptor, &FetchedFile),
    ) -> Result<FetchedFile, PipelineError> {
        for (_, input) in [video, audio] {
            let usable = tokio::fs::metadata(&input.path)
                .await
                .map(|m| m.len() > 0)
                .unwrap_or(false);
            if !usable {
                return Err(MuxError::new(None, "input file missing or empty").into());
            }
        }

        let plan = MuxPlan::for_pair(video.0, audio.0);
        let output = job.begin_artifact(ArtifactRole::Output, plan.container)?;
        let args = plan.build_args(&video.1.path, &audio.1.path, output.path());
        debug!(job_id = %job.id(), muxer = self.muxer.name(), ?plan, "muxing");

        let result = match tokio::time::timeout(self.timeout, self.muxer.invoke(&args)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                return Err(MuxError::new(None, &format!("failed to run muxer: {}", e)).into())
            }
            Err(_) => {
                warn!(job_id = %job.id(), "muxer timed out after {}s", self.timeout.as_secs());
                return Err(MuxError::new(
                    None,
                    &format!("timed out after {}s", self.timeout.as_secs()),
                )
                .into());
            }
        };

        if !result.success() {
            warn!(job_id = %job.id(), exit_code = ?result.exit_code, "muxer failed");
            return Err(MuxError::new(result.exit_code, &result.stderr).into());
        }

        let bytes = tokio::fs::metadata(output.path())
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if bytes == 0 {
            return Err(MuxError::new(result.exit_code, "muxer produced no output").into());
        }

        let path = output.keep();
        job.tracker().release(job.id(), ArtifactRole::Video);
        job.tracker().release(job.id(), ArtifactRole::Audio);

        info!(job_id = %job.id(), container = %plan.container, bytes, "streams merged");
        Ok(FetchedFile {
            path,
            container: plan.container,
            bytes,
        })
    }
}
