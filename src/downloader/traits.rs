// Stream source and muxer trait definitions

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use super::errors::{FetchError, StreamRole};
use super::models::FormatDescriptor;

/// Bytes of one selected stream, in order
pub type ByteStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// What to fetch: the page URL plus the chosen format
#[derive(Debug, Clone, Copy)]
pub struct FetchTarget<'a> {
    pub source_url: &'a str,
    pub format: &'a FormatDescriptor,
    pub proxy: Option<&'a str>,
}

/// An opened stream, ready to be drained
pub struct OpenedStream {
    /// Declared length when the source reports one
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

/// Trait for byte sources of a selected format
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Name of the source (for logging)
    fn name(&self) -> &'static str;

    /// Begin transferring a format. Errors here are connection-level;
    /// errors while draining arrive through the stream.
    async fn open(
        &self,
        target: FetchTarget<'_>,
        role: StreamRole,
    ) -> Result<OpenedStream, FetchError>;
}

/// Result of one muxer process run
#[derive(Debug, Clone, Default)]
pub struct ExitResult {
    /// None when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stderr: String,
}

impl ExitResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Trait for the external muxer tool
#[async_trait]
pub trait Muxer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn is_available(&self) -> bool;

    /// Run the muxer with a fixed argument template; never through a shell
    async fn invoke(&self, args: &[String]) -> io::Result<ExitResult>;
}
