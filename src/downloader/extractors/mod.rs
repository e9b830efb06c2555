// Extractor module - turns a source URL into raw stream metadata
//
// The pipeline only depends on the `FormatExtractor` trait; the yt-dlp
// CLI implementation is the production backend and tests substitute fakes.

mod cli;
mod diagnostics;
mod traits;

pub use cli::YtDlpExtractor;
pub use diagnostics::{diagnose_error, BlockingReason};
pub use traits::{ExtractorConfig, FormatExtractor, RawFormat, RawMediaInfo};
