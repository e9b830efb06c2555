// Downloader module - resolve, select, fetch, merge and deliver media

pub mod catalog;
pub mod delivery;
pub mod errors;
pub mod extractors;
pub mod fetch;
pub mod format_selector;
pub mod jobs;
pub mod models;
pub mod mux;
pub mod orchestrator;
pub mod sources;
pub mod tools;
pub mod traits;
pub mod utils;

pub use catalog::CatalogResolver;
pub use errors::{
    DeliveryError, ExtractionError, FetchError, FetchFailure, MuxError, PipelineError,
    SelectionError, StreamRole,
};
pub use fetch::{FetchConfig, FetchStage};
pub use format_selector::FormatSelector;
pub use jobs::{JobGuard, JobId, JobTracker, JobsSnapshot};
pub use models::{Container, FormatDescriptor, FormatView, MediaCatalog, Selection, SelectionRequest};
pub use mux::{FfmpegMuxer, MuxStage};
pub use orchestrator::{DeliveryConfig, Downloader};
pub use sources::{AutoSource, HttpSource, YtDlpPipeSource};
pub use traits::{ExitResult, FetchTarget, Muxer, OpenedStream, StreamSource};
