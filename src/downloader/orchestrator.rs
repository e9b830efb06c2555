// Pipeline orchestrator
//
// resolve -> select -> fetch -> mux (pairs only) -> deliver, one job per
// request. The job guard is created before the first byte is fetched and
// either moves into the response body or drops here on error.

use std::sync::Arc;

use axum::response::Response;
use tracing::{error, info, warn};

use super::catalog::{validate_source_url, CatalogResolver};
use super::delivery::{self, sanitize_filename, Deliverable};
use super::errors::{PipelineError, SelectionError};
use super::fetch::{FetchStage, Fetched};
use super::format_selector::FormatSelector;
use super::jobs::JobTracker;
use super::models::{JobState, MediaCatalog, Selection, SelectionRequest};
use super::mux::MuxStage;

/// Knobs that shape delivery
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub chunk_size: usize,
    pub max_filename_len: usize,
    /// Server-wide proxy, overridden per request
    pub default_proxy: Option<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            max_filename_len: 200,
            default_proxy: None,
        }
    }
}

pub struct Downloader {
    resolver: CatalogResolver,
    fetch: FetchStage,
    mux: MuxStage,
    tracker: Arc<JobTracker>,
    config: DeliveryConfig,
}

impl Downloader {
    pub fn new(
        resolver: CatalogResolver,
        fetch: FetchStage,
        mux: MuxStage,
        tracker: Arc<JobTracker>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            resolver,
            fetch,
            mux,
            tracker,
            config,
        }
    }

    pub fn resolver(&self) -> &CatalogResolver {
        &self.resolver
    }

    pub fn mux_stage(&self) -> &MuxStage {
        &self.mux
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    fn effective_proxy<'a>(&'a self, proxy: Option<&'a str>) -> Option<&'a str> {
        proxy
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .or(self.config.default_proxy.as_deref())
    }

    /// Resolve the format catalog without downloading anything
    pub async fn formats(
        &self,
        source_url: &str,
        proxy: Option<&str>,
    ) -> Result<MediaCatalog, PipelineError> {
        let proxy = self.effective_proxy(proxy);
        Ok(self.resolver.resolve(source_url, proxy).await?)
    }

    /// Pick streams for a request from a resolved catalog
    pub fn select(
        &self,
        catalog: &MediaCatalog,
        request: &SelectionRequest,
    ) -> Result<Selection, SelectionError> {
        match &request.explicit_pair {
            Some((video, audio)) => FormatSelector::select_pair(&catalog.formats, video, audio),
            None => FormatSelector::select(&catalog.formats, request.desired_format_id.as_deref()),
        }
    }

    /// Run a full job and hand back a streaming response.
    ///
    /// On any error the job's temp files are gone by the time this returns.
    pub async fn download(&self, request: SelectionRequest) -> Result<Response, PipelineError> {
        validate_source_url(&request.source_url)?;
        let proxy = self.effective_proxy(request.proxy.as_deref());

        let catalog = self.resolver.resolve(&request.source_url, proxy).await?;
        let selection = self.select(&catalog, &request)?;

        let job = self.tracker.create_job()?;
        let job_id = job.id();
        info!(
            %job_id,
            formats = %selection.format_ids(),
            mux = selection.needs_mux(),
            "job started"
        );

        let result = async {
            job.mark(JobState::Fetching);
            let fetched = self
                .fetch
                .fetch_selection(&job, &request.source_url, proxy, &selection)
                .await?;

            let output = match fetched {
                Fetched::Combined(file) => file,
                Fetched::Pair { video, audio } => {
                    job.mark(JobState::Muxing);
                    self.mux
                        .merge(&job, (video.0, &video.1), (audio.0, &audio.1))
                        .await?
                }
            };

            job.mark(JobState::Ready);
            Ok::<_, PipelineError>(Deliverable {
                filename: sanitize_filename(
                    &catalog.title,
                    output.container,
                    self.config.max_filename_len,
                ),
                container: output.container,
                path: output.path,
            })
        }
        .await;

        match result {
            Ok(deliverable) => delivery::into_response(deliverable, job, self.config.chunk_size).await,
            Err(e) => {
                if e.is_user_correctable() {
                    warn!(%job_id, kind = e.kind(), "job failed: {}", e);
                } else {
                    error!(%job_id, kind = e.kind(), "job failed: {}", e);
                }
                job.mark(JobState::Failed);
                drop(job);
                Err(e)
            }
        }
    }
}
