use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::{signal, sync::watch};
use tracing::{info, warn};

use mergestream::config::{Args, Config};
use mergestream::downloader::extractors::{ExtractorConfig, YtDlpExtractor};
use mergestream::downloader::tools::{ToolManager, ToolType};
use mergestream::downloader::{
    AutoSource, CatalogResolver, Downloader, FetchStage, FfmpegMuxer, HttpSource, JobTracker,
    MuxStage, YtDlpPipeSource,
};
use mergestream::server::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "mergestream=info,tower_http=info".to_string()),
        )
        .init();

    let config = Config::from(Args::parse());
    let tools = ToolManager::new();
    let ffmpeg_path = config
        .ffmpeg_path
        .clone()
        .unwrap_or_else(|| tools.locate(ToolType::Ffmpeg));
    let ytdlp_path = config
        .ytdlp_path
        .clone()
        .unwrap_or_else(|| tools.locate(ToolType::YtDlp));

    // Missing tools are a health concern; the service still starts
    for (tool, path) in [(ToolType::Ffmpeg, &ffmpeg_path), (ToolType::YtDlp, &ytdlp_path)] {
        let probe = tools.probe(tool, path).await;
        match probe.version {
            Some(version) => info!(tool = probe.name, path = %probe.path, %version, "tool found"),
            None => warn!(tool = probe.name, path = %probe.path, "tool not available"),
        }
    }

    let tracker = Arc::new(
        JobTracker::new(&config.temp_root, config.job_max_age)
            .with_context(|| format!("cannot create temp root {}", config.temp_root.display()))?,
    );
    match tracker.sweep_stale_dirs() {
        Ok(0) => {}
        Ok(removed) => info!(removed, "removed stale job directories"),
        Err(e) => warn!("stale directory sweep failed: {}", e),
    }

    let cookies = config
        .prepare_cookies()
        .context("cannot prepare cookies file")?
        .map(|p| p.display().to_string());

    let extractor_config = ExtractorConfig::default()
        .with_proxy(config.proxy.clone())
        .with_cookies_path(cookies.clone())
        .with_timeout(config.extract_timeout.as_secs());
    let resolver = CatalogResolver::new(
        Arc::new(YtDlpExtractor::new(ytdlp_path.clone())),
        extractor_config,
    );

    let source = AutoSource::new(
        HttpSource::new(std::time::Duration::from_secs(15)).context("cannot build HTTP client")?,
        YtDlpPipeSource::new(ytdlp_path.clone()).with_cookies_path(cookies),
    );
    let downloader = Downloader::new(
        resolver,
        FetchStage::new(Arc::new(source), config.fetch_config()),
        MuxStage::new(
            Arc::new(FfmpegMuxer::new(ffmpeg_path.clone())),
            config.mux_timeout,
        ),
        Arc::clone(&tracker),
        config.delivery_config(),
    );

    let sweeper = tracker.spawn_sweeper(config.sweep_interval);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState {
        downloader: Arc::new(downloader),
        ffmpeg_path,
        ytdlp_path,
    };
    let mut server_handle = tokio::spawn(server::run_server(config.bind, state, shutdown_rx));

    tokio::select! {
        result = &mut server_handle => {
            sweeper.abort();
            return result?.context("server error");
        }
        result = signal::ctrl_c() => result?,
    }
    info!("shutting down");
    let _ = shutdown_tx.send(true);

    server_handle.await?.context("server error")?;
    sweeper.abort();
    Ok(())
}
