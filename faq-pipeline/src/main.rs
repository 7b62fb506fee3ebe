//! faq-pipeline - FAQ training pipeline service
//!
//! Receives question/answer pairs from the chat sync services, scores the
//! staff answer against a generated one, and queues FAQ candidates for
//! review. Serves the admin review API and an SSE event stream.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use faq_common::config::RootFolderInitializer;
use faq_common::events::EventBus;
use faq_pipeline::config::{Args, PipelineConfig};
use faq_pipeline::db::{CandidateStore, ThreadStore};
use faq_pipeline::services::http_clients::DEFAULT_REQUESTS_PER_SECOND;
use faq_pipeline::services::{
    AdaptiveThresholdLearner, Collaborators, FaqStore, HttpAnswerGenerator, HttpComparisonEngine, HttpFaqStore,
    InMemoryFaqStore, LearningEngine, PipelineOrchestrator, ReplyChainExtractor,
};
use faq_pipeline::AppState;

const EVENT_BUS_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = PipelineConfig::resolve(&args);

    let default_filter = format!("faq_pipeline={0},faq_common={0},tower_http=info", config.log_level);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting faq-pipeline v{}", env!("CARGO_PKG_VERSION"));
    info!("Root folder: {}", config.root_folder.display());

    let initializer = RootFolderInitializer::new(config.root_folder.clone());
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let pool = faq_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let threads = Arc::new(ThreadStore::new(pool.clone()));
    let candidates = Arc::new(CandidateStore::new(pool));

    let calibration = candidates
        .apply_calibration_settings(
            config.calibration_samples_required,
            config.auto_approve_threshold,
            config.spot_check_threshold,
        )
        .await
        .context("Failed to apply calibration settings")?;
    info!(
        samples_collected = calibration.samples_collected,
        samples_required = calibration.samples_required,
        complete = calibration.is_complete,
        "Calibration state loaded"
    );

    let collaborators = build_collaborators(&config, candidates.clone())?;
    let events = EventBus::new(EVENT_BUS_CAPACITY);
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        threads,
        candidates,
        collaborators,
        events,
        config.orchestrator.clone(),
    ));

    let app = faq_pipeline::build_router(AppState::new(orchestrator));

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!("Listening on http://{}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wire the collaborator adapters from configuration
///
/// Generator and comparison engine are required; the FAQ store falls back
/// to an in-memory store.
fn build_collaborators(config: &PipelineConfig, candidates: Arc<CandidateStore>) -> Result<Collaborators> {
    let generator_url = config
        .generator_url
        .as_deref()
        .context("generator_url is not configured (--generator-url or [services] generator_url)")?;
    let comparison_url = config
        .comparison_url
        .as_deref()
        .context("comparison_url is not configured (--comparison-url or [services] comparison_url)")?;

    let generator = HttpAnswerGenerator::new(generator_url, config.request_timeout, DEFAULT_REQUESTS_PER_SECOND)
        .context("Failed to build generator client")?;
    let comparison = HttpComparisonEngine::new(comparison_url, config.request_timeout, DEFAULT_REQUESTS_PER_SECOND)
        .context("Failed to build comparison client")?;

    let faq_store: Arc<dyn FaqStore> = match config.faq_store_url.as_deref() {
        Some(url) => {
            info!("FAQ store: {}", url);
            Arc::new(
                HttpFaqStore::new(url, config.request_timeout, DEFAULT_REQUESTS_PER_SECOND)
                    .context("Failed to build FAQ store client")?,
            )
        }
        None => {
            warn!("No faq_store_url configured, approved FAQs are kept in memory only");
            Arc::new(InMemoryFaqStore::new())
        }
    };

    let learning: Option<Arc<dyn LearningEngine>> = if config.adaptive_learning {
        info!("Adaptive threshold learning enabled");
        Some(Arc::new(AdaptiveThresholdLearner::new(candidates)))
    } else {
        None
    };

    Ok(Collaborators {
        generator: Arc::new(generator),
        comparison: Arc::new(comparison),
        faq_store,
        extractor: Arc::new(ReplyChainExtractor::new()),
        learning,
    })
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
