//! Database and pipeline fixtures

use anyhow::Result;
use faq_common::events::EventBus;
use faq_pipeline::db::{CandidateStore, ThreadStore};
use faq_pipeline::services::{
    Collaborators, FaqExtractor, OrchestratorSettings, PipelineOrchestrator, ReplyChainExtractor,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

use super::mocks::{CountingFaqStore, MockComparison, MockGenerator};

/// Fresh database through the real initializer
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("faq_pipeline.db");
    let pool = faq_common::db::init_database(&db_path).await?;
    Ok((temp_dir, pool))
}

/// Orchestrator wired to mocks, plus handles to inspect them
pub struct TestPipeline {
    pub _temp_dir: TempDir,
    pub pool: SqlitePool,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub generator: Arc<MockGenerator>,
    pub comparison: Arc<MockComparison>,
    pub faq_store: Arc<CountingFaqStore>,
    pub events: EventBus,
}

impl TestPipeline {
    pub fn threads(&self) -> &ThreadStore {
        self.orchestrator.threads()
    }

    pub fn candidates(&self) -> &CandidateStore {
        self.orchestrator.candidates()
    }
}

/// Pipeline whose comparison engine always returns `score`
pub async fn create_test_pipeline(score: f64) -> Result<TestPipeline> {
    create_test_pipeline_with(score, Arc::new(ReplyChainExtractor::new())).await
}

pub async fn create_test_pipeline_with(score: f64, extractor: Arc<dyn FaqExtractor>) -> Result<TestPipeline> {
    let (temp_dir, pool) = create_test_db().await?;
    let threads = Arc::new(ThreadStore::new(pool.clone()));
    let candidates = Arc::new(CandidateStore::new(pool.clone()));

    let generator = Arc::new(MockGenerator::new("Open Settings > Wallet > Restore and type your seed words."));
    let comparison = Arc::new(MockComparison::new(score));
    let faq_store = Arc::new(CountingFaqStore::new());
    let events = EventBus::new(64);

    let collaborators = Collaborators {
        generator: generator.clone(),
        comparison: comparison.clone(),
        faq_store: faq_store.clone(),
        extractor,
        learning: None,
    };
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        threads,
        candidates,
        collaborators,
        events.clone(),
        OrchestratorSettings::default(),
    ));

    Ok(TestPipeline {
        _temp_dir: temp_dir,
        pool,
        orchestrator,
        generator,
        comparison,
        faq_store,
        events,
    })
}

/// Finish the bootstrap review phase
pub async fn end_calibration(pipeline: &TestPipeline) {
    let status = pipeline
        .candidates()
        .apply_calibration_settings(Some(0), None, None)
        .await
        .unwrap();
    assert!(status.is_complete);
}
