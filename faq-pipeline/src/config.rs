//! Service configuration
//!
//! Priority per setting: command line, environment (via clap `env`), TOML
//! file, compiled default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use faq_common::config::{load_module_config, CompiledDefaults, RootFolderInitializer, RootFolderResolver, TomlConfig};
use tracing::warn;

use crate::services::OrchestratorSettings;

/// Module name used for the TOML file (`faq-pipeline.toml`)
pub const MODULE_NAME: &str = "faq-pipeline";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Command-line arguments for faq-pipeline
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "faq-pipeline")]
#[command(about = "FAQ training pipeline for support chat")]
#[command(version)]
pub struct Args {
    /// TOML config file (default: user config dir, then /etc/faq-pipeline)
    #[arg(short, long, env = "FAQ_PIPELINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Folder holding the database
    #[arg(short, long)]
    pub root_folder: Option<PathBuf>,

    /// Address for the admin API
    #[arg(short, long, env = "FAQ_PIPELINE_BIND")]
    pub bind: Option<String>,

    /// Base URL of the answer generator
    #[arg(long, env = "FAQ_PIPELINE_GENERATOR_URL")]
    pub generator_url: Option<String>,

    /// Base URL of the comparison engine
    #[arg(long, env = "FAQ_PIPELINE_COMPARISON_URL")]
    pub comparison_url: Option<String>,

    /// Base URL of the FAQ service; without one FAQs are kept in memory
    #[arg(long, env = "FAQ_PIPELINE_FAQ_STORE_URL")]
    pub faq_store_url: Option<String>,

    /// Timeout for outbound requests, in seconds
    #[arg(long, env = "FAQ_PIPELINE_REQUEST_TIMEOUT")]
    pub request_timeout_secs: Option<u64>,

    /// Reviews needed before score-based routing starts
    #[arg(long, env = "FAQ_PIPELINE_CALIBRATION_SAMPLES")]
    pub calibration_samples: Option<i64>,

    /// Learn routing thresholds from reviewer decisions
    #[arg(long, env = "FAQ_PIPELINE_ADAPTIVE_LEARNING")]
    pub adaptive_learning: Option<bool>,

    /// Log level when RUST_LOG is not set
    #[arg(long, env = "FAQ_PIPELINE_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Fully resolved configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub root_folder: PathBuf,
    pub database_path: PathBuf,
    pub bind_address: String,
    pub log_level: String,
    pub generator_url: Option<String>,
    pub comparison_url: Option<String>,
    pub faq_store_url: Option<String>,
    pub request_timeout: Duration,
    pub calibration_samples_required: Option<i64>,
    pub auto_approve_threshold: Option<f64>,
    pub spot_check_threshold: Option<f64>,
    pub adaptive_learning: bool,
    pub orchestrator: OrchestratorSettings,
}

impl PipelineConfig {
    pub fn resolve(args: &Args) -> Self {
        let toml = load_module_config(MODULE_NAME, args.config.as_deref());
        Self::from_sources(args, &toml)
    }

    pub fn from_sources(args: &Args, toml: &TomlConfig) -> Self {
        let defaults = CompiledDefaults::for_current_platform();
        let root_folder = RootFolderResolver::new(MODULE_NAME).resolve_from(args.root_folder.as_deref(), toml);
        let database_path = RootFolderInitializer::new(root_folder.clone()).database_path();

        let mut orchestrator = OrchestratorSettings::default();
        if let Some(threshold) = toml.pipeline.duplicate_similarity_threshold {
            orchestrator.duplicate_similarity_threshold = threshold;
        }

        let (auto_approve_threshold, spot_check_threshold) =
            checked_thresholds(toml.pipeline.auto_approve_threshold, toml.pipeline.spot_check_threshold);

        Self {
            database_path,
            root_folder,
            bind_address: args
                .bind
                .clone()
                .or_else(|| toml.bind_address.clone())
                .unwrap_or(defaults.bind_address),
            log_level: args
                .log_level
                .clone()
                .unwrap_or_else(|| toml.logging.level.clone()),
            generator_url: non_blank(args.generator_url.clone().or_else(|| toml.services.generator_url.clone())),
            comparison_url: non_blank(args.comparison_url.clone().or_else(|| toml.services.comparison_url.clone())),
            faq_store_url: non_blank(args.faq_store_url.clone().or_else(|| toml.services.faq_store_url.clone())),
            request_timeout: Duration::from_secs(
                args.request_timeout_secs
                    .or(toml.services.request_timeout_secs)
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            calibration_samples_required: args
                .calibration_samples
                .or(toml.pipeline.calibration_samples_required)
                .filter(|n| *n >= 0),
            auto_approve_threshold,
            spot_check_threshold,
            adaptive_learning: args
                .adaptive_learning
                .or(toml.pipeline.adaptive_learning)
                .unwrap_or(false),
            orchestrator,
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Drop thresholds outside [0, 1] or out of order
fn checked_thresholds(auto: Option<f64>, spot: Option<f64>) -> (Option<f64>, Option<f64>) {
    let in_range = |v: Option<f64>| v.filter(|t| (0.0..=1.0).contains(t));
    let (auto, spot) = (in_range(auto), in_range(spot));
    match (auto, spot) {
        (Some(a), Some(s)) if s > a => {
            warn!(auto_approve = a, spot_check = s, "spot_check_threshold above auto_approve_threshold, ignoring both");
            (None, None)
        }
        other => other,
    }
}
