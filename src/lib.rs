//! Leafscope analysis core.
//!
//! Turns a photograph of a tomato leaf into a diagnostic report: quality
//! gate, embedded detection and classification behind the [`LeafModel`]
//! trait, optional cloud cross-validation and narrative generation behind
//! the [`VisionClient`] trait, and a perceptual-hash result cache backed
//! by SQLite.
//!
//! Design rules the modules hold to:
//! - cloud calls and the cache are strictly optional; their failures
//!   degrade (fallback report, cache miss), never abort an analysis
//! - gate failures fail closed through [`AnalysisError`]; an uncertain
//!   diagnosis is never presented as a confident one
//! - identical inputs give identical reports while a cache entry lives
//!
//! [`LeafModel`]: pipeline::LeafModel
//! [`VisionClient`]: vision::VisionClient
//! [`AnalysisError`]: pipeline::AnalysisError

pub mod config;
pub mod db;
pub mod pipeline;
pub mod preferences;
pub mod service;
pub mod vision;

use tracing_subscriber::EnvFilter;

pub use pipeline::{
    AnalysisError, AnalysisPipeline, AnalysisResult, ClassificationResult, DetectionResult,
    DiagnosticReport, DiseaseClass, LeafModel, QualityIssue, ResultCache,
};
pub use service::AnalysisService;
pub use vision::{GeminiClient, VisionClient};

/// Install the global tracing subscriber. `RUST_LOG` overrides the
/// default crate-level filter. Safe to call once at startup.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
