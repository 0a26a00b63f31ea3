//! Analysis pipeline: the multi-stage orchestration that turns a raw
//! photograph into a diagnostic report, with its consistency and caching
//! layer. Stages are composed in `orchestrator`; the surrounding modules
//! are the stages themselves.

pub mod cache;
pub mod classes;
pub mod extractor;
pub mod hash;
pub mod orchestrator;
pub mod prompts;
pub mod quality;
pub mod report;
pub mod types;
pub mod validator;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cache::ResultCache;
pub use classes::{DiseaseClass, CLASS_INDEX_ORDER, MODEL_VERSION};
pub use orchestrator::AnalysisPipeline;
pub use quality::QualityIssue;
pub use types::{
    AnalysisResult, BoundingBox, ClassificationResult, DetectionResult, DiagnosticReport,
    LeafModel, MockLeafModel, ModelError,
};

/// Failures that reach the caller through the result envelope.
///
/// External-service and cache failures never appear here: the former are
/// absorbed into a deterministic-fallback report, the latter into a cache
/// miss or a skipped write.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnalysisError {
    /// Recoverable: the photo is unusable; the user must retake it.
    #[error("Image quality too poor for analysis: {0:?}")]
    PoorImageQuality(Vec<QualityIssue>),

    /// Recoverable: no crop, weak detection, or external pre-validation
    /// says this is not a tomato leaf — nothing diagnosable was found.
    #[error("No tomato leaf detected in the image")]
    NoLeafDetected,

    /// Recoverable: classification ran but is untrustworthy. An uncertain
    /// diagnosis is worse than no diagnosis, so the pipeline fails closed.
    #[error("Classification confidence {0:.3} is below the acceptance threshold")]
    LowConfidence(f32),

    /// Fatal: a component violated its contract and no safe fallback
    /// exists (e.g. the classifier emitted no probabilities at all).
    #[error("Unexpected analysis failure: {0}")]
    Unknown(String),
}
