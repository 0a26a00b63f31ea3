use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::classes::DiseaseClass;
use super::AnalysisError;

/// Pixel-coordinate bounding box of a detected leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One localized leaf candidate from the embedded model.
///
/// `class_probabilities` maps model output index to raw probability and
/// may be absent when the model variant does not emit classification.
/// Consumed by one pipeline step and discarded — never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub bounding_box: BoundingBox,
    pub confidence: f32,
    pub class_probabilities: Option<BTreeMap<usize, f32>>,
}

/// Symbolic classification derived from a `DetectionResult`.
///
/// Invariant: `confidence` equals the arg-max of the raw distribution.
/// The probability map is re-keyed from index to symbol; probabilities
/// come from a softmax and need not re-normalize to exactly 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub disease_class: DiseaseClass,
    pub confidence: f32,
    pub probabilities: BTreeMap<DiseaseClass, f32>,
}

impl ClassificationResult {
    /// A single-entry result, used when the external validator overrides
    /// the embedded model and its full distribution is discarded.
    pub fn single(disease_class: DiseaseClass, confidence: f32) -> Self {
        let mut probabilities = BTreeMap::new();
        probabilities.insert(disease_class, confidence);
        Self {
            disease_class,
            confidence,
            probabilities,
        }
    }
}

/// The terminal artifact of an analysis. Immutable once created;
/// persisted in the result cache and in history storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub id: Uuid,
    pub disease_name: String,
    pub symptoms: String,
    pub confidence_text: String,
    pub recommendation: String,
    pub full_report: String,
    pub is_uncertain: bool,
    pub created_at: DateTime<Utc>,
    pub model_version: String,
}

/// Uniform result envelope returned by the pipeline.
///
/// Exactly one of {report with success=true, error with success=false}
/// holds. Detection and classification ride along where the pipeline got
/// far enough to produce them (absent on cache hits).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub success: bool,
    pub detection: Option<DetectionResult>,
    pub classification: Option<ClassificationResult>,
    pub report: Option<DiagnosticReport>,
    pub error: Option<AnalysisError>,
    pub processing_time_ms: u64,
}

impl AnalysisResult {
    pub fn completed(
        detection: Option<DetectionResult>,
        classification: Option<ClassificationResult>,
        report: DiagnosticReport,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            success: true,
            detection,
            classification,
            report: Some(report),
            error: None,
            processing_time_ms,
        }
    }

    pub fn failed(error: AnalysisError, processing_time_ms: u64) -> Self {
        Self::failed_with(error, None, None, processing_time_ms)
    }

    /// Failure envelope that still carries partial pipeline output, e.g.
    /// the detection and classification behind a low-confidence rejection.
    pub fn failed_with(
        error: AnalysisError,
        detection: Option<DetectionResult>,
        classification: Option<ClassificationResult>,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            success: false,
            detection,
            classification,
            report: None,
            error: Some(error),
            processing_time_ms,
        }
    }
}

/// Failure from the embedded model runtime.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Boundary to the embedded detector/classifier runtime.
///
/// The pipeline treats implementations as opaque. Contract: confidence is
/// 0–1, higher is better; when classification is supported,
/// `class_probabilities` holds one entry per trained class index; results
/// are deterministic for identical weights and input.
pub trait LeafModel: Send + Sync {
    /// Localize leaf candidates in the frame. May return an empty list.
    fn detect_leaves(&self, image: &DynamicImage) -> Result<Vec<DetectionResult>, ModelError>;

    /// Crop the leaf region. `None` means no leaf was found.
    fn crop_leaf(&self, image: &DynamicImage) -> Result<Option<DynamicImage>, ModelError>;
}

// ──────────────────────────────────────────────
// MockLeafModel (testing)
// ──────────────────────────────────────────────

/// Mock embedded model for tests. Returns configured detections and crops
/// the full frame unless told to find nothing.
pub struct MockLeafModel {
    detections: Vec<DetectionResult>,
    crop_found: bool,
    fail: bool,
}

impl MockLeafModel {
    pub fn new() -> Self {
        Self {
            detections: Vec::new(),
            crop_found: true,
            fail: false,
        }
    }

    /// Add a detection with the given confidence and raw probability map.
    pub fn with_detection(
        mut self,
        confidence: f32,
        class_probabilities: Option<BTreeMap<usize, f32>>,
    ) -> Self {
        self.detections.push(DetectionResult {
            bounding_box: BoundingBox {
                x: 0,
                y: 0,
                width: 64,
                height: 64,
            },
            confidence,
            class_probabilities,
        });
        self
    }

    /// Simulate "no leaf found" from the crop operation.
    pub fn with_no_crop(mut self) -> Self {
        self.crop_found = false;
        self
    }

    /// Simulate a runtime failure on every call.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl Default for MockLeafModel {
    fn default() -> Self {
        Self::new()
    }
}

impl LeafModel for MockLeafModel {
    fn detect_leaves(&self, _image: &DynamicImage) -> Result<Vec<DetectionResult>, ModelError> {
        if self.fail {
            return Err(ModelError::Inference("mock inference failure".into()));
        }
        Ok(self.detections.clone())
    }

    fn crop_leaf(&self, image: &DynamicImage) -> Result<Option<DynamicImage>, ModelError> {
        if self.fail {
            return Err(ModelError::Inference("mock inference failure".into()));
        }
        if !self.crop_found {
            return Ok(None);
        }
        Ok(Some(image.clone()))
    }
}
