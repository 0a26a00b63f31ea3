//! Pipeline orchestration — composes the stages into the full analysis
//! flow and its offline fallback.
//!
//! Full flow: decode, cache lookup, quality gate, optional cloud
//! pre-validation, crop, detect, extract, optional cloud validation,
//! confidence gate, report, cache write. The fallback flow runs the same
//! local stages with no cache and no cloud calls, for air-gapped or
//! key-less operation.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use rusqlite::Connection;
use tracing::{debug, info, warn};

use super::cache::ResultCache;
use super::extractor;
use super::hash;
use super::quality::{self, QualityIssue};
use super::report::{self, ReportGenerator};
use super::types::{
    AnalysisResult, ClassificationResult, DetectionResult, DiagnosticReport, LeafModel,
};
use super::validator::{self, ValidationOutcome};
use super::AnalysisError;
use crate::config::{CONFIDENCE_THRESHOLD, DETECTION_AUTHENTICITY_THRESHOLD};
use crate::vision::VisionClient;

/// The assembled analysis pipeline.
///
/// `vision` and `cache` are optional; absent components are skipped, not
/// errors. The model is mandatory.
pub struct AnalysisPipeline {
    model: Arc<dyn LeafModel>,
    vision: Option<Arc<dyn VisionClient>>,
    cache: Option<ResultCache>,
    conn: Option<Arc<Mutex<Connection>>>,
    reports: ReportGenerator,
}

impl AnalysisPipeline {
    pub fn new(
        model: Arc<dyn LeafModel>,
        vision: Option<Arc<dyn VisionClient>>,
        conn: Option<Arc<Mutex<Connection>>>,
    ) -> Self {
        let reports = ReportGenerator::new(vision.clone());
        Self {
            model,
            vision,
            cache: conn.clone().map(ResultCache::new),
            conn,
            reports,
        }
    }

    /// A fully local pipeline: no cloud service, no cache.
    pub fn local(model: Arc<dyn LeafModel>) -> Self {
        Self::new(model, None, None)
    }

    pub fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_ref()
    }

    /// Run the full analysis flow on raw photo bytes.
    pub fn analyze(&self, image_bytes: &[u8]) -> AnalysisResult {
        let started = Instant::now();

        let image = match quality::decode_image(image_bytes) {
            Ok(image) => image,
            Err(reason) => {
                warn!(%reason, "Image decode failed");
                return AnalysisResult::failed(
                    AnalysisError::PoorImageQuality(vec![QualityIssue::Unreadable]),
                    elapsed_ms(started),
                );
            }
        };

        let image_hash = hash::compute_image_hash(&image);
        if let Some(cache) = &self.cache {
            if let Some(report) = cache.get_cached_result(&image_hash) {
                info!(hash = %image_hash, "Returning cached diagnosis");
                return AnalysisResult::completed(None, None, report, elapsed_ms(started));
            }
        }

        match self.analyze_stages(&image, true, started) {
            Ok(result) => {
                if result.success {
                    if let (Some(cache), Some(report)) = (&self.cache, &result.report) {
                        cache.cache_result(&image_hash, report);
                    }
                }
                result
            }
            Err(result) => result,
        }
    }

    /// Run the offline fallback flow: local stages only, deterministic
    /// report, nothing cached.
    pub fn analyze_fallback(&self, image_bytes: &[u8]) -> AnalysisResult {
        let started = Instant::now();

        let image = match quality::decode_image(image_bytes) {
            Ok(image) => image,
            Err(reason) => {
                warn!(%reason, "Image decode failed");
                return AnalysisResult::failed(
                    AnalysisError::PoorImageQuality(vec![QualityIssue::Unreadable]),
                    elapsed_ms(started),
                );
            }
        };

        match self.analyze_stages(&image, false, started) {
            Ok(result) => result,
            Err(result) => result,
        }
    }

    /// The shared stage sequence after decode and cache lookup. `Err`
    /// carries the finished failure envelope.
    fn analyze_stages(
        &self,
        image: &image::DynamicImage,
        use_cloud: bool,
        started: Instant,
    ) -> Result<AnalysisResult, AnalysisResult> {
        let quality_report = quality::assess_quality(&image.to_rgb8());
        if !quality_report.is_valid {
            info!(issues = ?quality_report.issues, "Rejected by quality gate");
            return Err(AnalysisResult::failed(
                AnalysisError::PoorImageQuality(quality_report.issues),
                elapsed_ms(started),
            ));
        }

        // Preference is read once here; mid-run changes are not honored
        let vision = if use_cloud && self.validation_enabled() {
            self.vision.as_ref().filter(|v| v.is_available())
        } else {
            None
        };

        if let Some(vision) = vision {
            if let Ok(png) = quality::encode_png(image) {
                let screening = validator::pre_validate(vision.as_ref(), &png);
                if !screening.is_leaf {
                    info!(reason = %screening.reason, "Rejected by pre-validation");
                    return Err(AnalysisResult::failed(
                        AnalysisError::NoLeafDetected,
                        elapsed_ms(started),
                    ));
                }
            }
        }

        let crop = match self.model.crop_leaf(image) {
            Ok(Some(crop)) => crop,
            Ok(None) => {
                info!("No leaf region found to crop");
                return Err(AnalysisResult::failed(
                    AnalysisError::NoLeafDetected,
                    elapsed_ms(started),
                ));
            }
            Err(e) => {
                warn!(error = %e, "Crop failed");
                return Err(AnalysisResult::failed(
                    AnalysisError::Unknown(e.to_string()),
                    elapsed_ms(started),
                ));
            }
        };

        let detection = match self.detect_best(&crop) {
            Ok(detection) => detection,
            Err(err) => return Err(AnalysisResult::failed(err, elapsed_ms(started))),
        };

        let Some(mut classification) = extractor::extract_classification(&detection) else {
            warn!("Detection carried no class probabilities");
            return Err(AnalysisResult::failed_with(
                AnalysisError::Unknown("classifier produced no probability distribution".into()),
                Some(detection),
                None,
                elapsed_ms(started),
            ));
        };

        let crop_png = quality::encode_png(&crop).ok();

        if let (Some(vision), Some(png)) = (vision, crop_png.as_deref()) {
            match validator::validate_classification(vision.as_ref(), png, &classification) {
                ValidationOutcome::Corrected(corrected) => classification = corrected,
                ValidationOutcome::Confirmed | ValidationOutcome::Unverified(_) => {}
            }
        }

        // Exactly at the threshold is accepted
        if classification.confidence < CONFIDENCE_THRESHOLD {
            info!(
                confidence = classification.confidence,
                "Rejected by confidence gate"
            );
            return Err(AnalysisResult::failed_with(
                AnalysisError::LowConfidence(classification.confidence),
                Some(detection),
                Some(classification),
                elapsed_ms(started),
            ));
        }

        let diagnostic = self.build_report(&classification, crop_png.as_deref(), use_cloud);

        debug!(
            class = %classification.disease_class,
            confidence = classification.confidence,
            "Analysis complete"
        );
        Ok(AnalysisResult::completed(
            Some(detection),
            Some(classification),
            diagnostic,
            elapsed_ms(started),
        ))
    }

    /// The user's cloud-validation preference. Defaults to enabled when
    /// no database is configured or the read fails.
    fn validation_enabled(&self) -> bool {
        let Some(conn) = &self.conn else { return true };
        let Ok(guard) = conn.lock() else { return true };
        crate::preferences::use_external_validation(&guard).unwrap_or(true)
    }

    /// Run detection on the crop and keep the strongest candidate. Weak
    /// detections read as "not a tomato leaf", not as a quality problem.
    fn detect_best(&self, crop: &image::DynamicImage) -> Result<DetectionResult, AnalysisError> {
        let detections = self
            .model
            .detect_leaves(crop)
            .map_err(|e| AnalysisError::Unknown(e.to_string()))?;

        let best = detections
            .into_iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .ok_or(AnalysisError::NoLeafDetected)?;

        if best.confidence < DETECTION_AUTHENTICITY_THRESHOLD {
            info!(
                confidence = best.confidence,
                "Detection below authenticity threshold"
            );
            return Err(AnalysisError::NoLeafDetected);
        }
        Ok(best)
    }

    fn build_report(
        &self,
        classification: &ClassificationResult,
        crop_png: Option<&[u8]>,
        use_cloud: bool,
    ) -> DiagnosticReport {
        match (use_cloud, crop_png) {
            (true, Some(png)) => self.reports.generate(classification, png),
            _ => report::fallback_report(classification),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CORRECTED_CLASSIFICATION_CONFIDENCE;
    use crate::db::open_memory_database;
    use crate::pipeline::classes::DiseaseClass;
    use crate::pipeline::types::MockLeafModel;
    use crate::vision::MockVisionClient;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::collections::BTreeMap;

    /// Sharp, well-lit test photo as PNG bytes.
    fn good_photo() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(320, 320, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        }));
        quality::encode_png(&img).unwrap()
    }

    fn dark_photo() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(320, 320, Rgb([5, 5, 5])));
        quality::encode_png(&img).unwrap()
    }

    fn healthy_probs() -> BTreeMap<usize, f32> {
        let mut probs = BTreeMap::new();
        probs.insert(0, 0.1);
        probs.insert(1, 0.05);
        probs.insert(2, 0.02);
        probs.insert(3, 0.02);
        probs.insert(4, 0.01);
        probs.insert(5, 0.8);
        probs
    }

    fn blight_probs(confidence: f32) -> BTreeMap<usize, f32> {
        let mut probs = BTreeMap::new();
        for i in 0..6 {
            probs.insert(i, 0.01);
        }
        probs.insert(1, confidence);
        probs
    }

    fn healthy_model() -> Arc<dyn LeafModel> {
        Arc::new(MockLeafModel::new().with_detection(0.9, Some(healthy_probs())))
    }

    fn shared_conn() -> Arc<Mutex<Connection>> {
        Arc::new(Mutex::new(open_memory_database().unwrap()))
    }

    // ── local flow ──

    #[test]
    fn healthy_leaf_diagnosed_end_to_end() {
        let pipeline = AnalysisPipeline::local(healthy_model());
        let result = pipeline.analyze(&good_photo());

        assert!(result.success, "error: {:?}", result.error);
        let report = result.report.unwrap();
        assert_eq!(report.disease_name, "Healthy");
        assert!(!report.is_uncertain);
        let classification = result.classification.unwrap();
        assert_eq!(classification.disease_class, DiseaseClass::Healthy);
        assert!((classification.confidence - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn unreadable_bytes_rejected() {
        let pipeline = AnalysisPipeline::local(healthy_model());
        let result = pipeline.analyze(&vec![0u8; 1024]);
        assert_eq!(
            result.error,
            Some(AnalysisError::PoorImageQuality(vec![
                QualityIssue::Unreadable
            ]))
        );
    }

    #[test]
    fn dark_photo_rejected_by_quality_gate() {
        let pipeline = AnalysisPipeline::local(healthy_model());
        let result = pipeline.analyze(&dark_photo());
        match result.error {
            Some(AnalysisError::PoorImageQuality(issues)) => {
                assert!(issues.contains(&QualityIssue::TooDark));
            }
            other => panic!("expected quality failure, got {other:?}"),
        }
    }

    #[test]
    fn no_crop_means_no_leaf() {
        let model = MockLeafModel::new()
            .with_detection(0.9, Some(healthy_probs()))
            .with_no_crop();
        let pipeline = AnalysisPipeline::local(Arc::new(model));
        let result = pipeline.analyze(&good_photo());
        assert_eq!(result.error, Some(AnalysisError::NoLeafDetected));
    }

    #[test]
    fn no_detections_means_no_leaf() {
        let pipeline = AnalysisPipeline::local(Arc::new(MockLeafModel::new()));
        let result = pipeline.analyze(&good_photo());
        assert_eq!(result.error, Some(AnalysisError::NoLeafDetected));
    }

    #[test]
    fn weak_detection_means_no_leaf() {
        let model = MockLeafModel::new().with_detection(0.5999, Some(healthy_probs()));
        let pipeline = AnalysisPipeline::local(Arc::new(model));
        let result = pipeline.analyze(&good_photo());
        assert_eq!(result.error, Some(AnalysisError::NoLeafDetected));
    }

    #[test]
    fn detection_exactly_at_authenticity_threshold_passes() {
        let model = MockLeafModel::new().with_detection(0.6, Some(healthy_probs()));
        let pipeline = AnalysisPipeline::local(Arc::new(model));
        let result = pipeline.analyze(&good_photo());
        assert!(result.success);
    }

    #[test]
    fn strongest_detection_wins() {
        let model = MockLeafModel::new()
            .with_detection(0.7, Some(blight_probs(0.9)))
            .with_detection(0.95, Some(healthy_probs()));
        let pipeline = AnalysisPipeline::local(Arc::new(model));
        let result = pipeline.analyze(&good_photo());
        assert!(result.success);
        assert_eq!(
            result.classification.unwrap().disease_class,
            DiseaseClass::Healthy
        );
    }

    #[test]
    fn low_confidence_fails_closed_with_partials() {
        let model = MockLeafModel::new().with_detection(0.9, Some(blight_probs(0.4999)));
        let pipeline = AnalysisPipeline::local(Arc::new(model));
        let result = pipeline.analyze(&good_photo());

        assert_eq!(result.error, Some(AnalysisError::LowConfidence(0.4999)));
        assert!(result.report.is_none());
        // Partial output rides along for display
        assert!(result.detection.is_some());
        assert_eq!(
            result.classification.unwrap().disease_class,
            DiseaseClass::EarlyBlight
        );
    }

    #[test]
    fn confidence_exactly_at_threshold_accepted() {
        let model = MockLeafModel::new().with_detection(0.9, Some(blight_probs(0.5)));
        let pipeline = AnalysisPipeline::local(Arc::new(model));
        let result = pipeline.analyze(&good_photo());
        assert!(result.success, "error: {:?}", result.error);
    }

    #[test]
    fn missing_probabilities_is_unknown_failure() {
        let model = MockLeafModel::new().with_detection(0.9, None);
        let pipeline = AnalysisPipeline::local(Arc::new(model));
        let result = pipeline.analyze(&good_photo());
        assert!(matches!(result.error, Some(AnalysisError::Unknown(_))));
    }

    #[test]
    fn model_failure_is_unknown_failure() {
        let pipeline = AnalysisPipeline::local(Arc::new(MockLeafModel::new().failing()));
        let result = pipeline.analyze(&good_photo());
        assert!(matches!(result.error, Some(AnalysisError::Unknown(_))));
    }

    // ── cloud flow ──

    fn cloud_pipeline(responses: &[&str]) -> AnalysisPipeline {
        AnalysisPipeline::new(
            healthy_model(),
            Some(Arc::new(MockVisionClient::with_responses(responses))),
            None,
        )
    }

    #[test]
    fn pre_validation_rejection_blocks_analysis() {
        let pipeline = cloud_pipeline(&["LEAF: NO\nREASON: photo of a shoe"]);
        let result = pipeline.analyze(&good_photo());
        assert_eq!(result.error, Some(AnalysisError::NoLeafDetected));
    }

    #[test]
    fn cloud_flow_produces_rich_report() {
        let narrative = "**Healthy** foliage throughout the frame. The leaf shows \
            no spots or lesions anywhere on its surface. Confidence in this \
            assessment is high. Keep watering at the base and inspect weekly.";
        let pipeline = cloud_pipeline(&[
            "LEAF: YES\nREASON: tomato foliage",
            "VERDICT: CORRECT\nCORRECTED: NONE\nREASON: agrees",
            narrative,
        ]);
        let result = pipeline.analyze(&good_photo());
        assert!(result.success);
        let report = result.report.unwrap();
        assert_eq!(report.disease_name, "Healthy");
        assert_eq!(report.full_report, narrative);
    }

    #[test]
    fn validation_override_substitutes_classification() {
        let pipeline = cloud_pipeline(&[
            "LEAF: YES\nREASON: tomato foliage",
            "VERDICT: INCORRECT\nCORRECTED: Early Blight\nREASON: target-pattern spots",
            "**Early Blight** lesions are visible. Brown target-pattern spots mark \
             the lower leaves of the plant. Confidence is high after review. Prune \
             the affected leaves and mulch the bed.",
        ]);
        let result = pipeline.analyze(&good_photo());
        assert!(result.success);
        let classification = result.classification.unwrap();
        assert_eq!(classification.disease_class, DiseaseClass::EarlyBlight);
        assert!(
            (classification.confidence - CORRECTED_CLASSIFICATION_CONFIDENCE).abs() < f32::EPSILON
        );
        assert_eq!(result.report.unwrap().disease_name, "Early Blight");
    }

    #[test]
    fn vision_outage_degrades_to_deterministic_success() {
        let pipeline = AnalysisPipeline::new(
            healthy_model(),
            Some(Arc::new(MockVisionClient::new("x").failing())),
            None,
        );
        let result = pipeline.analyze(&good_photo());
        assert!(result.success, "error: {:?}", result.error);
        assert_eq!(result.report.unwrap().disease_name, "Healthy");
    }

    #[test]
    fn unavailable_vision_skipped_entirely() {
        let pipeline = AnalysisPipeline::new(
            healthy_model(),
            Some(Arc::new(MockVisionClient::new("LEAF: NO").unavailable())),
            None,
        );
        let result = pipeline.analyze(&good_photo());
        assert!(result.success);
    }

    #[test]
    fn validation_preference_off_skips_cloud_gates() {
        let conn = shared_conn();
        {
            let guard = conn.lock().unwrap();
            crate::preferences::set_use_external_validation(&guard, false).unwrap();
        }
        // The scripted rejection would block if pre-validation ran
        let pipeline = AnalysisPipeline::new(
            healthy_model(),
            Some(Arc::new(MockVisionClient::new("LEAF: NO\nREASON: scripted"))),
            Some(conn),
        );
        let result = pipeline.analyze(&good_photo());
        assert!(result.success, "error: {:?}", result.error);
        // Caching is unaffected by the validation preference
        assert_eq!(pipeline.cache().unwrap().entry_count(), 1);
    }

    // ── caching ──

    #[test]
    fn repeat_analysis_served_from_cache() {
        let pipeline = AnalysisPipeline::new(healthy_model(), None, Some(shared_conn()));
        let photo = good_photo();

        let first = pipeline.analyze(&photo);
        assert!(first.success);
        let first_report = first.report.unwrap();

        let second = pipeline.analyze(&photo);
        assert!(second.success);
        let second_report = second.report.unwrap();
        assert_eq!(second_report.id, first_report.id);
        assert_eq!(second_report.created_at, first_report.created_at);
        // Cache hits skip the model; no fresh detection rides along
        assert!(second.detection.is_none());
        assert!(second.classification.is_none());
    }

    #[test]
    fn cache_hits_stay_identical_across_reads() {
        let pipeline = AnalysisPipeline::new(healthy_model(), None, Some(shared_conn()));
        let photo = good_photo();
        let original = pipeline.analyze(&photo).report.unwrap();

        for _ in 0..10 {
            let hit = pipeline.analyze(&photo).report.unwrap();
            assert_eq!(hit.id, original.id);
            assert_eq!(hit.full_report, original.full_report);
        }
    }

    #[test]
    fn failures_are_not_cached() {
        let model = MockLeafModel::new().with_detection(0.9, Some(blight_probs(0.3)));
        let pipeline = AnalysisPipeline::new(Arc::new(model), None, Some(shared_conn()));
        let photo = good_photo();

        let result = pipeline.analyze(&photo);
        assert!(!result.success);
        assert_eq!(pipeline.cache().unwrap().entry_count(), 0);
    }

    // ── fallback flow ──

    #[test]
    fn fallback_flow_succeeds_without_cloud_or_cache() {
        // The scripted rejection would block the full flow; the fallback
        // flow must never consult the vision service.
        let pipeline = AnalysisPipeline::new(
            healthy_model(),
            Some(Arc::new(MockVisionClient::new("LEAF: NO\nREASON: scripted"))),
            Some(shared_conn()),
        );
        let result = pipeline.analyze_fallback(&good_photo());
        assert!(result.success);
        assert_eq!(result.report.unwrap().disease_name, "Healthy");
        assert_eq!(pipeline.cache().unwrap().entry_count(), 0);
    }

    #[test]
    fn fallback_flow_is_deterministic() {
        let pipeline = AnalysisPipeline::local(healthy_model());
        let photo = good_photo();
        let a = pipeline.analyze_fallback(&photo).report.unwrap();
        let b = pipeline.analyze_fallback(&photo).report.unwrap();
        assert_eq!(a.full_report, b.full_report);
        assert_eq!(a.disease_name, b.disease_name);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn fallback_flow_applies_same_gates() {
        let pipeline = AnalysisPipeline::local(healthy_model());
        let result = pipeline.analyze_fallback(&dark_photo());
        assert!(matches!(
            result.error,
            Some(AnalysisError::PoorImageQuality(_))
        ));
    }
}
