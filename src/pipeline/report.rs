//! Diagnostic report generation.
//!
//! Two paths produce a `DiagnosticReport`: a rich narrative written by
//! the cloud vision model, and a deterministic template assembled from
//! the class table. The deterministic path is the floor — it needs no
//! network, never fails, and backs every rich-path failure.

use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::classes::{DiseaseClass, MODEL_VERSION};
use super::prompts;
use super::types::{ClassificationResult, DiagnosticReport};
use crate::config::CONFIDENCE_THRESHOLD;
use crate::vision::VisionClient;

/// Produces diagnostic reports, preferring the vision service when one
/// is configured and reachable.
pub struct ReportGenerator {
    vision: Option<Arc<dyn VisionClient>>,
}

impl ReportGenerator {
    pub fn new(vision: Option<Arc<dyn VisionClient>>) -> Self {
        Self { vision }
    }

    /// Build a report for an accepted classification.
    ///
    /// Uncertain classifications never reach the vision service; there is
    /// nothing trustworthy to narrate. Otherwise the rich path is tried
    /// and any failure degrades to the deterministic template.
    pub fn generate(
        &self,
        classification: &ClassificationResult,
        crop_png: &[u8],
    ) -> DiagnosticReport {
        if classification.disease_class == DiseaseClass::Uncertain {
            return fallback_report(classification);
        }

        let Some(vision) = self.vision.as_ref().filter(|v| v.is_available()) else {
            debug!("No vision service, using deterministic report");
            return fallback_report(classification);
        };

        let prompt = prompts::report_prompt(classification);
        match vision.generate_with_image(&prompt, Some(prompts::REPORT_SYSTEM), crop_png) {
            Ok(text) => match parse_rich_report(&text, classification) {
                Some(report) => report,
                None => {
                    warn!("Unusable narrative reply, using deterministic report");
                    fallback_report(classification)
                }
            },
            Err(e) => {
                warn!(error = %e, "Report generation failed, using deterministic report");
                fallback_report(classification)
            }
        }
    }
}

// ──────────────────────────────────────────────
// Rich path parsing
// ──────────────────────────────────────────────

/// Carve a narrative reply into report fields. `None` when the reply is
/// too short or contains no sentences to work with.
fn parse_rich_report(text: &str, classification: &ClassificationResult) -> Option<DiagnosticReport> {
    let text = text.trim();
    if text.len() < 40 {
        return None;
    }

    // The prompt asks for the disease name in bold. If the model ignored
    // that, fall back to the class table's name.
    let disease_name = Regex::new(r"\*\*([^*]+)\*\*")
        .ok()
        .and_then(|re| re.captures(text))
        .map(|caps| caps[1].trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| classification.disease_class.display_name().to_string());

    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return None;
    }

    let symptoms = pick_sentence(&sentences, &["spot", "lesion", "yellow", "symptom", "mold", "mottl"])
        .unwrap_or_else(|| sentences[0].clone());
    let confidence_text = pick_sentence(&sentences, &["confiden", "certain", "likely"])
        .unwrap_or_else(|| confidence_phrase(classification.confidence));
    let recommendation = pick_sentence(&sentences, &["remove", "apply", "treat", "recommend", "prune", "avoid", "water"])
        .unwrap_or_else(|| sentences[sentences.len() - 1].clone());

    Some(DiagnosticReport {
        id: Uuid::new_v4(),
        disease_name,
        symptoms,
        confidence_text,
        recommendation,
        full_report: text.to_string(),
        is_uncertain: classification.confidence < CONFIDENCE_THRESHOLD,
        created_at: Utc::now(),
        model_version: MODEL_VERSION.to_string(),
    })
}

fn split_sentences(text: &str) -> Vec<String> {
    text.split_inclusive(['.', '!', '?'])
        .map(|s| s.trim().trim_start_matches("**").to_string())
        .filter(|s| s.len() > 10)
        .collect()
}

/// First sentence containing any of the keywords, case-insensitively.
fn pick_sentence(sentences: &[String], keywords: &[&str]) -> Option<String> {
    sentences
        .iter()
        .find(|s| {
            let lower = s.to_lowercase();
            keywords.iter().any(|k| lower.contains(k))
        })
        .cloned()
}

// ──────────────────────────────────────────────
// Deterministic path
// ──────────────────────────────────────────────

/// Assemble a report from the class table alone. Pure except for the
/// fresh id and timestamp; identical classifications produce identical
/// text.
pub fn fallback_report(classification: &ClassificationResult) -> DiagnosticReport {
    let class = classification.disease_class;
    let is_uncertain =
        class == DiseaseClass::Uncertain || classification.confidence < CONFIDENCE_THRESHOLD;

    let symptoms = class_symptoms(class).to_string();
    let recommendation = class_recommendation(class).to_string();
    let confidence_text = confidence_phrase(classification.confidence);

    let full_report = format!(
        "**{}**\n\n{}\n\n{} {}",
        class.display_name(),
        symptoms,
        confidence_text,
        recommendation,
    );

    DiagnosticReport {
        id: Uuid::new_v4(),
        disease_name: class.display_name().to_string(),
        symptoms,
        confidence_text,
        recommendation,
        full_report,
        is_uncertain,
        created_at: Utc::now(),
        model_version: MODEL_VERSION.to_string(),
    }
}

fn confidence_phrase(confidence: f32) -> String {
    let band = if confidence >= 0.85 {
        "high"
    } else if confidence >= CONFIDENCE_THRESHOLD {
        "moderate"
    } else {
        "low"
    };
    format!(
        "The model's confidence in this diagnosis is {} ({:.0}%).",
        band,
        confidence * 100.0
    )
}

fn class_symptoms(class: DiseaseClass) -> &'static str {
    match class {
        DiseaseClass::BacterialSpot => {
            "Small dark water-soaked spots on leaves that enlarge and develop \
             yellow halos; heavily spotted leaves turn yellow and drop."
        }
        DiseaseClass::EarlyBlight => {
            "Brown leaf spots with concentric rings forming a target pattern, \
             usually starting on the older, lower leaves."
        }
        DiseaseClass::LateBlight => {
            "Large irregular greasy-looking gray-green blotches that turn brown, \
             often with white fuzzy mold on the leaf underside in humid weather."
        }
        DiseaseClass::SeptoriaLeafSpot => {
            "Many small circular spots with dark margins and tan or gray centers, \
             appearing first on the lowest leaves after fruit set."
        }
        DiseaseClass::TomatoMosaicVirus => {
            "Light and dark green mottling or mosaic pattern on leaves, often \
             with curling, distortion, or fern-like narrowing of young foliage."
        }
        DiseaseClass::Healthy => {
            "No disease symptoms detected. Leaf tissue shows uniform healthy \
             green coloration without spots, lesions, or distortion."
        }
        DiseaseClass::Uncertain => {
            "The visual evidence does not clearly match any disease the model \
             was trained to recognize."
        }
    }
}

fn class_recommendation(class: DiseaseClass) -> &'static str {
    match class {
        DiseaseClass::BacterialSpot => {
            "Remove affected leaves, avoid overhead watering, and apply a \
             copper-based bactericide at the first sign of spread."
        }
        DiseaseClass::EarlyBlight => {
            "Prune away infected lower leaves, mulch the soil surface, and \
             rotate tomatoes out of this bed for at least two seasons."
        }
        DiseaseClass::LateBlight => {
            "Act immediately: remove and destroy affected plants, do not \
             compost them, and protect neighbors with a targeted fungicide."
        }
        DiseaseClass::SeptoriaLeafSpot => {
            "Remove infected foliage, water at the base of the plant, and \
             improve air circulation between plants."
        }
        DiseaseClass::TomatoMosaicVirus => {
            "There is no cure; remove and destroy infected plants, wash hands \
             and tools before touching healthy ones, and plant resistant \
             varieties next season."
        }
        DiseaseClass::Healthy => {
            "Keep up current care. Continue regular watering at the base and \
             inspect new growth weekly for early signs of disease."
        }
        DiseaseClass::Uncertain => {
            "Retake the photo in better light, filling the frame with a single \
             leaf, or consult a local agricultural extension service."
        }
    }
}
