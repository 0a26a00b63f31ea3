//! External validation glue — the two optional cloud sub-operations.
//!
//! Both fail open: any transport error, service error, or unparseable
//! reply lets the pipeline proceed as if validation had passed, with the
//! reason logged. An unavailable validator must never block a diagnosis.

use tracing::{debug, warn};

use super::classes::DiseaseClass;
use super::prompts;
use super::types::ClassificationResult;
use crate::config::CORRECTED_CLASSIFICATION_CONFIDENCE;
use crate::vision::VisionClient;

/// Outcome of the pre-screening ("is this a tomato leaf at all?").
#[derive(Debug, Clone)]
pub struct PreValidation {
    pub is_leaf: bool,
    pub reason: String,
}

/// Outcome of the classification review.
#[derive(Debug)]
pub enum ValidationOutcome {
    /// Reviewer agrees with the embedded model.
    Confirmed,
    /// Reviewer proposed a correction; the substitute classification
    /// carries the fixed elevated confidence and a single-entry map —
    /// once the corrector is invoked it is trusted completely.
    Corrected(ClassificationResult),
    /// Validation could not run or could not be parsed; the original
    /// classification stands (fail open).
    Unverified(String),
}

/// Ask the external service whether the image shows a tomato leaf.
///
/// Fails open: errors return `is_leaf = true` so the local pipeline gets
/// its chance. Only an explicit, parseable "NO" blocks.
pub fn pre_validate(client: &dyn VisionClient, image_png: &[u8]) -> PreValidation {
    let response = match client.generate_with_image(
        prompts::PRE_VALIDATION_PROMPT,
        Some(prompts::PRE_VALIDATION_SYSTEM),
        image_png,
    ) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Pre-validation unavailable, proceeding");
            return PreValidation {
                is_leaf: true,
                reason: format!("validator unavailable: {e}"),
            };
        }
    };

    match parse_pre_validation(&response) {
        Some(result) => {
            debug!(is_leaf = result.is_leaf, reason = %result.reason, "Pre-validation verdict");
            result
        }
        None => {
            warn!(response = %response, "Unparseable pre-validation reply, proceeding");
            PreValidation {
                is_leaf: true,
                reason: "unparseable validator reply".into(),
            }
        }
    }
}

/// Ask the external service to review the embedded model's classification.
///
/// Fails open: errors or unparseable replies yield `Unverified` and the
/// original classification is kept unchanged.
pub fn validate_classification(
    client: &dyn VisionClient,
    crop_png: &[u8],
    classification: &ClassificationResult,
) -> ValidationOutcome {
    let prompt = prompts::validation_prompt(classification);
    let response =
        match client.generate_with_image(&prompt, Some(prompts::VALIDATION_SYSTEM), crop_png) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Classification validation unavailable, keeping original");
                return ValidationOutcome::Unverified(e.to_string());
            }
        };

    let Some((is_correct, corrected, reason)) = parse_validation(&response) else {
        warn!(response = %response, "Unparseable validation reply, keeping original");
        return ValidationOutcome::Unverified("unparseable validator reply".into());
    };

    if is_correct {
        debug!(reason = %reason, "Validator confirmed classification");
        return ValidationOutcome::Confirmed;
    }

    match corrected {
        Some(class)
            if class != DiseaseClass::Uncertain && class != classification.disease_class =>
        {
            warn!(
                original = %classification.disease_class,
                corrected = %class,
                reason = %reason,
                "Validator overrode classification"
            );
            ValidationOutcome::Corrected(ClassificationResult::single(
                class,
                CORRECTED_CLASSIFICATION_CONFIDENCE,
            ))
        }
        _ => {
            // "Incorrect" without a usable replacement cannot be acted on
            debug!(reason = %reason, "Validator disagreed without a usable correction");
            ValidationOutcome::Unverified(reason)
        }
    }
}

// ──────────────────────────────────────────────
// Reply parsing
// ──────────────────────────────────────────────

/// Parse a `LEAF: YES|NO` / `REASON: ...` reply. `None` if no verdict
/// line can be found.
fn parse_pre_validation(response: &str) -> Option<PreValidation> {
    let mut is_leaf: Option<bool> = None;
    let mut reason = String::new();

    for line in response.lines() {
        let trimmed = line.trim();
        let lower = trimmed.to_lowercase();
        if let Some(rest) = lower.strip_prefix("leaf:") {
            let value = rest.trim();
            if value.starts_with("yes") {
                is_leaf = Some(true);
            } else if value.starts_with("no") {
                is_leaf = Some(false);
            }
        } else if let Some(rest) = trimmed
            .get(..7)
            .filter(|p| p.eq_ignore_ascii_case("reason:"))
            .map(|_| &trimmed[7..])
        {
            reason = rest.trim().to_string();
        }
    }

    is_leaf.map(|is_leaf| PreValidation { is_leaf, reason })
}

/// Parse a `VERDICT` / `CORRECTED` / `REASON` reply.
fn parse_validation(response: &str) -> Option<(bool, Option<DiseaseClass>, String)> {
    let mut verdict: Option<bool> = None;
    let mut corrected: Option<DiseaseClass> = None;
    let mut reason = String::new();

    for line in response.lines() {
        let trimmed = line.trim();
        let lower = trimmed.to_lowercase();
        if let Some(rest) = lower.strip_prefix("verdict:") {
            let value = rest.trim();
            if value.starts_with("correct") && !value.starts_with("correction") {
                verdict = Some(true);
            }
            if value.starts_with("incorrect") {
                verdict = Some(false);
            }
        } else if let Some(rest) = lower.strip_prefix("corrected:") {
            corrected = parse_disease_token(rest.trim());
        } else if let Some(rest) = lower.strip_prefix("reason:") {
            reason = rest.trim().to_string();
        }
    }

    verdict.map(|v| (v, corrected, reason))
}

/// Match a free-form class token against the closed class set.
/// Tolerates case differences and `_`/`-` in place of spaces.
fn parse_disease_token(token: &str) -> Option<DiseaseClass> {
    let normalized: String = token
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();

    if normalized.is_empty() || normalized == "none" {
        return None;
    }

    DiseaseClass::model_classes()
        .iter()
        .find(|class| {
            let name: String = class
                .display_name()
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            name == normalized
        })
        .copied()
}
