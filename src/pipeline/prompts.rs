//! Prompt templates for the cloud vision-language calls.
//!
//! All three prompts instruct the model to answer in a line-tagged format
//! (`TAG: value`) so the reply can be parsed with tolerant keyword
//! matching instead of brittle JSON. Parsing lives in `validator` and
//! `report`; any unparseable reply degrades to the deterministic path.

use super::classes::DiseaseClass;
use super::types::ClassificationResult;

// ──────────────────────────────────────────────
// Pre-validation
// ──────────────────────────────────────────────

pub const PRE_VALIDATION_SYSTEM: &str = "\
You are an agricultural image screening assistant. You decide whether a \
photograph shows a tomato plant leaf. Answer only in the requested format.";

pub const PRE_VALIDATION_PROMPT: &str = "\
Does this photograph show a tomato plant leaf (healthy or diseased)?\n\
Reply with exactly two lines:\n\
LEAF: YES or NO\n\
REASON: one short sentence";

// ──────────────────────────────────────────────
// Classification validation
// ──────────────────────────────────────────────

pub const VALIDATION_SYSTEM: &str = "\
You are a plant pathology reviewer. An on-device model has classified a \
tomato leaf photograph; you confirm the classification or propose a \
correction from the fixed class list. Answer only in the requested format.";

/// Prompt asking the reviewer to confirm or correct a classification.
pub fn validation_prompt(classification: &ClassificationResult) -> String {
    let class_list: Vec<&str> = DiseaseClass::model_classes()
        .iter()
        .map(|c| c.display_name())
        .collect();

    format!(
        "An embedded model classified this cropped tomato leaf as \"{}\" \
         with confidence {:.2}.\n\
         The only possible classes are: {}.\n\
         Reply with exactly three lines:\n\
         VERDICT: CORRECT or INCORRECT\n\
         CORRECTED: the correct class from the list above, or NONE\n\
         REASON: one short sentence",
        classification.disease_class.display_name(),
        classification.confidence,
        class_list.join(", "),
    )
}

// ──────────────────────────────────────────────
// Report generation
// ──────────────────────────────────────────────

pub const REPORT_SYSTEM: &str = "\
You are an agronomy assistant writing short diagnostic summaries for \
home growers. Be concrete and practical; avoid hedging and jargon.";

/// Prompt asking for a short narrative report. The reply must contain
/// the disease name in bold so it can be located heuristically.
pub fn report_prompt(classification: &ClassificationResult) -> String {
    format!(
        "A tomato leaf in the attached photo was diagnosed as \"{}\" with \
         confidence {:.2}.\n\
         Write a diagnostic summary of 3 to 5 sentences. Start with the \
         disease name in bold (for example **{}**). Describe the visible \
         symptoms, comment on how confident the diagnosis is, and end with \
         one concrete management recommendation.",
        classification.disease_class.display_name(),
        classification.confidence,
        classification.disease_class.display_name(),
    )
}
