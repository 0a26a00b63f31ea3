//! Classification extraction — maps the raw per-index probability vector
//! from the embedded model to symbolic disease classes.

use std::collections::BTreeMap;

use tracing::debug;

use super::classes::DiseaseClass;
use super::types::{ClassificationResult, DetectionResult};

/// Derive a symbolic classification from a detection's raw distribution.
///
/// Selects the strictly-largest probability (ties resolved by lowest
/// index — defined but arbitrary), translates the winning index through
/// the fixed class table, and re-keys the full map from index to symbol,
/// dropping indices beyond the known range. A winning index out of range
/// resolves to `Uncertain` rather than erroring.
///
/// Returns `None` when the detection carries no probabilities at all —
/// the caller treats that as a contract violation.
pub fn extract_classification(detection: &DetectionResult) -> Option<ClassificationResult> {
    let raw = detection.class_probabilities.as_ref()?;
    if raw.is_empty() {
        return None;
    }

    // BTreeMap iterates in ascending index order; strict `>` keeps the
    // first maximum, so the lowest index wins ties.
    let mut win_index = 0usize;
    let mut win_prob = f32::NEG_INFINITY;
    for (&index, &prob) in raw {
        if prob > win_prob {
            win_index = index;
            win_prob = prob;
        }
    }

    let disease_class = DiseaseClass::from_model_index(win_index);

    let probabilities: BTreeMap<DiseaseClass, f32> = raw
        .iter()
        .filter_map(|(&index, &prob)| {
            DiseaseClass::try_from_model_index(index).map(|class| (class, prob))
        })
        .collect();

    log_distribution(raw);

    Some(ClassificationResult {
        disease_class,
        confidence: win_prob,
        probabilities,
    })
}

/// Log the full distribution sorted by probability, for traceability of
/// near-miss classifications.
fn log_distribution(raw: &BTreeMap<usize, f32>) {
    let mut sorted: Vec<(usize, f32)> = raw.iter().map(|(&i, &p)| (i, p)).collect();
    sorted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let formatted: Vec<String> = sorted
        .iter()
        .map(|(i, p)| format!("{}={:.3}", DiseaseClass::from_model_index(*i), p))
        .collect();
    debug!(distribution = %formatted.join(", "), "Class probability distribution");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::BoundingBox;

    fn detection(probs: Option<BTreeMap<usize, f32>>) -> DetectionResult {
        DetectionResult {
            bounding_box: BoundingBox {
                x: 0,
                y: 0,
                width: 32,
                height: 32,
            },
            confidence: 0.9,
            class_probabilities: probs,
        }
    }

    fn one_hot(index: usize) -> BTreeMap<usize, f32> {
        let mut probs = BTreeMap::new();
        for i in 0..6 {
            probs.insert(i, 0.0);
        }
        probs.insert(index, 1.0);
        probs
    }

    #[test]
    fn one_hot_round_trip_all_known_indices() {
        let expected = [
            DiseaseClass::BacterialSpot,
            DiseaseClass::EarlyBlight,
            DiseaseClass::LateBlight,
            DiseaseClass::SeptoriaLeafSpot,
            DiseaseClass::TomatoMosaicVirus,
            DiseaseClass::Healthy,
        ];
        for (index, class) in expected.iter().enumerate() {
            let result = extract_classification(&detection(Some(one_hot(index)))).unwrap();
            assert_eq!(result.disease_class, *class, "index {index}");
            assert!((result.confidence - 1.0).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn out_of_range_winner_is_uncertain() {
        let mut probs = one_hot(0);
        probs.insert(6, 2.0); // index 6 wins but is unknown
        let result = extract_classification(&detection(Some(probs))).unwrap();
        assert_eq!(result.disease_class, DiseaseClass::Uncertain);
    }

    #[test]
    fn out_of_range_indices_dropped_from_map() {
        let mut probs = one_hot(1);
        probs.insert(9, 0.5);
        let result = extract_classification(&detection(Some(probs))).unwrap();
        assert_eq!(result.probabilities.len(), 6);
        assert!(!result.probabilities.contains_key(&DiseaseClass::Uncertain));
    }

    #[test]
    fn tie_resolved_by_lowest_index() {
        let mut probs = BTreeMap::new();
        probs.insert(2, 0.4);
        probs.insert(4, 0.4);
        probs.insert(0, 0.2);
        let result = extract_classification(&detection(Some(probs))).unwrap();
        assert_eq!(result.disease_class, DiseaseClass::LateBlight); // index 2
    }

    #[test]
    fn confidence_equals_map_maximum() {
        let mut probs = BTreeMap::new();
        probs.insert(0, 0.1);
        probs.insert(3, 0.65);
        probs.insert(5, 0.25);
        let result = extract_classification(&detection(Some(probs))).unwrap();
        let max = result
            .probabilities
            .values()
            .cloned()
            .fold(f32::NEG_INFINITY, f32::max);
        assert_eq!(result.confidence, max);
        assert_eq!(result.disease_class, DiseaseClass::SeptoriaLeafSpot);
    }

    #[test]
    fn missing_probabilities_returns_none() {
        assert!(extract_classification(&detection(None)).is_none());
    }

    #[test]
    fn empty_probabilities_returns_none() {
        assert!(extract_classification(&detection(Some(BTreeMap::new()))).is_none());
    }

    #[test]
    fn realistic_distribution_resolves_healthy() {
        let mut probs = BTreeMap::new();
        probs.insert(0, 0.1);
        probs.insert(1, 0.05);
        probs.insert(2, 0.02);
        probs.insert(3, 0.02);
        probs.insert(4, 0.01);
        probs.insert(5, 0.8);
        let result = extract_classification(&detection(Some(probs))).unwrap();
        assert_eq!(result.disease_class, DiseaseClass::Healthy);
        assert!((result.confidence - 0.8).abs() < f32::EPSILON);
    }
}
