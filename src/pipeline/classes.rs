//! Disease class set and the model output index mapping.
//!
//! `CLASS_INDEX_ORDER` is the single source of truth for translating the
//! embedded model's output indices to disease classes. It must mirror the
//! training label order exactly: a silent transposition of two entries
//! produces confidently wrong diagnoses with no error signal. Do not copy
//! this table anywhere else; go through `DiseaseClass::from_model_index`.
//!
//! Verified against the deployed model's label file for `MODEL_VERSION`.
//! Any model update must revalidate this ordering against a labeled set
//! before shipping.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Version tag of the embedded detector/classifier the mapping below is
/// valid for. Stamped into every generated report.
pub const MODEL_VERSION: &str = "tomato-leaf-net-v2";

/// Closed set of diagnosable conditions.
///
/// `Uncertain` is a sentinel for "index out of range" or "insufficient
/// confidence" — it is never a direct model output.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum DiseaseClass {
    BacterialSpot,
    EarlyBlight,
    LateBlight,
    SeptoriaLeafSpot,
    TomatoMosaicVirus,
    Healthy,
    Uncertain,
}

/// Model output index → disease class, in training label order.
pub const CLASS_INDEX_ORDER: [DiseaseClass; 6] = [
    DiseaseClass::BacterialSpot,
    DiseaseClass::EarlyBlight,
    DiseaseClass::LateBlight,
    DiseaseClass::SeptoriaLeafSpot,
    DiseaseClass::TomatoMosaicVirus,
    DiseaseClass::Healthy,
];

impl DiseaseClass {
    /// Translate a model output index. Out-of-range indices resolve to
    /// `Uncertain` rather than erroring.
    pub fn from_model_index(index: usize) -> Self {
        Self::try_from_model_index(index).unwrap_or(Self::Uncertain)
    }

    /// Translate a model output index, or `None` when out of range.
    pub fn try_from_model_index(index: usize) -> Option<Self> {
        CLASS_INDEX_ORDER.get(index).copied()
    }

    /// Human-readable display name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::BacterialSpot => "Bacterial Spot",
            Self::EarlyBlight => "Early Blight",
            Self::LateBlight => "Late Blight",
            Self::SeptoriaLeafSpot => "Septoria Leaf Spot",
            Self::TomatoMosaicVirus => "Tomato Mosaic Virus",
            Self::Healthy => "Healthy",
            Self::Uncertain => "Uncertain",
        }
    }

    /// All classes the model can actually emit (excludes `Uncertain`).
    pub fn model_classes() -> &'static [DiseaseClass] {
        &CLASS_INDEX_ORDER
    }
}

impl fmt::Display for DiseaseClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
