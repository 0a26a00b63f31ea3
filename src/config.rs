use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Leafscope";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// ──────────────────────────────────────────────
// Analysis tunables
// ──────────────────────────────────────────────
//
// Every threshold the pipeline compares against lives here as a named
// constant. Call sites must not restate these values inline.

/// Minimum classification confidence accepted as a diagnosis.
/// A value exactly at the threshold is accepted; below it the pipeline
/// fails closed with a low-confidence error.
pub const CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Minimum detection confidence accepted as "this is a tomato leaf".
/// The detector was trained exclusively on tomato leaves, so a weak
/// detection is read as "probably not a tomato leaf", not "poor image".
pub const DETECTION_AUTHENTICITY_THRESHOLD: f32 = 0.6;

/// Days before a cached diagnostic report expires.
pub const CACHE_TTL_DAYS: i64 = 7;

/// Maximum number of live cache entries before LRU eviction kicks in.
pub const MAX_CACHE_ENTRIES: usize = 100;

/// Perceptual-hash similarity at or above which two images are treated
/// as the same content for cache purposes.
pub const HASH_SIMILARITY_THRESHOLD: f64 = 0.95;

/// Confidence injected when the external validator overrides the embedded
/// model's classification. Once the corrector is trusted its verdict is
/// trusted; the exact value is a product decision, see DESIGN.md.
pub const CORRECTED_CLASSIFICATION_CONFIDENCE: f32 = 0.85;

// ──────────────────────────────────────────────
// Paths
// ──────────────────────────────────────────────

/// Get the application data directory.
/// ~/Leafscope/ on all platforms (user-visible, per design requirement).
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("Leafscope")
}

/// Path of the SQLite database holding the result cache and preferences.
pub fn database_path() -> PathBuf {
    app_data_dir().join("leafscope.db")
}

/// Default tracing filter when RUST_LOG is not set.
pub fn default_log_filter() -> String {
    format!("{}=info", env!("CARGO_PKG_NAME"))
}
