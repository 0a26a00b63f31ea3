//! External vision-language service integration.
//!
//! Everything behind the `VisionClient` trait is optional: every call
//! site in the pipeline either fails open or falls back to deterministic
//! output when the service is unavailable or erroring.

pub mod gemini;
pub mod types;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("No API key configured")]
    MissingApiKey,

    #[error("Cannot reach vision service: {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Vision service returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Cannot parse vision service response: {0}")]
    ResponseParsing(String),
}

pub use gemini::GeminiClient;
pub use types::{MockVisionClient, VisionClient};
