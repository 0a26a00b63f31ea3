//! Gemini HTTP client for cloud vision-language calls.
//!
//! The credential is injected from the environment at construction and
//! the client is built once at app start — no lazily-initialized global
//! and no key embedded in source.

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::types::VisionClient;
use super::VisionError;

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Gemini REST client (`models/{model}:generateContent`).
pub struct GeminiClient {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl GeminiClient {
    pub fn new(base_url: &str, model: &str, api_key: &str, timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            client,
            timeout_secs,
        }
    }

    /// Build a client from `GEMINI_API_KEY`, or `None` when the key is
    /// absent/empty — the pipeline then runs fully local.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var(API_KEY_ENV).ok()?;
        if api_key.trim().is_empty() {
            return None;
        }
        Some(Self::new(
            DEFAULT_BASE_URL,
            DEFAULT_MODEL,
            &api_key,
            DEFAULT_TIMEOUT_SECS,
        ))
    }

    /// The model name this client targets.
    pub fn model(&self) -> &str {
        &self.model
    }
}

// ──────────────────────────────────────────────
// Wire types
// ──────────────────────────────────────────────

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: &'static str,
    data: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

/// Join all text parts of the first candidate.
fn extract_text(response: GenerateContentResponse) -> Result<String, VisionError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| VisionError::ResponseParsing("no candidates in response".into()))?;

    let parts = candidate
        .content
        .map(|c| c.parts)
        .unwrap_or_default();

    let text: String = parts.into_iter().filter_map(|p| p.text).collect();
    if text.is_empty() {
        return Err(VisionError::ResponseParsing(
            "candidate contained no text parts".into(),
        ));
    }
    Ok(text)
}

impl VisionClient for GeminiClient {
    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn generate_with_image(
        &self,
        prompt: &str,
        system: Option<&str>,
        image_png: &[u8],
    ) -> Result<String, VisionError> {
        if self.api_key.is_empty() {
            return Err(VisionError::MissingApiKey);
        }

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );

        let data = base64::engine::general_purpose::STANDARD.encode(image_png);
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text { text: prompt },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: "image/png",
                            data,
                        },
                    },
                ],
            }],
            system_instruction: system.map(|s| Content {
                parts: vec![Part::Text { text: s }],
            }),
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    VisionError::Connection(self.base_url.clone())
                } else if e.is_timeout() {
                    VisionError::Timeout(self.timeout_secs)
                } else {
                    VisionError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(VisionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateContentResponse = response
            .json()
            .map_err(|e| VisionError::ResponseParsing(e.to_string()))?;

        extract_text(parsed)
    }
}
