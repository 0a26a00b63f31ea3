//! Async service boundary over the synchronous pipeline.
//!
//! The pipeline core is blocking (image work, SQLite, blocking HTTP), so
//! every entry point dispatches through `spawn_blocking`. The service is
//! cheap to clone and safe to call concurrently; a cancelled caller only
//! abandons its own task, the blocking work runs to completion.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{error, warn};

use crate::pipeline::types::LeafModel;
use crate::pipeline::{AnalysisError, AnalysisPipeline, AnalysisResult};
use crate::{preferences, vision::VisionClient};

/// Entry point for callers on the async runtime.
#[derive(Clone)]
pub struct AnalysisService {
    pipeline: Arc<AnalysisPipeline>,
    conn: Option<Arc<Mutex<Connection>>>,
}

impl AnalysisService {
    pub fn new(
        model: Arc<dyn LeafModel>,
        vision: Option<Arc<dyn VisionClient>>,
        conn: Option<Arc<Mutex<Connection>>>,
    ) -> Self {
        Self {
            pipeline: Arc::new(AnalysisPipeline::new(model, vision, conn.clone())),
            conn,
        }
    }

    /// Analyze a photo through the full flow. The pipeline itself reads
    /// the user's cloud-validation preference at the start of each run.
    pub async fn analyze(&self, image_bytes: Vec<u8>) -> AnalysisResult {
        let pipeline = self.pipeline.clone();
        let joined =
            tokio::task::spawn_blocking(move || pipeline.analyze(&image_bytes)).await;

        match joined {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Analysis task did not complete");
                AnalysisResult::failed(AnalysisError::Unknown(format!("task failed: {e}")), 0)
            }
        }
    }

    /// Run the offline flow unconditionally.
    pub async fn analyze_offline(&self, image_bytes: Vec<u8>) -> AnalysisResult {
        let pipeline = self.pipeline.clone();
        let joined =
            tokio::task::spawn_blocking(move || pipeline.analyze_fallback(&image_bytes)).await;

        match joined {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Analysis task did not complete");
                AnalysisResult::failed(AnalysisError::Unknown(format!("task failed: {e}")), 0)
            }
        }
    }

    /// Delete cache entries older than `days`. Returns how many were
    /// removed; 0 when no cache is configured or the task failed.
    pub async fn clear_old_cache(&self, days: i64) -> usize {
        let pipeline = self.pipeline.clone();
        tokio::task::spawn_blocking(move || {
            pipeline.cache().map(|c| c.clear_old_cache(days)).unwrap_or(0)
        })
        .await
        .unwrap_or(0)
    }

    /// Total stored cache entries, expired ones included.
    pub async fn cache_stats(&self) -> usize {
        let pipeline = self.pipeline.clone();
        tokio::task::spawn_blocking(move || {
            pipeline.cache().map(|c| c.entry_count()).unwrap_or(0)
        })
        .await
        .unwrap_or(0)
    }

    /// Toggle the cloud-validation preference.
    pub fn set_cloud_validation(&self, enabled: bool) {
        let Some(conn) = &self.conn else { return };
        let Ok(guard) = conn.lock() else {
            warn!("Preference connection lock poisoned");
            return;
        };
        if let Err(e) = preferences::set_use_external_validation(&guard, enabled) {
            warn!(error = %e, "Failed to store validation preference");
        }
    }
}
