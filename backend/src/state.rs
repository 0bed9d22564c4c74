use std::sync::Arc;
use std::time::Instant;

use crate::pipeline::InferencePipeline;
use crate::storage::prediction_log::PredictionLog;

/// Process-lifetime state shared read-only by every worker.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<InferencePipeline>,
    pub prediction_log: Option<PredictionLog>,
    started_at: Instant,
}

impl AppState {
    pub fn new(pipeline: InferencePipeline, prediction_log: Option<PredictionLog>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            prediction_log,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
