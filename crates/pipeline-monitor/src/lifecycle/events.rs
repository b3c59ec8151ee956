use chrono::{DateTime, Utc};
use pipeline_monitor_types::PipelineState;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Number of lifecycle events retained per pipeline. Older ones are dropped.
pub const LIFECYCLE_EVENTS_RETAINED: usize = 100;

/// A committed state transition of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct PipelineLifecycleEvent {
    pub event_id: Uuid,
    pub pipeline_name: String,
    pub from: PipelineState,
    pub to: PipelineState,
    /// Error message if the transition was caused by a failure.
    pub info: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl PipelineLifecycleEvent {
    pub fn new(
        pipeline_name: &str,
        from: PipelineState,
        to: PipelineState,
        info: Option<String>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            pipeline_name: pipeline_name.to_string(),
            from,
            to,
            info,
            recorded_at: Utc::now(),
        }
    }
}
