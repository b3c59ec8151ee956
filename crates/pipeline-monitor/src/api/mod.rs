//! Read model and command surface offered to a presentation layer.
//!
//! Combines the authoritative lifecycle state from the registry with the
//! latest round of the status aggregator. Verbs arrive as strings and are
//! validated here.

pub mod error;

use crate::aggregator::{CapturedStatus, StatusAggregator, StatusUpdate};
use crate::connector::{ConnectorAction, ConnectorActivity};
use crate::error::ManagerError;
use crate::lifecycle::events::PipelineLifecycleEvent;
use crate::lifecycle::registry::PipelineRegistry;
use crate::lifecycle::state_machine::PipelineAction;
use crate::metrics::UNKNOWN_STATE_DEFECTS;
use crate::runner::error::RunnerError;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::error;
use metrics::counter;
use pipeline_monitor_types::error::ErrorResponse;
use pipeline_monitor_types::{ConnectorMode, GlobalMetrics, PipelineState};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

/// One entry of the pipeline list.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PipelineSummary {
    pub name: String,
    pub state: PipelineState,
    /// Label to display for the state.
    pub state_label: String,
    pub state_since: DateTime<Utc>,
    pub deployment_error: Option<ErrorResponse>,
    /// Global metrics of the latest round, if the pipeline answered in it.
    pub metrics: Option<GlobalMetrics>,
    pub captured_at: Option<DateTime<Utc>>,
}

pub struct PipelineMonitor {
    registry: Arc<PipelineRegistry>,
    aggregator: Arc<StatusAggregator>,
}

impl PipelineMonitor {
    pub fn new(registry: Arc<PipelineRegistry>, aggregator: Arc<StatusAggregator>) -> Self {
        Self {
            registry,
            aggregator,
        }
    }

    pub fn registry(&self) -> &Arc<PipelineRegistry> {
        &self.registry
    }

    pub fn aggregator(&self) -> &Arc<StatusAggregator> {
        &self.aggregator
    }

    /// All pipelines ordered by name, with their summary metrics.
    pub async fn list_pipelines(&self) -> Vec<PipelineSummary> {
        let view = self.aggregator.view();
        self.registry
            .list()
            .await
            .into_iter()
            .map(|descr| {
                if descr.state == PipelineState::Unknown {
                    counter!(UNKNOWN_STATE_DEFECTS).increment(1);
                    error!("Pipeline {}: recorded state is Unknown", descr.name);
                }
                // Snapshots of an earlier deployment are not attributed to this one
                let captured = view
                    .pipelines
                    .get(&descr.name)
                    .filter(|captured| captured.deployment_id == descr.deployment_id);
                PipelineSummary {
                    state_label: descr.state.display_label().to_string(),
                    metrics: captured.map(|c| c.status.global_metrics.clone()),
                    captured_at: captured.map(|c| c.captured_at),
                    name: descr.name,
                    state: descr.state,
                    state_since: descr.state_since,
                    deployment_error: descr.deployment_error,
                }
            })
            .collect()
    }

    /// Latest status snapshot of the pipeline.
    pub async fn get_pipeline(&self, pipeline_name: &str) -> Result<Arc<CapturedStatus>, ManagerError> {
        let descr = self.registry.get(pipeline_name).await?;
        self.aggregator
            .view()
            .pipelines
            .get(pipeline_name)
            .filter(|captured| captured.deployment_id == descr.deployment_id)
            .cloned()
            .ok_or_else(|| {
                RunnerError::UnreachablePipeline {
                    pipeline_name: pipeline_name.to_string(),
                    error: format!("no status in the latest round (state: {})", descr.state),
                }
                .into()
            })
    }

    pub async fn connectors(
        &self,
        pipeline_name: &str,
    ) -> Result<Vec<ConnectorActivity>, ManagerError> {
        self.registry.connectors(pipeline_name).await
    }

    /// Applies `start`, `pause` or `shutdown`.
    pub async fn pipeline_action(&self, pipeline_name: &str, action: &str) -> Result<(), ManagerError> {
        let action: PipelineAction = action.parse()?;
        self.registry.apply(pipeline_name, action).await
    }

    /// Applies `start` or `pause` to an input connector.
    pub async fn connector_action(
        &self,
        pipeline_name: &str,
        connector_name: &str,
        action: &str,
    ) -> Result<ConnectorMode, ManagerError> {
        let action: ConnectorAction = action.parse()?;
        self.registry
            .set_connector_mode(pipeline_name, connector_name, action)
            .await
    }

    pub async fn follow_logs(
        &self,
        pipeline_name: &str,
    ) -> Result<BoxStream<'static, String>, ManagerError> {
        self.registry.follow_logs(pipeline_name).await
    }

    pub async fn subscribe_status(
        &self,
        pipeline_name: &str,
    ) -> Result<BoxStream<'static, StatusUpdate>, ManagerError> {
        let descr = self.registry.get(pipeline_name).await?;
        if !descr.state.is_live() {
            return Err(RunnerError::PipelineNotRunningOrPaused {
                pipeline_name: pipeline_name.to_string(),
                state: descr.state,
            }
            .into());
        }
        Ok(self.aggregator.subscribe_status(pipeline_name).boxed())
    }

    pub async fn lifecycle_events(
        &self,
        pipeline_name: &str,
    ) -> Result<Vec<PipelineLifecycleEvent>, ManagerError> {
        self.registry.lifecycle_events(pipeline_name).await
    }

    /// Removes a pipeline that is shut down.
    pub async fn remove_pipeline(&self, pipeline_name: &str) -> Result<(), ManagerError> {
        self.registry.remove(pipeline_name).await
    }
}
