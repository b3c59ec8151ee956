//! In-memory transport and executor used by the tests of the registry and
//! the aggregator.

use crate::connector::ConnectorAction;
use crate::error::ManagerError;
use crate::lifecycle::state_machine::PipelineAction;
use crate::runner::error::RunnerError;
use crate::runner::interaction::PipelineTransport;
use crate::runner::pipeline_executor::{DeploymentRequest, PipelineExecutor};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use pipeline_monitor_types::error::ErrorResponse;
use pipeline_monitor_types::{ControllerStatus, GlobalMetrics};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Status a mocked pipeline answers with.
#[derive(Debug, Clone)]
pub(crate) enum MockStatus {
    Healthy(ControllerStatus),
    Unreachable,
    RuntimeFailure(String),
    /// Never answers.
    Hang,
}

pub(crate) fn controller_status(total_processed_records: u64, pipeline_complete: bool) -> ControllerStatus {
    ControllerStatus {
        global_config: Default::default(),
        global_metrics: GlobalMetrics {
            total_input_records: total_processed_records,
            total_processed_records,
            pipeline_complete,
            ..Default::default()
        },
        inputs: vec![],
        outputs: vec![],
    }
}

#[derive(Default)]
pub(crate) struct MockTransport {
    statuses: Mutex<BTreeMap<String, MockStatus>>,
    failing_commands: Mutex<BTreeSet<&'static str>>,
    gates: Mutex<BTreeMap<&'static str, Arc<Notify>>>,
    commands: Mutex<Vec<(String, PipelineAction)>>,
    connector_actions: Mutex<Vec<(String, String, ConnectorAction)>>,
    log_lines: Mutex<Vec<String>>,
}

impl MockTransport {
    pub(crate) fn set_status(&self, pipeline_name: &str, status: MockStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(pipeline_name.to_string(), status);
    }

    /// Makes the process reject the command.
    pub(crate) fn fail_command(&self, action: PipelineAction) {
        self.failing_commands.lock().unwrap().insert(action.endpoint());
    }

    /// Makes the command block until [`MockTransport::release`] is called.
    pub(crate) fn gate_command(&self, action: PipelineAction) {
        self.gates
            .lock()
            .unwrap()
            .insert(action.endpoint(), Arc::new(Notify::new()));
    }

    pub(crate) fn release(&self, action: PipelineAction) {
        if let Some(gate) = self.gates.lock().unwrap().remove(action.endpoint()) {
            gate.notify_one();
        }
    }

    pub(crate) fn set_log_lines(&self, lines: &[&str]) {
        *self.log_lines.lock().unwrap() = lines.iter().map(|l| l.to_string()).collect();
    }

    pub(crate) fn commands(&self) -> Vec<(String, PipelineAction)> {
        self.commands.lock().unwrap().clone()
    }

    pub(crate) fn connector_actions(&self) -> Vec<(String, String, ConnectorAction)> {
        self.connector_actions.lock().unwrap().clone()
    }
}

#[async_trait]
impl PipelineTransport for MockTransport {
    async fn get_status(
        &self,
        pipeline_name: &str,
        _location: &str,
        _timeout: Duration,
    ) -> Result<ControllerStatus, RunnerError> {
        let status = self
            .statuses
            .lock()
            .unwrap()
            .get(pipeline_name)
            .cloned()
            .unwrap_or_else(|| MockStatus::Healthy(controller_status(0, false)));
        match status {
            MockStatus::Healthy(status) => Ok(status),
            MockStatus::Unreachable => Err(RunnerError::UnreachablePipeline {
                pipeline_name: pipeline_name.to_string(),
                error: "connection refused".to_string(),
            }),
            MockStatus::RuntimeFailure(message) => Err(RunnerError::PipelineRuntimeFailure {
                pipeline_name: pipeline_name.to_string(),
                error: ErrorResponse::from_message("WorkerPanic", message),
            }),
            MockStatus::Hang => std::future::pending().await,
        }
    }

    async fn send_command(
        &self,
        pipeline_name: &str,
        _location: &str,
        action: PipelineAction,
    ) -> Result<(), RunnerError> {
        let gate = self.gates.lock().unwrap().get(action.endpoint()).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.commands
            .lock()
            .unwrap()
            .push((pipeline_name.to_string(), action));
        if self.failing_commands.lock().unwrap().contains(action.endpoint()) {
            return Err(RunnerError::PipelineEndpointError {
                pipeline_name: pipeline_name.to_string(),
                endpoint: action.endpoint().to_string(),
                status_code: 500,
                error: ErrorResponse::from_message("CommandRejected", "rejected"),
            });
        }
        Ok(())
    }

    async fn set_connector_mode(
        &self,
        pipeline_name: &str,
        _location: &str,
        connector_name: &str,
        action: ConnectorAction,
    ) -> Result<(), RunnerError> {
        self.connector_actions.lock().unwrap().push((
            pipeline_name.to_string(),
            connector_name.to_string(),
            action,
        ));
        Ok(())
    }

    async fn log_lines(
        &self,
        _pipeline_name: &str,
        _location: &str,
    ) -> Result<BoxStream<'static, String>, RunnerError> {
        let lines = self.log_lines.lock().unwrap().clone();
        // Stays open like a live process until aborted.
        Ok(futures_util::stream::iter(lines)
            .chain(futures_util::stream::pending())
            .boxed())
    }
}

/// Executor whose provisioning can be made to never complete, or to hang.
#[derive(Default)]
pub(crate) struct MockExecutor {
    never_provisioned: Mutex<BTreeSet<String>>,
    hanging: Mutex<BTreeSet<String>>,
    stops: Mutex<Vec<String>>,
}

impl MockExecutor {
    pub(crate) fn never_provision(&self, pipeline_name: &str) {
        self.never_provisioned
            .lock()
            .unwrap()
            .insert(pipeline_name.to_string());
    }

    /// Provisioning checks of the pipeline never return.
    pub(crate) fn hang(&self, pipeline_name: &str) {
        self.hanging.lock().unwrap().insert(pipeline_name.to_string());
    }

    pub(crate) fn stops(&self) -> Vec<String> {
        self.stops.lock().unwrap().clone()
    }
}

#[async_trait]
impl PipelineExecutor for MockExecutor {
    async fn provision(&self, _request: &DeploymentRequest) -> Result<(), ManagerError> {
        Ok(())
    }

    async fn is_provisioned(
        &self,
        request: &DeploymentRequest,
    ) -> Result<Option<String>, ManagerError> {
        let hanging = self
            .hanging
            .lock()
            .unwrap()
            .contains(&request.pipeline_name);
        if hanging {
            std::future::pending::<()>().await;
        }
        if self
            .never_provisioned
            .lock()
            .unwrap()
            .contains(&request.pipeline_name)
        {
            Ok(None)
        } else {
            Ok(Some(format!("{}.local:8080", request.pipeline_name)))
        }
    }

    async fn stop(&self, pipeline_name: &str) -> Result<(), ManagerError> {
        self.stops.lock().unwrap().push(pipeline_name.to_string());
        Ok(())
    }
}
