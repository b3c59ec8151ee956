//! Registry of pipelines and the single mutation point of their state.
//!
//! Each pipeline has a handle holding its record behind a lock. Every state
//! change goes through [`PipelineHandle::commit`] (or the command entry of
//! [`PipelineHandle::begin`]), which checks the edge against the lifecycle
//! before applying it. A command holds the transition lock of the pipeline
//! from the moment it is accepted until its automaton is done; a second
//! command meanwhile is rejected with `CommandInProgress`.
//!
//! Runtime failures do not take the transition lock: they override the state
//! of a deployed pipeline directly, and the in-flight automaton notices on its
//! next commit, which no longer matches the expected state.

use crate::connector::{ConnectorAction, ConnectorActivity};
use crate::error::ManagerError;
use crate::lifecycle::error::LifecycleError;
use crate::lifecycle::events::PipelineLifecycleEvent;
use crate::lifecycle::pipeline::{Pipeline, PipelineDescr};
use crate::lifecycle::state_machine::{is_valid_transition, validate, PipelineAction, Transition};
use crate::logging::control_plane_line;
use crate::metrics::{LIFECYCLE_TRANSITIONS, UNKNOWN_STATE_DEFECTS};
use crate::runner::error::RunnerError;
use crate::runner::interaction::PipelineTransport;
use crate::runner::logs_buffer::LogsLimits;
use crate::runner::pipeline_automata::{AutomatonConfig, PipelineAutomaton};
use crate::runner::pipeline_executor::PipelineExecutor;
use crate::runner::pipeline_logs::PipelineLogs;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use metrics::counter;
use pipeline_monitor_types::error::ErrorResponse;
use pipeline_monitor_types::{ConnectorMode, PipelineState};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A live pipeline the status aggregator should poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    pub pipeline_name: String,
    pub state: PipelineState,
    pub deployment_id: Option<Uuid>,
    pub location: Option<String>,
}

pub(crate) struct PipelineHandle {
    pub(crate) name: String,
    record: Mutex<Pipeline>,
    state_sender: watch::Sender<PipelineState>,
    transition_lock: Arc<Mutex<()>>,
    pub(crate) logs: PipelineLogs,
    log_source: Mutex<Option<JoinHandle<()>>>,
}

impl PipelineHandle {
    fn new(name: &str, connectors: BTreeMap<String, ConnectorMode>, limits: LogsLimits) -> Self {
        let record = Pipeline::new(name, connectors);
        let (state_sender, _) = watch::channel(record.state);
        Self {
            name: name.to_string(),
            record: Mutex::new(record),
            state_sender,
            transition_lock: Arc::new(Mutex::new(())),
            logs: PipelineLogs::start(name, limits),
            log_source: Mutex::new(None),
        }
    }

    /// Latest committed state.
    pub(crate) fn state(&self) -> PipelineState {
        *self.state_sender.borrow()
    }

    pub(crate) async fn descr(&self) -> PipelineDescr {
        self.record.lock().await.descr()
    }

    /// Validates the command and commits its entry state, atomically.
    async fn begin(
        &self,
        action: PipelineAction,
    ) -> Result<(PipelineState, Transition), LifecycleError> {
        let mut record = self.record.lock().await;
        let current = record.state;
        let transition = validate(&self.name, current, action)?;
        if let Some(entry) = transition.entry_state() {
            self.commit_locked(&mut record, entry, None);
        }
        Ok((current, transition))
    }

    /// Commits `expected` → `next`. Returns `false` without changing anything
    /// if the state is no longer `expected` or if the edge is not part of the
    /// lifecycle.
    pub(crate) async fn commit(
        &self,
        expected: PipelineState,
        next: PipelineState,
        error: Option<ErrorResponse>,
    ) -> bool {
        let mut record = self.record.lock().await;
        if record.state != expected {
            debug!(
                "Pipeline {}: not committing {expected} -> {next} as the state is now {}",
                self.name, record.state
            );
            return false;
        }
        self.commit_locked(&mut record, next, error)
    }

    fn commit_locked(
        &self,
        record: &mut Pipeline,
        next: PipelineState,
        error: Option<ErrorResponse>,
    ) -> bool {
        let current = record.state;
        if next == PipelineState::Unknown {
            counter!(UNKNOWN_STATE_DEFECTS).increment(1);
            error!(
                "Pipeline {}: refusing to commit the Unknown state (from {current}); this is a bookkeeping defect",
                self.name
            );
            return false;
        }
        if !is_valid_transition(current, next) {
            counter!(UNKNOWN_STATE_DEFECTS).increment(1);
            error!(
                "Pipeline {}: refusing to commit {current} -> {next} which is not a lifecycle transition",
                self.name
            );
            return false;
        }
        let event = record.transition(next, error);
        self.state_sender.send_replace(next);
        counter!(LIFECYCLE_TRANSITIONS, "to" => next.to_string()).increment(1);
        let message = match &event.info {
            None => format!("Transition: {current} -> {next}"),
            Some(info) => format!("Transition: {current} -> {next} ({info})"),
        };
        info!("Pipeline {}: {message}", self.name);
        self.logs.push_line(control_plane_line(&self.name, &message));
        true
    }

    /// Records the location of the deployment, if it is still the current one.
    pub(crate) async fn set_location(&self, deployment_id: Uuid, location: &str) -> bool {
        let mut record = self.record.lock().await;
        if record.deployment_id != Some(deployment_id) {
            return false;
        }
        record.deployment_location = Some(location.to_string());
        true
    }

    /// Moves a deployed pipeline of the given deployment to `Failed`.
    async fn fail_deployed(&self, deployment_id: Option<Uuid>, error: ErrorResponse) -> bool {
        let mut record = self.record.lock().await;
        if deployment_id.is_some() && record.deployment_id != deployment_id {
            return false;
        }
        if !matches!(
            record.state,
            PipelineState::Running | PipelineState::Pausing | PipelineState::Paused
        ) {
            return false;
        }
        self.commit_locked(&mut record, PipelineState::Failed, Some(error))
    }

    /// Replaces the task forwarding the log stream of the deployment.
    pub(crate) async fn replace_log_source(&self, source: Option<JoinHandle<()>>) {
        let mut current = self.log_source.lock().await;
        if let Some(previous) = current.take() {
            previous.abort();
            self.logs.detach_source().await;
        }
        *current = source;
    }
}

/// All pipelines of one monitor instance, keyed by their unique name.
pub struct PipelineRegistry {
    pipelines: RwLock<BTreeMap<String, Arc<PipelineHandle>>>,
    transport: Arc<dyn PipelineTransport>,
    executor: Arc<dyn PipelineExecutor>,
    automaton_config: AutomatonConfig,
    logs_limits: LogsLimits,
}

impl PipelineRegistry {
    pub fn new(
        transport: Arc<dyn PipelineTransport>,
        executor: Arc<dyn PipelineExecutor>,
        automaton_config: AutomatonConfig,
        logs_limits: LogsLimits,
    ) -> Self {
        Self {
            pipelines: RwLock::new(BTreeMap::new()),
            transport,
            executor,
            automaton_config,
            logs_limits,
        }
    }

    async fn handle(&self, pipeline_name: &str) -> Result<Arc<PipelineHandle>, LifecycleError> {
        self.pipelines
            .read()
            .await
            .get(pipeline_name)
            .cloned()
            .ok_or_else(|| LifecycleError::UnknownPipeline {
                pipeline_name: pipeline_name.to_string(),
            })
    }

    /// Creates a pipeline in state `Shutdown` with the given initial modes of
    /// its input connectors.
    pub async fn create(
        &self,
        pipeline_name: &str,
        connectors: BTreeMap<String, ConnectorMode>,
    ) -> Result<PipelineDescr, ManagerError> {
        let mut pipelines = self.pipelines.write().await;
        if pipelines.contains_key(pipeline_name) {
            return Err(LifecycleError::DuplicatePipelineName {
                pipeline_name: pipeline_name.to_string(),
            }
            .into());
        }
        let handle = Arc::new(PipelineHandle::new(
            pipeline_name,
            connectors,
            self.logs_limits,
        ));
        let descr = handle.descr().await;
        pipelines.insert(pipeline_name.to_string(), handle);
        info!("Pipeline {pipeline_name}: created ({})", descr.id);
        Ok(descr)
    }

    /// Removes a pipeline that is `Shutdown` and has no command in progress.
    pub async fn remove(&self, pipeline_name: &str) -> Result<(), ManagerError> {
        let mut pipelines = self.pipelines.write().await;
        let handle = pipelines
            .get(pipeline_name)
            .cloned()
            .ok_or_else(|| LifecycleError::UnknownPipeline {
                pipeline_name: pipeline_name.to_string(),
            })?;
        let _guard = handle.transition_lock.clone().try_lock_owned().map_err(|_| {
            LifecycleError::CommandInProgress {
                pipeline_name: pipeline_name.to_string(),
                current: handle.state(),
            }
        })?;
        let current = handle.state();
        if current != PipelineState::Shutdown {
            return Err(LifecycleError::PipelineNotShutdown {
                pipeline_name: pipeline_name.to_string(),
                current,
            }
            .into());
        }
        pipelines.remove(pipeline_name);
        info!("Pipeline {pipeline_name}: removed");
        Ok(())
    }

    /// All pipelines, ordered by name.
    pub async fn list(&self) -> Vec<PipelineDescr> {
        let handles: Vec<Arc<PipelineHandle>> =
            self.pipelines.read().await.values().cloned().collect();
        let mut result = Vec::with_capacity(handles.len());
        for handle in handles {
            result.push(handle.descr().await);
        }
        result
    }

    pub async fn get(&self, pipeline_name: &str) -> Result<PipelineDescr, ManagerError> {
        Ok(self.handle(pipeline_name).await?.descr().await)
    }

    pub async fn lifecycle_events(
        &self,
        pipeline_name: &str,
    ) -> Result<Vec<PipelineLifecycleEvent>, ManagerError> {
        let handle = self.handle(pipeline_name).await?;
        let events = handle.record.lock().await.events();
        Ok(events)
    }

    /// Receiver of the committed states of the pipeline.
    pub async fn watch_state(
        &self,
        pipeline_name: &str,
    ) -> Result<watch::Receiver<PipelineState>, ManagerError> {
        Ok(self.handle(pipeline_name).await?.state_sender.subscribe())
    }

    /// Validates and initiates a command. Returns as soon as the entry state
    /// is committed; the remaining transitions happen in the background.
    pub async fn apply(
        &self,
        pipeline_name: &str,
        action: PipelineAction,
    ) -> Result<(), ManagerError> {
        let handle = self.handle(pipeline_name).await?;
        let guard = match handle.transition_lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                let current = handle.state();
                if action == PipelineAction::Shutdown
                    && matches!(
                        current,
                        PipelineState::ShuttingDown | PipelineState::Shutdown
                    )
                {
                    return Ok(());
                }
                return Err(LifecycleError::CommandInProgress {
                    pipeline_name: pipeline_name.to_string(),
                    current,
                }
                .into());
            }
        };
        let (current, transition) = handle.begin(action).await?;
        if transition == Transition::AlreadyShutdown {
            debug!("Pipeline {pipeline_name}: '{action}' while {current} is a no-op");
            return Ok(());
        }
        debug!("Pipeline {pipeline_name}: accepted '{action}' in state {current}");
        let automaton = PipelineAutomaton::new(
            handle,
            self.transport.clone(),
            self.executor.clone(),
            self.automaton_config.clone(),
        );
        tokio::spawn(automaton.run(transition, guard));
        Ok(())
    }

    pub async fn start(&self, pipeline_name: &str) -> Result<(), ManagerError> {
        self.apply(pipeline_name, PipelineAction::Start).await
    }

    pub async fn pause(&self, pipeline_name: &str) -> Result<(), ManagerError> {
        self.apply(pipeline_name, PipelineAction::Pause).await
    }

    pub async fn shutdown(&self, pipeline_name: &str) -> Result<(), ManagerError> {
        self.apply(pipeline_name, PipelineAction::Shutdown).await
    }

    /// Moves the pipeline to `Failed` if it is `Running`, `Pausing` or
    /// `Paused` with the given deployment, regardless of any command in
    /// progress. Returns whether the state changed.
    pub async fn report_runtime_failure(
        &self,
        pipeline_name: &str,
        deployment_id: Option<Uuid>,
        error: ErrorResponse,
    ) -> bool {
        match self.handle(pipeline_name).await {
            Ok(handle) => handle.fail_deployed(deployment_id, error).await,
            Err(_) => false,
        }
    }

    /// Starts or pauses an input connector of a running or paused pipeline,
    /// and returns its new mode.
    pub async fn set_connector_mode(
        &self,
        pipeline_name: &str,
        connector_name: &str,
        action: ConnectorAction,
    ) -> Result<ConnectorMode, ManagerError> {
        let handle = self.handle(pipeline_name).await?;
        let descr = handle.descr().await;
        if !descr.connectors.contains_key(connector_name) {
            return Err(LifecycleError::UnknownConnector {
                pipeline_name: pipeline_name.to_string(),
                connector_name: connector_name.to_string(),
            }
            .into());
        }
        if !matches!(descr.state, PipelineState::Running | PipelineState::Paused) {
            return Err(RunnerError::PipelineNotRunningOrPaused {
                pipeline_name: pipeline_name.to_string(),
                state: descr.state,
            }
            .into());
        }
        let location =
            descr
                .deployment_location
                .ok_or_else(|| RunnerError::UnknownDeploymentLocation {
                    pipeline_name: pipeline_name.to_string(),
                })?;
        self.transport
            .set_connector_mode(pipeline_name, &location, connector_name, action)
            .await?;

        let mode = action.target_mode();
        let mut record = handle.record.lock().await;
        if record.deployment_id == descr.deployment_id {
            record.connectors.insert(connector_name.to_string(), mode);
        }
        drop(record);
        info!("Pipeline {pipeline_name}: connector '{connector_name}' is now {mode}");
        handle.logs.push_line(control_plane_line(
            pipeline_name,
            &format!("Connector '{connector_name}': {action}"),
        ));
        Ok(mode)
    }

    /// Input connectors of the pipeline with their derived activity.
    pub async fn connectors(
        &self,
        pipeline_name: &str,
    ) -> Result<Vec<ConnectorActivity>, ManagerError> {
        let descr = self.get(pipeline_name).await?;
        Ok(descr
            .connectors
            .iter()
            .map(|(name, mode)| ConnectorActivity::resolve(name, descr.state, *mode))
            .collect())
    }

    /// Follows the logs of the pipeline.
    pub async fn follow_logs(
        &self,
        pipeline_name: &str,
    ) -> Result<BoxStream<'static, String>, ManagerError> {
        Ok(self.handle(pipeline_name).await?.logs.follow()?.boxed())
    }

    /// Pipelines for which a process may exist.
    pub async fn poll_targets(&self) -> Vec<PollTarget> {
        self.list()
            .await
            .into_iter()
            .filter(|descr| descr.state.is_live())
            .map(|descr| PollTarget {
                pipeline_name: descr.name,
                state: descr.state,
                deployment_id: descr.deployment_id,
                location: descr.deployment_location,
            })
            .collect()
    }

    /// Waits until no command is in progress for the pipeline and returns
    /// the state it settled in.
    pub async fn wait_idle(&self, pipeline_name: &str) -> Result<PipelineState, ManagerError> {
        let handle = self.handle(pipeline_name).await?;
        let _guard = handle.transition_lock.lock().await;
        Ok(handle.state())
    }

    /// Shuts down every pipeline and waits for each until the timeout expires.
    pub async fn shutdown_all(&self, timeout: std::time::Duration) {
        let names: Vec<String> = self.pipelines.read().await.keys().cloned().collect();
        for name in &names {
            if let Err(e) = self.shutdown(name).await {
                warn!("Pipeline {name}: unable to initiate shutdown: {e}");
            }
        }
        for name in &names {
            match tokio::time::timeout(timeout, self.wait_idle(name)).await {
                Ok(Ok(state)) => info!("Pipeline {name}: {state} at exit"),
                Ok(Err(e)) => warn!("Pipeline {name}: {e}"),
                Err(_) => warn!(
                    "Pipeline {name}: did not shut down within {}s",
                    timeout.as_secs()
                ),
            }
        }
    }
}
