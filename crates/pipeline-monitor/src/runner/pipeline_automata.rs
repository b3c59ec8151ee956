//! Background execution of an accepted lifecycle command.
//!
//! An automaton is spawned per accepted command and owns the transition lock
//! of its pipeline until it returns. Each step commits the next state only if
//! the pipeline is still in the state the step started from: a runtime
//! failure reported in the meantime wins, and the automaton stops there.

use crate::lifecycle::registry::PipelineHandle;
use crate::lifecycle::state_machine::{PipelineAction, Transition};
use crate::runner::error::RunnerError;
use crate::runner::interaction::{get_status_within, PipelineTransport};
use crate::runner::pipeline_executor::{DeploymentRequest, PipelineExecutor};
use log::{debug, error, info, warn};
use pipeline_monitor_types::error::ErrorResponse;
use pipeline_monitor_types::PipelineState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::time::{sleep, timeout, Instant};

/// Timeouts and poll periods of the automaton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomatonConfig {
    /// Time the executor has to provision the pipeline.
    pub provisioning_timeout: Duration,
    pub provisioning_poll_period: Duration,
    /// Time the pipeline process has to answer its first status request.
    pub initialization_timeout: Duration,
    pub initialization_poll_period: Duration,
    /// Timeout of each status request during initialization.
    pub status_request_timeout: Duration,
    /// Time the executor has to stop the pipeline.
    pub shutdown_timeout: Duration,
}

impl Default for AutomatonConfig {
    fn default() -> Self {
        Self {
            provisioning_timeout: Duration::from_secs(60),
            provisioning_poll_period: Duration::from_millis(300),
            initialization_timeout: Duration::from_secs(60),
            initialization_poll_period: Duration::from_millis(300),
            status_request_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Whether `timeout` has passed since `start`.
fn timeout_expired(start: Instant, timeout: Duration) -> bool {
    Instant::now().duration_since(start) >= timeout
}

pub(crate) struct PipelineAutomaton {
    handle: Arc<PipelineHandle>,
    transport: Arc<dyn PipelineTransport>,
    executor: Arc<dyn PipelineExecutor>,
    config: AutomatonConfig,
}

impl PipelineAutomaton {
    pub(crate) fn new(
        handle: Arc<PipelineHandle>,
        transport: Arc<dyn PipelineTransport>,
        executor: Arc<dyn PipelineExecutor>,
        config: AutomatonConfig,
    ) -> Self {
        Self {
            handle,
            transport,
            executor,
            config,
        }
    }

    /// Carries out the transition. The guard is released on return.
    pub(crate) async fn run(self, transition: Transition, _guard: OwnedMutexGuard<()>) {
        match transition {
            Transition::Deploy => self.deploy().await,
            Transition::Resume => self.resume().await,
            Transition::Pause => self.pause().await,
            Transition::Shutdown => self.shutdown().await,
            Transition::AlreadyShutdown => {}
        }
    }

    fn name(&self) -> &str {
        &self.handle.name
    }

    /// `Provisioning` → `Initializing` → `Starting` → `Running`.
    async fn deploy(&self) {
        let descr = self.handle.descr().await;
        let Some(deployment_id) = descr.deployment_id else {
            error!(
                "Pipeline {}: provisioning without a deployment identifier",
                self.name()
            );
            return;
        };
        let request = DeploymentRequest {
            pipeline_id: descr.id,
            pipeline_name: descr.name.clone(),
            deployment_id,
        };

        let location = match self.provision(&request).await {
            Ok(location) => location,
            Err(error) => {
                error!("Pipeline {}: provisioning failed: {}", self.name(), error);
                self.handle
                    .commit(
                        PipelineState::Provisioning,
                        PipelineState::CreateFailure,
                        Some(error),
                    )
                    .await;
                return;
            }
        };
        if !self.handle.set_location(deployment_id, &location).await
            || !self
                .handle
                .commit(PipelineState::Provisioning, PipelineState::Initializing, None)
                .await
        {
            return;
        }
        self.handle.replace_log_source(None).await;
        let source = self
            .handle
            .logs
            .attach_source(self.transport.clone(), location.clone());
        self.handle.replace_log_source(Some(source)).await;

        if let Err(error) = self.await_initialized(&location).await {
            error!("Pipeline {}: initialization failed: {}", self.name(), error);
            self.handle
                .commit(
                    PipelineState::Initializing,
                    PipelineState::CreateFailure,
                    Some(error),
                )
                .await;
            return;
        }
        if !self
            .handle
            .commit(PipelineState::Initializing, PipelineState::Starting, None)
            .await
        {
            return;
        }

        match self
            .transport
            .send_command(self.name(), &location, PipelineAction::Start)
            .await
        {
            Ok(()) => {
                self.handle
                    .commit(PipelineState::Starting, PipelineState::Running, None)
                    .await;
            }
            Err(e) => {
                error!("Pipeline {}: start was not acknowledged: {e}", self.name());
                self.handle
                    .commit(
                        PipelineState::Starting,
                        PipelineState::StartupFailure,
                        Some(ErrorResponse::from_error_nolog(&e)),
                    )
                    .await;
            }
        }
    }

    /// Requests provisioning and polls until the location is known.
    ///
    /// Every executor call is bounded by what remains of the provisioning
    /// timeout.
    async fn provision(&self, request: &DeploymentRequest) -> Result<String, ErrorResponse> {
        let start = Instant::now();
        let expired = || {
            ErrorResponse::from_error_nolog(&RunnerError::ProvisioningTimeout {
                pipeline_name: self.name().to_string(),
                timeout: self.config.provisioning_timeout,
            })
        };
        let remaining = || self.config.provisioning_timeout.saturating_sub(start.elapsed());

        timeout(remaining(), self.executor.provision(request))
            .await
            .map_err(|_| expired())?
            .map_err(|e| ErrorResponse::from_error_nolog(&e))?;
        loop {
            match timeout(remaining(), self.executor.is_provisioned(request)).await {
                Err(_) => return Err(expired()),
                Ok(Ok(Some(location))) => {
                    info!("Pipeline {}: provisioned at {location}", self.name());
                    return Ok(location);
                }
                Ok(Ok(None)) => {
                    debug!("Pipeline {}: not yet provisioned", self.name());
                }
                Ok(Err(e)) => return Err(ErrorResponse::from_error_nolog(&e)),
            }
            if timeout_expired(start, self.config.provisioning_timeout) {
                return Err(expired());
            }
            sleep(self.config.provisioning_poll_period).await;
        }
    }

    /// Polls the status endpoint until the process answers.
    async fn await_initialized(&self, location: &str) -> Result<(), ErrorResponse> {
        let start = Instant::now();
        loop {
            match get_status_within(
                self.transport.as_ref(),
                self.name(),
                location,
                self.config.status_request_timeout,
            )
            .await
            {
                Ok(_) => return Ok(()),
                Err(RunnerError::PipelineRuntimeFailure { error, .. }) => return Err(error),
                Err(e) => {
                    if timeout_expired(start, self.config.initialization_timeout) {
                        return Err(ErrorResponse::from_error_nolog(
                            &RunnerError::InitializationTimeout {
                                pipeline_name: self.name().to_string(),
                                timeout: self.config.initialization_timeout,
                                error: e.to_string(),
                            },
                        ));
                    }
                    debug!("Pipeline {}: not yet initialized: {e}", self.name());
                }
            }
            sleep(self.config.initialization_poll_period).await;
        }
    }

    async fn location(&self) -> Result<String, ErrorResponse> {
        self.handle
            .descr()
            .await
            .deployment_location
            .ok_or_else(|| {
                ErrorResponse::from_error_nolog(&RunnerError::UnknownDeploymentLocation {
                    pipeline_name: self.name().to_string(),
                })
            })
    }

    /// Sends a command to a deployed pipeline. Without acknowledgement the
    /// pipeline is considered `Failed`.
    async fn command_deployed(
        &self,
        action: PipelineAction,
        from: PipelineState,
        to: PipelineState,
    ) {
        let result = match self.location().await {
            Ok(location) => self
                .transport
                .send_command(self.name(), &location, action)
                .await
                .map_err(|e| ErrorResponse::from_error_nolog(&e)),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                self.handle.commit(from, to, None).await;
            }
            Err(error) => {
                error!(
                    "Pipeline {}: '{action}' was not acknowledged: {}",
                    self.name(),
                    error
                );
                self.handle
                    .commit(from, PipelineState::Failed, Some(error))
                    .await;
            }
        }
    }

    /// `Paused` → `Running`.
    async fn resume(&self) {
        self.command_deployed(
            PipelineAction::Start,
            PipelineState::Paused,
            PipelineState::Running,
        )
        .await
    }

    /// `Pausing` → `Paused`.
    async fn pause(&self) {
        self.command_deployed(
            PipelineAction::Pause,
            PipelineState::Pausing,
            PipelineState::Paused,
        )
        .await
    }

    /// `ShuttingDown` → `Shutdown`.
    async fn shutdown(&self) {
        self.handle.replace_log_source(None).await;
        if let Some(location) = self.handle.descr().await.deployment_location {
            if let Err(e) = self
                .transport
                .send_command(self.name(), &location, PipelineAction::Shutdown)
                .await
            {
                debug!(
                    "Pipeline {}: shutdown request was not acknowledged, stopping anyway: {e}",
                    self.name()
                );
            }
        }
        let error = match timeout(self.config.shutdown_timeout, self.executor.stop(self.name()))
            .await
        {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(ErrorResponse::from_error_nolog(&e)),
            Err(_) => Some(ErrorResponse::from_error_nolog(
                &RunnerError::ShutdownTimeout {
                    pipeline_name: self.name().to_string(),
                    timeout: self.config.shutdown_timeout,
                },
            )),
        };
        match error {
            None => {
                self.handle
                    .commit(PipelineState::ShuttingDown, PipelineState::Shutdown, None)
                    .await;
            }
            Some(error) => {
                warn!("Pipeline {}: could not be stopped: {}", self.name(), error);
                self.handle
                    .commit(
                        PipelineState::ShuttingDown,
                        PipelineState::Failed,
                        Some(error),
                    )
                    .await;
            }
        }
    }
}
