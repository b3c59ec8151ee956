//! Pure transition rules of the pipeline lifecycle.
//!
//! Commands are validated here against the current state, before anything is
//! changed. The edges taken afterwards by the automaton (and by runtime
//! failures) are listed in [`is_valid_transition`], which is consulted again
//! whenever a state is committed.

use crate::api::error::ApiError;
use crate::lifecycle::error::LifecycleError;
use pipeline_monitor_types::PipelineState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;
use utoipa::ToSchema;

/// The only commands that change the state of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PipelineAction {
    Start,
    Pause,
    Shutdown,
}

impl PipelineAction {
    pub const ALL: [PipelineAction; 3] = [Self::Start, Self::Pause, Self::Shutdown];

    /// Endpoint of the pipeline process that carries out the command.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Shutdown => "shutdown",
        }
    }
}

impl Display for PipelineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint())
    }
}

impl FromStr for PipelineAction {
    type Err = ApiError;

    fn from_str(action: &str) -> Result<Self, Self::Err> {
        match action {
            "start" => Ok(Self::Start),
            "pause" => Ok(Self::Pause),
            "shutdown" => Ok(Self::Shutdown),
            _ => Err(ApiError::UnsupportedAction {
                action: action.to_string(),
                valid_actions: "'start', 'pause', or 'shutdown'",
            }),
        }
    }
}

/// What an accepted command sets in motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `Shutdown` → `Provisioning` → `Initializing` → `Starting` → `Running`.
    Deploy,
    /// `Paused` → `Running`.
    Resume,
    /// `Running` → `Pausing` → `Paused`.
    Pause,
    /// any → `ShuttingDown` → `Shutdown`.
    Shutdown,
    /// Shutdown requested while already `ShuttingDown` or `Shutdown`.
    AlreadyShutdown,
}

impl Transition {
    /// State committed at the moment the command is accepted, if any.
    pub fn entry_state(&self) -> Option<PipelineState> {
        match self {
            Self::Deploy => Some(PipelineState::Provisioning),
            Self::Pause => Some(PipelineState::Pausing),
            Self::Shutdown => Some(PipelineState::ShuttingDown),
            Self::Resume | Self::AlreadyShutdown => None,
        }
    }
}

/// Validates `action` against the `current` state.
pub fn validate(
    pipeline_name: &str,
    current: PipelineState,
    action: PipelineAction,
) -> Result<Transition, LifecycleError> {
    use PipelineState::*;
    match (action, current) {
        (PipelineAction::Start, Shutdown) => Ok(Transition::Deploy),
        (PipelineAction::Start, Paused) => Ok(Transition::Resume),
        (PipelineAction::Pause, Running) => Ok(Transition::Pause),
        (PipelineAction::Shutdown, ShuttingDown | Shutdown) => Ok(Transition::AlreadyShutdown),
        (PipelineAction::Shutdown, _) => Ok(Transition::Shutdown),
        (PipelineAction::Start | PipelineAction::Pause, _) => {
            Err(LifecycleError::InvalidTransition {
                pipeline_name: pipeline_name.to_string(),
                current,
                action,
            })
        }
    }
}

/// Whether `from` → `to` is an edge of the lifecycle.
///
/// No edge leads to `Unknown`.
pub fn is_valid_transition(from: PipelineState, to: PipelineState) -> bool {
    use PipelineState::*;
    match (from, to) {
        (_, Unknown) => false,
        (Shutdown, Provisioning) => true,
        (Provisioning, Initializing | CreateFailure) => true,
        (Initializing, Starting | CreateFailure) => true,
        (Starting, Running | StartupFailure) => true,
        (Running, Pausing) => true,
        (Pausing, Paused) => true,
        (Paused, Running) => true,
        (Running | Pausing | Paused, Failed) => true,
        (ShuttingDown, Shutdown | Failed) => true,
        (Shutdown | ShuttingDown, ShuttingDown) => false,
        (_, ShuttingDown) => true,
        _ => false,
    }
}
