//! Connector action resolver.
//!
//! Whether an input connector is consuming data depends on two settings that
//! change independently: the lifecycle state of its pipeline and its own run
//! mode. The combination is never stored; it is derived on every read.

use crate::api::error::ApiError;
use pipeline_monitor_types::{ConnectorMode, PipelineState};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;
use utoipa::ToSchema;

/// Verb accepted on an individual input connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorAction {
    Start,
    Pause,
}

impl ConnectorAction {
    /// Mode the connector is in once the action is applied.
    pub fn target_mode(&self) -> ConnectorMode {
        match self {
            Self::Start => ConnectorMode::Running,
            Self::Pause => ConnectorMode::Paused,
        }
    }
}

impl Display for ConnectorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::Pause => f.write_str("pause"),
        }
    }
}

impl FromStr for ConnectorAction {
    type Err = ApiError;

    fn from_str(action: &str) -> Result<Self, Self::Err> {
        match action {
            "start" => Ok(Self::Start),
            "pause" => Ok(Self::Pause),
            _ => Err(ApiError::UnsupportedAction {
                action: action.to_string(),
                valid_actions: "'start' or 'pause'",
            }),
        }
    }
}

/// A connector is active iff its pipeline is `Running` and its own mode is
/// `Running`.
pub fn is_active(state: PipelineState, mode: ConnectorMode) -> bool {
    state == PipelineState::Running && mode == ConnectorMode::Running
}

/// Derived view of one input connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ConnectorActivity {
    pub endpoint_name: String,
    pub mode: ConnectorMode,
    pub active: bool,
}

impl ConnectorActivity {
    pub fn resolve(endpoint_name: &str, state: PipelineState, mode: ConnectorMode) -> Self {
        Self {
            endpoint_name: endpoint_name.to_string(),
            mode,
            active: is_active(state, mode),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{is_active, ConnectorAction, ConnectorActivity};
    use crate::api::error::ApiError;
    use pipeline_monitor_types::{ConnectorMode, PipelineState};

    #[test]
    fn active_only_when_both_are_running() {
        for state in PipelineState::ALL {
            for mode in ConnectorMode::ALL {
                assert_eq!(
                    is_active(state, mode),
                    state == PipelineState::Running && mode == ConnectorMode::Running,
                    "state={state}, mode={mode}"
                );
            }
        }
    }

    #[test]
    fn paused_pipeline_keeps_connector_mode() {
        let activity =
            ConnectorActivity::resolve("orders", PipelineState::Paused, ConnectorMode::Running);
        assert_eq!(activity.mode, ConnectorMode::Running);
        assert!(!activity.active);
    }

    #[test]
    fn verbs() {
        assert_eq!(
            "start".parse::<ConnectorAction>().unwrap().target_mode(),
            ConnectorMode::Running
        );
        assert_eq!(
            "pause".parse::<ConnectorAction>().unwrap().target_mode(),
            ConnectorMode::Paused
        );
        match "shutdown".parse::<ConnectorAction>() {
            Err(ApiError::UnsupportedAction { action, .. }) => assert_eq!(action, "shutdown"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
