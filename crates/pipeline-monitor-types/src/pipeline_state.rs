use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Display;
use utoipa::ToSchema;

/// Lifecycle state of a pipeline as tracked by the monitor.
///
/// ### The lifecycle of a pipeline
///
/// ```text
///              Shutdown ◄────────────── ShuttingDown ◄──── All states can transition
///                 │   ▲                                    to ShuttingDown via /shutdown
///          /start │   └── (no-op if already ShuttingDown or Shutdown)
///                 ▼
///          ⌛Provisioning ──────────► CreateFailure
///                 │                        ▲
///                 ▼                        │
///          ⌛Initializing ─────────────────┘
///                 │
///                 ▼
///            ⌛Starting ──────────────► StartupFailure
///                 │
///                 ▼         /pause
///              Running ───────────► Pausing ───► Paused
///                 ▲                                 │
///                 └─────────────────────────────────┘
///                              /start
///
///   Running, Pausing and Paused move to Failed on a runtime error.
/// ```
///
/// States labeled with the hourglass symbol (⌛) are **timed**: the pipeline
/// moves on to the corresponding failure state when the operation does not
/// complete within its configured timeout.
///
/// The serialized form is the internal name of the variant. The label shown to
/// users is obtained separately through [`PipelineState::display_label`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, ToSchema)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub enum PipelineState {
    /// Not deployed. Initial state of every pipeline, and the state reached
    /// after a completed shutdown.
    Shutdown,

    /// Compute resources for the pipeline process are being provisioned.
    Provisioning,

    /// The pipeline process is up and is initializing its connectors.
    Initializing,

    /// Provisioning or initialization failed or timed out.
    /// An explicit `shutdown` is required before another `start`.
    CreateFailure,

    /// The pipeline process was initialized and is asked to start processing.
    Starting,

    /// The pipeline process did not acknowledge the start request.
    /// An explicit `shutdown` is required before another `start`.
    StartupFailure,

    /// The pipeline is processing data.
    Running,

    /// A pause was requested and has not yet been acknowledged.
    Pausing,

    /// The pipeline is deployed but its input connectors do not consume data.
    Paused,

    /// The pipeline process reported an internal fault while running or paused.
    Failed,

    /// The pipeline process is being stopped.
    ShuttingDown,

    /// The state has not been observed.
    ///
    /// No valid transition ever produces this state. Encountering it means the
    /// bookkeeping has a gap.
    Unknown,
}

/// Explicit mapping of every state to its user-facing label.
const DISPLAY_LABELS: [(PipelineState, &str); 12] = [
    (PipelineState::Shutdown, "Ready to run"),
    (PipelineState::Provisioning, "Provisioning"),
    (PipelineState::Initializing, "Creating"),
    (PipelineState::CreateFailure, "Create failed"),
    (PipelineState::Starting, "Starting"),
    (PipelineState::StartupFailure, "Start failed"),
    (PipelineState::Running, "Running"),
    (PipelineState::Pausing, "Pausing"),
    (PipelineState::Paused, "Paused"),
    (PipelineState::Failed, "Failed"),
    (PipelineState::ShuttingDown, "Shutting down"),
    (PipelineState::Unknown, "Unknown"),
];

impl PipelineState {
    /// All states, in declaration order.
    pub const ALL: [PipelineState; 12] = [
        Self::Shutdown,
        Self::Provisioning,
        Self::Initializing,
        Self::CreateFailure,
        Self::Starting,
        Self::StartupFailure,
        Self::Running,
        Self::Pausing,
        Self::Paused,
        Self::Failed,
        Self::ShuttingDown,
        Self::Unknown,
    ];

    /// User-facing label of the state.
    pub fn display_label(&self) -> &'static str {
        DISPLAY_LABELS
            .iter()
            .find(|(state, _)| state == self)
            .map(|(_, label)| *label)
            .unwrap_or("Unknown")
    }

    /// Whether a pipeline process may exist for a pipeline in this state,
    /// i.e., whether the status aggregator should poll it.
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Shutdown)
    }

    /// Whether the pipeline process has been initialized and can be interacted
    /// with (commands, connector actions).
    pub fn is_deployed(&self) -> bool {
        matches!(self, Self::Running | Self::Pausing | Self::Paused)
    }

    /// Whether the state is reached because of an error and requires an
    /// explicit shutdown before the pipeline can be started again.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::CreateFailure | Self::StartupFailure | Self::Failed
        )
    }
}

impl Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Run mode of a single input connector, set independently of the pipeline state.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, ToSchema)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub enum ConnectorMode {
    #[default]
    Running,
    Paused,
}

impl ConnectorMode {
    pub const ALL: [ConnectorMode; 2] = [Self::Running, Self::Paused];

    /// Mode matching the `paused` flag of a connector configuration or status.
    pub fn from_paused(paused: bool) -> Self {
        if paused {
            Self::Paused
        } else {
            Self::Running
        }
    }

    pub fn is_paused(&self) -> bool {
        *self == Self::Paused
    }
}

impl Display for ConnectorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod test {
    use super::{ConnectorMode, PipelineState, DISPLAY_LABELS};
    use std::collections::HashSet;

    #[test]
    fn every_state_has_exactly_one_label() {
        let labeled: HashSet<PipelineState> =
            DISPLAY_LABELS.iter().map(|(state, _)| *state).collect();
        assert_eq!(labeled.len(), DISPLAY_LABELS.len());
        for state in PipelineState::ALL {
            assert!(labeled.contains(&state), "{state} has no display label");
        }
    }

    #[test]
    fn labels_differ_from_internal_names() {
        assert_eq!(PipelineState::Shutdown.display_label(), "Ready to run");
        assert_eq!(PipelineState::Initializing.display_label(), "Creating");
        assert_eq!(PipelineState::CreateFailure.display_label(), "Create failed");
        assert_eq!(PipelineState::StartupFailure.display_label(), "Start failed");
        assert_eq!(PipelineState::ShuttingDown.display_label(), "Shutting down");
        assert_eq!(PipelineState::Shutdown.to_string(), "Shutdown");
    }

    #[test]
    fn serialized_form_is_the_internal_name() {
        assert_eq!(
            serde_json::to_string(&PipelineState::ShuttingDown).unwrap(),
            "\"ShuttingDown\""
        );
        assert_eq!(
            serde_json::from_str::<PipelineState>("\"CreateFailure\"").unwrap(),
            PipelineState::CreateFailure
        );
    }

    #[test]
    fn connector_mode_defaults_to_running() {
        assert_eq!(ConnectorMode::default(), ConnectorMode::Running);
        assert_eq!(ConnectorMode::from_paused(true), ConnectorMode::Paused);
        assert_eq!(ConnectorMode::from_paused(false), ConnectorMode::Running);
    }

    #[test]
    fn only_shutdown_is_not_live() {
        for state in PipelineState::ALL {
            assert_eq!(state.is_live(), state != PipelineState::Shutdown);
        }
    }
}
