use crate::lifecycle::events::{PipelineLifecycleEvent, LIFECYCLE_EVENTS_RETAINED};
use chrono::{DateTime, Utc};
use pipeline_monitor_types::error::ErrorResponse;
use pipeline_monitor_types::{ConnectorMode, PipelineState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::fmt::Display;
use utoipa::ToSchema;
use uuid::Uuid;

/// Pipeline identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize, ToSchema)]
#[repr(transparent)]
#[serde(transparent)]
pub struct PipelineId(pub Uuid);

impl Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Point-in-time copy of a pipeline record, as handed out to readers.
#[derive(Debug, Clone, Serialize, PartialEq, ToSchema)]
pub struct PipelineDescr {
    pub id: PipelineId,
    pub name: String,
    pub state: PipelineState,
    /// Time at which the current state was entered.
    pub state_since: DateTime<Utc>,
    /// Last deployment error. Kept until the next `start` from `Shutdown`.
    pub deployment_error: Option<ErrorResponse>,
    /// Identifier of the current deployment, set when provisioning begins.
    pub deployment_id: Option<Uuid>,
    /// Address (`host:port`) of the pipeline process, once provisioned.
    pub deployment_location: Option<String>,
    /// Run mode of each input connector, by name.
    pub connectors: BTreeMap<String, ConnectorMode>,
}

/// Authoritative record of one pipeline.
///
/// Only mutated through [`Pipeline::transition`] and the deployment setters,
/// under the lock of the owning handle.
#[derive(Debug)]
pub(crate) struct Pipeline {
    pub(crate) id: PipelineId,
    pub(crate) name: String,
    pub(crate) state: PipelineState,
    pub(crate) state_since: DateTime<Utc>,
    pub(crate) deployment_error: Option<ErrorResponse>,
    pub(crate) deployment_id: Option<Uuid>,
    pub(crate) deployment_location: Option<String>,
    /// Connector modes each deployment starts with.
    initial_connectors: BTreeMap<String, ConnectorMode>,
    pub(crate) connectors: BTreeMap<String, ConnectorMode>,
    events: VecDeque<PipelineLifecycleEvent>,
}

impl Pipeline {
    pub(crate) fn new(name: &str, connectors: BTreeMap<String, ConnectorMode>) -> Self {
        Self {
            id: PipelineId(Uuid::now_v7()),
            name: name.to_string(),
            state: PipelineState::Shutdown,
            state_since: Utc::now(),
            deployment_error: None,
            deployment_id: None,
            deployment_location: None,
            initial_connectors: connectors.clone(),
            connectors,
            events: VecDeque::new(),
        }
    }

    /// Moves to `next`, records the event and returns a copy of it.
    ///
    /// A new deployment (`Shutdown` → `Provisioning`) clears the previous
    /// error and location, and resets the connector modes.
    pub(crate) fn transition(
        &mut self,
        next: PipelineState,
        error: Option<ErrorResponse>,
    ) -> PipelineLifecycleEvent {
        let event = PipelineLifecycleEvent::new(
            &self.name,
            self.state,
            next,
            error.as_ref().map(|e| e.message.clone()),
        );
        if self.state == PipelineState::Shutdown && next == PipelineState::Provisioning {
            self.deployment_error = None;
            self.deployment_id = Some(Uuid::now_v7());
            self.deployment_location = None;
            self.connectors = self.initial_connectors.clone();
        }
        if next == PipelineState::Shutdown {
            self.deployment_location = None;
        }
        if error.is_some() {
            self.deployment_error = error;
        }
        self.state = next;
        self.state_since = event.recorded_at;

        if self.events.len() == LIFECYCLE_EVENTS_RETAINED {
            self.events.pop_front();
        }
        self.events.push_back(event.clone());
        event
    }

    pub(crate) fn events(&self) -> Vec<PipelineLifecycleEvent> {
        self.events.iter().cloned().collect()
    }

    pub(crate) fn descr(&self) -> PipelineDescr {
        PipelineDescr {
            id: self.id,
            name: self.name.clone(),
            state: self.state,
            state_since: self.state_since,
            deployment_error: self.deployment_error.clone(),
            deployment_id: self.deployment_id,
            deployment_location: self.deployment_location.clone(),
            connectors: self.connectors.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::Pipeline;
    use crate::lifecycle::events::LIFECYCLE_EVENTS_RETAINED;
    use pipeline_monitor_types::error::ErrorResponse;
    use pipeline_monitor_types::{ConnectorMode, PipelineState};
    use std::collections::BTreeMap;

    fn pipeline() -> Pipeline {
        Pipeline::new(
            "p1",
            BTreeMap::from([
                ("orders".to_string(), ConnectorMode::Running),
                ("customers".to_string(), ConnectorMode::Paused),
            ]),
        )
    }

    #[test]
    fn new_deployment_resets_error_and_connectors() {
        let mut pipeline = pipeline();
        pipeline.transition(PipelineState::Provisioning, None);
        let first_deployment = pipeline.deployment_id;
        assert!(first_deployment.is_some());
        pipeline.connectors.insert("customers".to_string(), ConnectorMode::Running);
        pipeline.transition(
            PipelineState::CreateFailure,
            Some(ErrorResponse::from_message("ProvisioningTimeout", "too slow")),
        );
        pipeline.transition(PipelineState::ShuttingDown, None);
        pipeline.transition(PipelineState::Shutdown, None);
        assert_eq!(pipeline.deployment_error.as_ref().unwrap().message, "too slow");

        pipeline.transition(PipelineState::Provisioning, None);
        assert_eq!(pipeline.deployment_error, None);
        assert_ne!(pipeline.deployment_id, first_deployment);
        assert_eq!(pipeline.connectors["customers"], ConnectorMode::Paused);
    }

    #[test]
    fn events_are_bounded() {
        let mut pipeline = pipeline();
        for _ in 0..LIFECYCLE_EVENTS_RETAINED {
            pipeline.transition(PipelineState::Provisioning, None);
            pipeline.transition(PipelineState::ShuttingDown, None);
        }
        let events = pipeline.events();
        assert_eq!(events.len(), LIFECYCLE_EVENTS_RETAINED);
        assert_eq!(events.last().unwrap().to, PipelineState::ShuttingDown);
        assert!(events.windows(2).all(|w| w[0].recorded_at <= w[1].recorded_at));
    }

    #[test]
    fn failure_message_is_recorded_in_event() {
        let mut pipeline = pipeline();
        let event = pipeline.transition(
            PipelineState::Provisioning,
            Some(ErrorResponse::from_message("X", "boom")),
        );
        assert_eq!(event.info.as_deref(), Some("boom"));
        assert_eq!(event.from, PipelineState::Shutdown);
        assert_eq!(pipeline.descr().state, PipelineState::Provisioning);
    }
}
