use crate::error::ManagerError;
use crate::lifecycle::pipeline::PipelineId;
use crate::runner::error::RunnerError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Identifies the deployment that the executor is asked to provision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRequest {
    pub pipeline_id: PipelineId,
    pub pipeline_name: String,
    pub deployment_id: Uuid,
}

/// Provisions and stops the compute resources of pipelines.
/// The automaton invokes these methods per pipeline.
#[async_trait]
pub trait PipelineExecutor: Sync + Send {
    /// Provisions compute resources for the deployment.
    ///
    /// This should be as non-blocking as possible: completion is checked
    /// afterwards using `is_provisioned()`.
    async fn provision(&self, request: &DeploymentRequest) -> Result<(), ManagerError>;

    /// Validates whether the provisioning initiated by `provision()` is completed.
    ///
    /// Returns:
    /// - `Ok(Some(deployment_location))` if completed successfully
    /// - `Ok(None)` if still ongoing
    /// - `Err(...)` if provisioning encountered an irrecoverable failure
    async fn is_provisioned(
        &self,
        request: &DeploymentRequest,
    ) -> Result<Option<String>, ManagerError>;

    /// Deallocates the compute resources. Idempotent; blocks until finished.
    async fn stop(&self, pipeline_name: &str) -> Result<(), ManagerError>;
}

/// Executor for pipeline processes that are started outside of the monitor,
/// at locations known in advance.
pub struct StaticExecutor {
    locations: BTreeMap<String, String>,
}

impl StaticExecutor {
    pub fn new(locations: BTreeMap<String, String>) -> Self {
        Self { locations }
    }

    fn location(&self, pipeline_name: &str) -> Result<&String, ManagerError> {
        self.locations.get(pipeline_name).ok_or_else(|| {
            ManagerError::from(RunnerError::UnknownDeploymentLocation {
                pipeline_name: pipeline_name.to_string(),
            })
        })
    }
}

#[async_trait]
impl PipelineExecutor for StaticExecutor {
    async fn provision(&self, request: &DeploymentRequest) -> Result<(), ManagerError> {
        self.location(&request.pipeline_name).map(|_| ())
    }

    async fn is_provisioned(
        &self,
        request: &DeploymentRequest,
    ) -> Result<Option<String>, ManagerError> {
        self.location(&request.pipeline_name)
            .map(|location| Some(location.clone()))
    }

    async fn stop(&self, _pipeline_name: &str) -> Result<(), ManagerError> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{DeploymentRequest, PipelineExecutor, StaticExecutor};
    use crate::lifecycle::pipeline::PipelineId;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn request(name: &str) -> DeploymentRequest {
        DeploymentRequest {
            pipeline_id: PipelineId(Uuid::now_v7()),
            pipeline_name: name.to_string(),
            deployment_id: Uuid::now_v7(),
        }
    }

    #[tokio::test]
    async fn static_locations() {
        let executor = StaticExecutor::new(BTreeMap::from([(
            "p1".to_string(),
            "127.0.0.1:8000".to_string(),
        )]));
        executor.provision(&request("p1")).await.unwrap();
        assert_eq!(
            executor.is_provisioned(&request("p1")).await.unwrap(),
            Some("127.0.0.1:8000".to_string())
        );
        assert!(executor.provision(&request("p2")).await.is_err());
        executor.stop("p2").await.unwrap();
    }
}
