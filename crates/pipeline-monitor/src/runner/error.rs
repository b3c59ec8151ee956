use crate::runner::interaction::format_timeout_error_message;
use actix_web::{
    body::BoxBody, http::StatusCode, HttpResponse, HttpResponseBuilder, ResponseError,
};
use pipeline_monitor_types::error::{DetailedError, ErrorResponse};
use pipeline_monitor_types::PipelineState;
use serde::Serialize;
use std::time::Duration;
use std::{borrow::Cow, error::Error as StdError, fmt, fmt::Display};

/// Errors that occur while provisioning, stopping or interacting with a
/// pipeline process.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RunnerError {
    /// No response was obtained from the pipeline process (connection refused,
    /// timeout, unavailable). The status aggregator excludes the pipeline from
    /// the round and tries again in the next one.
    UnreachablePipeline {
        pipeline_name: String,
        error: String,
    },
    /// The pipeline process reported a fault of its own.
    PipelineRuntimeFailure {
        pipeline_name: String,
        error: ErrorResponse,
    },
    /// The response could not be interpreted.
    PipelineInvalidResponse {
        pipeline_name: String,
        error: String,
    },
    /// The pipeline process answered an endpoint with an error.
    PipelineEndpointError {
        pipeline_name: String,
        endpoint: String,
        status_code: u16,
        error: ErrorResponse,
    },
    PipelineNotRunningOrPaused {
        pipeline_name: String,
        state: PipelineState,
    },
    UnknownDeploymentLocation {
        pipeline_name: String,
    },
    ProvisioningTimeout {
        pipeline_name: String,
        timeout: Duration,
    },
    InitializationTimeout {
        pipeline_name: String,
        timeout: Duration,
        error: String,
    },
    ShutdownTimeout {
        pipeline_name: String,
        timeout: Duration,
    },
    LogFollowRequestChannelFull,
    LogFollowRequestChannelClosed,
}

impl DetailedError for RunnerError {
    fn error_code(&self) -> Cow<'static, str> {
        match self {
            Self::UnreachablePipeline { .. } => Cow::from("UnreachablePipeline"),
            Self::PipelineRuntimeFailure { .. } => Cow::from("PipelineRuntimeFailure"),
            Self::PipelineInvalidResponse { .. } => Cow::from("PipelineInvalidResponse"),
            Self::PipelineEndpointError { .. } => Cow::from("PipelineEndpointError"),
            Self::PipelineNotRunningOrPaused { .. } => Cow::from("PipelineNotRunningOrPaused"),
            Self::UnknownDeploymentLocation { .. } => Cow::from("UnknownDeploymentLocation"),
            Self::ProvisioningTimeout { .. } => Cow::from("ProvisioningTimeout"),
            Self::InitializationTimeout { .. } => Cow::from("InitializationTimeout"),
            Self::ShutdownTimeout { .. } => Cow::from("ShutdownTimeout"),
            Self::LogFollowRequestChannelFull => Cow::from("LogFollowRequestChannelFull"),
            Self::LogFollowRequestChannelClosed => Cow::from("LogFollowRequestChannelClosed"),
        }
    }
}

impl Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnreachablePipeline {
                pipeline_name,
                error,
            } => {
                write!(f, "Pipeline '{pipeline_name}' is unreachable: {error}")
            }
            Self::PipelineRuntimeFailure {
                pipeline_name,
                error,
            } => {
                write!(
                    f,
                    "Pipeline '{pipeline_name}' reported a runtime failure: {error}"
                )
            }
            Self::PipelineInvalidResponse {
                pipeline_name,
                error,
            } => {
                write!(
                    f,
                    "Pipeline '{pipeline_name}' returned an invalid response: {error}"
                )
            }
            Self::PipelineEndpointError {
                pipeline_name,
                endpoint,
                status_code,
                error,
            } => {
                write!(
                    f,
                    "Pipeline '{pipeline_name}' responded to '/{endpoint}' with HTTP {status_code}: {error}"
                )
            }
            Self::PipelineNotRunningOrPaused {
                pipeline_name,
                state,
            } => {
                write!(
                    f,
                    "Pipeline '{pipeline_name}' is not running or paused (state: {state})"
                )
            }
            Self::UnknownDeploymentLocation { pipeline_name } => {
                write!(
                    f,
                    "No deployment location is known for pipeline '{pipeline_name}'"
                )
            }
            Self::ProvisioningTimeout {
                pipeline_name,
                timeout,
            } => {
                write!(
                    f,
                    "Provisioning of pipeline '{pipeline_name}' did not complete within {}s",
                    timeout.as_secs()
                )
            }
            Self::InitializationTimeout {
                pipeline_name,
                timeout,
                error,
            } => {
                write!(
                    f,
                    "Pipeline '{pipeline_name}' did not initialize: {}",
                    format_timeout_error_message(*timeout, error)
                )
            }
            Self::ShutdownTimeout {
                pipeline_name,
                timeout,
            } => {
                write!(
                    f,
                    "Pipeline '{pipeline_name}' was not stopped within {}s",
                    timeout.as_secs()
                )
            }
            Self::LogFollowRequestChannelFull => {
                write!(
                    f,
                    "Too many log follow requests are outstanding; try again later"
                )
            }
            Self::LogFollowRequestChannelClosed => {
                write!(f, "The logs of the pipeline are no longer served")
            }
        }
    }
}

impl From<RunnerError> for ErrorResponse {
    fn from(val: RunnerError) -> Self {
        ErrorResponse::from(&val)
    }
}

impl StdError for RunnerError {}

impl ResponseError for RunnerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnreachablePipeline { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::PipelineRuntimeFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::PipelineInvalidResponse { .. } => StatusCode::BAD_GATEWAY,
            Self::PipelineEndpointError { .. } => StatusCode::BAD_GATEWAY,
            Self::PipelineNotRunningOrPaused { .. } => StatusCode::BAD_REQUEST,
            Self::UnknownDeploymentLocation { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::ProvisioningTimeout { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InitializationTimeout { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ShutdownTimeout { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::LogFollowRequestChannelFull => StatusCode::TOO_MANY_REQUESTS,
            Self::LogFollowRequestChannelClosed => StatusCode::GONE,
        }
    }

    fn error_response(&self) -> HttpResponse<BoxBody> {
        HttpResponseBuilder::new(self.status_code()).json(ErrorResponse::from_error(self))
    }
}
