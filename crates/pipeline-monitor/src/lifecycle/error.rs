use crate::lifecycle::state_machine::PipelineAction;
use actix_web::{
    body::BoxBody, http::StatusCode, HttpResponse, HttpResponseBuilder, ResponseError,
};
use pipeline_monitor_types::error::{DetailedError, ErrorResponse};
use pipeline_monitor_types::PipelineState;
use serde::Serialize;
use std::{borrow::Cow, error::Error as StdError, fmt, fmt::Display};

/// Errors of the pipeline records and of command validation.
///
/// All of them are returned synchronously by the command operations, before
/// any state is changed.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum LifecycleError {
    UnknownPipeline {
        pipeline_name: String,
    },
    DuplicatePipelineName {
        pipeline_name: String,
    },
    InvalidTransition {
        pipeline_name: String,
        current: PipelineState,
        action: PipelineAction,
    },
    CommandInProgress {
        pipeline_name: String,
        current: PipelineState,
    },
    PipelineNotShutdown {
        pipeline_name: String,
        current: PipelineState,
    },
    UnknownConnector {
        pipeline_name: String,
        connector_name: String,
    },
}

impl DetailedError for LifecycleError {
    fn error_code(&self) -> Cow<'static, str> {
        match self {
            Self::UnknownPipeline { .. } => Cow::from("UnknownPipeline"),
            Self::DuplicatePipelineName { .. } => Cow::from("DuplicatePipelineName"),
            Self::InvalidTransition { .. } => Cow::from("InvalidTransition"),
            Self::CommandInProgress { .. } => Cow::from("CommandInProgress"),
            Self::PipelineNotShutdown { .. } => Cow::from("PipelineNotShutdown"),
            Self::UnknownConnector { .. } => Cow::from("UnknownConnector"),
        }
    }
}

impl Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPipeline { pipeline_name } => {
                write!(f, "Unknown pipeline '{pipeline_name}'")
            }
            Self::DuplicatePipelineName { pipeline_name } => {
                write!(f, "A pipeline named '{pipeline_name}' already exists")
            }
            Self::InvalidTransition {
                pipeline_name,
                current,
                action,
            } => {
                write!(
                    f,
                    "Action '{action}' is not allowed for pipeline '{pipeline_name}' in state {current}"
                )
            }
            Self::CommandInProgress {
                pipeline_name,
                current,
            } => {
                write!(
                    f,
                    "Another command is in progress for pipeline '{pipeline_name}' (state: {current}); retry later"
                )
            }
            Self::PipelineNotShutdown {
                pipeline_name,
                current,
            } => {
                write!(
                    f,
                    "Pipeline '{pipeline_name}' must be shut down before it can be removed (state: {current})"
                )
            }
            Self::UnknownConnector {
                pipeline_name,
                connector_name,
            } => {
                write!(
                    f,
                    "Pipeline '{pipeline_name}' has no input connector named '{connector_name}'"
                )
            }
        }
    }
}

impl From<LifecycleError> for ErrorResponse {
    fn from(val: LifecycleError) -> Self {
        ErrorResponse::from(&val)
    }
}

impl StdError for LifecycleError {}

impl ResponseError for LifecycleError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownPipeline { .. } => StatusCode::NOT_FOUND,
            Self::DuplicatePipelineName { .. } => StatusCode::CONFLICT,
            Self::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            Self::CommandInProgress { .. } => StatusCode::CONFLICT,
            Self::PipelineNotShutdown { .. } => StatusCode::BAD_REQUEST,
            Self::UnknownConnector { .. } => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse<BoxBody> {
        HttpResponseBuilder::new(self.status_code()).json(ErrorResponse::from_error(self))
    }
}
