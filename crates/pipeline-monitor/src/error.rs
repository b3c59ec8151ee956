//! This module implements [`enum ManagerError`], the top-level error
//! type returned by the public operations of the monitor.
//!
//! ```text
//! ManagerError (this module)
//! ├─ lifecycle::error::LifecycleError (pipeline records and command validation)
//! ├─ runner::error::RunnerError (interaction with pipeline processes)
//! ├─ api::error::ApiError (malformed requests by the caller)
//! ```
//!
//! All of them implement the `actix-web` `ResponseError` trait such that a
//! presentation layer can return them as is. The body is always a JSON
//! serialization of [`ErrorResponse`], the same format in which pipeline
//! processes report their own errors.

use crate::api::error::ApiError;
use crate::lifecycle::error::LifecycleError;
use crate::runner::error::RunnerError;
use actix_web::{
    body::BoxBody, http::StatusCode, HttpResponse, HttpResponseBuilder, ResponseError,
};
use pipeline_monitor_types::error::{DetailedError, ErrorResponse};
use serde::Serialize;
use std::{
    borrow::Cow,
    error::Error as StdError,
    fmt::{Display, Error as FmtError, Formatter},
};

/// Monitor errors.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ManagerError {
    LifecycleError {
        #[serde(flatten)]
        lifecycle_error: LifecycleError,
    },
    RunnerError {
        #[serde(flatten)]
        runner_error: RunnerError,
    },
    ApiError {
        #[serde(flatten)]
        api_error: ApiError,
    },
}

impl StdError for ManagerError {}

impl From<LifecycleError> for ManagerError {
    fn from(lifecycle_error: LifecycleError) -> Self {
        Self::LifecycleError { lifecycle_error }
    }
}

impl From<RunnerError> for ManagerError {
    fn from(runner_error: RunnerError) -> Self {
        Self::RunnerError { runner_error }
    }
}

impl From<ApiError> for ManagerError {
    fn from(api_error: ApiError) -> Self {
        Self::ApiError { api_error }
    }
}

impl Display for ManagerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::LifecycleError { lifecycle_error } => lifecycle_error.fmt(f),
            Self::RunnerError { runner_error } => runner_error.fmt(f),
            Self::ApiError { api_error } => api_error.fmt(f),
        }
    }
}

impl ResponseError for ManagerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::LifecycleError { lifecycle_error } => lifecycle_error.status_code(),
            Self::RunnerError { runner_error } => runner_error.status_code(),
            Self::ApiError { api_error } => api_error.status_code(),
        }
    }

    fn error_response(&self) -> HttpResponse<BoxBody> {
        HttpResponseBuilder::new(self.status_code()).json(ErrorResponse::from_error(self))
    }
}

impl DetailedError for ManagerError {
    fn error_code(&self) -> Cow<'static, str> {
        match self {
            Self::LifecycleError { lifecycle_error } => lifecycle_error.error_code(),
            Self::RunnerError { runner_error } => runner_error.error_code(),
            Self::ApiError { api_error } => api_error.error_code(),
        }
    }
}

/// Collects the chain of sources of an error into a single line, which is
/// where `reqwest` keeps the actual reason (e.g., connection refused).
pub fn source_error(error: &dyn StdError) -> String {
    let mut causes = vec![];
    let mut source = error.source();
    while let Some(cause) = source {
        causes.push(cause.to_string());
        source = cause.source();
    }
    if causes.is_empty() {
        "(none)".to_string()
    } else {
        causes.join(": ")
    }
}
