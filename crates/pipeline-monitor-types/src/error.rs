use actix_web::http::StatusCode;
use actix_web::ResponseError;
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt::{Display, Formatter};
use std::{borrow::Cow, error::Error as StdError};
use utoipa::ToSchema;

/// Uniform error body.
///
/// Used both for errors the monitor returns to its callers and for the
/// errors a pipeline process reports about itself (e.g., a runtime fault).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message.
    #[schema(example = "Pipeline 'orders' cannot be paused while in state Shutdown.")]
    pub message: String,
    /// Error code is a string that specifies this error type.
    #[schema(example = "InvalidTransition")]
    pub error_code: Cow<'static, str>,
    /// Detailed error metadata.
    /// The contents of this field is determined by `error_code`.
    #[schema(value_type=Object)]
    pub details: JsonValue,
}

/// Error trait which internal errors must implement such that it
/// can be transformed to a complete JSON error response.
pub trait DetailedError: StdError + ResponseError + Serialize {
    /// Identifying name of the error.
    fn error_code(&self) -> Cow<'static, str>;
}

impl<E> From<&E> for ErrorResponse
where
    E: DetailedError,
{
    fn from(error: &E) -> ErrorResponse {
        Self::from_error(error)
    }
}

impl ErrorResponse {
    /// Converts the error and logs it at a level determined by its status code:
    /// client errors and unavailability at `info`, everything else at `error`.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: DetailedError,
    {
        let response = Self::from_error_nolog(error);
        let status = error.status_code();
        if status.is_client_error() || status == StatusCode::SERVICE_UNAVAILABLE {
            info!(
                "[monitor error (caused by caller or pipeline)] {} {}: {}",
                status, response.error_code, response.message
            );
        } else {
            error!(
                "[monitor error (caused by implementation)] {} {}: {}",
                status, response.error_code, response.message
            );
        }
        response
    }

    pub fn from_error_nolog<E>(error: &E) -> Self
    where
        E: DetailedError,
    {
        let message = error.to_string();
        let error_code = error.error_code();
        let details = serde_json::to_value(error).unwrap_or_else(|e| {
            JsonValue::String(format!("Failed to serialize error. Details: '{e}'"))
        });

        Self {
            message,
            error_code,
            details,
        }
    }

    /// Error without structured details, e.g., reconstructed from a plain-text
    /// response body.
    pub fn from_message(error_code: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_code: error_code.into(),
            details: JsonValue::Null,
        }
    }
}

impl Display for ErrorResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.error_code)
    }
}

#[cfg(test)]
mod test {
    use super::{DetailedError, ErrorResponse};
    use actix_web::http::StatusCode;
    use actix_web::ResponseError;
    use serde::Serialize;
    use serde_json::json;
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt::{Display, Formatter};

    #[derive(Debug, Serialize)]
    struct NoSuchThing {
        name: String,
    }

    impl Display for NoSuchThing {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            write!(f, "There is no '{}'", self.name)
        }
    }

    impl StdError for NoSuchThing {}

    impl ResponseError for NoSuchThing {
        fn status_code(&self) -> StatusCode {
            StatusCode::NOT_FOUND
        }
    }

    impl DetailedError for NoSuchThing {
        fn error_code(&self) -> Cow<'static, str> {
            Cow::from("NoSuchThing")
        }
    }

    #[test]
    fn detailed_error_becomes_response() {
        let response = ErrorResponse::from(&NoSuchThing {
            name: "orders".to_string(),
        });
        assert_eq!(response.message, "There is no 'orders'");
        assert_eq!(response.error_code, "NoSuchThing");
        assert_eq!(response.details, json!({ "name": "orders" }));
    }

    #[test]
    fn parses_pipeline_reported_error() {
        let body = json!({
            "message": "worker panicked",
            "error_code": "WorkerPanic",
            "details": { "worker": 3 }
        });
        let response: ErrorResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.error_code, "WorkerPanic");
        assert_eq!(response.to_string(), "worker panicked (WorkerPanic)");
    }
}
