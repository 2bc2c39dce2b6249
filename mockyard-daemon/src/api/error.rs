use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mockyard_protocol::protocol::ErrorBody;
use tracing::error;

use crate::errors::DaemonError;

/// Message returned for daemon faults outside development mode
const INTERNAL_MESSAGE: &str = "Internal server error";

/// An error response: status code plus `{error, detail?}` body
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub detail: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            detail: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Map a daemon error to a response.
    ///
    /// Caller mistakes keep their message. Daemon faults are logged in full
    /// and answered with a generic message, plus the details in development.
    pub fn from_daemon(err: DaemonError, development: bool) -> Self {
        let status = status_for(&err);
        if err.is_client_error() {
            return Self::new(status, err.to_string());
        }

        error!("{}", err);
        Self {
            status,
            message: INTERNAL_MESSAGE.to_string(),
            detail: development.then(|| error_chain(&err)),
        }
    }
}

pub(super) fn status_for(err: &DaemonError) -> StatusCode {
    match err {
        DaemonError::InvalidPort(_)
        | DaemonError::PortInUse(_)
        | DaemonError::InvalidFormat(_)
        | DaemonError::ConfigInUse(_) => StatusCode::BAD_REQUEST,
        DaemonError::ConfigNotFound(_) | DaemonError::InstanceNotFound(_) => StatusCode::NOT_FOUND,
        DaemonError::DuplicateName(_) => StatusCode::CONFLICT,
        DaemonError::SpawnFailed { .. }
        | DaemonError::TerminateFailed { .. }
        | DaemonError::Config(_)
        | DaemonError::Io(_)
        | DaemonError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `err` followed by each of its sources
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.contains(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            detail: self.detail,
        };
        (self.status, Json(body)).into_response()
    }
}
