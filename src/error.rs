use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

/// `axum`-compatible error handler.
///
/// Renders as `{"error": "<message>"}` with the carried status code.
#[derive(Error)]
pub struct Error {
    status: StatusCode,
    err: anyhow::Error,
}

impl Error {
    pub fn with_status(status: StatusCode, err: impl Into<anyhow::Error>) -> Self {
        Self {
            status,
            err: err.into(),
        }
    }

    pub fn bad_request(msg: &'static str) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, anyhow::Error::msg(msg))
    }

    pub fn not_found(msg: &'static str) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, anyhow::Error::msg(msg))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            err,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:#}", self.status, self.err)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.err.fmt(f)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{:?}", self.err);
        } else {
            debug!(status = %self.status, "{:#}", self.err);
        }

        (self.status, Json(json!({ "error": format!("{:#}", self.err) }))).into_response()
    }
}
