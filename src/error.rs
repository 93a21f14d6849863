use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::provider::ProviderError;

/// Failures raised by the moderation subsystem.
#[derive(Debug, Error)]
pub enum CensorError {
    /// The store rejected or failed a query. Callers may retry.
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
    /// The moderation provider refused a request or could not be reached.
    #[error("moderation provider failure: {0}")]
    Provider(#[from] ProviderError),
    #[error("{0} not found")]
    NotFound(String),
    /// The caller broke an input contract (malformed locator, bad page, ...).
    #[error("precondition failed: {0}")]
    Precondition(String),
    /// The write would break the one-active-job-per-stream rule.
    #[error("conflicting moderation job: {0}")]
    Conflict(String),
}

impl CensorError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn precondition(what: impl Into<String>) -> Self {
        Self::Precondition(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }

    /// The HTTP status this failure is reported with.
    pub const fn status(&self) -> StatusCode {
        match *self {
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Provider(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Precondition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict(_) => StatusCode::CONFLICT,
        }
    }
}

/// `axum`-compatible error handler.
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

    pub const fn status(&self) -> StatusCode {
        self.status
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

impl From<CensorError> for Error {
    fn from(err: CensorError) -> Self {
        Self::with_status(err.status(), err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:?}", self.status, self.err)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.err.fmt(f)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        error!("{:?}", self.err);

        // N.B: Forward out the error message to the requester if this is a debug build.
        // Release builds only report the status.
        let body = if cfg!(debug_assertions) {
            Body::new(format!("{:#}", self.err))
        } else {
            Body::empty()
        };

        let mut res = Response::new(body);
        *res.status_mut() = self.status;
        res
    }
}
