//! Error types shared by the session manager and the HTTP layer

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Misuse of the session lifecycle
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("session manager is not initialized")]
    NotInitialized,

    #[error("session manager is already initialized")]
    AlreadyInitialized,

    #[error("session {0} has already been released")]
    Released(u64),
}

/// Any failure inside a request handler.
///
/// Rendered as a bare 500; the cause only goes to the log.
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl AppError {
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(detail = %format!("{:#}", self.0), "Request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
    }
}
