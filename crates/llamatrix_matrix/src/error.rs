//! Error types for the Matrix adapter.

use thiserror::Error;

/// Result type alias for adapter operations.
pub type MatrixResult<T> = Result<T, MatrixError>;

/// Errors raised while setting up or running the Matrix session.
#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("Invalid homeserver {0:?}")]
    InvalidHomeserver(String),

    #[error("Failed to build Matrix client: {0}")]
    Build(#[from] matrix_sdk::ClientBuildError),

    #[error("Login failed: {0}")]
    Login(#[source] matrix_sdk::Error),

    #[error("Sync failed: {0}")]
    Sync(#[source] matrix_sdk::Error),

    #[error("Client has no logged-in user")]
    NotLoggedIn,
}
