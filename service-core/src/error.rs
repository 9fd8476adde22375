use thiserror::Error;

/// Process-level error shared by the identity workspace.
///
/// Library crates keep their own error enums and convert into this one at
/// the edge of the process (binaries, configuration, startup).
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Authentication error: {0}")]
    AuthError(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl AppError {
    /// Process exit code for command line entry points.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::BadRequest(_) => 2,
            AppError::NotFound(_) => 3,
            AppError::AuthError(_) => 4,
            AppError::Conflict(_) => 5,
            AppError::ConfigError(_) => 78,
            AppError::Cancelled => 130,
            AppError::InternalError(_) | AppError::DatabaseError(_) => 1,
        }
    }
}
