use chrono::{DateTime, Duration, Utc};
use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A required scalar argument was missing or empty.
    #[error("The argument '{0}' cannot be null or empty")]
    ArgumentInvalid(&'static str),

    #[error("Optimistic concurrency failure, object has been modified")]
    ConcurrencyFailure,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("Two-factor authentication is already enabled")]
    TwoFactorAlreadyEnabled,

    #[error("A new authenticator key must be generated first")]
    NewAuthenticatorKeyRequired,

    #[error("Invalid two-factor token")]
    InvalidTwoFactorToken,
}

/// Reject an empty required argument before any I/O happens.
/// Whitespace is a value; only the empty string is missing.
pub(crate) fn require(value: &str, name: &'static str) -> Result<(), ServiceError> {
    if value.is_empty() {
        return Err(ServiceError::ArgumentInvalid(name));
    }
    Ok(())
}

/// `now + lifetime`, failing instead of overflowing the calendar.
pub(crate) fn expiry_after(
    now: DateTime<Utc>,
    lifetime: Duration,
) -> Result<DateTime<Utc>, ServiceError> {
    now.checked_add_signed(lifetime).ok_or_else(|| {
        ServiceError::Internal(anyhow::anyhow!(
            "Lifetime of {} seconds overflows the expiry date",
            lifetime.num_seconds()
        ))
    })
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::Serialization(e) => AppError::InternalError(anyhow::anyhow!(e)),
            ServiceError::ArgumentInvalid(name) => {
                AppError::BadRequest(anyhow::anyhow!("The argument '{}' cannot be null or empty", name))
            }
            ServiceError::ConcurrencyFailure => {
                AppError::Conflict(anyhow::anyhow!("Optimistic concurrency failure"))
            }
            ServiceError::Cancelled => AppError::Cancelled,
            ServiceError::UnknownUser(name) => {
                AppError::NotFound(anyhow::anyhow!("Unknown user: {}", name))
            }
            ServiceError::TwoFactorAlreadyEnabled => {
                AppError::Conflict(anyhow::anyhow!("Two-factor authentication is already enabled"))
            }
            ServiceError::NewAuthenticatorKeyRequired => {
                AppError::BadRequest(anyhow::anyhow!("A new authenticator key must be generated first"))
            }
            ServiceError::InvalidTwoFactorToken => {
                AppError::AuthError(anyhow::anyhow!("Invalid two-factor token"))
            }
        }
    }
}
