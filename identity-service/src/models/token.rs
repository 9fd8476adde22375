//! Token model - persisted OAuth tokens, partitioned by tenant.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::ticket::{claim_types, Principal, Ticket};
use crate::services::error::{expiry_after, ServiceError};

/// Token status codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Valid,
    Inactive,
    Redeemed,
    Rejected,
    Revoked,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Valid => "valid",
            TokenStatus::Inactive => "inactive",
            TokenStatus::Redeemed => "redeemed",
            TokenStatus::Rejected => "rejected",
            TokenStatus::Revoked => "revoked",
        }
    }
}

/// Token type codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    AccessToken,
    RefreshToken,
    AuthorizationCode,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::AccessToken => "access_token",
            TokenType::RefreshToken => "refresh_token",
            TokenType::AuthorizationCode => "authorization_code",
        }
    }
}

/// Client application a token was issued to.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Application {
    pub application_id: String,
    pub client_id: String,
}

/// Token entity.
///
/// `properties` holds the raw JSON property bag exactly as stored; it may
/// contain data this crate does not understand.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Token {
    pub token_id: String,
    pub application_id: Option<String>,
    pub authorization_id: Option<String>,
    pub subject: Option<String>,
    pub tenant_id: Option<String>,
    pub token_type: Option<String>,
    pub status: Option<String>,
    pub payload: Option<String>,
    pub reference_id: Option<String>,
    pub properties: Option<String>,
    pub concurrency_stamp: String,
    pub creation_utc: Option<DateTime<Utc>>,
    pub expiration_utc: Option<DateTime<Utc>>,
    pub redemption_utc: Option<DateTime<Utc>>,
}

impl Token {
    /// Create an empty token with a fresh identifier.
    pub fn new() -> Self {
        Self {
            token_id: Uuid::new_v4().to_string(),
            application_id: None,
            authorization_id: None,
            subject: None,
            tenant_id: None,
            token_type: None,
            status: None,
            payload: None,
            reference_id: None,
            properties: None,
            concurrency_stamp: Uuid::new_v4().to_string(),
            creation_utc: None,
            expiration_utc: None,
            redemption_utc: None,
        }
    }

    pub fn has_status(&self, status: &TokenStatus) -> bool {
        self.status.as_deref() == Some(status.as_str())
    }

    pub fn has_type(&self, token_type: &TokenType) -> bool {
        self.token_type.as_deref() == Some(token_type.as_str())
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything needed to persist a token; filled in by the signer and copied
/// onto a `Token` by the store.
#[derive(Debug, Clone, Default)]
pub struct TokenDescriptor {
    pub application_id: Option<String>,
    pub authorization_id: Option<String>,
    pub creation_utc: Option<DateTime<Utc>>,
    pub expiration_utc: Option<DateTime<Utc>>,
    pub redemption_utc: Option<DateTime<Utc>>,
    pub payload: Option<String>,
    pub principal: Principal,
    pub reference_id: Option<String>,
    pub status: Option<String>,
    pub subject: Option<String>,
    pub token_type: Option<String>,
}

impl TokenDescriptor {
    /// Descriptor for the access token issued from `ticket`.
    ///
    /// The expiry honours the principal's lifetime override and falls back to
    /// `default_lifetime`. A lifetime that runs past the calendar is an error.
    pub fn access_token(
        ticket: &Ticket,
        application_id: impl Into<String>,
        default_lifetime: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, ServiceError> {
        let principal = ticket.principal.clone();
        let lifetime = principal.access_token_lifetime().unwrap_or(default_lifetime);
        let subject = principal
            .find_claim(claim_types::SUBJECT)
            .or_else(|| principal.find_claim(claim_types::USER_ID))
            .map(str::to_string);
        let expiration = expiry_after(now, lifetime)?;

        Ok(Self {
            application_id: Some(application_id.into()),
            creation_utc: Some(now),
            expiration_utc: Some(expiration),
            principal,
            status: Some(TokenStatus::Valid.as_str().to_string()),
            subject,
            token_type: Some(TokenType::AccessToken.as_str().to_string()),
            ..Self::default()
        })
    }
}
