use std::sync::Arc;

use crate::models::User;
use crate::services::credentials::CredentialVerifier;
use crate::services::directory::{UnitOfWork, UserDirectory};
use crate::services::error::require;
use crate::services::ServiceError;
use crate::utils::totp;

/// Authenticator key provisioning returned to the user for enrolment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorKey {
    pub key: String,
    pub provisioning_uri: String,
}

/// Self-service two-factor enrolment. Every successful call commits exactly
/// once.
pub struct TwoFactorService {
    users: Arc<dyn UserDirectory>,
    credentials: Arc<dyn CredentialVerifier>,
    unit_of_work: Arc<dyn UnitOfWork>,
    totp_issuer: String,
}

impl TwoFactorService {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        credentials: Arc<dyn CredentialVerifier>,
        unit_of_work: Arc<dyn UnitOfWork>,
        totp_issuer: impl Into<String>,
    ) -> Self {
        Self {
            users,
            credentials,
            unit_of_work,
            totp_issuer: totp_issuer.into(),
        }
    }

    /// Replace the user's authenticator key ahead of enabling two-factor.
    pub async fn generate_new_authenticator_key(
        &self,
        username: &str,
    ) -> Result<AuthenticatorKey, ServiceError> {
        let mut user = self.find_user(username).await?;
        if self.credentials.two_factor_enabled(&user).await? {
            return Err(ServiceError::TwoFactorAlreadyEnabled);
        }

        let key = self.credentials.reset_authenticator_key(&mut user).await?;
        // Nothing is committed unless the key can be enrolled.
        let provisioning_uri = totp::provisioning_uri(&key, &self.totp_issuer, &user.user_name)?;
        self.unit_of_work.save_changes().await?;

        tracing::info!(user_id = user.user_id, "Authenticator key regenerated");
        Ok(AuthenticatorKey {
            key,
            provisioning_uri,
        })
    }

    /// Turn two-factor on once the user proves they hold the current key.
    pub async fn enable_two_factor(&self, username: &str, code: &str) -> Result<(), ServiceError> {
        require(code, "code")?;
        let mut user = self.find_user(username).await?;
        if self.credentials.two_factor_enabled(&user).await? {
            return Err(ServiceError::TwoFactorAlreadyEnabled);
        }
        if self.credentials.authenticator_key(&user).await?.is_none() {
            return Err(ServiceError::NewAuthenticatorKeyRequired);
        }
        if !self.credentials.verify_two_factor_code(&user, code).await? {
            tracing::warn!(user_id = user.user_id, "Two-factor enrolment code rejected");
            return Err(ServiceError::InvalidTwoFactorToken);
        }

        self.credentials.set_two_factor_enabled(&mut user, true).await?;
        self.unit_of_work.save_changes().await?;
        tracing::info!(user_id = user.user_id, "Two-factor enabled");
        Ok(())
    }

    /// Turn two-factor off. The key is rotated so a stale authenticator app
    /// cannot be reused for a later enrolment.
    pub async fn disable_two_factor(&self, username: &str) -> Result<(), ServiceError> {
        let mut user = self.find_user(username).await?;

        self.credentials.set_two_factor_enabled(&mut user, false).await?;
        self.credentials.reset_authenticator_key(&mut user).await?;
        self.unit_of_work.save_changes().await?;

        tracing::info!(user_id = user.user_id, "Two-factor disabled");
        Ok(())
    }

    async fn find_user(&self, username: &str) -> Result<User, ServiceError> {
        require(username, "username")?;
        self.users
            .find_by_name(username)
            .await?
            .ok_or_else(|| ServiceError::UnknownUser(username.to_string()))
    }
}
