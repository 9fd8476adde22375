//! Credential checks: passwords with lockout bookkeeping, and authenticator
//! codes for two-factor accounts.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::config::LockoutConfig;
use crate::models::User;
use crate::services::directory::{UnitOfWork, UserDirectory};
use crate::services::error::expiry_after;
use crate::services::ServiceError;
use crate::utils::{totp, verify_password, Password};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordCheck {
    Succeeded,
    Failed,
    LockedOut,
}

impl PasswordCheck {
    pub fn succeeded(&self) -> bool {
        matches!(self, PasswordCheck::Succeeded)
    }
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Check a password. With `lockout_on_failure` a failure is counted and
    /// may lock the account; that bookkeeping is committed immediately.
    async fn check_password(
        &self,
        user: &mut User,
        password: &str,
        lockout_on_failure: bool,
    ) -> Result<PasswordCheck, ServiceError>;

    async fn verify_two_factor_code(&self, user: &User, code: &str) -> Result<bool, ServiceError>;

    async fn two_factor_enabled(&self, user: &User) -> Result<bool, ServiceError>;

    /// Stage the two-factor flag change on `user`.
    async fn set_two_factor_enabled(&self, user: &mut User, enabled: bool)
        -> Result<(), ServiceError>;

    /// Stage a freshly generated authenticator key on `user` and return it.
    async fn reset_authenticator_key(&self, user: &mut User) -> Result<String, ServiceError>;

    async fn authenticator_key(&self, user: &User) -> Result<Option<String>, ServiceError>;
}

/// Argon2 passwords and RFC 6238 codes, backed by the user directory.
pub struct PasswordCredentialVerifier {
    users: Arc<dyn UserDirectory>,
    unit_of_work: Arc<dyn UnitOfWork>,
    lockout: LockoutConfig,
    totp_issuer: String,
}

impl PasswordCredentialVerifier {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        unit_of_work: Arc<dyn UnitOfWork>,
        lockout: LockoutConfig,
        totp_issuer: impl Into<String>,
    ) -> Self {
        Self {
            users,
            unit_of_work,
            lockout,
            totp_issuer: totp_issuer.into(),
        }
    }

    async fn record_failure(&self, user: &mut User) -> Result<(), ServiceError> {
        user.access_failed_count += 1;
        if user.access_failed_count >= self.lockout.max_failed_attempts {
            user.lockout_end_utc = Some(expiry_after(
                Utc::now(),
                Duration::seconds(self.lockout.lockout_secs),
            )?);
            user.access_failed_count = 0;
            tracing::warn!(
                user_id = user.user_id,
                tenant_id = user.tenant_id,
                lockout_secs = self.lockout.lockout_secs,
                "User locked out after repeated password failures"
            );
        }
        self.users.update(user).await?;
        self.unit_of_work.save_changes().await
    }
}

#[async_trait]
impl CredentialVerifier for PasswordCredentialVerifier {
    async fn check_password(
        &self,
        user: &mut User,
        password: &str,
        lockout_on_failure: bool,
    ) -> Result<PasswordCheck, ServiceError> {
        if user.is_locked_out(Utc::now()) {
            tracing::debug!(user_id = user.user_id, "Password check refused, account locked");
            return Ok(PasswordCheck::LockedOut);
        }

        if verify_password(&Password::new(password), &user.password_hash) {
            if user.access_failed_count != 0 || user.lockout_end_utc.is_some() {
                user.access_failed_count = 0;
                user.lockout_end_utc = None;
                self.users.update(user).await?;
            }
            return Ok(PasswordCheck::Succeeded);
        }

        if lockout_on_failure {
            self.record_failure(user).await?;
        }
        Ok(PasswordCheck::Failed)
    }

    async fn verify_two_factor_code(&self, user: &User, code: &str) -> Result<bool, ServiceError> {
        let Some(key) = user.authenticator_key.as_deref() else {
            return Ok(false);
        };
        let code = code.trim().replace([' ', '-'], "");
        match totp::verify_code(key, &code, &self.totp_issuer, &user.user_name) {
            Ok(valid) => Ok(valid),
            Err(e) => {
                tracing::warn!(user_id = user.user_id, error = %e, "Authenticator key unusable");
                Ok(false)
            }
        }
    }

    async fn two_factor_enabled(&self, user: &User) -> Result<bool, ServiceError> {
        Ok(user.two_factor_enabled)
    }

    async fn set_two_factor_enabled(
        &self,
        user: &mut User,
        enabled: bool,
    ) -> Result<(), ServiceError> {
        user.two_factor_enabled = enabled;
        user.rotate_security_stamp();
        self.users.update(user).await
    }

    async fn reset_authenticator_key(&self, user: &mut User) -> Result<String, ServiceError> {
        let key = totp::generate_authenticator_key();
        user.authenticator_key = Some(key.clone());
        user.rotate_security_stamp();
        self.users.update(user).await?;
        Ok(key)
    }

    async fn authenticator_key(&self, user: &User) -> Result<Option<String>, ServiceError> {
        Ok(user.authenticator_key.clone())
    }
}
