//! Sign-in policy: principal creation, security-stamp validation and the
//! composite "can sign in" check.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use subtle::ConstantTimeEq;

use crate::models::ticket::claim_types;
use crate::models::{Claim, Principal, User};
use crate::services::directory::{TenantDirectory, UserDirectory};
use crate::services::ServiceError;

#[async_trait]
pub trait SignInPolicy: Send + Sync {
    /// Base principal for `user`: subject and security stamp.
    async fn create_principal(&self, user: &User) -> Result<Principal, ServiceError>;

    /// Current user record when the principal's security stamp still
    /// matches it, `None` otherwise.
    async fn validate_security_stamp(
        &self,
        principal: &Principal,
    ) -> Result<Option<User>, ServiceError>;

    async fn can_sign_in(&self, user: &User) -> Result<bool, ServiceError>;

    /// Whether the user's tenant currently accepts sign-ins.
    async fn tenant_active(&self, user: &User) -> Result<bool, ServiceError>;
}

/// Sign-in policy backed by the user directory and, optionally, a tenant
/// directory. Without one, tenants are treated as active.
pub struct DirectorySignInPolicy {
    users: Arc<dyn UserDirectory>,
    tenants: Option<Arc<dyn TenantDirectory>>,
}

impl DirectorySignInPolicy {
    pub fn new(users: Arc<dyn UserDirectory>, tenants: Option<Arc<dyn TenantDirectory>>) -> Self {
        Self { users, tenants }
    }
}

#[async_trait]
impl SignInPolicy for DirectorySignInPolicy {
    async fn create_principal(&self, user: &User) -> Result<Principal, ServiceError> {
        Ok(Principal::with_claims(vec![
            Claim::new(claim_types::SUBJECT, user.subject()),
            Claim::new(claim_types::SECURITY_STAMP, user.security_stamp.clone()),
        ]))
    }

    async fn validate_security_stamp(
        &self,
        principal: &Principal,
    ) -> Result<Option<User>, ServiceError> {
        let Some(user_id) = principal
            .find_claim(claim_types::SUBJECT)
            .and_then(|s| s.parse::<i64>().ok())
        else {
            return Ok(None);
        };
        let Some(presented) = principal.find_claim(claim_types::SECURITY_STAMP) else {
            return Ok(None);
        };
        let Some(user) = self.users.find_by_id(user_id).await? else {
            return Ok(None);
        };

        let matches: bool = presented
            .as_bytes()
            .ct_eq(user.security_stamp.as_bytes())
            .into();
        Ok(matches.then_some(user))
    }

    async fn can_sign_in(&self, user: &User) -> Result<bool, ServiceError> {
        if user.is_locked_out(Utc::now()) || !user.is_active() {
            return Ok(false);
        }
        self.tenant_active(user).await
    }

    async fn tenant_active(&self, user: &User) -> Result<bool, ServiceError> {
        match &self.tenants {
            // Unknown tenants count as inactive.
            Some(tenants) => Ok(tenants
                .find_tenant(user.tenant_id)
                .await?
                .is_some_and(|t| t.is_active())),
            None => Ok(true),
        }
    }
}
