//! User model - tenant-scoped identity accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// User entity (tenant-scoped).
///
/// `tenant_id` never changes after creation. `active` is nullable in the
/// directory; anything but `Some(true)` blocks every authentication flow.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: i64,
    pub tenant_id: i64,
    pub user_name: String,
    pub normalized_user_name: String,
    pub language_code: Option<String>,
    pub active: Option<bool>,
    /// Support administrator.
    pub is_administrator: bool,
    pub tenant_administrator: Option<bool>,
    pub password_hash: String,
    pub password_confirmed: bool,
    pub two_factor_enabled: bool,
    pub authenticator_key: Option<String>,
    pub security_stamp: String,
    pub concurrency_stamp: String,
    pub password_token: Option<String>,
    pub password_token_expiry_utc: Option<DateTime<Utc>>,
    pub access_failed_count: i32,
    pub lockout_end_utc: Option<DateTime<Utc>>,
    pub last_access_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl User {
    /// Create a new active user with a confirmed password.
    pub fn new(user_id: i64, tenant_id: i64, user_name: String, password_hash: String) -> Self {
        Self {
            user_id,
            tenant_id,
            normalized_user_name: normalize_user_name(&user_name),
            user_name,
            language_code: None,
            active: Some(true),
            is_administrator: false,
            tenant_administrator: None,
            password_hash,
            password_confirmed: true,
            two_factor_enabled: false,
            authenticator_key: None,
            security_stamp: new_stamp(),
            concurrency_stamp: new_stamp(),
            password_token: None,
            password_token_expiry_utc: None,
            access_failed_count: 0,
            lockout_end_utc: None,
            last_access_utc: None,
            created_utc: Utc::now(),
        }
    }

    /// Check if user is active.
    pub fn is_active(&self) -> bool {
        self.active == Some(true)
    }

    pub fn is_tenant_administrator(&self) -> bool {
        self.tenant_administrator == Some(true)
    }

    /// Check if the account is locked out at `now`.
    pub fn is_locked_out(&self, now: DateTime<Utc>) -> bool {
        self.lockout_end_utc.is_some_and(|end| end > now)
    }

    /// Rotate the security stamp, invalidating outstanding refresh tokens.
    pub fn rotate_security_stamp(&mut self) {
        self.security_stamp = new_stamp();
    }

    /// Subject string used on tokens issued for this user.
    pub fn subject(&self) -> String {
        self.user_id.to_string()
    }
}

/// Directory lookups compare user names case-insensitively through this form.
pub fn normalize_user_name(user_name: &str) -> String {
    user_name.trim().to_uppercase()
}

pub(crate) fn new_stamp() -> String {
    Uuid::new_v4().to_string()
}
