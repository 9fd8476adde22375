//! Tenant model - the multi-tenancy partition key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Tenant state codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantState {
    Active,
    Suspended,
}

impl TenantState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantState::Active => "active",
            TenantState::Suspended => "suspended",
        }
    }
}

/// Tenant entity. Users and tokens reference it by id only.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub tenant_id: i64,
    pub tenant_state_code: String,
    pub created_utc: DateTime<Utc>,
}

impl Tenant {
    /// Create a new active tenant.
    pub fn new(tenant_id: i64) -> Self {
        Self {
            tenant_id,
            tenant_state_code: TenantState::Active.as_str().to_string(),
            created_utc: Utc::now(),
        }
    }

    /// Check if tenant is active.
    pub fn is_active(&self) -> bool {
        self.tenant_state_code == TenantState::Active.as_str()
    }

    pub fn suspend(&mut self) {
        self.tenant_state_code = TenantState::Suspended.as_str().to_string();
    }
}
