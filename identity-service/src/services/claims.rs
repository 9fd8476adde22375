//! Claims and ticket properties derived from a user record. Pure, no I/O.

use crate::models::ticket::{claim_types, scopes};
use crate::models::{Claim, TicketProperties, User};

#[derive(Debug, Clone)]
pub struct ClaimsBuilder {
    refresh_lifetime_seconds: i64,
}

impl ClaimsBuilder {
    pub fn new(refresh_lifetime_seconds: i64) -> Self {
        Self {
            refresh_lifetime_seconds,
        }
    }

    /// Identity claims for `user`, in a fixed order.
    ///
    /// Administrator claims are only ever emitted as `"true"` and only when
    /// the roles scope was requested; absence means false.
    pub fn build_claims<S: AsRef<str>>(&self, user: &User, requested_scopes: &[S]) -> Vec<Claim> {
        let mut claims = vec![
            Claim::new(claim_types::USER_ID, user.user_id.to_string()),
            Claim::new(claim_types::NAME, user.user_name.clone()),
            Claim::new(claim_types::TENANT_ID, user.tenant_id.to_string()),
        ];

        if let Some(language_code) = user.language_code.as_deref().and_then(normalize_language_code) {
            claims.push(Claim::new(claim_types::LANGUAGE_CODE, language_code));
        }

        if requested_scopes.iter().any(|s| s.as_ref() == scopes::ROLES) {
            if user.is_administrator {
                claims.push(Claim::new(claim_types::IS_ADMINISTRATOR, "true"));
            }
            if user.is_tenant_administrator() {
                claims.push(Claim::new(claim_types::IS_TENANT_ADMINISTRATOR, "true"));
            }
        }

        claims
    }

    /// Non-identity properties carried beside the principal. The language
    /// code is taken from the claims so both always agree.
    pub fn build_properties(&self, user: &User, claims: &[Claim]) -> TicketProperties {
        TicketProperties {
            refresh_lifetime_seconds: self.refresh_lifetime_seconds,
            user_id: user.user_id.to_string(),
            tenant_id: user.tenant_id,
            is_support_admin: user.is_administrator,
            is_tenant_admin: user.is_tenant_administrator(),
            language_code: claims
                .iter()
                .find(|c| c.claim_type == claim_types::LANGUAGE_CODE)
                .map(|c| c.value.clone()),
        }
    }
}

/// `EN_gb ` -> `en-gb`. Blank codes are dropped.
fn normalize_language_code(code: &str) -> Option<String> {
    let code = code.trim();
    if code.is_empty() {
        return None;
    }
    Some(code.to_lowercase().replace('_', "-"))
}
