use std::sync::Arc;

use crate::config::TokenConfig;
use crate::models::ticket::{claim_types, AUTHENTICATION_SCHEME};
use crate::models::{Claim, Destination, PersonalAccessTokenMinimum, Ticket, User};
use crate::services::claims::ClaimsBuilder;
use crate::services::sign_in::SignInPolicy;
use crate::services::ServiceError;

/// Access token lifetime requested for a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketLifetime {
    Default,
    Extended,
    /// Personal access tokens; effectively never expire.
    NonExpiring,
}

/// Assembles tickets from a user, the requested scopes and an optional PAT
/// payload.
pub struct TicketFactory {
    claims: ClaimsBuilder,
    sign_in: Arc<dyn SignInPolicy>,
    tokens: TokenConfig,
}

impl TicketFactory {
    pub fn new(sign_in: Arc<dyn SignInPolicy>, tokens: TokenConfig) -> Self {
        Self {
            claims: ClaimsBuilder::new(tokens.refresh_token_lifetime_secs),
            sign_in,
            tokens,
        }
    }

    pub async fn create_ticket(
        &self,
        user: &User,
        scopes: &[&str],
        lifetime: TicketLifetime,
        pat: Option<&PersonalAccessTokenMinimum>,
    ) -> Result<Ticket, ServiceError> {
        let mut principal = self.sign_in.create_principal(user).await?;
        principal.set_scopes(scopes.iter().copied());

        match lifetime {
            TicketLifetime::Default => {}
            TicketLifetime::Extended => {
                principal.set_access_token_lifetime(self.tokens.extended_access_token_lifetime())
            }
            TicketLifetime::NonExpiring => {
                principal.set_access_token_lifetime(self.tokens.personal_access_token_lifetime())
            }
        }

        let mut claims = self.claims.build_claims(user, scopes);
        if let Some(pat) = pat {
            claims.push(Claim::new(claim_types::PAT, pat.to_claim_value()?));
            // A PAT is only good for the public API.
            principal.set_resources([self.tokens.public_api_resource.as_str()]);
        }

        let properties = self.claims.build_properties(user, &claims);
        principal.add_claims(claims);

        for claim in principal.claims_mut() {
            if claim.claim_type == claim_types::SECURITY_STAMP {
                continue;
            }
            claim.set_destinations(&[Destination::AccessToken]);
        }

        Ok(Ticket {
            principal,
            properties,
            authentication_scheme: AUTHENTICATION_SCHEME.to_string(),
        })
    }
}
