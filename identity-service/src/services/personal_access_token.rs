use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;

use crate::models::{
    AuthenticationError, AuthenticationResult, PersonalAccessToken, PersonalAccessTokenMinimum,
    Token, TokenDescriptor,
};
use crate::services::authenticate::AuthenticationEngine;
use crate::services::directory::UserDirectory;
use crate::services::token_store::TenantAwareTokenStore;
use crate::services::ServiceError;

/// Issues, lists and revokes personal access tokens.
pub struct PersonalAccessTokenService {
    engine: Arc<AuthenticationEngine>,
    users: Arc<dyn UserDirectory>,
    tokens: Arc<TenantAwareTokenStore>,
    default_lifetime: Duration,
}

impl PersonalAccessTokenService {
    pub fn new(
        engine: Arc<AuthenticationEngine>,
        users: Arc<dyn UserDirectory>,
        tokens: Arc<TenantAwareTokenStore>,
        default_lifetime: Duration,
    ) -> Self {
        Self {
            engine,
            users,
            tokens,
            default_lifetime,
        }
    }

    /// Run the PAT grant and persist the resulting access token against the
    /// user's tenant application. The inner `Err` is the rejected grant.
    pub async fn issue_token(
        &self,
        username: &str,
        password: &str,
        metadata: &PersonalAccessTokenMinimum,
    ) -> Result<Result<Token, AuthenticationError>, ServiceError> {
        let ticket = match self
            .engine
            .personal_access_token_flow(username, password, metadata)
            .await?
        {
            AuthenticationResult::Success(ticket) => ticket,
            AuthenticationResult::Error(err) => return Ok(Err(err)),
            AuthenticationResult::Challenge(_) => {
                return Err(ServiceError::Internal(anyhow::anyhow!(
                    "Personal access token grant produced a two-factor challenge"
                )))
            }
        };

        let descriptor = TokenDescriptor::access_token(
            &ticket,
            ticket.properties.tenant_id.to_string(),
            self.default_lifetime,
            Utc::now(),
        )?;
        let token = self.tokens.create(&descriptor).await?;

        tracing::info!(
            token_id = %token.token_id,
            tenant_id = ticket.properties.tenant_id,
            user_id = %ticket.properties.user_id,
            "Personal access token issued"
        );
        Ok(Ok(token))
    }

    /// PATs of every user in `tenant_id`.
    pub async fn get_tokens(
        &self,
        tenant_id: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<PersonalAccessToken>, ServiceError> {
        let users = self.users.find_by_tenant(tenant_id).await?;

        let mut found = Vec::new();
        for user in users {
            if cancel.is_cancelled() {
                tracing::debug!(tenant_id, "PAT listing cancelled");
                return Err(ServiceError::Cancelled);
            }
            found.extend(self.get_user_tokens(tenant_id, user.user_id, cancel).await?);
        }
        Ok(found)
    }

    pub async fn get_user_tokens(
        &self,
        tenant_id: i64,
        user_id: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<PersonalAccessToken>, ServiceError> {
        let user_key = user_id.to_string();
        let tenant_key = tenant_id.to_string();
        let tokens: Vec<Token> = self
            .tokens
            .find_personal_access_tokens(&user_key, &tenant_key, cancel)?
            .try_collect()
            .await?;

        Ok(tokens
            .iter()
            .filter_map(|token| try_decode_pat(token, tenant_id, user_id))
            .collect())
    }

    /// Revoke by token id. `false` when the token does not exist or was
    /// modified concurrently.
    pub async fn revoke_token(
        &self,
        token_id: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, ServiceError> {
        let Some(mut token) = self.tokens.find_by_id(token_id, cancel).await? else {
            tracing::warn!(token_id, "Revocation requested for unknown token");
            return Ok(false);
        };
        self.tokens.try_revoke(&mut token, cancel).await
    }
}

/// PAT view of `token`, or `None` when its property bag holds no readable
/// PAT entry.
pub fn try_decode_pat(token: &Token, tenant_id: i64, user_id: i64) -> Option<PersonalAccessToken> {
    let properties = token.properties.as_deref()?;
    match PersonalAccessTokenMinimum::from_properties(properties) {
        Ok(pat) => Some(PersonalAccessToken {
            name: pat.name,
            description: pat.description,
            tenant_id,
            user_id,
            token_id: token.token_id.clone(),
            token_expiry: token.expiration_utc,
        }),
        Err(err) => {
            tracing::error!(
                token_id = %token.token_id,
                error = %err,
                "Skipping token with unreadable PAT properties"
            );
            None
        }
    }
}
