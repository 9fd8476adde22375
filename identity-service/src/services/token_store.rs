//! Tenant-aware token persistence.
//!
//! `BaseTokenStore` is the raw backing store (SQL, memory). It may compare
//! strings with a case-insensitive collation. `TenantAwareTokenStore` wraps
//! it with argument validation, an optional cache and a second, ordinal
//! subject check so callers only ever see exact subject matches.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::TokenStoreConfig;
use crate::models::personal_access_token::PAT_PROPERTY;
use crate::models::ticket::claim_types;
use crate::models::{Token, TokenDescriptor, TokenStatus, TokenType};
use crate::services::error::require;
use crate::services::ServiceError;

/// Lazy, finite sequence of tokens. Calling the producing method again
/// starts a fresh query.
pub type TokenStream<'a> = BoxStream<'a, Result<Token, ServiceError>>;

#[async_trait]
pub trait BaseTokenStore: Send + Sync {
    async fn find_by_id(&self, token_id: &str) -> Result<Option<Token>, ServiceError>;

    fn find_by_subject<'a>(&'a self, subject: &'a str) -> TokenStream<'a>;

    /// Tokens of `user_id` in `tenant_id` with the given status and type,
    /// joined to their application, whose key must equal the tenant key.
    fn find_by_user_and_tenant<'a>(
        &'a self,
        user_id: &'a str,
        tenant_id: &'a str,
        status: &'a str,
        token_type: &'a str,
    ) -> TokenStream<'a>;

    async fn create(&self, token: &Token) -> Result<(), ServiceError>;

    /// Persist `token` if its concurrency stamp still matches the stored row,
    /// then give it a fresh stamp. A mismatch is `ConcurrencyFailure`.
    async fn update(&self, token: &mut Token) -> Result<(), ServiceError>;
}

/// Memoised user/tenant/status/type lookups.
#[async_trait]
pub trait TokenCache: Send + Sync {
    async fn find_by_user_and_tenant(
        &self,
        store: &dyn BaseTokenStore,
        user_id: &str,
        tenant_id: &str,
        status: &str,
        token_type: &str,
    ) -> Result<Vec<Token>, ServiceError>;

    /// Drop every cached result that may contain `token`.
    fn invalidate(&self, token: &Token);
}

type CacheKey = (String, String, String, String);

const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Memoised lookups. Entries are dropped when a matching token is written;
/// once `capacity` keys are held the whole cache is cleared before the next
/// insert.
pub struct MemoryTokenCache {
    entries: DashMap<CacheKey, Vec<Token>>,
    capacity: usize,
}

impl Default for MemoryTokenCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl MemoryTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl TokenCache for MemoryTokenCache {
    async fn find_by_user_and_tenant(
        &self,
        store: &dyn BaseTokenStore,
        user_id: &str,
        tenant_id: &str,
        status: &str,
        token_type: &str,
    ) -> Result<Vec<Token>, ServiceError> {
        let key = (
            user_id.to_string(),
            tenant_id.to_string(),
            status.to_string(),
            token_type.to_string(),
        );
        if let Some(hit) = self.entries.get(&key) {
            return Ok(hit.value().clone());
        }

        let tokens: Vec<Token> = store
            .find_by_user_and_tenant(user_id, tenant_id, status, token_type)
            .try_collect()
            .await?;
        if self.entries.len() >= self.capacity {
            tracing::debug!(capacity = self.capacity, "Token cache full, clearing");
            self.entries.clear();
        }
        self.entries.insert(key, tokens.clone());
        Ok(tokens)
    }

    fn invalidate(&self, token: &Token) {
        let subject = token.subject.as_deref().unwrap_or_default();
        self.entries.retain(|(user_id, _, _, _), tokens| {
            !user_id.eq_ignore_ascii_case(subject)
                && !tokens.iter().any(|t| t.token_id == token.token_id)
        });
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenStoreOptions {
    /// Return raw store results without the ordinal subject pass.
    pub disable_additional_filtering: bool,
    /// Query the primary store instead of the cache.
    pub disable_entity_caching: bool,
}

impl From<&TokenStoreConfig> for TokenStoreOptions {
    fn from(config: &TokenStoreConfig) -> Self {
        Self {
            disable_additional_filtering: config.disable_additional_filtering,
            disable_entity_caching: config.disable_entity_caching,
        }
    }
}

pub struct TenantAwareTokenStore {
    store: Arc<dyn BaseTokenStore>,
    cache: Arc<dyn TokenCache>,
    options: TokenStoreOptions,
}

impl TenantAwareTokenStore {
    pub fn new(store: Arc<dyn BaseTokenStore>, options: TokenStoreOptions) -> Self {
        Self::with_cache(store, Arc::new(MemoryTokenCache::new()), options)
    }

    pub fn with_cache(
        store: Arc<dyn BaseTokenStore>,
        cache: Arc<dyn TokenCache>,
        options: TokenStoreOptions,
    ) -> Self {
        Self {
            store,
            cache,
            options,
        }
    }

    pub fn options(&self) -> TokenStoreOptions {
        self.options
    }

    pub async fn find_by_id(
        &self,
        token_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Token>, ServiceError> {
        require(token_id, "token_id")?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ServiceError::Cancelled),
            token = self.store.find_by_id(token_id) => token,
        }
    }

    /// Tokens whose subject is exactly `subject`.
    pub fn find_by_subject<'a>(
        &'a self,
        subject: &'a str,
        cancel: &CancellationToken,
    ) -> Result<TokenStream<'a>, ServiceError> {
        require(subject, "subject")?;
        let tokens = self.store.find_by_subject(subject);
        Ok(cancellable(self.filter_subject(tokens, subject), cancel.clone()))
    }

    /// Tokens of a user within a tenant. All four arguments are required
    /// and are checked before any I/O.
    pub fn find_by_user_and_tenant<'a>(
        &'a self,
        user_id: &'a str,
        tenant_id: &'a str,
        status: &'a str,
        token_type: &'a str,
        cancel: &CancellationToken,
    ) -> Result<TokenStream<'a>, ServiceError> {
        require(user_id, "user_id")?;
        require(tenant_id, "tenant_id")?;
        require(status, "status")?;
        require(token_type, "token_type")?;

        let tokens = if self.options.disable_entity_caching {
            self.store
                .find_by_user_and_tenant(user_id, tenant_id, status, token_type)
        } else {
            let cache = Arc::clone(&self.cache);
            let store = Arc::clone(&self.store);
            stream::once(async move {
                cache
                    .find_by_user_and_tenant(store.as_ref(), user_id, tenant_id, status, token_type)
                    .await
            })
            .map_ok(|tokens| stream::iter(tokens.into_iter().map(Ok::<Token, ServiceError>)))
            .try_flatten()
            .boxed()
        };

        Ok(cancellable(self.filter_subject(tokens, user_id), cancel.clone()))
    }

    /// Valid access tokens of a user within a tenant.
    pub fn find_personal_access_tokens<'a>(
        &'a self,
        user_id: &'a str,
        tenant_id: &'a str,
        cancel: &CancellationToken,
    ) -> Result<TokenStream<'a>, ServiceError> {
        require(user_id, "user_id")?;
        require(tenant_id, "tenant_id")?;
        self.find_by_user_and_tenant(
            user_id,
            tenant_id,
            TokenStatus::Valid.as_str(),
            TokenType::AccessToken.as_str(),
            cancel,
        )
    }

    fn filter_subject<'a>(&self, tokens: TokenStream<'a>, subject: &'a str) -> TokenStream<'a> {
        if self.options.disable_additional_filtering {
            return tokens;
        }
        // Backing stores may collate case-insensitively; re-check ordinally.
        tokens
            .try_filter(move |token| futures::future::ready(token.subject.as_deref() == Some(subject)))
            .boxed()
    }

    /// Copy `descriptor` onto `token`, taking the tenant from the principal's
    /// tenant claim and embedding any PAT claim under the `PAT` property.
    pub fn populate(token: &mut Token, descriptor: &TokenDescriptor) -> Result<(), ServiceError> {
        token.application_id = descriptor.application_id.clone();
        token.authorization_id = descriptor.authorization_id.clone();
        token.creation_utc = descriptor.creation_utc;
        token.expiration_utc = descriptor.expiration_utc;
        token.payload = descriptor.payload.clone();

        let principal = &descriptor.principal;
        Self::set_tenant_id(token, principal.find_claim(claim_types::TENANT_ID));

        if let Some(pat) = principal.find_claim(claim_types::PAT) {
            let value: Value = serde_json::from_str(pat)?;
            let mut properties = Self::properties(token);
            properties.insert(PAT_PROPERTY.to_string(), value);
            Self::set_properties(token, &properties)?;
        }

        token.redemption_utc = descriptor.redemption_utc;
        token.reference_id = descriptor.reference_id.clone();
        token.status = descriptor.status.clone();
        token.subject = descriptor.subject.clone();
        token.token_type = descriptor.token_type.clone();
        Ok(())
    }

    pub fn set_tenant_id(token: &mut Token, tenant_id: Option<&str>) {
        token.tenant_id = tenant_id.map(str::to_string);
    }

    /// Property bag of `token` as a JSON object. Anything that is not an
    /// object reads as empty.
    pub fn properties(token: &Token) -> Map<String, Value> {
        token
            .properties
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .and_then(|value| match value {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub fn set_properties(
        token: &mut Token,
        properties: &Map<String, Value>,
    ) -> Result<(), ServiceError> {
        token.properties = if properties.is_empty() {
            None
        } else {
            Some(serde_json::to_string(properties)?)
        };
        Ok(())
    }

    /// Build, populate and persist a token from `descriptor`.
    pub async fn create(&self, descriptor: &TokenDescriptor) -> Result<Token, ServiceError> {
        let mut token = Token::new();
        Self::populate(&mut token, descriptor)?;
        self.store.create(&token).await?;
        self.cache.invalidate(&token);

        tracing::debug!(
            token_id = %token.token_id,
            tenant_id = ?token.tenant_id,
            token_type = ?token.token_type,
            "Token created"
        );
        Ok(token)
    }

    /// Mark `token` revoked. A concurrent modification makes this return
    /// `false` rather than an error.
    pub async fn try_revoke(
        &self,
        token: &mut Token,
        cancel: &CancellationToken,
    ) -> Result<bool, ServiceError> {
        if cancel.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }

        let previous = token.status.replace(TokenStatus::Revoked.as_str().to_string());
        match self.store.update(token).await {
            Ok(()) => {
                self.cache.invalidate(token);
                tracing::info!(token_id = %token.token_id, "Token revoked");
                Ok(true)
            }
            Err(ServiceError::ConcurrencyFailure) => {
                token.status = previous;
                self.cache.invalidate(token);
                tracing::warn!(
                    token_id = %token.token_id,
                    "Token was modified concurrently, revocation skipped"
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

/// End `inner` with `Err(Cancelled)` as soon as `cancel` fires, checked
/// before every item.
pub(crate) fn cancellable<'a>(inner: TokenStream<'a>, cancel: CancellationToken) -> TokenStream<'a> {
    stream::unfold(Some((inner, cancel)), |state| async move {
        let Some((mut inner, cancel)) = state else {
            return None;
        };
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            next = inner.next() => Some(next),
        };
        match next {
            None => Some((Err(ServiceError::Cancelled), None)),
            Some(None) => None,
            Some(Some(item)) => Some((item, Some((inner, cancel)))),
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Claim, PersonalAccessTokenMinimum, Principal};

    fn descriptor_with(claims: Vec<Claim>) -> TokenDescriptor {
        TokenDescriptor {
            application_id: Some("7".to_string()),
            principal: Principal::with_claims(claims),
            status: Some("valid".to_string()),
            subject: Some("12".to_string()),
            token_type: Some("access_token".to_string()),
            ..TokenDescriptor::default()
        }
    }

    #[test]
    fn test_populate_copies_tenant_and_pat() {
        let pat = PersonalAccessTokenMinimum::new("CI", "build bot");
        let descriptor = descriptor_with(vec![
            Claim::new(claim_types::TENANT_ID, "7"),
            Claim::new(claim_types::PAT, pat.to_claim_value().unwrap()),
        ]);

        let mut token = Token::new();
        TenantAwareTokenStore::populate(&mut token, &descriptor).unwrap();

        assert_eq!(token.tenant_id.as_deref(), Some("7"));
        assert_eq!(token.subject.as_deref(), Some("12"));
        assert_eq!(token.application_id.as_deref(), Some("7"));
        let decoded =
            PersonalAccessTokenMinimum::from_properties(token.properties.as_deref().unwrap())
                .unwrap();
        assert_eq!(decoded, pat);
    }

    #[test]
    fn test_populate_overwrites_pat_but_keeps_other_properties() {
        let mut token = Token::new();
        token.properties = Some(r#"{"PAT":{"Name":"old"},"keep":1}"#.to_string());

        let descriptor = descriptor_with(vec![Claim::new(
            claim_types::PAT,
            r#"{"Name":"new","Description":""}"#,
        )]);
        TenantAwareTokenStore::populate(&mut token, &descriptor).unwrap();

        let properties = TenantAwareTokenStore::properties(&token);
        assert_eq!(properties["PAT"]["Name"], "new");
        assert_eq!(properties["keep"], 1);
    }

    #[tokio::test]
    async fn test_cache_never_exceeds_capacity() {
        let store = crate::services::InMemoryTokenStore::new(crate::services::Collation::Ordinal);
        let cache = MemoryTokenCache::with_capacity(3);

        for user in 0..10 {
            cache
                .find_by_user_and_tenant(&store, &user.to_string(), "7", "valid", "access_token")
                .await
                .unwrap();
            assert!(cache.len() <= 3);
        }
        assert!(!cache.is_empty());
    }

    #[test]
    fn test_populate_without_pat_leaves_properties_alone() {
        let mut token = Token::new();
        let descriptor = descriptor_with(vec![]);
        TenantAwareTokenStore::populate(&mut token, &descriptor).unwrap();
        assert!(token.properties.is_none());
        assert!(token.tenant_id.is_none());
    }

    #[test]
    fn test_malformed_pat_claim_fails_populate() {
        let mut token = Token::new();
        let descriptor = descriptor_with(vec![Claim::new(claim_types::PAT, "{not json")]);
        assert!(matches!(
            TenantAwareTokenStore::populate(&mut token, &descriptor),
            Err(ServiceError::Serialization(_))
        ));
    }

    #[test]
    fn test_set_tenant_id() {
        let mut token = Token::new();
        TenantAwareTokenStore::set_tenant_id(&mut token, Some("7"));
        assert_eq!(token.tenant_id.as_deref(), Some("7"));
        TenantAwareTokenStore::set_tenant_id(&mut token, None);
        assert!(token.tenant_id.is_none());
    }

    #[tokio::test]
    async fn test_cancellable_stops_with_cancelled() {
        let cancel = CancellationToken::new();
        let tokens: TokenStream<'static> =
            stream::iter(vec![Ok(Token::new()), Ok(Token::new())]).boxed();
        let mut stream = cancellable(tokens, cancel.clone());

        assert!(stream.next().await.unwrap().is_ok());
        cancel.cancel();
        assert!(matches!(
            stream.next().await,
            Some(Err(ServiceError::Cancelled))
        ));
        assert!(stream.next().await.is_none());
    }
}
