use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::models::user::new_stamp;
use crate::models::{Application, Token};
use crate::services::token_store::{BaseTokenStore, TokenStream};
use crate::services::ServiceError;

/// String comparison used by the backing store, as a SQL collation would.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Collation {
    #[default]
    Ordinal,
    CaseInsensitive,
}

impl Collation {
    fn matches(&self, stored: Option<&str>, wanted: &str) -> bool {
        match (self, stored) {
            (_, None) => false,
            (Collation::Ordinal, Some(stored)) => stored == wanted,
            (Collation::CaseInsensitive, Some(stored)) => stored.eq_ignore_ascii_case(wanted),
        }
    }
}

/// In-memory token and application tables.
#[derive(Clone, Default)]
pub struct InMemoryTokenStore {
    tokens: Arc<RwLock<HashMap<String, Token>>>,
    applications: Arc<RwLock<HashMap<String, Application>>>,
    collation: Collation,
}

impl InMemoryTokenStore {
    pub fn new(collation: Collation) -> Self {
        Self {
            collation,
            ..Self::default()
        }
    }

    pub fn add_application(&self, application: Application) -> Result<(), ServiceError> {
        self.applications
            .write()
            .map_err(|e| anyhow::anyhow!("Application table lock poisoned: {}", e))?
            .insert(application.application_id.clone(), application);
        Ok(())
    }

    /// Store a token as-is, replacing any row with the same id.
    pub fn insert(&self, token: Token) -> Result<(), ServiceError> {
        self.tokens
            .write()
            .map_err(|e| anyhow::anyhow!("Token table lock poisoned: {}", e))?
            .insert(token.token_id.clone(), token);
        Ok(())
    }

    pub fn get(&self, token_id: &str) -> Result<Option<Token>, ServiceError> {
        Ok(self
            .tokens
            .read()
            .map_err(|e| anyhow::anyhow!("Token table lock poisoned: {}", e))?
            .get(token_id)
            .cloned())
    }

    fn select<F>(&self, predicate: F) -> Result<Vec<Token>, ServiceError>
    where
        F: Fn(&Token) -> bool,
    {
        let tokens = self
            .tokens
            .read()
            .map_err(|e| anyhow::anyhow!("Token table lock poisoned: {}", e))?;
        let mut found: Vec<Token> = tokens.values().filter(|t| predicate(t)).cloned().collect();
        found.sort_by(|a, b| a.token_id.cmp(&b.token_id));
        Ok(found)
    }

    fn application_key(&self, application_id: Option<&str>) -> Result<Option<String>, ServiceError> {
        let Some(application_id) = application_id else {
            return Ok(None);
        };
        Ok(self
            .applications
            .read()
            .map_err(|e| anyhow::anyhow!("Application table lock poisoned: {}", e))?
            .get(application_id)
            .map(|a| a.application_id.clone()))
    }
}

fn into_stream<'a>(result: Result<Vec<Token>, ServiceError>) -> TokenStream<'a> {
    match result {
        Ok(tokens) => stream::iter(tokens.into_iter().map(Ok::<Token, ServiceError>)).boxed(),
        Err(e) => stream::once(async move { Err(e) }).boxed(),
    }
}

#[async_trait]
impl BaseTokenStore for InMemoryTokenStore {
    async fn find_by_id(&self, token_id: &str) -> Result<Option<Token>, ServiceError> {
        self.get(token_id)
    }

    fn find_by_subject<'a>(&'a self, subject: &'a str) -> TokenStream<'a> {
        let collation = self.collation;
        into_stream(self.select(|t| collation.matches(t.subject.as_deref(), subject)))
    }

    fn find_by_user_and_tenant<'a>(
        &'a self,
        user_id: &'a str,
        tenant_id: &'a str,
        status: &'a str,
        token_type: &'a str,
    ) -> TokenStream<'a> {
        let collation = self.collation;
        let candidates = self.select(|t| {
            collation.matches(t.subject.as_deref(), user_id)
                && collation.matches(t.status.as_deref(), status)
                && collation.matches(t.token_type.as_deref(), token_type)
                && collation.matches(t.tenant_id.as_deref(), tenant_id)
        });

        // Join on the application table; its key must be the tenant key.
        let joined = candidates.and_then(|tokens| {
            let mut matched = Vec::with_capacity(tokens.len());
            for token in tokens {
                if let Some(key) = self.application_key(token.application_id.as_deref())? {
                    if key == tenant_id {
                        matched.push(token);
                    }
                }
            }
            Ok(matched)
        });
        into_stream(joined)
    }

    async fn create(&self, token: &Token) -> Result<(), ServiceError> {
        let mut tokens = self
            .tokens
            .write()
            .map_err(|e| anyhow::anyhow!("Token table lock poisoned: {}", e))?;
        if tokens.contains_key(&token.token_id) {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "Token {} already exists",
                token.token_id
            )));
        }
        tokens.insert(token.token_id.clone(), token.clone());
        Ok(())
    }

    async fn update(&self, token: &mut Token) -> Result<(), ServiceError> {
        let mut tokens = self
            .tokens
            .write()
            .map_err(|e| anyhow::anyhow!("Token table lock poisoned: {}", e))?;
        let stored = tokens
            .get(&token.token_id)
            .ok_or(ServiceError::ConcurrencyFailure)?;
        if stored.concurrency_stamp != token.concurrency_stamp {
            return Err(ServiceError::ConcurrencyFailure);
        }
        token.concurrency_stamp = new_stamp();
        tokens.insert(token.token_id.clone(), token.clone());
        Ok(())
    }
}
