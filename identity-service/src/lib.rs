pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;

use crate::config::IdentityConfig;
use crate::services::{
    AuthenticationEngine, Database, DirectorySignInPolicy, PasswordCredentialVerifier,
    PersonalAccessTokenService, TenantAwareTokenStore, TokenStoreOptions, TwoFactorService,
};

/// Services wired for one request scope against PostgreSQL.
#[derive(Clone)]
pub struct IdentityServices {
    pub engine: Arc<AuthenticationEngine>,
    pub personal_access_tokens: Arc<PersonalAccessTokenService>,
    pub two_factor: Arc<TwoFactorService>,
    pub tokens: Arc<TenantAwareTokenStore>,
}

impl IdentityServices {
    pub fn new(db: &Database, config: &IdentityConfig) -> Self {
        let session = Arc::new(db.session());
        let tenants = config
            .enforce_tenant_activity
            .then(|| Arc::clone(&session) as Arc<dyn services::TenantDirectory>);

        let credentials = Arc::new(PasswordCredentialVerifier::new(
            session.clone(),
            session.clone(),
            config.lockout.clone(),
            config.two_factor.totp_issuer.clone(),
        ));
        let sign_in = Arc::new(DirectorySignInPolicy::new(session.clone(), tenants));
        let engine = Arc::new(AuthenticationEngine::new(
            session.clone(),
            credentials.clone(),
            sign_in,
            session.clone(),
            config,
        ));

        let tokens = Arc::new(TenantAwareTokenStore::new(
            Arc::new(db.clone()),
            TokenStoreOptions::from(&config.token_store),
        ));
        let personal_access_tokens = Arc::new(PersonalAccessTokenService::new(
            engine.clone(),
            session.clone(),
            tokens.clone(),
            config.token.access_token_lifetime(),
        ));
        let two_factor = Arc::new(TwoFactorService::new(
            session.clone(),
            credentials,
            session,
            config.two_factor.totp_issuer.clone(),
        ));

        Self {
            engine,
            personal_access_tokens,
            two_factor,
            tokens,
        }
    }
}
