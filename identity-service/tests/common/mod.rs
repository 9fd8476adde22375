//! Test helper module for identity-service integration tests.
//!
//! Everything runs against the in-memory directories and token store.

#![allow(dead_code)]

use std::sync::Arc;

use identity_service::{
    config::IdentityConfig,
    models::{Application, Tenant, User},
    services::{
        AuthenticationEngine, Collation, DirectorySignInPolicy, InMemoryTenantDirectory,
        InMemoryTokenStore, InMemoryUserDirectory, PasswordCredentialVerifier,
        PersonalAccessTokenService, TenantAwareTokenStore, TenantDirectory, TokenStoreOptions,
        TwoFactorService,
    },
    utils::{hash_password, totp, Password},
};

pub const TENANT_ID: i64 = 7;
pub const ALICE_ID: i64 = 12;
pub const ALICE_PASSWORD: &str = "P@ssw0rd1";

pub struct TestContext {
    pub config: IdentityConfig,
    pub users: InMemoryUserDirectory,
    pub tenants: InMemoryTenantDirectory,
    pub token_store: InMemoryTokenStore,
}

impl TestContext {
    /// Tenant 7 (active, with its application) and user `alice`.
    pub fn new() -> Self {
        Self::with_collation(Collation::Ordinal)
    }

    pub fn with_collation(collation: Collation) -> Self {
        let config = IdentityConfig {
            log_level: "error".to_string(),
            ..IdentityConfig::default()
        };
        let context = Self {
            config,
            users: InMemoryUserDirectory::new(),
            tenants: InMemoryTenantDirectory::new(),
            token_store: InMemoryTokenStore::new(collation),
        };

        context.add_tenant(TENANT_ID);
        context.add_user(ALICE_ID, TENANT_ID, "alice", ALICE_PASSWORD);
        context
    }

    pub fn add_tenant(&self, tenant_id: i64) -> Tenant {
        let tenant = Tenant::new(tenant_id);
        self.tenants
            .insert(tenant.clone())
            .expect("Failed to insert tenant");
        self.token_store
            .add_application(Application {
                application_id: tenant_id.to_string(),
                client_id: format!("tenant-{}", tenant_id),
            })
            .expect("Failed to insert application");
        tenant
    }

    pub fn add_user(&self, user_id: i64, tenant_id: i64, user_name: &str, password: &str) -> User {
        let hash = hash_password(&Password::new(password)).expect("Failed to hash password");
        let user = User::new(user_id, tenant_id, user_name.to_string(), hash);
        self.users.insert(user.clone()).expect("Failed to insert user");
        self.stored(user_id)
    }

    /// Apply `change` to a stored user outside any unit of work.
    pub fn modify_user(&self, user_id: i64, change: impl FnOnce(&mut User)) -> User {
        let mut user = self.stored(user_id);
        change(&mut user);
        self.users.insert(user).expect("Failed to store user");
        self.stored(user_id)
    }

    pub fn stored(&self, user_id: i64) -> User {
        self.users
            .stored(user_id)
            .expect("Failed to read user")
            .expect("User not found")
    }

    /// Give the user an authenticator key and turn two-factor on.
    pub fn enable_two_factor(&self, user_id: i64) -> String {
        let key = totp::generate_authenticator_key();
        let stored = key.clone();
        self.modify_user(user_id, move |user| {
            user.authenticator_key = Some(stored);
            user.two_factor_enabled = true;
        });
        key
    }

    pub fn current_code(&self, user_id: i64) -> String {
        let user = self.stored(user_id);
        let key = user.authenticator_key.expect("User has no authenticator key");
        totp::current_code(&key, &self.config.two_factor.totp_issuer, &user.user_name)
            .expect("Failed to compute TOTP code")
    }

    /// Engine for one request, with its own unit of work.
    pub fn engine(&self) -> AuthenticationEngine {
        self.engine_for(&self.users.scope())
    }

    pub fn engine_for(&self, scope: &InMemoryUserDirectory) -> AuthenticationEngine {
        let scope = Arc::new(scope.clone());
        let credentials = Arc::new(PasswordCredentialVerifier::new(
            scope.clone(),
            scope.clone(),
            self.config.lockout.clone(),
            self.config.two_factor.totp_issuer.clone(),
        ));
        let tenants: Arc<dyn TenantDirectory> = Arc::new(self.tenants.clone());
        let sign_in = Arc::new(DirectorySignInPolicy::new(scope.clone(), Some(tenants)));
        AuthenticationEngine::new(scope.clone(), credentials, sign_in, scope, &self.config)
    }

    pub fn two_factor_service(&self) -> TwoFactorService {
        let scope = Arc::new(self.users.scope());
        let credentials = Arc::new(PasswordCredentialVerifier::new(
            scope.clone(),
            scope.clone(),
            self.config.lockout.clone(),
            self.config.two_factor.totp_issuer.clone(),
        ));
        TwoFactorService::new(
            scope.clone(),
            credentials,
            scope,
            self.config.two_factor.totp_issuer.clone(),
        )
    }

    pub fn token_store(&self, options: TokenStoreOptions) -> Arc<TenantAwareTokenStore> {
        Arc::new(TenantAwareTokenStore::new(
            Arc::new(self.token_store.clone()),
            options,
        ))
    }

    pub fn pat_service(&self) -> PersonalAccessTokenService {
        let scope = self.users.scope();
        PersonalAccessTokenService::new(
            Arc::new(self.engine_for(&scope)),
            Arc::new(scope),
            self.token_store(TokenStoreOptions::from(&self.config.token_store)),
            self.config.token.access_token_lifetime(),
        )
    }
}
