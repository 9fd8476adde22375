//! Grant flows: each one turns a request into exactly one of a ticket, a
//! two-factor challenge or an error.
//!
//! Guard failures are returned as `AuthenticationResult::Error`. Only
//! missing arguments (checked before any I/O) and infrastructure failures
//! surface as `Err`. A flow writes at most once, on its success path, and a
//! concurrent modification detected by that write becomes
//! `AuthErrorCode::ConcurrencyFailure`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::config::IdentityConfig;
use crate::models::ticket::scopes;
use crate::models::{
    AuthErrorCode, AuthenticationResult, PersonalAccessTokenMinimum, Principal, TokenRequest,
    TwoFactorChallenge, User,
};
use crate::services::credentials::CredentialVerifier;
use crate::services::directory::{UnitOfWork, UserDirectory};
use crate::services::error::require;
use crate::services::password_token::PasswordTokenIssuer;
use crate::services::sign_in::SignInPolicy;
use crate::services::ticket_factory::{TicketFactory, TicketLifetime};
use crate::services::ServiceError;

const FULL_SCOPES: [&str; 2] = [scopes::OFFLINE_ACCESS, scopes::ROLES];
const REFRESH_SCOPES: [&str; 1] = [scopes::ROLES];

pub struct AuthenticationEngine {
    users: Arc<dyn UserDirectory>,
    credentials: Arc<dyn CredentialVerifier>,
    sign_in: Arc<dyn SignInPolicy>,
    unit_of_work: Arc<dyn UnitOfWork>,
    tickets: TicketFactory,
    password_tokens: PasswordTokenIssuer,
    two_factor_type: String,
    enforce_tenant_activity: bool,
}

impl AuthenticationEngine {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        credentials: Arc<dyn CredentialVerifier>,
        sign_in: Arc<dyn SignInPolicy>,
        unit_of_work: Arc<dyn UnitOfWork>,
        config: &IdentityConfig,
    ) -> Self {
        Self {
            users,
            credentials,
            tickets: TicketFactory::new(Arc::clone(&sign_in), config.token.clone()),
            sign_in,
            unit_of_work,
            password_tokens: PasswordTokenIssuer::new(
                config.two_factor.password_token_bytes,
                chrono::Duration::seconds(config.two_factor.password_token_lifetime_secs),
            ),
            two_factor_type: config.two_factor.two_factor_type.clone(),
            enforce_tenant_activity: config.enforce_tenant_activity,
        }
    }

    /// Route a token request to its flow.
    pub async fn exchange(&self, request: TokenRequest) -> Result<AuthenticationResult, ServiceError> {
        let result = match request {
            TokenRequest::Password {
                username,
                password,
                extend_duration,
            } => self.password_flow(&username, &password, extend_duration).await,
            TokenRequest::RefreshToken { principal } => self.refresh_token_flow(&principal).await,
            TokenRequest::TwoFactor {
                username,
                password_token,
                code,
            } => self.two_factor_flow(&username, &password_token, &code).await,
            TokenRequest::PersonalAccessToken {
                username,
                password,
                metadata,
            } => {
                self.personal_access_token_flow(&username, &password, &metadata)
                    .await
            }
        };

        // At the endpoint a missing parameter is a malformed request.
        match result {
            Err(ServiceError::ArgumentInvalid(name)) => {
                tracing::warn!(parameter = name, "Token request is missing a parameter");
                Ok(AuthenticationResult::error(AuthErrorCode::ArgumentInvalid))
            }
            other => other,
        }
    }

    /// `exchange` over raw form parameters.
    pub async fn exchange_parameters(
        &self,
        parameters: &HashMap<String, String>,
        refresh_principal: Option<Principal>,
    ) -> Result<AuthenticationResult, ServiceError> {
        match TokenRequest::from_parameters(parameters, refresh_principal) {
            Ok(request) => self.exchange(request).await,
            Err(err) => {
                let code = AuthErrorCode::from(&err);
                tracing::warn!(error = ?err, code = %code, "Rejected token request");
                Ok(AuthenticationResult::error(code))
            }
        }
    }

    pub async fn password_flow(
        &self,
        username: &str,
        password: &str,
        extend_duration: bool,
    ) -> Result<AuthenticationResult, ServiceError> {
        require(username, "username")?;
        require(password, "password")?;
        concurrency_as_error(self.run_password_flow(username, password, extend_duration).await)
    }

    pub async fn refresh_token_flow(
        &self,
        principal: &Principal,
    ) -> Result<AuthenticationResult, ServiceError> {
        concurrency_as_error(self.run_refresh_token_flow(principal).await)
    }

    pub async fn two_factor_flow(
        &self,
        username: &str,
        password_token: &str,
        code: &str,
    ) -> Result<AuthenticationResult, ServiceError> {
        require(username, "username")?;
        require(password_token, "password_token")?;
        require(code, "code")?;
        concurrency_as_error(self.run_two_factor_flow(username, password_token, code).await)
    }

    /// Password-only issuance of a non-expiring token for the public API.
    /// Two-factor settings are not consulted.
    pub async fn personal_access_token_flow(
        &self,
        username: &str,
        password: &str,
        metadata: &PersonalAccessTokenMinimum,
    ) -> Result<AuthenticationResult, ServiceError> {
        require(username, "username")?;
        require(password, "password")?;
        concurrency_as_error(
            self.run_personal_access_token_flow(username, password, metadata)
                .await,
        )
    }

    async fn run_password_flow(
        &self,
        username: &str,
        password: &str,
        extend_duration: bool,
    ) -> Result<AuthenticationResult, ServiceError> {
        let mut user = match self.check_password_guards(username, password, "password").await? {
            Ok(user) => user,
            Err(rejected) => return Ok(rejected),
        };

        if self.credentials.two_factor_enabled(&user).await? {
            let password_token = self.password_tokens.issue(&mut user, Utc::now())?;
            self.users.update(&mut user).await?;
            self.unit_of_work.save_changes().await?;

            tracing::info!(
                user_id = user.user_id,
                tenant_id = user.tenant_id,
                "Password accepted, two-factor code required"
            );
            return Ok(AuthenticationResult::Challenge(TwoFactorChallenge {
                password_token,
                two_factor_type: self.two_factor_type.clone(),
            }));
        }

        let lifetime = if extend_duration {
            TicketLifetime::Extended
        } else {
            TicketLifetime::Default
        };
        let ticket = self
            .tickets
            .create_ticket(&user, &FULL_SCOPES, lifetime, None)
            .await?;
        self.record_access(&mut user).await?;

        tracing::info!(
            user_id = user.user_id,
            tenant_id = user.tenant_id,
            extended = extend_duration,
            "Password grant issued ticket"
        );
        Ok(AuthenticationResult::Success(ticket))
    }

    async fn run_refresh_token_flow(
        &self,
        principal: &Principal,
    ) -> Result<AuthenticationResult, ServiceError> {
        let Some(user) = self.sign_in.validate_security_stamp(principal).await? else {
            return Ok(reject("refresh_token", None, AuthErrorCode::InvalidRefreshToken));
        };
        if !user.is_active() {
            return Ok(reject("refresh_token", Some(&user), AuthErrorCode::UserNotActive));
        }
        if !self.tenant_accepts_sign_in(&user).await? {
            return Ok(reject("refresh_token", Some(&user), AuthErrorCode::InActiveTenant));
        }
        if !self.sign_in.can_sign_in(&user).await? {
            return Ok(reject("refresh_token", Some(&user), AuthErrorCode::UserSignInRevoked));
        }

        let ticket = self
            .tickets
            .create_ticket(&user, &REFRESH_SCOPES, TicketLifetime::Default, None)
            .await?;

        tracing::info!(
            user_id = user.user_id,
            tenant_id = user.tenant_id,
            "Refresh grant issued ticket"
        );
        Ok(AuthenticationResult::Success(ticket))
    }

    async fn run_two_factor_flow(
        &self,
        username: &str,
        password_token: &str,
        code: &str,
    ) -> Result<AuthenticationResult, ServiceError> {
        let Some(mut user) = self.users.find_by_name(username).await? else {
            return Ok(reject("2fa", None, AuthErrorCode::InvalidUserPass));
        };
        if !self.credentials.two_factor_enabled(&user).await? {
            return Ok(reject("2fa", Some(&user), AuthErrorCode::UserSignInRevoked));
        }
        if !self.password_tokens.verify(&user, password_token, Utc::now()) {
            return Ok(reject("2fa", Some(&user), AuthErrorCode::InvalidUserPass));
        }
        if !self.credentials.verify_two_factor_code(&user, code).await? {
            return Ok(reject("2fa", Some(&user), AuthErrorCode::InvalidUserPass));
        }
        if !user.is_active() {
            return Ok(reject("2fa", Some(&user), AuthErrorCode::UserNotActive));
        }

        let ticket = self
            .tickets
            .create_ticket(&user, &FULL_SCOPES, TicketLifetime::Default, None)
            .await?;
        PasswordTokenIssuer::clear(&mut user);
        self.record_access(&mut user).await?;

        tracing::info!(
            user_id = user.user_id,
            tenant_id = user.tenant_id,
            "Two-factor grant issued ticket"
        );
        Ok(AuthenticationResult::Success(ticket))
    }

    async fn run_personal_access_token_flow(
        &self,
        username: &str,
        password: &str,
        metadata: &PersonalAccessTokenMinimum,
    ) -> Result<AuthenticationResult, ServiceError> {
        let mut user = match self.check_password_guards(username, password, "PAT").await? {
            Ok(user) => user,
            Err(rejected) => return Ok(rejected),
        };

        let ticket = self
            .tickets
            .create_ticket(&user, &FULL_SCOPES, TicketLifetime::NonExpiring, Some(metadata))
            .await?;
        self.record_access(&mut user).await?;

        tracing::info!(
            user_id = user.user_id,
            tenant_id = user.tenant_id,
            pat_name = %metadata.name,
            "Personal access token ticket issued"
        );
        Ok(AuthenticationResult::Success(ticket))
    }

    /// Lookup, active, tenant, password and password-confirmed guards shared
    /// by the password and PAT flows. The inner `Err` is the rejection to
    /// return.
    async fn check_password_guards(
        &self,
        username: &str,
        password: &str,
        flow: &'static str,
    ) -> Result<Result<User, AuthenticationResult>, ServiceError> {
        let Some(mut user) = self.users.find_by_name(username).await? else {
            return Ok(Err(reject(flow, None, AuthErrorCode::InvalidUserPass)));
        };
        if !user.is_active() {
            return Ok(Err(reject(flow, Some(&user), AuthErrorCode::UserNotActive)));
        }
        if !self.tenant_accepts_sign_in(&user).await? {
            return Ok(Err(reject(flow, Some(&user), AuthErrorCode::InActiveTenant)));
        }
        if !self
            .credentials
            .check_password(&mut user, password, true)
            .await?
            .succeeded()
        {
            return Ok(Err(reject(flow, Some(&user), AuthErrorCode::InvalidUserPass)));
        }
        if !user.password_confirmed {
            return Ok(Err(reject(flow, Some(&user), AuthErrorCode::PasswordExpired)));
        }
        Ok(Ok(user))
    }

    async fn tenant_accepts_sign_in(&self, user: &User) -> Result<bool, ServiceError> {
        if !self.enforce_tenant_activity {
            return Ok(true);
        }
        self.sign_in.tenant_active(user).await
    }

    /// The single write of a successful flow.
    async fn record_access(&self, user: &mut User) -> Result<(), ServiceError> {
        user.last_access_utc = Some(Utc::now());
        self.users.update(user).await?;
        self.unit_of_work.save_changes().await
    }
}

fn reject(flow: &'static str, user: Option<&User>, code: AuthErrorCode) -> AuthenticationResult {
    tracing::warn!(
        flow,
        user_id = user.map(|u| u.user_id),
        tenant_id = user.map(|u| u.tenant_id),
        code = %code,
        "Authentication rejected"
    );
    AuthenticationResult::error(code)
}

fn concurrency_as_error(
    result: Result<AuthenticationResult, ServiceError>,
) -> Result<AuthenticationResult, ServiceError> {
    match result {
        Err(ServiceError::ConcurrencyFailure) => {
            tracing::warn!("User was modified concurrently, authentication abandoned");
            Ok(AuthenticationResult::error(AuthErrorCode::ConcurrencyFailure))
        }
        other => other,
    }
}
