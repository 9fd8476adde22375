use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;

/// Settings for the identity service, loaded from `IDENTITY__*` variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// Reject sign-in for users of an inactive or unknown tenant.
    pub enforce_tenant_activity: bool,
    pub database: DatabaseConfig,
    pub token: TokenConfig,
    pub two_factor: TwoFactorConfig,
    pub lockout: LockoutConfig,
    pub token_store: TokenStoreConfig,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub access_token_lifetime_secs: i64,
    pub refresh_token_lifetime_secs: i64,
    pub extended_access_token_lifetime_secs: i64,
    pub personal_access_token_lifetime_days: i64,
    /// The only resource a personal access token may be presented to.
    pub public_api_resource: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TwoFactorConfig {
    pub password_token_bytes: usize,
    pub password_token_lifetime_secs: i64,
    pub two_factor_type: String,
    pub totp_issuer: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    pub max_failed_attempts: i32,
    pub lockout_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenStoreConfig {
    /// Skip the case-sensitive subject re-check after a store query.
    pub disable_additional_filtering: bool,
    /// Serve lookups from the primary store instead of the token cache.
    pub disable_entity_caching: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Dev,
            service_name: "identity-service".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            enforce_tenant_activity: true,
            database: DatabaseConfig::default(),
            token: TokenConfig::default(),
            two_factor: TwoFactorConfig::default(),
            lockout: LockoutConfig::default(),
            token_store: TokenStoreConfig::default(),
        }
    }
}

impl Default for TokenStoreConfig {
    fn default() -> Self {
        Self {
            disable_additional_filtering: false,
            disable_entity_caching: true,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/identity".to_string(),
            max_connections: 10,
            min_connections: 1,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_token_lifetime_secs: 3600,
            refresh_token_lifetime_secs: 14 * 24 * 3600,
            extended_access_token_lifetime_secs: 7 * 24 * 3600,
            personal_access_token_lifetime_days: 365 * 100,
            public_api_resource: "publicApi".to_string(),
        }
    }
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        Self {
            password_token_bytes: 32,
            password_token_lifetime_secs: 300,
            two_factor_type: "Google Authenticator".to_string(),
            totp_issuer: "Identity".to_string(),
        }
    }
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_secs: 300,
        }
    }
}

impl TokenConfig {
    pub fn access_token_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.access_token_lifetime_secs)
    }

    pub fn extended_access_token_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.extended_access_token_lifetime_secs)
    }

    pub fn personal_access_token_lifetime(&self) -> chrono::Duration {
        chrono::Duration::days(self.personal_access_token_lifetime_days)
    }
}

/// Ten years.
const MAX_LIFETIME_SECS: i64 = 10 * 365 * 24 * 3600;
const MAX_PERSONAL_ACCESS_TOKEN_DAYS: i64 = 365_000;

impl IdentityConfig {
    pub const ENV_PREFIX: &'static str = "IDENTITY";

    /// Load and validate. Fails fast on anything unusable.
    pub fn from_env() -> Result<Self, AppError> {
        let config: IdentityConfig = core_config::load(Self::ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let lifetimes = [
            (
                "token.access_token_lifetime_secs",
                self.token.access_token_lifetime_secs,
                MAX_LIFETIME_SECS,
            ),
            (
                "token.refresh_token_lifetime_secs",
                self.token.refresh_token_lifetime_secs,
                MAX_LIFETIME_SECS,
            ),
            (
                "token.extended_access_token_lifetime_secs",
                self.token.extended_access_token_lifetime_secs,
                MAX_LIFETIME_SECS,
            ),
            (
                "token.personal_access_token_lifetime_days",
                self.token.personal_access_token_lifetime_days,
                MAX_PERSONAL_ACCESS_TOKEN_DAYS,
            ),
            (
                "two_factor.password_token_lifetime_secs",
                self.two_factor.password_token_lifetime_secs,
                MAX_LIFETIME_SECS,
            ),
            ("lockout.lockout_secs", self.lockout.lockout_secs, MAX_LIFETIME_SECS),
        ];
        for (name, value, max) in lifetimes {
            if value <= 0 || value > max {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} must be between 1 and {}, got {}",
                    name,
                    max,
                    value
                )));
            }
        }
        if self.two_factor.password_token_bytes < 16 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "two_factor.password_token_bytes must be at least 16"
            )));
        }
        if self.token.public_api_resource.trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "token.public_api_resource cannot be empty"
            )));
        }
        if self.lockout.max_failed_attempts <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "lockout.max_failed_attempts must be positive"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = IdentityConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.token.public_api_resource, "publicApi");
        assert_eq!(config.token.personal_access_token_lifetime_days, 36500);
        assert!(config.token_store.disable_entity_caching);
        assert!(!config.token_store.disable_additional_filtering);
    }

    #[test]
    fn test_rejects_short_password_token() {
        let mut config = IdentityConfig::default();
        config.two_factor.password_token_bytes = 8;
        assert!(matches!(config.validate(), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_non_positive_lifetime() {
        let mut config = IdentityConfig::default();
        config.token.access_token_lifetime_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unbounded_lifetimes() {
        let mut config = IdentityConfig::default();
        config.token.personal_access_token_lifetime_days = 100_000_000;
        assert!(matches!(config.validate(), Err(AppError::ConfigError(_))));

        let mut config = IdentityConfig::default();
        config.token.personal_access_token_lifetime_days = MAX_PERSONAL_ACCESS_TOKEN_DAYS;
        assert!(config.validate().is_ok());

        let mut config = IdentityConfig::default();
        config.two_factor.password_token_lifetime_secs = MAX_LIFETIME_SECS + 1;
        assert!(config.validate().is_err());

        let mut config = IdentityConfig::default();
        config.lockout.lockout_secs = i64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_public_resource() {
        let mut config = IdentityConfig::default();
        config.token.public_api_resource = " ".to_string();
        assert!(config.validate().is_err());
    }
}
