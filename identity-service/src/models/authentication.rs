//! Authentication results and grant requests.

use std::collections::HashMap;
use std::fmt;

use crate::models::personal_access_token::PersonalAccessTokenMinimum;
use crate::models::ticket::{Principal, Ticket};

/// Stable, machine-readable error codes. Callers branch on these only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorCode {
    InvalidUserPass,
    InvalidRefreshToken,
    UserSignInRevoked,
    UserNotActive,
    InActiveTenant,
    /// The user must reset their password before signing in.
    PasswordExpired,
    ConcurrencyFailure,
    UnknownUser,
    ArgumentInvalid,
    InvalidRequest,
    UnsupportedGrantType,
}

impl AuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthErrorCode::InvalidUserPass => "InvalidUserPass",
            AuthErrorCode::InvalidRefreshToken => "InvalidRefreshToken",
            AuthErrorCode::UserSignInRevoked => "UserSignInRevoked",
            AuthErrorCode::UserNotActive => "UserNotActive",
            AuthErrorCode::InActiveTenant => "InActiveTenant",
            AuthErrorCode::PasswordExpired => "PasswordExpired",
            AuthErrorCode::ConcurrencyFailure => "ConcurrencyFailure",
            AuthErrorCode::UnknownUser => "UnknownUser",
            AuthErrorCode::ArgumentInvalid => "ArgumentInvalid",
            AuthErrorCode::InvalidRequest => "InvalidRequest",
            AuthErrorCode::UnsupportedGrantType => "UnsupportedGrantType",
        }
    }

    /// OAuth error string written to the token response.
    pub fn oauth_error(&self) -> &'static str {
        match self {
            AuthErrorCode::InvalidUserPass
            | AuthErrorCode::InvalidRefreshToken
            | AuthErrorCode::UserSignInRevoked
            | AuthErrorCode::UnknownUser => "invalid_grant",
            AuthErrorCode::UserNotActive | AuthErrorCode::InActiveTenant => "access_denied",
            AuthErrorCode::PasswordExpired => "password_expired",
            AuthErrorCode::ConcurrencyFailure => "concurrency_failure",
            AuthErrorCode::ArgumentInvalid | AuthErrorCode::InvalidRequest => "invalid_request",
            AuthErrorCode::UnsupportedGrantType => "unsupported_grant_type",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            AuthErrorCode::InvalidUserPass => "The username/password couple is invalid.",
            AuthErrorCode::InvalidRefreshToken => "The refresh token is no longer valid.",
            AuthErrorCode::UserSignInRevoked => "The user is no longer allowed to sign in.",
            AuthErrorCode::UserNotActive => "The user account has been disabled.",
            AuthErrorCode::InActiveTenant => "The tenant is inactive.",
            AuthErrorCode::PasswordExpired => "Password must be reset.",
            AuthErrorCode::ConcurrencyFailure => {
                "Optimistic concurrency failure, object has been modified."
            }
            AuthErrorCode::UnknownUser => "No user found.",
            AuthErrorCode::ArgumentInvalid => "A required argument is missing.",
            AuthErrorCode::InvalidRequest => {
                "The mandatory 'username' and/or 'token' and/or 'passwordToken' parameters are missing."
            }
            AuthErrorCode::UnsupportedGrantType => "The specified grant type is not supported.",
        }
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationError {
    pub code: AuthErrorCode,
    pub error: &'static str,
    pub description: String,
}

impl From<AuthErrorCode> for AuthenticationError {
    fn from(code: AuthErrorCode) -> Self {
        Self {
            code,
            error: code.oauth_error(),
            description: code.description().to_string(),
        }
    }
}

/// Second step required before a ticket is issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoFactorChallenge {
    pub password_token: String,
    pub two_factor_type: String,
}

/// Outcome of a flow: exactly one of ticket, challenge or error.
#[derive(Debug, Clone)]
pub enum AuthenticationResult {
    Success(Ticket),
    Challenge(TwoFactorChallenge),
    Error(AuthenticationError),
}

impl AuthenticationResult {
    pub fn error(code: AuthErrorCode) -> Self {
        AuthenticationResult::Error(code.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AuthenticationResult::Success(_))
    }

    pub fn ticket(&self) -> Option<&Ticket> {
        match self {
            AuthenticationResult::Success(ticket) => Some(ticket),
            _ => None,
        }
    }

    pub fn challenge(&self) -> Option<&TwoFactorChallenge> {
        match self {
            AuthenticationResult::Challenge(challenge) => Some(challenge),
            _ => None,
        }
    }

    pub fn error_code(&self) -> Option<AuthErrorCode> {
        match self {
            AuthenticationResult::Error(err) => Some(err.code),
            _ => None,
        }
    }
}

/// Grant type identifiers accepted by the token endpoint.
pub mod grant_types {
    pub const PASSWORD: &str = "password";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const TWO_FACTOR: &str = "2fa";
    pub const PERSONAL_ACCESS_TOKEN: &str = "PAT";
}

/// A token endpoint request, already split by grant type.
#[derive(Debug, Clone)]
pub enum TokenRequest {
    Password {
        username: String,
        password: String,
        extend_duration: bool,
    },
    RefreshToken {
        principal: Principal,
    },
    TwoFactor {
        username: String,
        password_token: String,
        code: String,
    },
    PersonalAccessToken {
        username: String,
        password: String,
        metadata: PersonalAccessTokenMinimum,
    },
}

/// Why a flat parameter map could not become a `TokenRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenRequestError {
    UnsupportedGrantType(Option<String>),
    MissingParameters,
}

impl From<&TokenRequestError> for AuthErrorCode {
    fn from(err: &TokenRequestError) -> Self {
        match err {
            TokenRequestError::UnsupportedGrantType(_) => AuthErrorCode::UnsupportedGrantType,
            TokenRequestError::MissingParameters => AuthErrorCode::InvalidRequest,
        }
    }
}

impl TokenRequest {
    /// Build a request from form parameters.
    ///
    /// A refresh request needs the principal recovered from the presented
    /// refresh token, which the transport validates before calling in.
    pub fn from_parameters(
        parameters: &HashMap<String, String>,
        refresh_principal: Option<Principal>,
    ) -> Result<Self, TokenRequestError> {
        let get = |key: &str| parameters.get(key).cloned().unwrap_or_default();
        let grant_type = parameters.get("grant_type").map(String::as_str);

        match grant_type {
            Some(grant_types::PASSWORD) => Ok(TokenRequest::Password {
                username: get("username"),
                password: get("password"),
                extend_duration: parameters
                    .get("extendTokenDuration")
                    .is_some_and(|v| v.eq_ignore_ascii_case("true")),
            }),
            Some(grant_types::REFRESH_TOKEN) => match refresh_principal {
                Some(principal) => Ok(TokenRequest::RefreshToken { principal }),
                None => Err(TokenRequestError::MissingParameters),
            },
            Some(grant_types::TWO_FACTOR) => {
                let (username, password_token, code) =
                    (get("username"), get("passwordToken"), get("token"));
                if username.is_empty() || password_token.is_empty() || code.is_empty() {
                    return Err(TokenRequestError::MissingParameters);
                }
                Ok(TokenRequest::TwoFactor {
                    username,
                    password_token,
                    code,
                })
            }
            Some(grant_types::PERSONAL_ACCESS_TOKEN) => Ok(TokenRequest::PersonalAccessToken {
                username: get("username"),
                password: get("password"),
                metadata: PersonalAccessTokenMinimum::new(
                    get("personalAccessTokenName"),
                    get("personalAccessTokenDescription"),
                ),
            }),
            other => Err(TokenRequestError::UnsupportedGrantType(other.map(str::to_string))),
        }
    }
}
