//! Single-use opaque tokens that bridge the password step and the
//! two-factor step of a sign-in.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;

use crate::models::User;
use crate::services::error::{expiry_after, ServiceError};

#[derive(Debug, Clone)]
pub struct PasswordTokenIssuer {
    token_bytes: usize,
    lifetime: Duration,
}

impl PasswordTokenIssuer {
    pub fn new(token_bytes: usize, lifetime: Duration) -> Self {
        Self {
            token_bytes,
            lifetime,
        }
    }

    /// Mint a token and store it with its expiry on `user`. Any earlier
    /// token for the user is replaced.
    pub fn issue(&self, user: &mut User, now: DateTime<Utc>) -> Result<String, ServiceError> {
        let expiry = expiry_after(now, self.lifetime)?;
        let mut bytes = vec![0u8; self.token_bytes];
        OsRng.fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(&bytes);

        user.password_token = Some(token.clone());
        user.password_token_expiry_utc = Some(expiry);
        Ok(token)
    }

    /// Exact match against the stored token, which must not have expired.
    pub fn verify(&self, user: &User, presented: &str, now: DateTime<Utc>) -> bool {
        let (Some(stored), Some(expiry)) = (
            user.password_token.as_deref(),
            user.password_token_expiry_utc,
        ) else {
            return false;
        };
        if expiry <= now {
            return false;
        }
        stored.as_bytes().ct_eq(presented.as_bytes()).into()
    }

    pub fn clear(user: &mut User) {
        user.password_token = None;
        user.password_token_expiry_utc = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> PasswordTokenIssuer {
        PasswordTokenIssuer::new(32, Duration::minutes(5))
    }

    #[test]
    fn test_issued_token_verifies() {
        let mut user = User::new(1, 7, "alice".to_string(), "hash".to_string());
        let now = Utc::now();
        let token = issuer().issue(&mut user, now).unwrap();

        assert_eq!(token.len(), 43);
        assert!(!token.contains(['+', '/', '=']));
        assert!(issuer().verify(&user, &token, now));
        assert!(!issuer().verify(&user, "something-else", now));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let mut user = User::new(1, 7, "alice".to_string(), "hash".to_string());
        let now = Utc::now();
        let token = issuer().issue(&mut user, now).unwrap();
        assert!(!issuer().verify(&user, &token, now + Duration::minutes(5)));
    }

    #[test]
    fn test_reissue_invalidates_previous_token() {
        let mut user = User::new(1, 7, "alice".to_string(), "hash".to_string());
        let now = Utc::now();
        let first = issuer().issue(&mut user, now).unwrap();
        let second = issuer().issue(&mut user, now).unwrap();

        assert_ne!(first, second);
        assert!(!issuer().verify(&user, &first, now));
        assert!(issuer().verify(&user, &second, now));
    }

    #[test]
    fn test_cleared_token_never_verifies() {
        let mut user = User::new(1, 7, "alice".to_string(), "hash".to_string());
        let now = Utc::now();
        let token = issuer().issue(&mut user, now).unwrap();
        PasswordTokenIssuer::clear(&mut user);
        assert!(!issuer().verify(&user, &token, now));
    }
}
