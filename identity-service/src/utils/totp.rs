//! RFC 6238 authenticator codes for two-factor sign-in.

use totp_rs::{Algorithm, Secret, TOTP};

/// otpauth labels use ':' to separate issuer from account, so neither may
/// contain one.
fn label(value: &str) -> String {
    value.replace(':', "_")
}

fn totp(key: &str, issuer: &str, account: &str) -> Result<TOTP, anyhow::Error> {
    let secret = Secret::Encoded(key.to_string())
        .to_bytes()
        .map_err(|e| anyhow::anyhow!("Invalid authenticator key: {:?}", e))?;

    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        secret,
        Some(label(issuer)),
        label(account),
    )
    .map_err(|e| anyhow::anyhow!("TOTP init: {}", e))
}

/// Fresh base32 authenticator key.
pub fn generate_authenticator_key() -> String {
    Secret::generate_secret().to_encoded().to_string()
}

/// Check `code` against the key for the current time step (one step of skew).
pub fn verify_code(key: &str, code: &str, issuer: &str, account: &str) -> Result<bool, anyhow::Error> {
    totp(key, issuer, account)?
        .check_current(code)
        .map_err(|e| anyhow::anyhow!("TOTP check: {}", e))
}

/// Code an authenticator app would display right now.
pub fn current_code(key: &str, issuer: &str, account: &str) -> Result<String, anyhow::Error> {
    totp(key, issuer, account)?
        .generate_current()
        .map_err(|e| anyhow::anyhow!("TOTP generate: {}", e))
}

/// `otpauth://` provisioning URI for QR enrolment.
pub fn provisioning_uri(key: &str, issuer: &str, account: &str) -> Result<String, anyhow::Error> {
    Ok(totp(key, issuer, account)?.get_url())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_code_verifies() {
        let key = generate_authenticator_key();
        let code = current_code(&key, "Identity", "alice").unwrap();
        assert!(verify_code(&key, &code, "Identity", "alice").unwrap());
    }

    #[test]
    fn test_wrong_code_fails() {
        let key = generate_authenticator_key();
        let code = current_code(&key, "Identity", "alice").unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };
        assert!(!verify_code(&key, wrong, "Identity", "alice").unwrap());
    }

    #[test]
    fn test_invalid_key_is_an_error() {
        assert!(verify_code("not base32!", "123456", "Identity", "alice").is_err());
    }

    #[test]
    fn test_provisioning_uri() {
        let key = generate_authenticator_key();
        let uri = provisioning_uri(&key, "Identity", "alice").unwrap();
        assert!(uri.starts_with("otpauth://totp/"));
        assert!(uri.contains("alice"));
    }

    #[test]
    fn test_colons_in_labels_are_replaced() {
        let key = generate_authenticator_key();
        let uri = provisioning_uri(&key, "Acme:Identity", "corp:bob").unwrap();
        assert!(uri.contains("corp_bob"));

        let code = current_code(&key, "Acme:Identity", "corp:bob").unwrap();
        assert!(verify_code(&key, &code, "Acme:Identity", "corp:bob").unwrap());
    }
}
