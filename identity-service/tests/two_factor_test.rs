mod common;

use common::{TestContext, ALICE_ID, ALICE_PASSWORD, TENANT_ID};
use identity_service::{models::AuthenticationResult, services::ServiceError};

#[tokio::test]
async fn test_enrolment_then_sign_in_requires_code() {
    let context = TestContext::new();
    let service = context.two_factor_service();

    // 1. New key
    let key = service
        .generate_new_authenticator_key("alice")
        .await
        .expect("Key generation failed");
    assert!(key.provisioning_uri.starts_with("otpauth://totp/"));
    assert_eq!(
        context.stored(ALICE_ID).authenticator_key.as_deref(),
        Some(key.key.as_str())
    );

    // 2. Enable with a current code
    let code = context.current_code(ALICE_ID);
    context
        .two_factor_service()
        .enable_two_factor("alice", &code)
        .await
        .expect("Enabling failed");
    assert!(context.stored(ALICE_ID).two_factor_enabled);

    // 3. Password alone now only yields a challenge
    let result = context
        .engine()
        .password_flow("alice", ALICE_PASSWORD, false)
        .await
        .unwrap();
    assert!(matches!(result, AuthenticationResult::Challenge(_)));
}

#[tokio::test]
async fn test_enrolment_for_user_name_with_colon() {
    let context = TestContext::new();
    let user = context.add_user(40, TENANT_ID, "corp:bob", "hunter22");
    let before = context.stored(user.user_id);

    let key = context
        .two_factor_service()
        .generate_new_authenticator_key("corp:bob")
        .await
        .expect("Key generation failed");
    assert!(key.provisioning_uri.contains("corp_bob"));
    let stored = context.stored(user.user_id);
    assert_eq!(stored.authenticator_key.as_deref(), Some(key.key.as_str()));
    assert_ne!(stored.security_stamp, before.security_stamp);

    let code = context.current_code(user.user_id);
    context
        .two_factor_service()
        .enable_two_factor("corp:bob", &code)
        .await
        .expect("Enabling failed");

    let challenge = match context
        .engine()
        .password_flow("corp:bob", "hunter22", false)
        .await
        .unwrap()
    {
        AuthenticationResult::Challenge(challenge) => challenge,
        other => panic!("Expected a challenge, got {:?}", other),
    };
    let result = context
        .engine()
        .two_factor_flow("corp:bob", &challenge.password_token, &context.current_code(user.user_id))
        .await
        .unwrap();
    assert!(result.is_success());
}

#[tokio::test]
async fn test_enrolment_errors() {
    let context = TestContext::new();

    assert!(matches!(
        context.two_factor_service().enable_two_factor("alice", "123456").await,
        Err(ServiceError::NewAuthenticatorKeyRequired)
    ));
    assert!(matches!(
        context.two_factor_service().generate_new_authenticator_key("bob").await,
        Err(ServiceError::UnknownUser(name)) if name == "bob"
    ));

    context
        .two_factor_service()
        .generate_new_authenticator_key("alice")
        .await
        .unwrap();
    assert!(matches!(
        context.two_factor_service().enable_two_factor("alice", "abcdef").await,
        Err(ServiceError::InvalidTwoFactorToken)
    ));
    assert!(!context.stored(ALICE_ID).two_factor_enabled);

    context.enable_two_factor(ALICE_ID);
    assert!(matches!(
        context.two_factor_service().generate_new_authenticator_key("alice").await,
        Err(ServiceError::TwoFactorAlreadyEnabled)
    ));
}

#[tokio::test]
async fn test_disable_rotates_key_and_security_stamp() {
    let context = TestContext::new();
    let key = context.enable_two_factor(ALICE_ID);
    let before = context.stored(ALICE_ID);

    context
        .two_factor_service()
        .disable_two_factor("alice")
        .await
        .unwrap();

    let after = context.stored(ALICE_ID);
    assert!(!after.two_factor_enabled);
    assert_ne!(after.authenticator_key.as_deref(), Some(key.as_str()));
    assert_ne!(after.security_stamp, before.security_stamp);

    let result = context
        .engine()
        .password_flow("alice", ALICE_PASSWORD, false)
        .await
        .unwrap();
    assert!(result.is_success());
}
