mod common;

use chrono::{Duration, Utc};
use common::{TestContext, ALICE_ID, ALICE_PASSWORD, TENANT_ID};
use identity_service::{
    models::{AuthErrorCode, PersonalAccessTokenMinimum, Token},
    services::ServiceError,
};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_issued_pat_is_listed_with_metadata() {
    let context = TestContext::new();
    let service = context.pat_service();
    let cancel = CancellationToken::new();

    // 1. Issue
    let token = service
        .issue_token(
            "alice",
            ALICE_PASSWORD,
            &PersonalAccessTokenMinimum::new("CI", "build bot"),
        )
        .await
        .expect("Issuance failed")
        .expect("Grant rejected");
    assert_eq!(token.tenant_id.as_deref(), Some("7"));
    assert_eq!(token.subject.as_deref(), Some("12"));

    // 2. List for the user
    let listed = service
        .get_user_tokens(TENANT_ID, ALICE_ID, &cancel)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    let pat = &listed[0];
    assert_eq!(pat.name, "CI");
    assert_eq!(pat.description, "build bot");
    assert_eq!(pat.tenant_id, TENANT_ID);
    assert_eq!(pat.user_id, ALICE_ID);
    assert_eq!(pat.token_id, token.token_id);
    assert!(pat.token_expiry.unwrap() > Utc::now() + Duration::days(365 * 50));

    // 3. And for the tenant
    let tenant_wide = service.get_tokens(TENANT_ID, &cancel).await.unwrap();
    assert_eq!(tenant_wide, listed);
}

#[tokio::test]
async fn test_rejected_grant_issues_nothing() {
    let context = TestContext::new();
    let service = context.pat_service();

    let rejected = service
        .issue_token(
            "alice",
            "wrong",
            &PersonalAccessTokenMinimum::new("CI", "build bot"),
        )
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(rejected.code, AuthErrorCode::InvalidUserPass);

    let listed = service
        .get_tokens(TENANT_ID, &CancellationToken::new())
        .await
        .unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn test_lifetime_past_the_calendar_is_an_error() {
    let mut context = TestContext::new();
    context.config.token.personal_access_token_lifetime_days = 100_000_000;

    let result = context
        .pat_service()
        .issue_token(
            "alice",
            ALICE_PASSWORD,
            &PersonalAccessTokenMinimum::new("CI", "build bot"),
        )
        .await;
    assert!(matches!(result, Err(ServiceError::Internal(_))));
    assert!(context
        .pat_service()
        .get_tokens(TENANT_ID, &CancellationToken::new())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_tokens_without_pat_metadata_are_skipped() {
    let context = TestContext::new();
    context.add_user(13, TENANT_ID, "bob", "hunter22");

    let plain = |subject: &str, properties: Option<&str>| Token {
        subject: Some(subject.to_string()),
        tenant_id: Some("7".to_string()),
        application_id: Some("7".to_string()),
        status: Some("valid".to_string()),
        token_type: Some("access_token".to_string()),
        properties: properties.map(str::to_string),
        expiration_utc: Some(Utc::now() + Duration::hours(1)),
        ..Token::new()
    };
    context.token_store.insert(plain("12", None)).unwrap();
    context
        .token_store
        .insert(plain("12", Some(r#"{"origin":"portal"}"#)))
        .unwrap();
    context
        .token_store
        .insert(plain("13", Some(r#"{"PAT":"not an object"}"#)))
        .unwrap();
    context
        .token_store
        .insert(plain("13", Some(r#"{"PAT":{"Name":"deploy","Description":"cd"}}"#)))
        .unwrap();

    let listed = context
        .pat_service()
        .get_tokens(TENANT_ID, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "deploy");
    assert_eq!(listed[0].user_id, 13);
}

#[tokio::test]
async fn test_revoked_pat_disappears_from_listing() {
    let context = TestContext::new();
    let service = context.pat_service();
    let cancel = CancellationToken::new();

    let token = service
        .issue_token(
            "alice",
            ALICE_PASSWORD,
            &PersonalAccessTokenMinimum::new("CI", "build bot"),
        )
        .await
        .unwrap()
        .unwrap();

    assert!(service.revoke_token(&token.token_id, &cancel).await.unwrap());
    assert!(service
        .get_user_tokens(TENANT_ID, ALICE_ID, &cancel)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        context
            .token_store
            .get(&token.token_id)
            .unwrap()
            .unwrap()
            .status
            .as_deref(),
        Some("revoked")
    );
}

#[tokio::test]
async fn test_revoking_unknown_token_returns_false() {
    let context = TestContext::new();
    let revoked = context
        .pat_service()
        .revoke_token("no-such-token", &CancellationToken::new())
        .await
        .unwrap();
    assert!(!revoked);
}

#[tokio::test]
async fn test_listing_observes_cancellation() {
    let context = TestContext::new();
    context.add_user(13, TENANT_ID, "bob", "hunter22");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = context.pat_service().get_tokens(TENANT_ID, &cancel).await;
    assert!(matches!(result, Err(ServiceError::Cancelled)));
}
