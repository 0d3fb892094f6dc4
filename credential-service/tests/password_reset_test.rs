//! Password recovery through single-use reset tokens.

mod common;

use common::TestApp;
use credential_service::services::{AuthError, MailKind};

#[tokio::test]
async fn reset_token_is_single_use() {
    let mut app = TestApp::new();
    app.confirmed_user("a@x.com", "pw123456").await;

    app.credentials().request_password_reset("a@x.com").await.unwrap();
    let mail = app.next_mail_of(MailKind::PasswordReset).await;
    assert_eq!(mail.to, "a@x.com");

    app.credentials()
        .reset_password(&mail.token, "brand-new-pw", "brand-new-pw")
        .await
        .unwrap();
    assert!(app.credentials().login("a@x.com", "brand-new-pw").await.is_ok());

    assert!(matches!(
        app.credentials()
            .reset_password(&mail.token, "another-pw", "another-pw")
            .await,
        Err(AuthError::InvalidOrExpiredToken)
    ));
}

#[tokio::test]
async fn unknown_reset_token_is_rejected() {
    let app = TestApp::new();

    assert!(matches!(
        app.credentials()
            .reset_password("never-issued", "brand-new-pw", "brand-new-pw")
            .await,
        Err(AuthError::InvalidOrExpiredToken)
    ));
}

#[tokio::test]
async fn mismatch_is_checked_before_the_token() {
    let mut app = TestApp::new();
    app.confirmed_user("a@x.com", "pw123456").await;
    app.credentials().request_password_reset("a@x.com").await.unwrap();
    let mail = app.next_mail_of(MailKind::PasswordReset).await;

    assert!(matches!(
        app.credentials()
            .reset_password(&mail.token, "brand-new-pw", "different-pw")
            .await,
        Err(AuthError::PasswordMismatch)
    ));

    // Still redeemable after the failed attempt
    assert!(app
        .credentials()
        .reset_password(&mail.token, "brand-new-pw", "brand-new-pw")
        .await
        .is_ok());
}

#[tokio::test]
async fn unknown_email_gets_silent_acknowledgement() {
    let mut app = TestApp::new();

    app.credentials()
        .request_password_reset("nobody@x.com")
        .await
        .unwrap();

    assert!(app.ephemeral.is_empty());
    assert!(app.mail.try_recv().is_err());
}

#[tokio::test]
async fn repeated_requests_issue_independent_tokens() {
    let mut app = TestApp::new();
    app.confirmed_user("a@x.com", "pw123456").await;

    app.credentials().request_password_reset("a@x.com").await.unwrap();
    app.credentials().request_password_reset("a@x.com").await.unwrap();
    let first = app.next_mail_of(MailKind::PasswordReset).await;
    let second = app.next_mail_of(MailKind::PasswordReset).await;
    assert_ne!(first.token, second.token);

    app.credentials()
        .reset_password(&first.token, "first-new-pw", "first-new-pw")
        .await
        .unwrap();
    app.credentials()
        .reset_password(&second.token, "second-new-pw", "second-new-pw")
        .await
        .unwrap();

    assert!(app.credentials().login("a@x.com", "second-new-pw").await.is_ok());
}
