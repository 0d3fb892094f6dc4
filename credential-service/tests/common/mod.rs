//! Shared setup for credential-service integration tests: the full service
//! wired onto in-memory adapters.

#![allow(dead_code)]

use credential_service::{
    build_router,
    config::{
        CredentialConfig, DatabaseConfig, Environment, JwtConfig, RateLimitConfig, RedisConfig,
        SecurityConfig, SessionConfig, SmtpConfig,
    },
    services::{
        CredentialService, MailKind, MockEphemeralStore, MockUserStore, RecordingEmailService,
        SentMail,
    },
    AppState,
};
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Method, Request, Response},
    Router,
};
use jsonwebtoken::Algorithm;
use secrecy::SecretString;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tower::util::ServiceExt;

pub const TEST_SECRET: &str = "integration-test-secret-at-least-32-bytes";

pub fn test_config() -> CredentialConfig {
    CredentialConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "credential-service-test".to_string(),
        service_version: "0.1.0".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        redis: RedisConfig {
            url: "redis://unused".to_string(),
        },
        jwt: JwtConfig {
            secret: SecretString::new(TEST_SECRET.to_string()),
            algorithm: Algorithm::HS256,
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            email_token_expiry_hours: 24,
        },
        session: SessionConfig::default(),
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 465,
            username: String::new(),
            password: SecretString::new(String::new()),
            from_email: "no-reply@localhost".to_string(),
            from_name: "Contacts".to_string(),
            public_base_url: "http://localhost:8000".to_string(),
        },
        rate_limit: RateLimitConfig {
            default_limit: 100,
            default_window_seconds: 5,
            auth_limit: 100,
            auth_window_seconds: 60,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            trust_forwarded_for: false,
        },
    }
}

pub struct TestApp {
    pub state: AppState,
    pub users: Arc<MockUserStore>,
    pub ephemeral: Arc<MockEphemeralStore>,
    pub mail: UnboundedReceiver<SentMail>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: CredentialConfig) -> Self {
        let users = Arc::new(MockUserStore::new());
        let ephemeral = Arc::new(MockEphemeralStore::new());
        let (email, mail) = RecordingEmailService::new();

        let state = AppState::new(config, users.clone(), ephemeral.clone(), Arc::new(email));

        Self {
            state,
            users,
            ephemeral,
            mail,
        }
    }

    pub fn credentials(&self) -> &CredentialService {
        &self.state.credentials
    }

    pub async fn router(&self) -> Router {
        build_router(self.state.clone())
            .await
            .expect("router should build")
    }

    /// Next dispatched message. Mail is sent from a spawned task, so wait a little.
    pub async fn next_mail(&mut self) -> SentMail {
        tokio::time::timeout(Duration::from_secs(5), self.mail.recv())
            .await
            .expect("timed out waiting for mail")
            .expect("mail channel closed")
    }

    pub async fn next_mail_of(&mut self, kind: MailKind) -> SentMail {
        loop {
            let mail = self.next_mail().await;
            if mail.kind == kind {
                return mail;
            }
        }
    }

    /// Signup and confirm, returning the confirmed address.
    pub async fn confirmed_user(&mut self, email: &str, password: &str) {
        self.credentials()
            .signup(email, "alice", password)
            .await
            .expect("signup should succeed");
        let mail = self.next_mail_of(MailKind::Verification).await;
        self.credentials()
            .confirm_email(&mail.token)
            .await
            .expect("confirmation should succeed");
    }
}

pub fn json_request(method: Method, uri: &str, body: Value, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    from_peer(builder.body(Body::from(body.to_string())).unwrap())
}

pub fn empty_request(method: Method, uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    from_peer(builder.body(Body::empty()).unwrap())
}

/// Attach the peer address `axum::serve` would record for a real connection.
fn from_peer(mut request: Request<Body>) -> Request<Body> {
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([198, 51, 100, 10], 40000))));
    request
}

pub fn forwarded_for(mut request: Request<Body>, client: &str) -> Request<Body> {
    request
        .headers_mut()
        .insert("x-forwarded-for", client.parse().unwrap());
    request
}

pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}
