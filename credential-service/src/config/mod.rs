use jsonwebtoken::Algorithm;
use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Process-wide configuration, read once at startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct CredentialConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub smtp: SmtpConfig,
    pub rate_limit: RateLimitConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: SecretString,
    pub algorithm: Algorithm,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    pub email_token_expiry_hours: i64,
}

/// Lifetimes and deadlines for the ephemeral side of a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub password_reset_ttl_seconds: u64,
    /// 0 disables the authenticated-user cache.
    pub user_cache_ttl_seconds: u64,
    pub store_timeout_ms: u64,
}

impl SessionConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            password_reset_ttl_seconds: 900,
            user_cache_ttl_seconds: 900,
            store_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_email: String,
    pub from_name: String,
    /// Base URL used to build confirmation and reset links.
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub default_limit: u64,
    pub default_window_seconds: u64,
    pub auth_limit: u64,
    pub auth_window_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    /// Key rate limits on the first `x-forwarded-for` hop. Only safe behind a
    /// proxy that overwrites the header; otherwise the peer address is used.
    pub trust_forwarded_for: bool,
}

impl CredentialConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = CredentialConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("credential-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: get_parsed("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                min_connections: get_parsed("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", Some("redis://127.0.0.1:6379"), is_prod)?,
            },
            jwt: JwtConfig {
                secret: SecretString::new(get_env("JWT_SECRET", None, is_prod)?),
                algorithm: get_env("JWT_ALGORITHM", Some("HS256"), is_prod)?
                    .parse()
                    .map_err(|e: jsonwebtoken::errors::Error| {
                        AppError::ConfigError(anyhow::anyhow!("JWT_ALGORITHM: {}", e))
                    })?,
                access_token_expiry_minutes: get_parsed(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    Some("15"),
                    is_prod,
                )?,
                refresh_token_expiry_days: get_parsed(
                    "JWT_REFRESH_TOKEN_EXPIRY_DAYS",
                    Some("7"),
                    is_prod,
                )?,
                email_token_expiry_hours: get_parsed(
                    "JWT_EMAIL_TOKEN_EXPIRY_HOURS",
                    Some("24"),
                    is_prod,
                )?,
            },
            session: SessionConfig {
                password_reset_ttl_seconds: get_parsed(
                    "PASSWORD_RESET_TTL_SECONDS",
                    Some("900"),
                    is_prod,
                )?,
                user_cache_ttl_seconds: get_parsed("USER_CACHE_TTL_SECONDS", Some("900"), is_prod)?,
                store_timeout_ms: get_parsed("STORE_TIMEOUT_MS", Some("5000"), is_prod)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("localhost"), is_prod)?,
                port: get_parsed("SMTP_PORT", Some("465"), is_prod)?,
                username: get_env("SMTP_USERNAME", Some(""), is_prod)?,
                password: SecretString::new(get_env("SMTP_PASSWORD", Some(""), is_prod)?),
                from_email: get_env("MAIL_FROM", Some("no-reply@localhost"), is_prod)?,
                from_name: get_env("MAIL_FROM_NAME", Some("Contacts"), is_prod)?,
                public_base_url: get_env(
                    "PUBLIC_BASE_URL",
                    Some("http://localhost:8000"),
                    is_prod,
                )?,
            },
            rate_limit: RateLimitConfig {
                default_limit: get_parsed("RATE_LIMIT_DEFAULT_LIMIT", Some("2"), is_prod)?,
                default_window_seconds: get_parsed(
                    "RATE_LIMIT_DEFAULT_WINDOW_SECONDS",
                    Some("5"),
                    is_prod,
                )?,
                auth_limit: get_parsed("RATE_LIMIT_AUTH_LIMIT", Some("10"), is_prod)?,
                auth_window_seconds: get_parsed(
                    "RATE_LIMIT_AUTH_WINDOW_SECONDS",
                    Some("60"),
                    is_prod,
                )?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
                trust_forwarded_for: get_parsed("TRUST_FORWARDED_FOR", Some("false"), is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if !matches!(
            self.jwt.algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(config_error("JWT_ALGORITHM must be one of HS256, HS384, HS512"));
        }

        if self.jwt.access_token_expiry_minutes <= 0
            || self.jwt.refresh_token_expiry_days <= 0
            || self.jwt.email_token_expiry_hours <= 0
        {
            return Err(config_error("JWT token lifetimes must be positive"));
        }

        if self.session.password_reset_ttl_seconds == 0 || self.session.store_timeout_ms == 0 {
            return Err(config_error(
                "PASSWORD_RESET_TTL_SECONDS and STORE_TIMEOUT_MS must be positive",
            ));
        }

        if self.rate_limit.default_limit == 0
            || self.rate_limit.default_window_seconds == 0
            || self.rate_limit.auth_limit == 0
            || self.rate_limit.auth_window_seconds == 0
        {
            return Err(config_error("Rate limits and windows must be positive"));
        }

        if self.jwt.secret.expose_secret().is_empty() {
            return Err(config_error("JWT_SECRET must not be empty"));
        }

        if self.environment == Environment::Prod {
            if self.jwt.secret.expose_secret().len() < 32 {
                return Err(config_error(
                    "JWT_SECRET must be at least 32 bytes in production",
                ));
            }

            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(config_error("Wildcard CORS origin not allowed in production"));
            }
        }

        Ok(())
    }
}

fn config_error(msg: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(msg.to_string()))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn get_parsed<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, default, is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
