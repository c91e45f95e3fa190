/// Configuration management for the Parley chat server
use crate::error::{ChatError, ChatResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Log filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "parley=debug,tower_http=debug";

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
    pub realtime: RealtimeConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
    /// Origin allowed to make credentialed cross-origin requests
    pub cors_origin: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
    pub upload_directory: PathBuf,
    /// Maximum accepted upload size in bytes
    pub upload_limit: usize,
}

/// Token and cookie configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
    /// Revoke the presented refresh token and hand out a new one on every refresh
    pub rotate_refresh_tokens: bool,
    /// Set the `Secure` attribute on session cookies
    pub secure_cookies: bool,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub authenticated_rps: u32,
    pub unauthenticated_rps: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Realtime channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Per-connection outbox capacity; events beyond it are dropped
    pub outbox_capacity: usize,
    pub ping_interval_secs: u64,
    pub send_timeout_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: 100,
            ping_interval_secs: 30,
            send_timeout_ms: 5000,
        }
    }
}

impl ServerConfig {
    /// Configuration with local defaults and the given signing secrets
    pub fn with_secrets(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        let data_directory = PathBuf::from("./data");
        ServerConfig {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 5000,
                version: env!("CARGO_PKG_VERSION").to_string(),
                cors_origin: "http://localhost:3000".to_string(),
            },
            storage: StorageConfig {
                database: data_directory.join("parley.sqlite"),
                upload_directory: PathBuf::from("./uploads"),
                data_directory,
                upload_limit: 5 * 1024 * 1024,
            },
            authentication: AuthConfig {
                access_secret: access_secret.into(),
                refresh_secret: refresh_secret.into(),
                access_ttl_minutes: 15,
                refresh_ttl_days: 7,
                rotate_refresh_tokens: false,
                secure_cookies: false,
            },
            rate_limit: RateLimitConfig {
                enabled: true,
                authenticated_rps: 100,
                unauthenticated_rps: 10,
            },
            logging: LoggingConfig {
                level: DEFAULT_LOG_FILTER.to_string(),
            },
            realtime: RealtimeConfig::default(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> ChatResult<Self> {
        dotenv::dotenv().ok();

        let access_secret = env::var("CHAT_JWT_ACCESS_SECRET")
            .map_err(|_| ChatError::Validation("CHAT_JWT_ACCESS_SECRET required".to_string()))?;
        let refresh_secret = env::var("CHAT_JWT_REFRESH_SECRET")
            .map_err(|_| ChatError::Validation("CHAT_JWT_REFRESH_SECRET required".to_string()))?;

        let mut config = Self::with_secrets(access_secret, refresh_secret);

        if let Ok(hostname) = env::var("CHAT_HOSTNAME") {
            config.service.hostname = hostname;
        }
        if let Ok(port) = env::var("CHAT_PORT") {
            config.service.port = port
                .parse()
                .map_err(|_| ChatError::Validation("Invalid port number".to_string()))?;
        }
        if let Ok(origin) = env::var("CHAT_CORS_ORIGIN") {
            config.service.cors_origin = origin;
        }

        if let Ok(dir) = env::var("CHAT_DATA_DIRECTORY") {
            config.storage.data_directory = dir.into();
            config.storage.database = config.storage.data_directory.join("parley.sqlite");
        }
        if let Ok(db) = env::var("CHAT_DATABASE_LOCATION") {
            config.storage.database = db.into();
        }
        if let Ok(dir) = env::var("CHAT_UPLOAD_DIRECTORY") {
            config.storage.upload_directory = dir.into();
        }
        config.storage.upload_limit = env::var("CHAT_UPLOAD_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.storage.upload_limit);

        config.authentication.access_ttl_minutes = env::var("CHAT_ACCESS_TOKEN_TTL_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(15);
        config.authentication.refresh_ttl_days = env::var("CHAT_REFRESH_TOKEN_TTL_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(7);
        config.authentication.rotate_refresh_tokens = env::var("CHAT_ROTATE_REFRESH_TOKENS")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);
        config.authentication.secure_cookies = env::var("CHAT_SECURE_COOKIES")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        config.rate_limit.enabled = env::var("CHAT_RATE_LIMITS_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);
        config.rate_limit.authenticated_rps = env::var("CHAT_RATE_LIMIT_AUTHENTICATED_RPS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);
        config.rate_limit.unauthenticated_rps = env::var("CHAT_RATE_LIMIT_UNAUTHENTICATED_RPS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        config.logging.level = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());

        config.realtime.outbox_capacity = env::var("CHAT_REALTIME_OUTBOX_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> ChatResult<()> {
        if self.service.hostname.is_empty() {
            return Err(ChatError::Validation("Hostname cannot be empty".to_string()));
        }

        let auth = &self.authentication;
        if auth.access_secret.len() < 32 || auth.refresh_secret.len() < 32 {
            return Err(ChatError::Validation(
                "JWT secrets must be at least 32 characters".to_string(),
            ));
        }
        if auth.access_secret == auth.refresh_secret {
            return Err(ChatError::Validation(
                "Access and refresh secrets must differ".to_string(),
            ));
        }
        if auth.access_ttl_minutes <= 0 || auth.refresh_ttl_days <= 0 {
            return Err(ChatError::Validation("Token TTLs must be positive".to_string()));
        }
        if self.realtime.outbox_capacity == 0 {
            return Err(ChatError::Validation(
                "Realtime outbox capacity must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCESS: &str = "access-secret-for-tests-0123456789abcdef";
    const REFRESH: &str = "refresh-secret-for-tests-0123456789abcdef";

    #[test]
    fn test_defaults_validate() {
        let config = ServerConfig::with_secrets(ACCESS, REFRESH);
        assert!(config.validate().is_ok());
        assert_eq!(config.authentication.access_ttl_minutes, 15);
        assert_eq!(config.authentication.refresh_ttl_days, 7);
        assert!(!config.authentication.rotate_refresh_tokens);
    }

    #[test]
    fn test_short_secret_rejected() {
        let config = ServerConfig::with_secrets("short", REFRESH);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_identical_secrets_rejected() {
        let config = ServerConfig::with_secrets(ACCESS, ACCESS);
        assert!(matches!(config.validate(), Err(ChatError::Validation(_))));
    }
}
