// Configuration management

use std::env;
use std::path::PathBuf;

use secrecy::Secret;

use crate::constants;
use crate::core::errors::BridgeError;

/// How the dispatcher behaves when a rate bucket is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitMode {
    /// Cooperatively sleep until a token refills.
    Wait,
    /// Return `rate_limit_exceeded` with a retry hint immediately.
    FailFast,
}

/// Application configuration loaded from environment variables.
///
/// Credential variables are optional: a missing set disables the operations
/// that need it at call time rather than refusing to start, so read-only
/// tooling (filter inspection) keeps working without upstream access.
#[derive(Debug, Clone)]
pub struct Config {
    // Login-with-Amazon (access token refresh)
    pub lwa_client_id: Option<String>,
    pub lwa_client_secret: Option<Secret<String>>,
    pub lwa_refresh_token: Option<Secret<String>>,
    pub lwa_token_url: String,

    // Request signing
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<Secret<String>>,
    pub role_arn: Option<String>,
    pub sts_endpoint: String,

    /// Routes every marketplace to a single base URL when set. Used by
    /// integration tests and local upstream doubles.
    pub endpoint_override: Option<String>,

    // Filter catalog
    pub filter_db_path: PathBuf,

    // Rate limiting
    pub rate_limits_yaml_path: Option<PathBuf>,
    pub rate_limit_mode: RateLimitMode,

    // Timeouts
    pub request_timeout_secs: u64,
    pub operation_deadline_secs: u64,

    // Logging
    pub log_level: String,
    pub log_format: String, // "json" or "text"
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Honors a `.env` file in development via the dotenv crate.
    pub fn from_env() -> Result<Self, BridgeError> {
        #[cfg(not(test))]
        {
            dotenv::dotenv().ok();
        }

        let config = Self {
            lwa_client_id: Self::optional("LWA_CLIENT_ID"),
            lwa_client_secret: Self::optional("LWA_CLIENT_SECRET").map(Secret::new),
            lwa_refresh_token: Self::optional("LWA_REFRESH_TOKEN").map(Secret::new),
            lwa_token_url: Self::or_default("LWA_TOKEN_URL", constants::LWA_TOKEN_URL),
            aws_access_key_id: Self::optional("AWS_ACCESS_KEY_ID"),
            aws_secret_access_key: Self::optional("AWS_SECRET_ACCESS_KEY").map(Secret::new),
            role_arn: Self::optional("SPAPI_ROLE_ARN"),
            sts_endpoint: Self::or_default("STS_ENDPOINT", constants::STS_ENDPOINT),
            endpoint_override: Self::optional("SPAPI_ENDPOINT_OVERRIDE"),
            filter_db_path: PathBuf::from(Self::or_default("FILTER_DB_PATH", "filters.db")),
            rate_limits_yaml_path: Self::optional("RATE_LIMITS_YAML_PATH").map(PathBuf::from),
            rate_limit_mode: Self::parse_rate_limit_mode()?,
            request_timeout_secs: Self::parse_u64_or_default("REQUEST_TIMEOUT_SECS", 30)?,
            operation_deadline_secs: Self::parse_u64_or_default("OPERATION_DEADLINE_SECS", 120)?,
            log_level: Self::or_default("LOG_LEVEL", "info"),
            log_format: Self::or_default("LOG_FORMAT", "text"),
        };

        config.validate()?;
        Ok(config)
    }

    /// True when the LWA refresh flow has everything it needs.
    pub fn has_lwa_credentials(&self) -> bool {
        self.lwa_client_id.is_some()
            && self.lwa_client_secret.is_some()
            && self.lwa_refresh_token.is_some()
    }

    /// True when outbound requests can be signed.
    pub fn has_signing_credentials(&self) -> bool {
        self.aws_access_key_id.is_some() && self.aws_secret_access_key.is_some()
    }

    fn optional(key: &str) -> Option<String> {
        match env::var(key) {
            Ok(value) if !value.is_empty() => Some(value),
            _ => None,
        }
    }

    fn or_default(key: &str, default: &str) -> String {
        env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
    }

    fn parse_u64_or_default(key: &str, default: u64) -> Result<u64, BridgeError> {
        match env::var(key) {
            Ok(value) => {
                let parsed = value.parse::<u64>().map_err(|e| {
                    BridgeError::Internal(format!("invalid {} value '{}': {}", key, value, e))
                })?;
                if parsed == 0 {
                    return Err(BridgeError::Internal(format!(
                        "{} must be greater than 0",
                        key
                    )));
                }
                Ok(parsed)
            }
            _ => Ok(default),
        }
    }

    fn parse_rate_limit_mode() -> Result<RateLimitMode, BridgeError> {
        match env::var("RATE_LIMIT_MODE") {
            Ok(value) => match value.as_str() {
                "wait" => Ok(RateLimitMode::Wait),
                "fail_fast" => Ok(RateLimitMode::FailFast),
                other => Err(BridgeError::Internal(format!(
                    "invalid RATE_LIMIT_MODE '{}': must be 'wait' or 'fail_fast'",
                    other
                ))),
            },
            _ => Ok(RateLimitMode::Wait),
        }
    }

    fn validate(&self) -> Result<(), BridgeError> {
        Self::validate_url(&self.lwa_token_url, "LWA_TOKEN_URL")?;
        Self::validate_url(&self.sts_endpoint, "STS_ENDPOINT")?;
        if let Some(ref override_url) = self.endpoint_override {
            Self::validate_url(override_url, "SPAPI_ENDPOINT_OVERRIDE")?;
        }
        Self::validate_log_level(&self.log_level)?;
        Self::validate_log_format(&self.log_format)?;
        Ok(())
    }

    fn validate_url(value: &str, key: &str) -> Result<(), BridgeError> {
        url::Url::parse(value)
            .map_err(|e| BridgeError::Internal(format!("invalid {} '{}': {}", key, value, e)))?;
        Ok(())
    }

    fn validate_log_level(level: &str) -> Result<(), BridgeError> {
        let valid = ["trace", "debug", "info", "warn", "error"];
        if valid.contains(&level.to_lowercase().as_str()) {
            Ok(())
        } else {
            Err(BridgeError::Internal(format!(
                "invalid LOG_LEVEL '{}': must be one of {}",
                level,
                valid.join(", ")
            )))
        }
    }

    fn validate_log_format(format: &str) -> Result<(), BridgeError> {
        if format == "json" || format == "text" {
            Ok(())
        } else {
            Err(BridgeError::Internal(format!(
                "invalid LOG_FORMAT '{}': must be 'json' or 'text'",
                format
            )))
        }
    }
}

impl Config {
    /// Configuration for unit tests: no credentials, in-memory catalog,
    /// fail-fast limiter so tests never sleep.
    pub fn test_config() -> Self {
        Self {
            lwa_client_id: None,
            lwa_client_secret: None,
            lwa_refresh_token: None,
            lwa_token_url: constants::LWA_TOKEN_URL.to_string(),
            aws_access_key_id: None,
            aws_secret_access_key: None,
            role_arn: None,
            sts_endpoint: constants::STS_ENDPOINT.to_string(),
            endpoint_override: None,
            filter_db_path: PathBuf::from(":memory:"),
            rate_limits_yaml_path: None,
            rate_limit_mode: RateLimitMode::FailFast,
            request_timeout_secs: 5,
            operation_deadline_secs: 30,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}
