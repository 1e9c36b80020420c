// Credential manager - LWA access tokens and signed-request credentials

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::auth::signer::{self, SignableRequest, SigningCredentials};
use crate::config::Config;
use crate::constants::limits::CREDENTIAL_EXPIRY_MARGIN_SECS;
use crate::core::errors::BridgeError;

/// A short-lived bearer token from the identity provider.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// One cache slot per (region, kind). The async mutex is held across the
/// refresh call, so concurrent observers of an expired artifact coalesce
/// onto a single upstream request and all see its result.
type Slot<T> = Arc<AsyncMutex<Option<T>>>;

pub struct CredentialProvider {
    http: Client,
    config: Arc<Config>,
    access_tokens: Mutex<HashMap<String, Slot<AccessToken>>>,
    signing: Mutex<HashMap<String, Slot<SigningCredentials>>>,
}

fn slot_for<T>(map: &Mutex<HashMap<String, Slot<T>>>, region: &str) -> Slot<T> {
    let mut guard = map.lock().unwrap_or_else(|e| e.into_inner());
    guard
        .entry(region.to_string())
        .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
        .clone()
}

fn is_fresh(expires_at: Option<DateTime<Utc>>) -> bool {
    match expires_at {
        // static credentials never expire
        None => true,
        Some(at) => at - Duration::seconds(CREDENTIAL_EXPIRY_MARGIN_SECS) > Utc::now(),
    }
}

impl CredentialProvider {
    pub fn new(http: Client, config: Arc<Config>) -> Self {
        Self {
            http,
            config,
            access_tokens: Mutex::new(HashMap::new()),
            signing: Mutex::new(HashMap::new()),
        }
    }

    /// Current access token for a region, refreshing through the identity
    /// provider when missing or within the expiry safety margin.
    pub async fn access_token(&self, region: &str) -> Result<String, BridgeError> {
        let slot = slot_for(&self.access_tokens, region);
        let mut guard = slot.lock().await;

        if let Some(cached) = guard.as_ref() {
            if is_fresh(Some(cached.expires_at)) {
                return Ok(cached.token.clone());
            }
            debug!(region = region, "access token within expiry margin, refreshing");
        }

        let fresh = self.refresh_access_token().await?;
        let token = fresh.token.clone();
        *guard = Some(fresh);
        Ok(token)
    }

    /// Current signing credentials for a region: either the assumed-role
    /// triple or the static key pair.
    pub async fn signing_credentials(
        &self,
        region: &str,
    ) -> Result<SigningCredentials, BridgeError> {
        let slot = slot_for(&self.signing, region);
        let mut guard = slot.lock().await;

        if let Some(cached) = guard.as_ref() {
            if is_fresh(cached.expires_at) {
                return Ok(cached.clone());
            }
            debug!(region = region, "signed credentials expiring, re-assuming role");
        }

        let fresh = self.obtain_signing_credentials().await?;
        *guard = Some(fresh.clone());
        Ok(fresh)
    }

    /// Drop cached artifacts for a region so the next call re-mints them.
    /// Used for the one forced refresh after an upstream 401.
    pub async fn invalidate(&self, region: &str) {
        warn!(region = region, "invalidating cached credentials");
        let token_slot = slot_for(&self.access_tokens, region);
        *token_slot.lock().await = None;
        let signing_slot = slot_for(&self.signing, region);
        *signing_slot.lock().await = None;
    }

    async fn refresh_access_token(&self) -> Result<AccessToken, BridgeError> {
        let (client_id, client_secret, refresh_token) = match (
            &self.config.lwa_client_id,
            &self.config.lwa_client_secret,
            &self.config.lwa_refresh_token,
        ) {
            (Some(id), Some(secret), Some(refresh)) => (id, secret, refresh),
            _ => {
                return Err(BridgeError::AuthFailed(
                    "LWA credentials are not configured".to_string(),
                ))
            }
        };

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret().as_str()),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.expose_secret().as_str()),
        ];

        let response = self
            .http
            .post(&self.config.lwa_token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| BridgeError::AuthFailed(format!("token refresh failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::AuthFailed(format!(
                "token endpoint returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| BridgeError::AuthFailed(format!("malformed token response: {}", e)))?;

        let token = payload["access_token"]
            .as_str()
            .ok_or_else(|| BridgeError::AuthFailed("token response missing access_token".into()))?
            .to_string();
        let expires_in = payload["expires_in"].as_i64().unwrap_or(3600);

        info!(expires_in = expires_in, "access token refreshed");
        Ok(AccessToken {
            token,
            expires_at: Utc::now() + Duration::seconds(expires_in),
        })
    }

    async fn obtain_signing_credentials(&self) -> Result<SigningCredentials, BridgeError> {
        let (key_id, secret) = match (
            &self.config.aws_access_key_id,
            &self.config.aws_secret_access_key,
        ) {
            (Some(id), Some(secret)) => (id.clone(), secret.expose_secret().clone()),
            _ => {
                return Err(BridgeError::AuthFailed(
                    "signing credentials are not configured".to_string(),
                ))
            }
        };

        let static_pair = SigningCredentials {
            access_key_id: key_id,
            secret_access_key: secret,
            session_token: None,
            expires_at: None,
        };

        match &self.config.role_arn {
            Some(role_arn) => self.assume_role(&static_pair, role_arn).await,
            None => Ok(static_pair),
        }
    }

    /// Exchange the static pair for a temporary triple via the federation
    /// endpoint (STS AssumeRole, JSON response).
    async fn assume_role(
        &self,
        base: &SigningCredentials,
        role_arn: &str,
    ) -> Result<SigningCredentials, BridgeError> {
        let endpoint = url::Url::parse(&self.config.sts_endpoint)
            .map_err(|e| BridgeError::Internal(format!("invalid STS endpoint: {}", e)))?;
        let host = endpoint
            .host_str()
            .ok_or_else(|| BridgeError::Internal("STS endpoint missing host".into()))?
            .to_string();
        let host = match endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        };

        let query = vec![
            ("Action".to_string(), "AssumeRole".to_string()),
            ("Version".to_string(), "2011-06-15".to_string()),
            ("RoleArn".to_string(), role_arn.to_string()),
            ("RoleSessionName".to_string(), "spapi-bridge".to_string()),
        ];

        let headers = signer::sign(
            &SignableRequest {
                method: "GET",
                host: &host,
                path: "/",
                query: &query,
                body: b"",
                region: "us-east-1",
                service: "sts",
                timestamp: Utc::now(),
            },
            base,
        )?;

        let mut request = self
            .http
            .get(self.config.sts_endpoint.clone())
            .query(&query)
            .header("accept", "application/json")
            .header("authorization", headers.authorization)
            .header("x-amz-date", headers.x_amz_date);
        if let Some(token) = headers.x_amz_security_token {
            request = request.header("x-amz-security-token", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BridgeError::AuthFailed(format!("role assumption failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::AuthFailed(format!(
                "federation endpoint returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| BridgeError::AuthFailed(format!("malformed federation response: {}", e)))?;
        let creds = &payload["AssumeRoleResponse"]["AssumeRoleResult"]["Credentials"];

        let access_key_id = creds["AccessKeyId"]
            .as_str()
            .ok_or_else(|| BridgeError::AuthFailed("federation response missing AccessKeyId".into()))?
            .to_string();
        let secret_access_key = creds["SecretAccessKey"]
            .as_str()
            .ok_or_else(|| {
                BridgeError::AuthFailed("federation response missing SecretAccessKey".into())
            })?
            .to_string();
        let session_token = creds["SessionToken"].as_str().map(|s| s.to_string());
        let expires_at = parse_expiration(&creds["Expiration"]);

        info!(role = role_arn, "assumed delegated role");
        Ok(SigningCredentials {
            access_key_id,
            secret_access_key,
            session_token,
            expires_at,
        })
    }
}

/// STS renders expirations as either epoch seconds or an ISO-8601 string
/// depending on the response serialization.
fn parse_expiration(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let secs = n.as_f64()?;
            DateTime::from_timestamp(secs as i64, 0)
        }
        Value::String(s) => crate::utils::time::parse_iso8601(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_margin() {
        assert!(is_fresh(None));
        assert!(is_fresh(Some(Utc::now() + Duration::seconds(3600))));
        // inside the 60s safety margin counts as expired
        assert!(!is_fresh(Some(Utc::now() + Duration::seconds(30))));
        assert!(!is_fresh(Some(Utc::now() - Duration::seconds(10))));
    }

    #[test]
    fn expiration_parsing_accepts_both_shapes() {
        assert!(parse_expiration(&serde_json::json!(1_900_000_000.0)).is_some());
        assert!(parse_expiration(&serde_json::json!("2030-01-01T00:00:00Z")).is_some());
        assert!(parse_expiration(&serde_json::json!(null)).is_none());
    }

    #[tokio::test]
    async fn missing_lwa_credentials_is_auth_failed() {
        let provider = CredentialProvider::new(Client::new(), Arc::new(Config::test_config()));
        let err = provider.access_token("eu-west-1").await.unwrap_err();
        assert_eq!(err.code(), "auth_failed");
    }

    #[tokio::test]
    async fn missing_signing_credentials_is_auth_failed() {
        let provider = CredentialProvider::new(Client::new(), Arc::new(Config::test_config()));
        let err = provider.signing_credentials("eu-west-1").await.unwrap_err();
        assert_eq!(err.code(), "auth_failed");
    }

    #[tokio::test]
    async fn static_pair_used_without_role() {
        let mut config = Config::test_config();
        config.aws_access_key_id = Some("AKIDSTATIC".to_string());
        config.aws_secret_access_key = Some(secrecy::Secret::new("shhh".to_string()));
        let provider = CredentialProvider::new(Client::new(), Arc::new(config));

        let creds = provider.signing_credentials("eu-west-1").await.unwrap();
        assert_eq!(creds.access_key_id, "AKIDSTATIC");
        assert!(creds.session_token.is_none());
        assert!(creds.expires_at.is_none());
    }
}
