// Dispatcher pipeline: admit -> credentials -> sign -> send -> classify -> retry

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use failsafe::futures::CircuitBreaker;
use failsafe::{backoff, failure_policy, Config as FailsafeConfig, StateMachine};
use rand::Rng;
use reqwest::{Client, Method};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::signer::{self, SignableRequest};
use crate::auth::CredentialProvider;
use crate::config::Config;
use crate::constants::{self, limits, Marketplace};
use crate::core::errors::BridgeError;
use crate::limiter::RateLimiter;

/// One upstream call. Lifetime: a single dispatcher invocation (including
/// its retries).
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub operation: &'static str,
    pub method: Method,
    pub path: String,
    /// Rate-limiter bucket key: the endpoint path template.
    pub rate_key: &'static str,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub marketplace: &'static Marketplace,
    pub deadline: Instant,
}

impl RequestContext {
    pub fn new(
        operation: &'static str,
        method: Method,
        path: String,
        rate_key: &'static str,
        marketplace: &'static Marketplace,
        deadline: Instant,
    ) -> Self {
        Self {
            operation,
            method,
            path,
            rate_key,
            query: Vec::new(),
            body: None,
            marketplace,
            deadline,
        }
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Parsed upstream response with the correlation id of the final attempt.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
    pub request_id: String,
}

struct RawResponse {
    status: u16,
    retry_after: Option<f64>,
    body: Value,
}

type BridgeCircuitBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Constant>, ()>;

/// 5 consecutive transport failures open the breaker for 5 seconds.
fn create_circuit_breaker() -> BridgeCircuitBreaker {
    FailsafeConfig::new()
        .failure_policy(failure_policy::consecutive_failures(
            5,
            backoff::constant(Duration::from_secs(5)),
        ))
        .build()
}

pub struct Dispatcher {
    http: Client,
    limiter: Arc<RateLimiter>,
    credentials: Arc<CredentialProvider>,
    config: Arc<Config>,
    breaker: BridgeCircuitBreaker,
}

impl Dispatcher {
    pub fn new(
        http: Client,
        limiter: Arc<RateLimiter>,
        credentials: Arc<CredentialProvider>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            http,
            limiter,
            credentials,
            config,
            breaker: create_circuit_breaker(),
        }
    }

    /// Base URL for a marketplace, honoring the test/dev override.
    fn base_url(&self, marketplace: &Marketplace) -> String {
        self.config
            .endpoint_override
            .clone()
            .unwrap_or_else(|| marketplace.endpoint.to_string())
    }

    /// Run the full pipeline for one logical call. Retryable classifications
    /// are retried with bounded exponential backoff, reacquiring a rate token
    /// each attempt; a 401 triggers exactly one forced credential refresh.
    pub async fn dispatch(&self, ctx: &RequestContext) -> Result<UpstreamResponse, BridgeError> {
        let mut attempt: u32 = 0;
        let mut forced_refresh_done = false;

        loop {
            if Instant::now() >= ctx.deadline {
                return Err(BridgeError::Timeout(format!(
                    "{} deadline exceeded",
                    ctx.operation
                )));
            }

            self.limiter.acquire(ctx.rate_key).await?;

            let request_id = Uuid::new_v4().to_string();
            let started = Instant::now();
            let raw = match self.attempt(ctx, &request_id).await {
                Ok(raw) => raw,
                Err(err) if err.retryable() && attempt < limits::MAX_RETRIES => {
                    warn!(
                        operation = ctx.operation,
                        request_id = %request_id,
                        attempt = attempt,
                        error = %err,
                        "transport failure, retrying"
                    );
                    self.sleep_backoff(attempt, None, ctx.deadline).await?;
                    attempt += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let elapsed_ms = started.elapsed().as_millis();
            match self.classify(ctx, raw, &request_id) {
                Classified::Success(response) => {
                    info!(
                        operation = ctx.operation,
                        request_id = %request_id,
                        status = response.status,
                        duration_ms = elapsed_ms as u64,
                        "upstream call succeeded"
                    );
                    return Ok(response);
                }
                Classified::Unauthorized(err) => {
                    if forced_refresh_done {
                        return Err(err);
                    }
                    warn!(
                        operation = ctx.operation,
                        request_id = %request_id,
                        "upstream 401, forcing credential refresh"
                    );
                    self.credentials.invalidate(ctx.marketplace.region).await;
                    forced_refresh_done = true;
                }
                Classified::Retryable(err, retry_after) => {
                    if attempt >= limits::MAX_RETRIES {
                        return Err(err);
                    }
                    warn!(
                        operation = ctx.operation,
                        request_id = %request_id,
                        attempt = attempt,
                        error = %err,
                        "retryable upstream failure"
                    );
                    self.sleep_backoff(attempt, retry_after, ctx.deadline).await?;
                    attempt += 1;
                }
                Classified::Terminal(err) => return Err(err),
            }
        }
    }

    async fn attempt(
        &self,
        ctx: &RequestContext,
        request_id: &str,
    ) -> Result<RawResponse, BridgeError> {
        let access_token = self
            .credentials
            .access_token(ctx.marketplace.region)
            .await?;
        let signing = self
            .credentials
            .signing_credentials(ctx.marketplace.region)
            .await?;

        let base = self.base_url(ctx.marketplace);
        let base_url = url::Url::parse(&base)
            .map_err(|e| BridgeError::Internal(format!("invalid endpoint '{}': {}", base, e)))?;
        let host = match (base_url.host_str(), base_url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(BridgeError::Internal(format!("endpoint '{}' has no host", base))),
        };

        let body_bytes = match &ctx.body {
            Some(body) => serde_json::to_vec(body)
                .map_err(|e| BridgeError::Internal(format!("body serialization failed: {}", e)))?,
            None => Vec::new(),
        };

        let signature = signer::sign(
            &SignableRequest {
                method: ctx.method.as_str(),
                host: &host,
                path: &ctx.path,
                query: &ctx.query,
                body: &body_bytes,
                region: ctx.marketplace.region,
                service: constants::SIGNING_SERVICE,
                timestamp: Utc::now(),
            },
            &signing,
        )?;

        let url = format!("{}{}", base.trim_end_matches('/'), ctx.path);
        let mut request = self
            .http
            .request(ctx.method.clone(), &url)
            .query(&ctx.query)
            .header("authorization", &signature.authorization)
            .header("x-amz-date", &signature.x_amz_date)
            .header("x-amz-access-token", &access_token)
            .header("user-agent", constants::USER_AGENT)
            .header("x-request-id", request_id);
        if let Some(token) = &signature.x_amz_security_token {
            request = request.header("x-amz-security-token", token);
        }
        if !body_bytes.is_empty() {
            request = request
                .header("content-type", "application/json")
                .body(body_bytes);
        }

        debug!(
            operation = ctx.operation,
            request_id = request_id,
            method = %ctx.method,
            path = %ctx.path,
            "sending upstream request"
        );

        let remaining = ctx.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            // the admitted token was never spent on a transmission
            self.limiter.release(ctx.rate_key);
            return Err(BridgeError::Timeout(format!(
                "{} deadline exceeded",
                ctx.operation
            )));
        }
        let transport_timeout = remaining.min(Duration::from_secs(self.config.request_timeout_secs));

        let send = self.breaker.call(async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let retry_after = parse_retry_after(response.headers());
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, retry_after, text))
        });

        let (status, retry_after, text) = match tokio::time::timeout(transport_timeout, send).await
        {
            Ok(Ok(parts)) => parts,
            Ok(Err(failsafe::Error::Rejected)) => {
                return Err(BridgeError::Network(
                    "upstream circuit breaker open".to_string(),
                ))
            }
            Ok(Err(failsafe::Error::Inner(e))) => {
                return Err(map_transport_error(&e));
            }
            Err(_) => {
                return if Instant::now() >= ctx.deadline {
                    Err(BridgeError::Timeout(format!(
                        "{} deadline exceeded",
                        ctx.operation
                    )))
                } else {
                    Err(BridgeError::Network(format!(
                        "transport timeout after {:?}",
                        transport_timeout
                    )))
                };
            }
        };

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }

    fn classify(&self, ctx: &RequestContext, raw: RawResponse, request_id: &str) -> Classified {
        let details = upstream_error_details(&raw.body);
        match raw.status {
            200..=299 => Classified::Success(UpstreamResponse {
                status: raw.status,
                body: raw.body,
                request_id: request_id.to_string(),
            }),
            401 => Classified::Unauthorized(BridgeError::AuthFailed(
                "upstream rejected the access token".to_string(),
            )),
            403 => Classified::Terminal(BridgeError::AuthFailed(
                "access forbidden; check the delegated role permissions".to_string(),
            )),
            429 => {
                let retry_after = raw.retry_after.unwrap_or(60.0);
                Classified::Retryable(
                    BridgeError::RateLimitExceeded { retry_after },
                    Some(retry_after),
                )
            }
            status @ (500 | 502 | 503 | 504) => Classified::Retryable(
                BridgeError::Upstream {
                    status,
                    message: format!("{} failed upstream", ctx.operation),
                    details,
                },
                None,
            ),
            status => Classified::Terminal(BridgeError::Upstream {
                status,
                message: format!("{} failed upstream", ctx.operation),
                details,
            }),
        }
    }

    /// Exponential backoff with jitter: base 500ms doubling per attempt,
    /// capped at 16s. A server-supplied retry hint takes precedence.
    async fn sleep_backoff(
        &self,
        attempt: u32,
        retry_after: Option<f64>,
        deadline: Instant,
    ) -> Result<(), BridgeError> {
        let delay = match retry_after {
            Some(hint) if hint > 0.0 => Duration::from_secs_f64(hint),
            _ => {
                let base = limits::BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(10));
                let capped = base.min(limits::BACKOFF_CAP_MS);
                let jitter = rand::thread_rng().gen_range(0.75..=1.25);
                Duration::from_millis((capped as f64 * jitter) as u64)
            }
        };

        if Instant::now() + delay >= deadline {
            return Err(BridgeError::Timeout(
                "deadline would elapse during backoff".to_string(),
            ));
        }
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

enum Classified {
    Success(UpstreamResponse),
    Unauthorized(BridgeError),
    Retryable(BridgeError, Option<f64>),
    Terminal(BridgeError),
}

fn map_transport_error(err: &reqwest::Error) -> BridgeError {
    if err.is_timeout() {
        BridgeError::Network(format!("transport timeout: {}", err))
    } else if err.is_connect() {
        BridgeError::Network(format!("connection failed: {}", err))
    } else {
        BridgeError::Network(format!("transport failure: {}", err))
    }
}

/// `Retry-After` (seconds) wins; the legacy rate-limit header is a fallback.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<f64> {
    for name in ["retry-after", "x-amzn-RateLimit-Limit"] {
        if let Some(value) = headers.get(name) {
            if let Ok(text) = value.to_str() {
                if let Ok(secs) = text.trim().parse::<f64>() {
                    if secs >= 0.0 {
                        return Some(secs);
                    }
                }
            }
        }
    }
    None
}

/// SP-API error bodies carry an `errors` array.
fn upstream_error_details(body: &Value) -> Vec<Value> {
    body.get("errors")
        .and_then(|e| e.as_array())
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_header_parsing() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("retry-after", "2.5".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(2.5));

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-amzn-RateLimit-Limit", "60".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(60.0));

        let headers = reqwest::header::HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn error_details_extracted_from_body() {
        let body = serde_json::json!({
            "errors": [{"code": "InvalidInput", "message": "bad"}]
        });
        assert_eq!(upstream_error_details(&body).len(), 1);
        assert!(upstream_error_details(&serde_json::json!({})).is_empty());
    }

    #[tokio::test]
    async fn circuit_breaker_opens_after_consecutive_failures() {
        let cb = create_circuit_breaker();

        for _ in 0..5 {
            let result = cb
                .call(async {
                    Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "boom"))
                })
                .await;
            assert!(matches!(result, Err(failsafe::Error::Inner(_))));
        }

        // the sixth call is rejected even though it would succeed
        let result = cb.call(async { Ok::<(), std::io::Error>(()) }).await;
        assert!(matches!(result, Err(failsafe::Error::Rejected)));
    }
}
