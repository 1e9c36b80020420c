//! Operation adapters and the shared `Core` they run against.

pub mod feeds;
pub mod inventory;
pub mod listings;
pub mod orders;
pub mod reports;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::info;

use crate::auth::CredentialProvider;
use crate::config::Config;
use crate::constants::{self, Marketplace};
use crate::core::envelope::Envelope;
use crate::core::errors::BridgeError;
use crate::core::session::SessionGate;
use crate::dispatch::Dispatcher;
use crate::filter::manager::FilterOptions;
use crate::filter::{FilterCatalog, FilterEngine};
use crate::limiter::RateLimiter;
use crate::utils::validators;

/// Everything an operation needs, constructed once at startup and passed
/// into every handler. Test doubles are built by constructing an alternative
/// `Core` over a different `Config`.
pub struct Core {
    pub config: Arc<Config>,
    pub sessions: SessionGate,
    pub credentials: Arc<CredentialProvider>,
    pub limiter: Arc<RateLimiter>,
    pub dispatcher: Dispatcher,
    pub filters: FilterEngine,
    /// Bare client for unsigned transfers (feed document uploads).
    pub http: Client,
}

impl Core {
    pub async fn from_config(config: Config) -> Result<Self, BridgeError> {
        let config = Arc::new(config);

        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .tcp_nodelay(true)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| BridgeError::Internal(format!("failed to create HTTP client: {}", e)))?;

        let mut limiter = RateLimiter::new(config.rate_limit_mode);
        if let Some(ref path) = config.rate_limits_yaml_path {
            limiter = limiter.with_overrides_from_file(path)?;
            info!(path = ?path, "rate limit overrides loaded");
        }
        let limiter = Arc::new(limiter);

        let credentials = Arc::new(CredentialProvider::new(http.clone(), config.clone()));
        let dispatcher = Dispatcher::new(
            http.clone(),
            limiter.clone(),
            credentials.clone(),
            config.clone(),
        );

        let catalog = FilterCatalog::open(&config.filter_db_path).await?;
        let filters = FilterEngine::new(catalog);
        filters.ensure_seeded().await?;

        Ok(Self {
            config,
            sessions: SessionGate::new(),
            credentials,
            limiter,
            dispatcher,
            filters,
            http,
        })
    }

    /// Per-operation deadline, measured from now.
    pub fn deadline(&self) -> Instant {
        Instant::now() + Duration::from_secs(self.config.operation_deadline_secs)
    }
}

/// Resolve a comma-separated marketplace id list (default UK) into the
/// validated ids plus the marketplace record that selects host and region.
pub(crate) fn resolve_marketplaces(
    raw: Option<&str>,
) -> Result<(Vec<String>, &'static Marketplace), BridgeError> {
    let raw = match raw {
        Some(value) if !value.trim().is_empty() => value.to_string(),
        _ => constants::DEFAULT_MARKETPLACE.to_string(),
    };

    let ids = validators::validate_marketplace_ids(&raw).map_err(|invalid| {
        BridgeError::invalid_input_with(
            "unknown marketplace id",
            invalid.into_iter().map(|id| format!("invalid: {}", id)).collect(),
        )
    })?;

    let marketplace = constants::marketplace_by_id(&ids[0])
        .ok_or_else(|| BridgeError::invalid_input(format!("unknown marketplace id '{}'", ids[0])))?;
    Ok((ids, marketplace))
}

/// Post-process a payload with the filter engine and wrap it in the
/// standard envelope. Filter statistics land in the envelope metadata.
pub(crate) async fn respond_filtered(
    core: &Core,
    endpoint: &'static str,
    data: Value,
    options: &FilterOptions,
    extra_meta: Map<String, Value>,
) -> Envelope {
    match core.filters.apply(data, options, endpoint).await {
        Ok(application) => Envelope::ok(application.data)
            .with_meta_map(application.metadata)
            .with_meta_map(extra_meta),
        Err(err) => Envelope::error(&err).with_meta_map(extra_meta),
    }
}
