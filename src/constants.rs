// Marketplace table, API paths, and process-wide limits

/// A single SP-API marketplace: country-scoped identifier selecting the
/// regional endpoint host, signing region, and currency default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marketplace {
    pub country: &'static str,
    pub id: &'static str,
    pub endpoint: &'static str,
    pub region: &'static str,
    pub currency: &'static str,
}

/// Process-wide marketplace table. UK is the default marketplace.
pub const MARKETPLACES: &[Marketplace] = &[
    Marketplace {
        country: "UK",
        id: "A1F83G8C2ARO7P",
        endpoint: "https://sellingpartnerapi-eu.amazon.com",
        region: "eu-west-1",
        currency: "GBP",
    },
    Marketplace {
        country: "US",
        id: "ATVPDKIKX0DER",
        endpoint: "https://sellingpartnerapi-na.amazon.com",
        region: "us-east-1",
        currency: "USD",
    },
    Marketplace {
        country: "CA",
        id: "A2EUQ1WTGCTBG2",
        endpoint: "https://sellingpartnerapi-na.amazon.com",
        region: "us-east-1",
        currency: "CAD",
    },
    Marketplace {
        country: "DE",
        id: "A1PA6795UKMFR9",
        endpoint: "https://sellingpartnerapi-eu.amazon.com",
        region: "eu-west-1",
        currency: "EUR",
    },
    Marketplace {
        country: "FR",
        id: "A13V1IB3VIYZZH",
        endpoint: "https://sellingpartnerapi-eu.amazon.com",
        region: "eu-west-1",
        currency: "EUR",
    },
    Marketplace {
        country: "IT",
        id: "APJ6JRA9NG5V4",
        endpoint: "https://sellingpartnerapi-eu.amazon.com",
        region: "eu-west-1",
        currency: "EUR",
    },
    Marketplace {
        country: "ES",
        id: "A1RKKUPIHCS9HS",
        endpoint: "https://sellingpartnerapi-eu.amazon.com",
        region: "eu-west-1",
        currency: "EUR",
    },
    Marketplace {
        country: "JP",
        id: "A1VC38T7YXB528",
        endpoint: "https://sellingpartnerapi-fe.amazon.com",
        region: "us-west-2",
        currency: "JPY",
    },
];

pub const DEFAULT_MARKETPLACE: &str = "A1F83G8C2ARO7P";

/// Look up a marketplace by its opaque id.
pub fn marketplace_by_id(id: &str) -> Option<&'static Marketplace> {
    MARKETPLACES.iter().find(|m| m.id == id)
}

pub fn is_valid_marketplace_id(id: &str) -> bool {
    marketplace_by_id(id).is_some()
}

/// API path templates. These double as rate-limiter bucket keys.
pub mod paths {
    pub const ORDERS: &str = "/orders/v0/orders";
    pub const ORDER_ITEMS: &str = "/orders/v0/orders/{id}/orderItems";
    pub const INVENTORY_SUMMARIES: &str = "/fba/inventory/v1/summaries";
    pub const LISTINGS_ITEMS: &str = "/listings/2021-08-01/items";
    pub const FEEDS: &str = "/feeds/2021-06-30/feeds";
    pub const FEED_DOCUMENTS: &str = "/feeds/2021-06-30/documents";
    pub const REPORTS: &str = "/reports/2021-06-30/reports";
    pub const PRICING: &str = "/products/pricing/v0/price";
}

/// Published SP-API rate limits: (path key, requests/second, burst).
/// Treated as defaults only; deployments override via the limits YAML.
pub const DEFAULT_RATE_LIMITS: &[(&str, f64, u32)] = &[
    (paths::ORDERS, 0.0167, 20),
    (paths::ORDER_ITEMS, 0.5, 30),
    (paths::INVENTORY_SUMMARIES, 5.0, 10),
    (paths::LISTINGS_ITEMS, 5.0, 10),
    (paths::FEEDS, 15.0, 30),
    (paths::REPORTS, 15.0, 30),
    (paths::PRICING, 10.0, 20),
];

/// Fallback bucket for endpoints with no configured entry.
pub const FALLBACK_RATE: f64 = 5.0;
pub const FALLBACK_BURST: u32 = 10;

pub const ORDER_STATUSES: &[&str] = &[
    "PendingAvailability",
    "Pending",
    "Unshipped",
    "PartiallyShipped",
    "Shipped",
    "Canceled",
    "Unfulfillable",
    "InvoiceUnconfirmed",
    "Canceling",
];

pub const FULFILLMENT_TYPES: &[&str] = &["FBA", "FBM", "ALL"];

/// Feed document content types accepted by the upload step.
pub const FEED_CONTENT_TYPES: &[(&str, &str)] = &[
    ("XML", "text/xml; charset=UTF-8"),
    ("TEXT", "text/plain; charset=UTF-8"),
    ("CSV", "text/csv; charset=UTF-8"),
    ("JSON", "application/json; charset=UTF-8"),
];

pub mod limits {
    /// Session tokens are 32 random bytes rendered as lowercase hex.
    pub const SESSION_TOKEN_BYTES: usize = 32;

    /// Listing attribute lists capped by the marketplace schema.
    pub const MAX_BULLET_POINTS: usize = 5;
    pub const MAX_SEARCH_TERMS: usize = 5;

    pub const MIN_HANDLING_TIME_DAYS: i64 = 1;
    pub const MAX_HANDLING_TIME_DAYS: i64 = 30;

    pub const MAX_BULK_UPDATE_ITEMS: usize = 10_000;

    /// Default pagination cap when the caller does not supply one.
    pub const DEFAULT_MAX_RESULTS: usize = 100;
    pub const MAX_MAX_RESULTS: usize = 5_000;

    /// Filter engine evaluation budgets.
    pub const FILTER_MAX_DEPTH: usize = 32;
    pub const FILTER_MAX_NODES: usize = 10_000;

    /// Dispatcher retry policy.
    pub const MAX_RETRIES: u32 = 3;
    pub const BACKOFF_BASE_MS: u64 = 500;
    pub const BACKOFF_CAP_MS: u64 = 16_000;

    /// Credentials within this margin of expiry are refreshed first.
    pub const CREDENTIAL_EXPIRY_MARGIN_SECS: i64 = 60;

    pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;
}

pub const USER_AGENT: &str = concat!("spapi-bridge/", env!("CARGO_PKG_VERSION"), " (Language=Rust)");

pub const SIGNING_SERVICE: &str = "execute-api";

pub const LWA_TOKEN_URL: &str = "https://api.amazon.com/auth/o2/token";
pub const STS_ENDPOINT: &str = "https://sts.amazonaws.com";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_marketplace_is_uk() {
        let m = marketplace_by_id(DEFAULT_MARKETPLACE).unwrap();
        assert_eq!(m.country, "UK");
        assert_eq!(m.region, "eu-west-1");
        assert_eq!(m.currency, "GBP");
    }

    #[test]
    fn required_marketplaces_present() {
        for code in ["UK", "US", "DE", "FR", "JP"] {
            assert!(
                MARKETPLACES.iter().any(|m| m.country == code),
                "missing marketplace {}",
                code
            );
        }
    }

    #[test]
    fn rate_table_has_orders_entry() {
        let (_, rate, burst) = DEFAULT_RATE_LIMITS
            .iter()
            .find(|(p, _, _)| *p == paths::ORDERS)
            .unwrap();
        assert!(*rate < 1.0);
        assert_eq!(*burst, 20);
    }
}
