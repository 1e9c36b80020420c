// Pagination driver - follows continuation tokens up to the caller's cap

use serde_json::Value;
use tracing::debug;

use crate::core::errors::BridgeError;
use crate::dispatch::dispatcher::{Dispatcher, RequestContext};

/// Where a paginated endpoint keeps its records and its continuation token.
///
/// Token casing differs across the API surface (`NextToken` for orders,
/// `pagination.nextToken` for inventory), so each endpoint declares both the
/// response paths and the outgoing query parameter.
#[derive(Debug, Clone, Copy)]
pub struct PageSpec {
    pub records_path: &'static [&'static str],
    pub token_paths: &'static [&'static [&'static str]],
    pub token_param: &'static str,
}

pub const ORDERS_PAGES: PageSpec = PageSpec {
    records_path: &["payload", "Orders"],
    token_paths: &[&["payload", "NextToken"]],
    token_param: "NextToken",
};

pub const ORDER_ITEMS_PAGES: PageSpec = PageSpec {
    records_path: &["payload", "OrderItems"],
    token_paths: &[&["payload", "NextToken"]],
    token_param: "NextToken",
};

pub const INVENTORY_PAGES: PageSpec = PageSpec {
    records_path: &["payload", "inventorySummaries"],
    token_paths: &[&["pagination", "nextToken"], &["payload", "pagination", "nextToken"]],
    token_param: "nextToken",
};

/// All pages concatenated in server order, plus the last-seen request id.
#[derive(Debug)]
pub struct PaginatedResult {
    pub records: Vec<Value>,
    pub pages_fetched: usize,
    pub last_request_id: String,
    /// True when the server had more records beyond the cap.
    pub truncated: bool,
}

fn value_at<'a>(body: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = body;
    for segment in path {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Fetch pages sequentially until the server stops returning a token, the
/// record cap is reached, or the context deadline elapses (surfaced by the
/// dispatcher as `Timeout`).
pub async fn fetch_pages(
    dispatcher: &Dispatcher,
    base: &RequestContext,
    spec: &PageSpec,
    cap: usize,
) -> Result<PaginatedResult, BridgeError> {
    let mut records: Vec<Value> = Vec::new();
    let mut token: Option<String> = None;
    let mut pages = 0usize;
    let mut last_request_id = String::new();
    let mut truncated = false;

    loop {
        let mut ctx = base.clone();
        if let Some(ref t) = token {
            ctx.query.push((spec.token_param.to_string(), t.clone()));
        }

        let response = dispatcher.dispatch(&ctx).await?;
        pages += 1;
        last_request_id = response.request_id.clone();

        let page_records = value_at(&response.body, spec.records_path)
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        debug!(
            operation = base.operation,
            page = pages,
            records = page_records.len(),
            "fetched page"
        );

        let remaining = cap.saturating_sub(records.len());
        if page_records.len() > remaining {
            records.extend(page_records.into_iter().take(remaining));
            truncated = true;
        } else {
            records.extend(page_records);
        }

        token = spec
            .token_paths
            .iter()
            .find_map(|path| value_at(&response.body, path))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        if records.len() >= cap {
            truncated = truncated || token.is_some();
            break;
        }
        if token.is_none() {
            break;
        }
    }

    Ok(PaginatedResult {
        records,
        pages_fetched: pages,
        last_request_id,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_at_walks_nested_paths() {
        let body = json!({"payload": {"Orders": [1, 2], "NextToken": "abc"}});
        assert_eq!(
            value_at(&body, &["payload", "NextToken"]),
            Some(&json!("abc"))
        );
        assert_eq!(value_at(&body, &["payload", "missing"]), None);
    }

    #[test]
    fn inventory_spec_checks_both_token_locations() {
        let top = json!({"pagination": {"nextToken": "t1"}});
        let nested = json!({"payload": {"pagination": {"nextToken": "t2"}}});
        let spec = INVENTORY_PAGES;
        let find = |body: &Value| {
            spec.token_paths
                .iter()
                .find_map(|path| value_at(body, path))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };
        assert_eq!(find(&top), Some("t1".to_string()));
        assert_eq!(find(&nested), Some("t2".to_string()));
    }
}
