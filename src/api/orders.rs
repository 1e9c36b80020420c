// Orders operation adapters

use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::api::{resolve_marketplaces, respond_filtered, Core};
use crate::constants::{limits, paths};
use crate::core::envelope::Envelope;
use crate::core::errors::BridgeError;
use crate::dispatch::pagination::{self, ORDERS_PAGES, ORDER_ITEMS_PAGES};
use crate::dispatch::RequestContext;
use crate::filter::manager::FilterOptions;
use crate::utils::validators;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOrdersParams {
    #[serde(default)]
    pub marketplace_ids: Option<String>,
    #[serde(default)]
    pub created_after: Option<String>,
    #[serde(default)]
    pub created_before: Option<String>,
    /// Comma-separated order statuses.
    #[serde(default)]
    pub statuses: Option<String>,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(flatten)]
    pub filter: FilterOptions,
}

/// `GET /orders/v0/orders`, paginated.
pub async fn list_orders(core: &Core, params: ListOrdersParams) -> Envelope {
    match list_orders_inner(core, &params).await {
        Ok((data, extra)) => respond_filtered(core, "listOrders", data, &params.filter, extra).await,
        Err(err) => Envelope::error(&err),
    }
}

async fn list_orders_inner(
    core: &Core,
    params: &ListOrdersParams,
) -> Result<(Value, Map<String, Value>), BridgeError> {
    let (ids, marketplace) = resolve_marketplaces(params.marketplace_ids.as_deref())?;

    let mut errors = Vec::new();
    let created_after = params
        .created_after
        .clone()
        .unwrap_or_else(|| default_created_after());
    if !validators::is_iso8601_date(&created_after) {
        errors.push(format!("createdAfter is not ISO-8601: {}", created_after));
    }
    if let Some(ref before) = params.created_before {
        if !validators::is_iso8601_date(before) {
            errors.push(format!("createdBefore is not ISO-8601: {}", before));
        }
    }
    let statuses: Vec<String> = params
        .statuses
        .as_deref()
        .map(|s| s.split(',').map(|x| x.trim().to_string()).collect())
        .unwrap_or_default();
    for status in &statuses {
        if !validators::is_valid_order_status(status) {
            errors.push(format!("unknown order status: {}", status));
        }
    }
    if !errors.is_empty() {
        return Err(BridgeError::invalid_input_with(
            "Input validation failed",
            errors,
        ));
    }

    let cap = params
        .max_results
        .unwrap_or(limits::DEFAULT_MAX_RESULTS)
        .min(limits::MAX_MAX_RESULTS)
        .max(1);

    let mut ctx = RequestContext::new(
        "listOrders",
        Method::GET,
        paths::ORDERS.to_string(),
        paths::ORDERS,
        marketplace,
        core.deadline(),
    )
    .with_query("MarketplaceIds", ids.join(","))
    .with_query("CreatedAfter", created_after);
    if let Some(ref before) = params.created_before {
        ctx = ctx.with_query("CreatedBefore", before.clone());
    }
    if !statuses.is_empty() {
        ctx = ctx.with_query("OrderStatuses", statuses.join(","));
    }

    let pages = pagination::fetch_pages(&core.dispatcher, &ctx, &ORDERS_PAGES, cap).await?;

    let mut extra = Map::new();
    extra.insert("marketplace_id".to_string(), json!(ids[0]));
    extra.insert("request_id".to_string(), json!(pages.last_request_id));
    extra.insert("orders_retrieved".to_string(), json!(pages.records.len()));
    extra.insert(
        "pagination_complete".to_string(),
        json!(!pages.truncated),
    );

    Ok((Value::Array(pages.records), extra))
}

/// Orders newer than 30 days by default, matching the upstream default window.
fn default_created_after() -> String {
    use chrono::{Duration, SecondsFormat, Utc};
    (Utc::now() - Duration::days(30)).to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetOrderParams {
    pub order_id: String,
}

/// `GET /orders/v0/orders/{id}`.
pub async fn get_order(core: &Core, params: GetOrderParams) -> Envelope {
    let order_id = params.order_id.trim();
    if order_id.is_empty() || order_id.contains(|c: char| c.is_whitespace() || c == '/') {
        return Envelope::error(&BridgeError::invalid_input("orderId is malformed"));
    }

    let marketplace = match resolve_marketplaces(None) {
        Ok((_, m)) => m,
        Err(err) => return Envelope::error(&err),
    };

    let ctx = RequestContext::new(
        "getOrder",
        Method::GET,
        format!("{}/{}", paths::ORDERS, order_id),
        paths::ORDERS,
        marketplace,
        core.deadline(),
    );

    match core.dispatcher.dispatch(&ctx).await {
        Ok(response) => {
            let data = response
                .body
                .get("payload")
                .cloned()
                .unwrap_or(response.body);
            Envelope::ok(data)
                .with_meta("order_id", json!(order_id))
                .with_meta("request_id", json!(response.request_id))
        }
        Err(err) => Envelope::error(&err),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetOrderItemsParams {
    pub order_id: String,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(flatten)]
    pub filter: FilterOptions,
}

/// `GET /orders/v0/orders/{id}/orderItems`, paginated. This endpoint has the
/// strictest rate limit on the surface (0.5 rps), hence its own bucket key.
pub async fn get_order_items(core: &Core, params: GetOrderItemsParams) -> Envelope {
    let order_id = params.order_id.trim().to_string();
    if order_id.is_empty() || order_id.contains(|c: char| c.is_whitespace() || c == '/') {
        return Envelope::error(&BridgeError::invalid_input("orderId is malformed"));
    }

    let marketplace = match resolve_marketplaces(None) {
        Ok((_, m)) => m,
        Err(err) => return Envelope::error(&err),
    };

    let cap = params
        .max_results
        .unwrap_or(limits::DEFAULT_MAX_RESULTS)
        .min(limits::MAX_MAX_RESULTS)
        .max(1);

    let ctx = RequestContext::new(
        "getOrderItems",
        Method::GET,
        format!("{}/{}/orderItems", paths::ORDERS, order_id),
        paths::ORDER_ITEMS,
        marketplace,
        core.deadline(),
    );

    let pages = match pagination::fetch_pages(&core.dispatcher, &ctx, &ORDER_ITEMS_PAGES, cap).await
    {
        Ok(pages) => pages,
        Err(err) => return Envelope::error(&err),
    };

    let mut extra = Map::new();
    extra.insert("order_id".to_string(), json!(order_id));
    extra.insert("request_id".to_string(), json!(pages.last_request_id));
    extra.insert("items_count".to_string(), json!(pages.records.len()));

    respond_filtered(
        core,
        "getOrderItems",
        Value::Array(pages.records),
        &params.filter,
        extra,
    )
    .await
}
