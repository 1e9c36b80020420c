// Inventory operation adapter

use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::api::{resolve_marketplaces, respond_filtered, Core};
use crate::constants::{limits, paths};
use crate::core::envelope::Envelope;
use crate::core::errors::BridgeError;
use crate::dispatch::pagination::{self, INVENTORY_PAGES};
use crate::dispatch::RequestContext;
use crate::filter::manager::FilterOptions;
use crate::utils::validators;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryParams {
    #[serde(default)]
    pub marketplace_ids: Option<String>,
    /// FBA, FBM, or ALL.
    #[serde(default)]
    pub fulfillment_type: Option<String>,
    #[serde(default)]
    pub details: Option<bool>,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(flatten)]
    pub filter: FilterOptions,
}

/// `GET /fba/inventory/v1/summaries`. Zero-quantity rows are dropped and the
/// result sorts by total quantity, highest first.
///
/// The FBM path is a documented limitation: the FBA inventory API cannot see
/// merchant-fulfilled stock, so FBM requests return a best-effort empty view
/// with an explicit warning instead of silently partial data.
pub async fn inventory_in_stock(core: &Core, params: InventoryParams) -> Envelope {
    let (ids, marketplace) = match resolve_marketplaces(params.marketplace_ids.as_deref()) {
        Ok(resolved) => resolved,
        Err(err) => return Envelope::error(&err),
    };

    let fulfillment = params
        .fulfillment_type
        .clone()
        .unwrap_or_else(|| "ALL".to_string())
        .to_ascii_uppercase();
    if !validators::is_valid_fulfillment_type(&fulfillment) {
        return Envelope::error(&BridgeError::invalid_input(format!(
            "fulfillmentType must be FBA, FBM, or ALL, got '{}'",
            fulfillment
        )));
    }

    let details = params.details.unwrap_or(true);
    let cap = params
        .max_results
        .unwrap_or(limits::DEFAULT_MAX_RESULTS)
        .min(limits::MAX_MAX_RESULTS)
        .max(1);

    if fulfillment == "FBM" {
        return fbm_best_effort(core, &ids, &params.filter).await;
    }

    let ctx = RequestContext::new(
        "inventoryInStock",
        Method::GET,
        paths::INVENTORY_SUMMARIES.to_string(),
        paths::INVENTORY_SUMMARIES,
        marketplace,
        core.deadline(),
    )
    .with_query("granularityType", "Marketplace")
    .with_query("granularityId", ids[0].clone())
    .with_query("marketplaceIds", ids.join(","))
    .with_query("details", if details { "true" } else { "false" });

    let pages = match pagination::fetch_pages(&core.dispatcher, &ctx, &INVENTORY_PAGES, cap).await {
        Ok(pages) => pages,
        Err(err) => return Envelope::error(&err),
    };

    let mut inventory: Vec<Value> = pages
        .records
        .iter()
        .filter(|item| item.get("totalQuantity").and_then(|q| q.as_i64()).unwrap_or(0) > 0)
        .map(|item| transform_inventory_item(item, details))
        .collect();
    inventory.sort_by_key(|item| {
        std::cmp::Reverse(item.get("total_quantity").and_then(|q| q.as_i64()).unwrap_or(0))
    });

    let total_units: i64 = inventory
        .iter()
        .map(|item| item.get("total_quantity").and_then(|q| q.as_i64()).unwrap_or(0))
        .sum();

    let data = json!({
        "summary": {
            "products_in_stock": inventory.len(),
            "total_units": total_units,
            "marketplace": ids.join(","),
            "fulfillment_type": fulfillment,
            "note": "Shows FBA inventory only",
        },
        "inventory": inventory,
    });

    let mut extra = Map::new();
    extra.insert("marketplace_id".to_string(), json!(ids[0]));
    extra.insert("request_id".to_string(), json!(pages.last_request_id));
    extra.insert("total_api_calls".to_string(), json!(pages.pages_fetched));

    respond_filtered(core, "inventoryInStock", data, &params.filter, extra).await
}

/// The FBA inventory API has no merchant-fulfilled view; answer with an
/// explicit warning rather than partial data.
async fn fbm_best_effort(core: &Core, ids: &[String], filter: &FilterOptions) -> Envelope {
    let data = json!({
        "summary": {
            "products_in_stock": 0,
            "total_units": 0,
            "marketplace": ids.join(","),
            "fulfillment_type": "FBM",
        },
        "inventory": [],
    });

    let mut extra = Map::new();
    extra.insert("marketplace_id".to_string(), json!(ids[0]));
    extra.insert(
        "warning".to_string(),
        json!(
            "FBM inventory is not visible to the FBA inventory API; use getListing \
             per SKU or request a merchant listings report for a complete view"
        ),
    );

    respond_filtered(core, "inventoryInStock", data, filter, extra).await
}

/// Reshape a raw inventory summary into the stable snake_case form.
fn transform_inventory_item(item: &Value, details: bool) -> Value {
    let mut out = json!({
        "asin": item.get("asin").cloned().unwrap_or(Value::Null),
        "fn_sku": item.get("fnSku").cloned().unwrap_or(Value::Null),
        "seller_sku": item.get("sellerSku").cloned().unwrap_or(Value::Null),
        "product_name": item.get("productName").cloned().unwrap_or(Value::Null),
        "total_quantity": item.get("totalQuantity").and_then(|q| q.as_i64()).unwrap_or(0),
        "condition": item.get("condition").cloned().unwrap_or(json!("Unknown")),
        "last_updated": item.get("lastUpdatedTime").cloned().unwrap_or(Value::Null),
    });

    if details {
        let inventory_details = item.get("inventoryDetails").cloned().unwrap_or(json!({}));
        let unfulfillable = inventory_details
            .get("unfulfillableQuantity")
            .and_then(|u| u.get("totalUnfulfillableQuantity"))
            .and_then(|q| q.as_i64())
            .unwrap_or(0);
        let reserved = inventory_details
            .get("reservedQuantity")
            .and_then(|r| r.get("totalReservedQuantity"))
            .and_then(|q| q.as_i64())
            .unwrap_or(0);

        out["inventory_breakdown"] = json!({
            "fulfillable": inventory_details.get("fulfillableQuantity").and_then(|q| q.as_i64()).unwrap_or(0),
            "unfulfillable": unfulfillable,
            "reserved": reserved,
            "inbound": {
                "working": inventory_details.get("inboundWorkingQuantity").and_then(|q| q.as_i64()).unwrap_or(0),
                "shipped": inventory_details.get("inboundShippedQuantity").and_then(|q| q.as_i64()).unwrap_or(0),
                "receiving": inventory_details.get("inboundReceivingQuantity").and_then(|q| q.as_i64()).unwrap_or(0),
            },
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_item(qty: i64) -> Value {
        json!({
            "asin": "B0CY5RJ3CL",
            "fnSku": "X0001",
            "sellerSku": "JL-BC002",
            "productName": "Folding Wagon",
            "totalQuantity": qty,
            "condition": "NewItem",
            "lastUpdatedTime": "2025-06-01T00:00:00Z",
            "inventoryDetails": {
                "fulfillableQuantity": qty,
                "unfulfillableQuantity": {"totalUnfulfillableQuantity": 1},
                "reservedQuantity": {"totalReservedQuantity": 2},
                "inboundWorkingQuantity": 3,
                "inboundShippedQuantity": 4,
                "inboundReceivingQuantity": 5
            }
        })
    }

    #[test]
    fn transform_produces_snake_case_summary() {
        let out = transform_inventory_item(&raw_item(12), true);
        assert_eq!(out["seller_sku"], json!("JL-BC002"));
        assert_eq!(out["total_quantity"], json!(12));
        assert_eq!(out["inventory_breakdown"]["unfulfillable"], json!(1));
        assert_eq!(out["inventory_breakdown"]["inbound"]["receiving"], json!(5));
    }

    #[test]
    fn transform_without_details_omits_breakdown() {
        let out = transform_inventory_item(&raw_item(12), false);
        assert!(out.get("inventory_breakdown").is_none());
    }
}
