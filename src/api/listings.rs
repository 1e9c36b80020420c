// Listings operation adapters: get, partial update, price, FBM inventory

use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::api::{resolve_marketplaces, Core};
use crate::constants::{limits, paths};
use crate::core::envelope::Envelope;
use crate::core::errors::BridgeError;
use crate::dispatch::RequestContext;
use crate::utils::validators;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetListingParams {
    pub seller_id: String,
    pub sku: String,
    #[serde(default)]
    pub marketplace_ids: Option<String>,
    /// Comma-separated includedData sets.
    #[serde(default)]
    pub included_data: Option<String>,
}

/// `GET /listings/2021-08-01/items/{sellerId}/{sku}`.
pub async fn get_listing(core: &Core, params: GetListingParams) -> Envelope {
    let (ids, marketplace) = match resolve_marketplaces(params.marketplace_ids.as_deref()) {
        Ok(resolved) => resolved,
        Err(err) => return Envelope::error(&err),
    };
    if let Err(err) = validate_identity(&params.seller_id, &params.sku) {
        return Envelope::error(&err);
    }

    let included = params
        .included_data
        .clone()
        .unwrap_or_else(|| "attributes,offers,fulfillmentAvailability".to_string());

    let ctx = RequestContext::new(
        "getListing",
        Method::GET,
        format!("{}/{}/{}", paths::LISTINGS_ITEMS, params.seller_id, params.sku),
        paths::LISTINGS_ITEMS,
        marketplace,
        core.deadline(),
    )
    .with_query("marketplaceIds", ids.join(","))
    .with_query("includedData", included)
    .with_query("issueLocale", "en_US");

    match core.dispatcher.dispatch(&ctx).await {
        Ok(response) => Envelope::ok(transform_listing(&response.body))
            .with_meta("marketplace_id", json!(ids[0]))
            .with_meta("seller_id", json!(params.seller_id))
            .with_meta("request_id", json!(response.request_id)),
        Err(err) => Envelope::error(&err),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateListingParams {
    pub seller_id: String,
    pub sku: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub bullet_points: Option<Vec<String>>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub search_terms: Option<Vec<String>>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub marketplace_ids: Option<String>,
}

/// `PATCH` a listing item: only supplied fields produce patch operations.
pub async fn update_listing(core: &Core, params: UpdateListingParams) -> Envelope {
    let (ids, marketplace) = match resolve_marketplaces(params.marketplace_ids.as_deref()) {
        Ok(resolved) => resolved,
        Err(err) => return Envelope::error(&err),
    };
    if let Err(err) = validate_identity(&params.seller_id, &params.sku) {
        return Envelope::error(&err);
    }

    let mut errors = Vec::new();
    if let Some(ref bullets) = params.bullet_points {
        if bullets.len() > limits::MAX_BULLET_POINTS {
            errors.push(format!(
                "bulletPoints accepts at most {} entries, got {}",
                limits::MAX_BULLET_POINTS,
                bullets.len()
            ));
        }
    }
    if let Some(ref terms) = params.search_terms {
        if terms.len() > limits::MAX_SEARCH_TERMS {
            errors.push(format!(
                "searchTerms accepts at most {} entries, got {}",
                limits::MAX_SEARCH_TERMS,
                terms.len()
            ));
        }
    }
    if !errors.is_empty() {
        return Envelope::error(&BridgeError::invalid_input_with(
            "Input validation failed",
            errors,
        ));
    }

    let marketplace_id = ids[0].clone();
    let mut patches = Vec::new();
    let mut fields_changed = Vec::new();

    if let Some(ref title) = params.title {
        patches.push(attribute_patch("item_name", json!([{ "value": title, "marketplace_id": marketplace_id }])));
        fields_changed.push("title");
    }
    if let Some(ref bullets) = params.bullet_points {
        let values: Vec<Value> = bullets
            .iter()
            .map(|b| json!({"value": b, "marketplace_id": marketplace_id}))
            .collect();
        patches.push(attribute_patch("bullet_point", Value::Array(values)));
        fields_changed.push("bullet_points");
    }
    if let Some(ref description) = params.description {
        patches.push(attribute_patch(
            "product_description",
            json!([{ "value": description, "marketplace_id": marketplace_id }]),
        ));
        fields_changed.push("description");
    }
    if let Some(ref terms) = params.search_terms {
        let values: Vec<Value> = terms
            .iter()
            .map(|t| json!({"value": t, "marketplace_id": marketplace_id}))
            .collect();
        patches.push(attribute_patch("generic_keyword", Value::Array(values)));
        fields_changed.push("search_terms");
    }
    if let Some(ref brand) = params.brand {
        patches.push(attribute_patch("brand", json!([{ "value": brand, "marketplace_id": marketplace_id }])));
        fields_changed.push("brand");
    }
    if let Some(ref manufacturer) = params.manufacturer {
        patches.push(attribute_patch(
            "manufacturer",
            json!([{ "value": manufacturer, "marketplace_id": marketplace_id }]),
        ));
        fields_changed.push("manufacturer");
    }

    if patches.is_empty() {
        return Envelope::error(&BridgeError::invalid_input(
            "no updatable fields were supplied",
        ));
    }

    patch_listing(
        core,
        "updateListing",
        &params.seller_id,
        &params.sku,
        &ids,
        marketplace,
        patches,
        fields_changed,
    )
    .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePriceParams {
    pub seller_id: String,
    pub sku: String,
    /// Decimal string, e.g. "69.98".
    pub new_price: String,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub marketplace_ids: Option<String>,
}

/// `PATCH` the purchasable offer with a replace on the price attribute.
pub async fn update_price(core: &Core, params: UpdatePriceParams) -> Envelope {
    let (ids, marketplace) = match resolve_marketplaces(params.marketplace_ids.as_deref()) {
        Ok(resolved) => resolved,
        Err(err) => return Envelope::error(&err),
    };
    if let Err(err) = validate_identity(&params.seller_id, &params.sku) {
        return Envelope::error(&err);
    }
    if !validators::is_valid_price(&params.new_price) {
        return Envelope::error(&BridgeError::invalid_input(format!(
            "newPrice must be a non-negative decimal string, got '{}'",
            params.new_price
        )));
    }

    let currency = params
        .currency
        .clone()
        .unwrap_or_else(|| marketplace.currency.to_string());

    let patches = vec![attribute_patch(
        "purchasable_offer",
        json!([{
            "audience": "ALL",
            "currency": currency,
            "marketplace_id": ids[0],
            "our_price": [{
                "schedule": [{"value_with_tax": params.new_price}]
            }]
        }]),
    )];

    patch_listing(
        core,
        "updatePrice",
        &params.seller_id,
        &params.sku,
        &ids,
        marketplace,
        patches,
        vec!["price"],
    )
    .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFbmInventoryParams {
    pub seller_id: String,
    pub sku: String,
    pub quantity: i64,
    #[serde(default)]
    pub handling_time: Option<i64>,
    #[serde(default)]
    pub restock_date: Option<String>,
    #[serde(default)]
    pub marketplace_ids: Option<String>,
}

/// `PATCH` the fulfillment availability of a merchant-fulfilled listing.
pub async fn update_fbm_inventory(core: &Core, params: UpdateFbmInventoryParams) -> Envelope {
    let (ids, marketplace) = match resolve_marketplaces(params.marketplace_ids.as_deref()) {
        Ok(resolved) => resolved,
        Err(err) => return Envelope::error(&err),
    };
    if let Err(err) = validate_identity(&params.seller_id, &params.sku) {
        return Envelope::error(&err);
    }

    let mut errors = Vec::new();
    if !validators::is_valid_quantity(params.quantity) {
        errors.push("quantity cannot be negative".to_string());
    }
    if let Some(ht) = params.handling_time {
        if !validators::is_valid_handling_time(ht) {
            errors.push("handlingTime must be between 1 and 30 days".to_string());
        }
    }
    if let Some(ref rd) = params.restock_date {
        if !validators::is_valid_restock_date(rd) {
            errors.push("restockDate must be a future ISO-8601 date".to_string());
        }
    }
    if !errors.is_empty() {
        return Envelope::error(&BridgeError::invalid_input_with(
            "Input validation failed",
            errors,
        ));
    }

    let mut availability = json!({
        "fulfillment_channel_code": "DEFAULT",
        "quantity": params.quantity,
    });
    if let Some(ht) = params.handling_time {
        availability["lead_time_to_ship_max_days"] = json!(ht);
    }
    if let Some(ref rd) = params.restock_date {
        availability["restock_date"] = json!(rd);
    }

    let patches = vec![attribute_patch(
        "fulfillment_availability",
        Value::Array(vec![availability]),
    )];

    patch_listing(
        core,
        "updateFbmInventory",
        &params.seller_id,
        &params.sku,
        &ids,
        marketplace,
        patches,
        vec!["fulfillment_availability"],
    )
    .await
}

fn validate_identity(seller_id: &str, sku: &str) -> Result<(), BridgeError> {
    let mut errors = Vec::new();
    if seller_id.trim().is_empty() {
        errors.push("sellerId is required".to_string());
    }
    if !validators::is_valid_sku(sku) {
        errors.push(format!("invalid SKU format: '{}'", sku));
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(BridgeError::invalid_input_with(
            "Input validation failed",
            errors,
        ))
    }
}

fn attribute_patch(attribute: &str, value: Value) -> Value {
    json!({
        "op": "replace",
        "path": format!("/attributes/{}", attribute),
        "value": value,
    })
}

/// Shared PATCH path for every listings mutation. Attaches the
/// `listing_update` advisory naming the changed fields; propagation timing
/// is an observation, not a guarantee.
#[allow(clippy::too_many_arguments)]
async fn patch_listing(
    core: &Core,
    operation: &'static str,
    seller_id: &str,
    sku: &str,
    ids: &[String],
    marketplace: &'static crate::constants::Marketplace,
    patches: Vec<Value>,
    fields_changed: Vec<&'static str>,
) -> Envelope {
    let body = json!({
        "productType": "PRODUCT",
        "patches": patches,
    });

    let ctx = RequestContext::new(
        operation,
        Method::PATCH,
        format!("{}/{}/{}", paths::LISTINGS_ITEMS, seller_id, sku),
        paths::LISTINGS_ITEMS,
        marketplace,
        core.deadline(),
    )
    .with_query("marketplaceIds", ids.join(","))
    .with_query("issueLocale", "en_US")
    .with_body(body);

    match core.dispatcher.dispatch(&ctx).await {
        Ok(response) => {
            let mut data = Map::new();
            data.insert("submission".to_string(), response.body);
            data.insert(
                "listing_update".to_string(),
                json!({
                    "sku": sku,
                    "fields_changed": fields_changed,
                    "propagation": "listing changes typically appear within 5 to 30 minutes",
                }),
            );
            Envelope::ok(Value::Object(data))
                .with_meta("marketplace_id", json!(ids[0]))
                .with_meta("seller_id", json!(seller_id))
                .with_meta("sku", json!(sku))
                .with_meta("request_id", json!(response.request_id))
        }
        Err(err) => Envelope::error(&err),
    }
}

/// Reshape a raw listings item into the stable summary form.
fn transform_listing(raw: &Value) -> Value {
    let summary = raw
        .get("summaries")
        .and_then(|s| s.as_array())
        .and_then(|s| s.first())
        .cloned()
        .unwrap_or(json!({}));

    let mut out = json!({
        "sku": raw.get("sku").cloned().unwrap_or(json!("")),
        "asin": summary.get("asin").cloned().unwrap_or(json!("")),
        "product_name": summary.get("itemName").cloned().unwrap_or(json!("")),
        "condition": summary.get("condition").cloned().unwrap_or(json!("Unknown")),
        "listing_status": summary.get("status").cloned().unwrap_or(json!("Unknown")),
        "created_date": summary.get("createdDate").cloned().unwrap_or(Value::Null),
        "last_updated": summary.get("lastUpdatedDate").cloned().unwrap_or(Value::Null),
    });

    if let Some(offer) = raw
        .get("offers")
        .and_then(|o| o.as_array())
        .and_then(|o| o.first())
    {
        out["price"] = json!({
            "amount": offer.get("price").and_then(|p| p.get("amount")).cloned().unwrap_or(Value::Null),
            "currency": offer.get("price").and_then(|p| p.get("currency")).cloned().unwrap_or(Value::Null),
        });
    }

    let fbm = raw
        .get("fulfillmentAvailability")
        .and_then(|f| f.as_array())
        .and_then(|entries| {
            entries
                .iter()
                .find(|e| e.get("fulfillmentChannelCode").and_then(|c| c.as_str()) == Some("DEFAULT"))
        });
    out["fulfillment_availability"] = match fbm {
        Some(entry) => json!({
            "fulfillment_channel_code": "DEFAULT",
            "quantity": entry.get("quantity").and_then(|q| q.as_i64()).unwrap_or(0),
            "is_available": entry.get("isAvailable").and_then(|a| a.as_bool()).unwrap_or(false),
            "handling_time": entry.get("handlingTime").and_then(|h| h.get("max")).cloned().unwrap_or(Value::Null),
            "restock_date": entry.get("restockDate").cloned().unwrap_or(Value::Null),
        }),
        None => json!({
            "fulfillment_channel_code": "DEFAULT",
            "quantity": 0,
            "is_available": false,
            "handling_time": Value::Null,
            "restock_date": Value::Null,
        }),
    };

    if let Some(issues) = raw.get("issues").and_then(|i| i.as_array()) {
        if !issues.is_empty() {
            out["issues"] = Value::Array(
                issues
                    .iter()
                    .map(|issue| {
                        json!({
                            "code": issue.get("code").cloned().unwrap_or(Value::Null),
                            "message": issue.get("message").cloned().unwrap_or(Value::Null),
                            "severity": issue.get("severity").cloned().unwrap_or(Value::Null),
                        })
                    })
                    .collect(),
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_patch_shape() {
        let patch = attribute_patch("item_name", json!([{"value": "New title"}]));
        assert_eq!(patch["op"], json!("replace"));
        assert_eq!(patch["path"], json!("/attributes/item_name"));
    }

    #[test]
    fn transform_extracts_fbm_availability() {
        let raw = json!({
            "sku": "JL-BC002",
            "summaries": [{
                "asin": "B0CY5RJ3CL",
                "itemName": "Folding Wagon",
                "condition": "NewItem",
                "status": ["BUYABLE"],
                "createdDate": "2024-01-01T00:00:00Z",
                "lastUpdatedDate": "2025-06-01T00:00:00Z"
            }],
            "offers": [{"price": {"amount": "69.99", "currency": "GBP"}}],
            "fulfillmentAvailability": [
                {"fulfillmentChannelCode": "AMAZON_EU", "quantity": 4},
                {"fulfillmentChannelCode": "DEFAULT", "quantity": 25, "isAvailable": true,
                 "handlingTime": {"max": 2}}
            ]
        });
        let out = transform_listing(&raw);
        assert_eq!(out["sku"], json!("JL-BC002"));
        assert_eq!(out["price"]["amount"], json!("69.99"));
        assert_eq!(out["fulfillment_availability"]["quantity"], json!(25));
        assert_eq!(out["fulfillment_availability"]["handling_time"], json!(2));
        assert!(out.get("issues").is_none());
    }

    #[test]
    fn transform_defaults_without_fbm_entry() {
        let out = transform_listing(&json!({"sku": "X"}));
        assert_eq!(out["fulfillment_availability"]["quantity"], json!(0));
        assert_eq!(out["fulfillment_availability"]["is_available"], json!(false));
    }
}
