// Tool registry - exposes the operation adapters as protocol-level tools

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::api::{self, Core};
use crate::core::envelope::Envelope;
use crate::core::errors::BridgeError;
use crate::filter::catalog::{FilterKind, FilterSearch};

/// A tool as the transport sees it: name, description, parameter schema.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn filter_family_properties() -> Value {
    json!({
        "filterId": {"type": "string", "description": "Catalog filter to apply"},
        "filterChain": {"type": "string", "description": "Comma-separated filter ids, or one stored chain id"},
        "customFilter": {"type": "string", "description": "Ad-hoc query expression"},
        "filterParams": {"type": "object", "description": "Parameter values for the selected filters"},
        "reduceResponse": {"type": "boolean", "description": "Apply the endpoint's default reduction filter"}
    })
}

fn merge_properties(base: Value, extra: Value) -> Value {
    let mut out = base;
    if let (Some(out_map), Some(extra_map)) = (out.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_map {
            out_map.insert(k.clone(), v.clone());
        }
    }
    out
}

/// The full tool table, in registration order.
pub fn tool_specs() -> Vec<ToolSpec> {
    let token = json!({"token": {"type": "string", "description": "Session token from authenticate"}});

    vec![
        ToolSpec {
            name: "authenticate",
            description: "Create a session and return its bearer token",
            input_schema: object_schema(json!({}), &[]),
        },
        ToolSpec {
            name: "listOrders",
            description: "List orders with date and status filters, paginated",
            input_schema: object_schema(
                merge_properties(
                    merge_properties(token.clone(), json!({
                        "marketplaceIds": {"type": "string", "description": "Comma-separated marketplace ids (default UK)"},
                        "createdAfter": {"type": "string", "description": "ISO-8601 lower bound (default 30 days ago)"},
                        "createdBefore": {"type": "string", "description": "ISO-8601 upper bound"},
                        "statuses": {"type": "string", "description": "Comma-separated order statuses"},
                        "maxResults": {"type": "integer", "description": "Record cap (default 100)"}
                    })),
                    filter_family_properties(),
                ),
                &["token"],
            ),
        },
        ToolSpec {
            name: "getOrder",
            description: "Fetch a single order by id",
            input_schema: object_schema(
                merge_properties(token.clone(), json!({
                    "orderId": {"type": "string", "description": "Amazon order id"}
                })),
                &["token", "orderId"],
            ),
        },
        ToolSpec {
            name: "getOrderItems",
            description: "Fetch the line items of an order, paginated",
            input_schema: object_schema(
                merge_properties(
                    merge_properties(token.clone(), json!({
                        "orderId": {"type": "string", "description": "Amazon order id"},
                        "maxResults": {"type": "integer"}
                    })),
                    filter_family_properties(),
                ),
                &["token", "orderId"],
            ),
        },
        ToolSpec {
            name: "inventoryInStock",
            description: "Inventory summaries for in-stock items, sorted by quantity",
            input_schema: object_schema(
                merge_properties(
                    merge_properties(token.clone(), json!({
                        "marketplaceIds": {"type": "string"},
                        "fulfillmentType": {"type": "string", "enum": ["FBA", "FBM", "ALL"]},
                        "details": {"type": "boolean", "description": "Include the per-item breakdown"},
                        "maxResults": {"type": "integer"}
                    })),
                    filter_family_properties(),
                ),
                &["token"],
            ),
        },
        ToolSpec {
            name: "getListing",
            description: "Fetch one listing item by seller id and SKU",
            input_schema: object_schema(
                merge_properties(token.clone(), json!({
                    "sellerId": {"type": "string"},
                    "sku": {"type": "string"},
                    "marketplaceIds": {"type": "string"},
                    "includedData": {"type": "string", "description": "Comma-separated data sets to include"}
                })),
                &["token", "sellerId", "sku"],
            ),
        },
        ToolSpec {
            name: "updateListing",
            description: "Partially update listing attributes; only supplied fields change",
            input_schema: object_schema(
                merge_properties(token.clone(), json!({
                    "sellerId": {"type": "string"},
                    "sku": {"type": "string"},
                    "title": {"type": "string"},
                    "bulletPoints": {"type": "array", "items": {"type": "string"}, "maxItems": 5},
                    "description": {"type": "string"},
                    "searchTerms": {"type": "array", "items": {"type": "string"}, "maxItems": 5},
                    "brand": {"type": "string"},
                    "manufacturer": {"type": "string"},
                    "marketplaceIds": {"type": "string"}
                })),
                &["token", "sellerId", "sku"],
            ),
        },
        ToolSpec {
            name: "updatePrice",
            description: "Replace the price of a listing",
            input_schema: object_schema(
                merge_properties(token.clone(), json!({
                    "sellerId": {"type": "string"},
                    "sku": {"type": "string"},
                    "newPrice": {"type": "string", "description": "Decimal price string, e.g. \"69.98\""},
                    "currency": {"type": "string", "description": "ISO 4217 code (default GBP)"},
                    "marketplaceIds": {"type": "string"}
                })),
                &["token", "sellerId", "sku", "newPrice"],
            ),
        },
        ToolSpec {
            name: "updateFbmInventory",
            description: "Set merchant-fulfilled quantity for a SKU",
            input_schema: object_schema(
                merge_properties(token.clone(), json!({
                    "sellerId": {"type": "string"},
                    "sku": {"type": "string"},
                    "quantity": {"type": "integer", "minimum": 0},
                    "handlingTime": {"type": "integer", "minimum": 1, "maximum": 30},
                    "restockDate": {"type": "string", "description": "Future ISO-8601 date"},
                    "marketplaceIds": {"type": "string"}
                })),
                &["token", "sellerId", "sku", "quantity"],
            ),
        },
        ToolSpec {
            name: "bulkUpdateFbmInventory",
            description: "Bulk merchant-fulfilled inventory update via a feed",
            input_schema: object_schema(
                merge_properties(token.clone(), json!({
                    "updatesJsonArray": {
                        "description": "Array of {sku, quantity, handling_time?, restock_date?}"
                    },
                    "marketplaceId": {"type": "string"}
                })),
                &["token", "updatesJsonArray"],
            ),
        },
        ToolSpec {
            name: "submitFeed",
            description: "Submit raw feed content (create document, upload, create feed)",
            input_schema: object_schema(
                merge_properties(token.clone(), json!({
                    "feedType": {"type": "string"},
                    "content": {"type": "string"},
                    "contentType": {"type": "string", "enum": ["XML", "TEXT", "CSV", "JSON"]},
                    "marketplaceIds": {"type": "string"}
                })),
                &["token", "feedType", "content"],
            ),
        },
        ToolSpec {
            name: "feedStatus",
            description: "Processing status of a submitted feed",
            input_schema: object_schema(
                merge_properties(token.clone(), json!({
                    "feedId": {"type": "string"}
                })),
                &["token", "feedId"],
            ),
        },
        ToolSpec {
            name: "requestReport",
            description: "Request a report and return its id",
            input_schema: object_schema(
                merge_properties(token.clone(), json!({
                    "reportType": {"type": "string"},
                    "marketplaceIds": {"type": "string"},
                    "startDate": {"type": "string"},
                    "endDate": {"type": "string"}
                })),
                &["token", "reportType"],
            ),
        },
        ToolSpec {
            name: "getReport",
            description: "Processing status and document id of a report",
            input_schema: object_schema(
                merge_properties(token.clone(), json!({
                    "reportId": {"type": "string"}
                })),
                &["token", "reportId"],
            ),
        },
        ToolSpec {
            name: "listFilters",
            description: "Discover catalog filters by endpoint, category, kind, or search term",
            input_schema: object_schema(
                merge_properties(token.clone(), json!({
                    "endpoint": {"type": "string"},
                    "category": {"type": "string"},
                    "kind": {"type": "string", "enum": ["record", "field", "chain"]},
                    "searchTerm": {"type": "string"}
                })),
                &["token"],
            ),
        },
    ]
}

fn parse_params<T: for<'de> Deserialize<'de>>(args: &Value) -> Result<T, BridgeError> {
    serde_json::from_value(args.clone())
        .map_err(|e| BridgeError::invalid_input(format!("invalid parameters: {}", e)))
}

/// Every operation's first action: validate the session token.
fn gate(core: &Core, args: &Value) -> Result<(), BridgeError> {
    let token = args
        .get("token")
        .and_then(|t| t.as_str())
        .unwrap_or_default();
    core.sessions.validate(token)
}

/// Run one named tool against the core and return its envelope.
pub async fn dispatch_tool(core: &Core, name: &str, args: Value) -> Envelope {
    if name == "authenticate" {
        let token = core.sessions.mint();
        info!("session created");
        return Envelope::ok(json!({"token": token}));
    }

    if let Err(err) = gate(core, &args) {
        warn!(tool = name, "session validation failed");
        return Envelope::error(&err);
    }

    match name {
        "listOrders" => match parse_params(&args) {
            Ok(params) => api::orders::list_orders(core, params).await,
            Err(err) => Envelope::error(&err),
        },
        "getOrder" => match parse_params(&args) {
            Ok(params) => api::orders::get_order(core, params).await,
            Err(err) => Envelope::error(&err),
        },
        "getOrderItems" => match parse_params(&args) {
            Ok(params) => api::orders::get_order_items(core, params).await,
            Err(err) => Envelope::error(&err),
        },
        "inventoryInStock" => match parse_params(&args) {
            Ok(params) => api::inventory::inventory_in_stock(core, params).await,
            Err(err) => Envelope::error(&err),
        },
        "getListing" => match parse_params(&args) {
            Ok(params) => api::listings::get_listing(core, params).await,
            Err(err) => Envelope::error(&err),
        },
        "updateListing" => match parse_params(&args) {
            Ok(params) => api::listings::update_listing(core, params).await,
            Err(err) => Envelope::error(&err),
        },
        "updatePrice" => match parse_params(&args) {
            Ok(params) => api::listings::update_price(core, params).await,
            Err(err) => Envelope::error(&err),
        },
        "updateFbmInventory" => match parse_params(&args) {
            Ok(params) => api::listings::update_fbm_inventory(core, params).await,
            Err(err) => Envelope::error(&err),
        },
        "bulkUpdateFbmInventory" => match parse_params(&args) {
            Ok(params) => api::feeds::bulk_update_fbm_inventory(core, params).await,
            Err(err) => Envelope::error(&err),
        },
        "submitFeed" => match parse_params(&args) {
            Ok(params) => api::feeds::submit_feed(core, params).await,
            Err(err) => Envelope::error(&err),
        },
        "feedStatus" => match parse_params(&args) {
            Ok(params) => api::feeds::feed_status(core, params).await,
            Err(err) => Envelope::error(&err),
        },
        "requestReport" => match parse_params(&args) {
            Ok(params) => api::reports::request_report(core, params).await,
            Err(err) => Envelope::error(&err),
        },
        "getReport" => match parse_params(&args) {
            Ok(params) => api::reports::get_report(core, params).await,
            Err(err) => Envelope::error(&err),
        },
        "listFilters" => list_filters(core, &args).await,
        unknown => Envelope::error(&BridgeError::invalid_input(format!(
            "unknown tool '{}'",
            unknown
        ))),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListFiltersParams {
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    search_term: Option<String>,
}

/// Filter discovery, grouped by kind the way callers browse them.
async fn list_filters(core: &Core, args: &Value) -> Envelope {
    let params: ListFiltersParams = match parse_params(args) {
        Ok(params) => params,
        Err(err) => return Envelope::error(&err),
    };

    let kind = match params.kind.as_deref() {
        None | Some("") => None,
        Some(raw) => match FilterKind::parse(raw) {
            Some(kind) => Some(kind),
            None => {
                return Envelope::error(&BridgeError::invalid_input(format!(
                    "kind must be record, field, or chain, got '{}'",
                    raw
                )))
            }
        },
    };

    let criteria = FilterSearch {
        endpoint: params.endpoint.filter(|s| !s.is_empty()),
        category: params.category.filter(|s| !s.is_empty()),
        kind,
        search_term: params.search_term.filter(|s| !s.is_empty()),
    };

    let definitions = match core.filters.catalog().search(&criteria).await {
        Ok(defs) => defs,
        Err(err) => return Envelope::error(&err),
    };

    let mut grouped = json!({"record": [], "field": [], "chain": []});
    let mut counts = json!({"record": 0, "field": 0, "chain": 0});
    for def in &definitions {
        let key = def.kind.as_str();
        let mut info = json!({
            "id": def.id,
            "name": def.name,
            "description": def.description,
            "category": def.category,
            "estimated_reduction_percent": def.estimated_reduction_percent,
            "compatible_endpoints": def.endpoints,
            "parameters": def.parameters,
            "examples": def.examples,
            "tags": def.tags,
        });
        if def.kind == FilterKind::Chain {
            info["chain_steps"] = json!(def.chain_steps);
        }
        if let Some(list) = grouped[key].as_array_mut() {
            list.push(info);
        }
        counts[key] = json!(counts[key].as_i64().unwrap_or(0) + 1);
    }

    Envelope::ok(json!({
        "total_filters": definitions.len(),
        "filters_by_type": counts,
        "filters": grouped,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_table_is_complete() {
        let specs = tool_specs();
        let names: Vec<&str> = specs.iter().map(|s| s.name).collect();
        for required in [
            "authenticate",
            "listOrders",
            "getOrder",
            "getOrderItems",
            "inventoryInStock",
            "getListing",
            "updateListing",
            "updatePrice",
            "updateFbmInventory",
            "bulkUpdateFbmInventory",
            "submitFeed",
            "feedStatus",
            "requestReport",
            "getReport",
            "listFilters",
        ] {
            assert!(names.contains(&required), "missing tool {}", required);
        }
        assert_eq!(names.len(), 15);
    }

    #[test]
    fn protected_tools_require_token() {
        for spec in tool_specs() {
            if spec.name == "authenticate" {
                continue;
            }
            let required = spec.input_schema["required"].as_array().unwrap();
            assert!(
                required.contains(&json!("token")),
                "{} must require a token",
                spec.name
            );
        }
    }
}
