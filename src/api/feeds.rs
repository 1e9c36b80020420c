// Feeds operation adapters: document create, upload, submit, status, bulk FBM

use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{resolve_marketplaces, Core};
use crate::constants::{paths, FEED_CONTENT_TYPES};
use crate::core::envelope::Envelope;
use crate::core::errors::BridgeError;
use crate::dispatch::RequestContext;
use crate::utils::validators::{self, BulkInventoryUpdate};

/// Feed types accepted for submission.
pub const FEED_TYPES: &[&str] = &[
    "POST_INVENTORY_AVAILABILITY_DATA",
    "POST_PRODUCT_PRICING_DATA",
    "POST_FLAT_FILE_LISTINGS_DATA",
    "POST_PRODUCT_DATA",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitFeedParams {
    pub feed_type: String,
    pub content: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub marketplace_ids: Option<String>,
}

/// Submit a feed: create the document, upload the raw content to the
/// returned URL, then create the feed referencing the document.
pub async fn submit_feed(core: &Core, params: SubmitFeedParams) -> Envelope {
    let (ids, marketplace) = match resolve_marketplaces(params.marketplace_ids.as_deref()) {
        Ok(resolved) => resolved,
        Err(err) => return Envelope::error(&err),
    };

    if !FEED_TYPES.contains(&params.feed_type.as_str()) {
        return Envelope::error(&BridgeError::invalid_input_with(
            "unknown feed type",
            vec![format!(
                "feedType must be one of: {}",
                FEED_TYPES.join(", ")
            )],
        ));
    }
    if params.content.trim().is_empty() {
        return Envelope::error(&BridgeError::invalid_input("feed content is empty"));
    }

    let content_key = params
        .content_type
        .clone()
        .unwrap_or_else(|| "XML".to_string())
        .to_ascii_uppercase();
    let Some((_, mime)) = FEED_CONTENT_TYPES.iter().find(|(k, _)| *k == content_key) else {
        return Envelope::error(&BridgeError::invalid_input_with(
            "unknown content type",
            vec![format!(
                "contentType must be one of: {}",
                FEED_CONTENT_TYPES
                    .iter()
                    .map(|(k, _)| *k)
                    .collect::<Vec<_>>()
                    .join(", ")
            )],
        ));
    };

    match submit_feed_inner(core, &params.feed_type, &params.content, mime, &ids, marketplace).await
    {
        Ok((feed_id, document_id, request_id)) => Envelope::ok(json!({
            "feedId": feed_id,
            "feedType": params.feed_type,
            "feedDocumentId": document_id,
            "processingStatus": "IN_QUEUE",
        }))
        .with_meta("marketplace_id", json!(ids[0]))
        .with_meta("request_id", json!(request_id)),
        Err(err) => Envelope::error(&err),
    }
}

async fn submit_feed_inner(
    core: &Core,
    feed_type: &str,
    content: &str,
    mime: &str,
    ids: &[String],
    marketplace: &'static crate::constants::Marketplace,
) -> Result<(String, String, String), BridgeError> {
    // step 1: create the feed document
    let ctx = RequestContext::new(
        "createFeedDocument",
        Method::POST,
        paths::FEED_DOCUMENTS.to_string(),
        paths::FEEDS,
        marketplace,
        core.deadline(),
    )
    .with_body(json!({"contentType": mime}));

    let document = core.dispatcher.dispatch(&ctx).await?;
    let document_id = document.body["feedDocumentId"]
        .as_str()
        .ok_or_else(|| BridgeError::Upstream {
            status: document.status,
            message: "feed document response missing feedDocumentId".to_string(),
            details: vec![],
        })?
        .to_string();
    let upload_url = document.body["url"]
        .as_str()
        .ok_or_else(|| BridgeError::Upstream {
            status: document.status,
            message: "feed document response missing upload url".to_string(),
            details: vec![],
        })?
        .to_string();

    // step 2: PUT the raw content to the pre-signed URL (unsigned transfer)
    let upload = core
        .http
        .put(&upload_url)
        .header("content-type", mime)
        .body(content.to_string())
        .send()
        .await
        .map_err(|e| BridgeError::Network(format!("feed upload failed: {}", e)))?;
    if !upload.status().is_success() {
        return Err(BridgeError::Upstream {
            status: upload.status().as_u16(),
            message: "feed document upload rejected".to_string(),
            details: vec![],
        });
    }

    // step 3: create the feed referencing the uploaded document
    let ctx = RequestContext::new(
        "createFeed",
        Method::POST,
        paths::FEEDS.to_string(),
        paths::FEEDS,
        marketplace,
        core.deadline(),
    )
    .with_body(json!({
        "feedType": feed_type,
        "marketplaceIds": ids,
        "inputFeedDocumentId": document_id,
    }));

    let created = core.dispatcher.dispatch(&ctx).await?;
    let feed_id = created.body["feedId"]
        .as_str()
        .map(|s| s.to_string())
        .or_else(|| created.body["feedId"].as_i64().map(|n| n.to_string()))
        .ok_or_else(|| BridgeError::Upstream {
            status: created.status,
            message: "feed creation response missing feedId".to_string(),
            details: vec![],
        })?;

    Ok((feed_id, document_id, created.request_id))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStatusParams {
    pub feed_id: String,
}

/// `GET /feeds/2021-06-30/feeds/{feedId}`.
pub async fn feed_status(core: &Core, params: FeedStatusParams) -> Envelope {
    if params.feed_id.trim().is_empty() {
        return Envelope::error(&BridgeError::invalid_input("feedId is required"));
    }
    let marketplace = match resolve_marketplaces(None) {
        Ok((_, m)) => m,
        Err(err) => return Envelope::error(&err),
    };

    let ctx = RequestContext::new(
        "feedStatus",
        Method::GET,
        format!("{}/{}", paths::FEEDS, params.feed_id.trim()),
        paths::FEEDS,
        marketplace,
        core.deadline(),
    );

    match core.dispatcher.dispatch(&ctx).await {
        Ok(response) => Envelope::ok(transform_feed(&response.body))
            .with_meta("feed_id", json!(params.feed_id.trim()))
            .with_meta("request_id", json!(response.request_id)),
        Err(err) => Envelope::error(&err),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkFbmParams {
    /// JSON array of `{sku, quantity, handling_time?, restock_date?}`,
    /// either inline or as an encoded string.
    #[serde(rename = "updatesJsonArray", alias = "updates")]
    pub updates: Value,
    #[serde(default)]
    pub marketplace_id: Option<String>,
}

/// Bulk FBM inventory update via the feeds pipeline: validate every item,
/// build the inventory XML envelope, and submit it.
pub async fn bulk_update_fbm_inventory(core: &Core, params: BulkFbmParams) -> Envelope {
    let updates_value = match &params.updates {
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(value) => value,
            Err(e) => {
                return Envelope::error(&BridgeError::invalid_input(format!(
                    "updates is not valid JSON: {}",
                    e
                )))
            }
        },
        other => other.clone(),
    };

    let updates: Vec<BulkInventoryUpdate> = match serde_json::from_value(updates_value) {
        Ok(updates) => updates,
        Err(e) => {
            return Envelope::error(&BridgeError::invalid_input(format!(
                "updates must be an array of {{sku, quantity}} objects: {}",
                e
            )))
        }
    };

    let errors = validators::validate_bulk_updates(&updates);
    if !errors.is_empty() {
        return Envelope::error(&BridgeError::invalid_input_with(
            "Input validation failed",
            errors,
        ));
    }

    let xml = build_inventory_feed_xml(&updates);
    let item_count = updates.len();

    let submit_params = SubmitFeedParams {
        feed_type: "POST_INVENTORY_AVAILABILITY_DATA".to_string(),
        content: xml,
        content_type: Some("XML".to_string()),
        marketplace_ids: params.marketplace_id.clone(),
    };

    submit_feed(core, submit_params)
        .await
        .with_meta("items_submitted", json!(item_count))
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// The inventory availability envelope understood by the feeds pipeline.
pub fn build_inventory_feed_xml(updates: &[BulkInventoryUpdate]) -> String {
    let mut parts = vec![
        r#"<?xml version="1.0" encoding="UTF-8"?>"#.to_string(),
        r#"<AmazonEnvelope xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:noNamespaceSchemaLocation="amzn-envelope.xsd">"#.to_string(),
        "<Header>".to_string(),
        "<DocumentVersion>1.01</DocumentVersion>".to_string(),
        "<MerchantIdentifier>MERCHANT_ID</MerchantIdentifier>".to_string(),
        "</Header>".to_string(),
        "<MessageType>Inventory</MessageType>".to_string(),
    ];

    for (idx, item) in updates.iter().enumerate() {
        parts.push("<Message>".to_string());
        parts.push(format!("<MessageID>{}</MessageID>", idx + 1));
        parts.push("<OperationType>Update</OperationType>".to_string());
        parts.push("<Inventory>".to_string());
        parts.push(format!("<SKU>{}</SKU>", xml_escape(&item.sku)));
        parts.push(format!("<Quantity>{}</Quantity>", item.quantity));
        if let Some(ht) = item.handling_time {
            parts.push(format!("<FulfillmentLatency>{}</FulfillmentLatency>", ht));
        }
        if let Some(ref rd) = item.restock_date {
            parts.push(format!("<RestockDate>{}</RestockDate>", xml_escape(rd)));
        }
        parts.push("</Inventory>".to_string());
        parts.push("</Message>".to_string());
    }

    parts.push("</AmazonEnvelope>".to_string());
    parts.join("\n")
}

/// Reshape a raw feed record into the stable summary form.
fn transform_feed(raw: &Value) -> Value {
    json!({
        "feedId": raw.get("feedId").cloned().unwrap_or(Value::Null),
        "feedType": raw.get("feedType").cloned().unwrap_or(Value::Null),
        "marketplaceIds": raw.get("marketplaceIds").cloned().unwrap_or(json!([])),
        "processingStatus": raw.get("processingStatus").cloned().unwrap_or(Value::Null),
        "createdTime": raw.get("createdTime").cloned().unwrap_or(Value::Null),
        "processingStartTime": raw.get("processingStartTime").cloned().unwrap_or(Value::Null),
        "processingEndTime": raw.get("processingEndTime").cloned().unwrap_or(Value::Null),
        "resultFeedDocumentId": raw.get("resultFeedDocumentId").cloned().unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(sku: &str, qty: i64) -> BulkInventoryUpdate {
        BulkInventoryUpdate {
            sku: sku.to_string(),
            quantity: qty,
            handling_time: None,
            restock_date: None,
        }
    }

    #[test]
    fn inventory_xml_envelope() {
        let mut second = update("B&B-01", 0);
        second.handling_time = Some(3);
        let xml = build_inventory_feed_xml(&[update("JL-BC002", 25), second]);

        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains("<MessageType>Inventory</MessageType>"));
        assert!(xml.contains("<MessageID>1</MessageID>"));
        assert!(xml.contains("<MessageID>2</MessageID>"));
        assert!(xml.contains("<SKU>JL-BC002</SKU>"));
        assert!(xml.contains("<SKU>B&amp;B-01</SKU>"));
        assert!(xml.contains("<Quantity>0</Quantity>"));
        assert!(xml.contains("<FulfillmentLatency>3</FulfillmentLatency>"));
        assert!(xml.ends_with("</AmazonEnvelope>"));
    }

    #[test]
    fn feed_transform_keeps_known_fields() {
        let raw = json!({
            "feedId": "12345",
            "feedType": "POST_INVENTORY_AVAILABILITY_DATA",
            "processingStatus": "DONE",
            "unknownField": true
        });
        let out = transform_feed(&raw);
        assert_eq!(out["feedId"], json!("12345"));
        assert_eq!(out["processingStatus"], json!("DONE"));
        assert!(out.get("unknownField").is_none());
    }
}
