// Reports operation adapters: request and status

use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{resolve_marketplaces, Core};
use crate::constants::paths;
use crate::core::envelope::Envelope;
use crate::core::errors::BridgeError;
use crate::dispatch::RequestContext;
use crate::utils::validators;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestReportParams {
    pub report_type: String,
    #[serde(default)]
    pub marketplace_ids: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

/// `POST /reports/2021-06-30/reports` - first half of the two-step pattern.
pub async fn request_report(core: &Core, params: RequestReportParams) -> Envelope {
    let (ids, marketplace) = match resolve_marketplaces(params.marketplace_ids.as_deref()) {
        Ok(resolved) => resolved,
        Err(err) => return Envelope::error(&err),
    };

    let mut errors = Vec::new();
    if params.report_type.trim().is_empty() {
        errors.push("reportType is required".to_string());
    }
    if let Some(ref start) = params.start_date {
        if !validators::is_iso8601_date(start) {
            errors.push(format!("startDate is not ISO-8601: {}", start));
        }
    }
    if let Some(ref end) = params.end_date {
        if !validators::is_iso8601_date(end) {
            errors.push(format!("endDate is not ISO-8601: {}", end));
        }
    }
    if !errors.is_empty() {
        return Envelope::error(&BridgeError::invalid_input_with(
            "Input validation failed",
            errors,
        ));
    }

    let mut body = json!({
        "reportType": params.report_type.trim(),
        "marketplaceIds": ids,
    });
    if let Some(ref start) = params.start_date {
        body["dataStartTime"] = json!(start);
    }
    if let Some(ref end) = params.end_date {
        body["dataEndTime"] = json!(end);
    }

    let ctx = RequestContext::new(
        "requestReport",
        Method::POST,
        paths::REPORTS.to_string(),
        paths::REPORTS,
        marketplace,
        core.deadline(),
    )
    .with_body(body);

    match core.dispatcher.dispatch(&ctx).await {
        Ok(response) => {
            let report_id = response.body["reportId"].clone();
            Envelope::ok(json!({
                "reportId": report_id,
                "reportType": params.report_type.trim(),
                "processingStatus": "IN_QUEUE",
            }))
            .with_meta("marketplace_id", json!(ids[0]))
            .with_meta("request_id", json!(response.request_id))
        }
        Err(err) => Envelope::error(&err),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetReportParams {
    pub report_id: String,
}

/// `GET /reports/2021-06-30/reports/{reportId}` - second half.
pub async fn get_report(core: &Core, params: GetReportParams) -> Envelope {
    if params.report_id.trim().is_empty() {
        return Envelope::error(&BridgeError::invalid_input("reportId is required"));
    }
    let marketplace = match resolve_marketplaces(None) {
        Ok((_, m)) => m,
        Err(err) => return Envelope::error(&err),
    };

    let ctx = RequestContext::new(
        "getReport",
        Method::GET,
        format!("{}/{}", paths::REPORTS, params.report_id.trim()),
        paths::REPORTS,
        marketplace,
        core.deadline(),
    );

    match core.dispatcher.dispatch(&ctx).await {
        Ok(response) => Envelope::ok(transform_report(&response.body))
            .with_meta("report_id", json!(params.report_id.trim()))
            .with_meta("request_id", json!(response.request_id)),
        Err(err) => Envelope::error(&err),
    }
}

/// Reshape a raw report record into the stable summary form.
fn transform_report(raw: &Value) -> Value {
    json!({
        "reportId": raw.get("reportId").cloned().unwrap_or(Value::Null),
        "reportType": raw.get("reportType").cloned().unwrap_or(Value::Null),
        "marketplaceIds": raw.get("marketplaceIds").cloned().unwrap_or(json!([])),
        "processingStatus": raw.get("processingStatus").cloned().unwrap_or(Value::Null),
        "createdTime": raw.get("createdTime").cloned().unwrap_or(Value::Null),
        "processingStartTime": raw.get("processingStartTime").cloned().unwrap_or(Value::Null),
        "processingEndTime": raw.get("processingEndTime").cloned().unwrap_or(Value::Null),
        "reportDocumentId": raw.get("reportDocumentId").cloned().unwrap_or(Value::Null),
        "dataStartTime": raw.get("dataStartTime").cloned().unwrap_or(Value::Null),
        "dataEndTime": raw.get("dataEndTime").cloned().unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_transform_keeps_known_fields() {
        let raw = json!({
            "reportId": "98765",
            "reportType": "GET_MERCHANT_LISTINGS_ALL_DATA",
            "processingStatus": "DONE",
            "reportDocumentId": "doc-1",
            "somethingElse": 1
        });
        let out = transform_report(&raw);
        assert_eq!(out["reportId"], json!("98765"));
        assert_eq!(out["reportDocumentId"], json!("doc-1"));
        assert!(out.get("somethingElse").is_none());
    }
}
