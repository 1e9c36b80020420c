// End-to-end dispatcher scenarios against a mocked upstream

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use mockito::Matcher;
use serde_json::{json, Value};

use spapi_bridge::api::Core;
use spapi_bridge::config::{Config, RateLimitMode};
use spapi_bridge::mcp::registry::dispatch_tool;

const TOKEN_BODY: &str = r#"{"access_token":"Atza|mock-token","token_type":"bearer","expires_in":3600}"#;

/// Core wired to a mockito server for both the identity provider and the
/// regional API host.
async fn test_core(server: &mockito::Server, limits_yaml: Option<&str>) -> (Core, Option<tempfile::NamedTempFile>) {
    let mut config = Config::test_config();
    config.lwa_client_id = Some("amzn1.application-oa2-client.mock".to_string());
    config.lwa_client_secret = Some(secrecy::Secret::new("client-secret".to_string()));
    config.lwa_refresh_token = Some(secrecy::Secret::new("Atzr|refresh".to_string()));
    config.lwa_token_url = format!("{}/auth/o2/token", server.url());
    config.aws_access_key_id = Some("AKIDEXAMPLE".to_string());
    config.aws_secret_access_key =
        Some(secrecy::Secret::new("wJalrXUtnFEMI/K7MDENG".to_string()));
    config.endpoint_override = Some(server.url());
    config.filter_db_path = PathBuf::from(":memory:");
    config.rate_limit_mode = RateLimitMode::FailFast;

    let temp = limits_yaml.map(|yaml| {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    });
    if let Some(ref file) = temp {
        config.rate_limits_yaml_path = Some(file.path().to_path_buf());
    }

    (Core::from_config(config).await.unwrap(), temp)
}

fn envelope_of(core_result: &spapi_bridge::core::Envelope) -> Value {
    core_result.to_value()
}

async fn session_token(core: &Core) -> String {
    let env = dispatch_tool(core, "authenticate", json!({})).await.to_value();
    env["data"]["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn update_price_sends_replace_patch() {
    let mut server = mockito::Server::new_async().await;
    let token_mock = server
        .mock("POST", "/auth/o2/token")
        .with_status(200)
        .with_body(TOKEN_BODY)
        .create_async()
        .await;

    let patch_mock = server
        .mock("PATCH", "/listings/2021-08-01/items/A2C259Q0GU1WMI/JL-BC002")
        .match_body(Matcher::PartialJson(json!({
            "productType": "PRODUCT",
            "patches": [{
                "op": "replace",
                "path": "/attributes/purchasable_offer",
                "value": [{
                    "audience": "ALL",
                    "currency": "GBP",
                    "our_price": [{"schedule": [{"value_with_tax": "69.98"}]}]
                }]
            }]
        })))
        .with_status(200)
        .with_body(r#"{"sku":"JL-BC002","status":"ACCEPTED","submissionId":"sub-1"}"#)
        .create_async()
        .await;

    let (core, _tmp) = test_core(&server, None).await;
    let token = session_token(&core).await;

    let result = dispatch_tool(
        &core,
        "updatePrice",
        json!({
            "token": token,
            "sellerId": "A2C259Q0GU1WMI",
            "sku": "JL-BC002",
            "newPrice": "69.98",
            "currency": "GBP"
        }),
    )
    .await;

    let env = envelope_of(&result);
    assert_eq!(env["success"], json!(true), "envelope: {}", env);
    assert_eq!(env["data"]["listing_update"]["fields_changed"], json!(["price"]));

    token_mock.assert_async().await;
    patch_mock.assert_async().await;
}

#[tokio::test]
async fn coalesced_refresh_under_concurrency() {
    let mut server = mockito::Server::new_async().await;
    // exactly one refresh may reach the identity provider
    let token_mock = server
        .mock("POST", "/auth/o2/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("client_id".into(), "amzn1.application-oa2-client.mock".into()),
        ]))
        .with_status(200)
        .with_body(TOKEN_BODY)
        .expect(1)
        .create_async()
        .await;

    let orders_mock = server
        .mock("GET", "/orders/v0/orders")
        .with_status(200)
        .with_body(r#"{"payload":{"Orders":[]}}"#)
        .expect(100)
        .create_async()
        .await;

    let limits = "\"/orders/v0/orders\":\n  rate: 1000.0\n  burst: 1000\n";
    let (core, _tmp) = test_core(&server, Some(limits)).await;
    let core = Arc::new(core);
    let token = session_token(&core).await;

    let mut handles = Vec::new();
    for _ in 0..100 {
        let core = core.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            dispatch_tool(&core, "listOrders", json!({"token": token})).await
        }));
    }

    for handle in handles {
        let env = handle.await.unwrap().to_value();
        assert_eq!(env["success"], json!(true), "envelope: {}", env);
    }

    token_mock.assert_async().await;
    orders_mock.assert_async().await;
}

#[tokio::test]
async fn rate_limit_saturation_fails_fast() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/auth/o2/token")
        .with_status(200)
        .with_body(TOKEN_BODY)
        .create_async()
        .await;
    server
        .mock("GET", "/orders/v0/orders")
        .with_status(200)
        .with_body(r#"{"payload":{"Orders":[]}}"#)
        .create_async()
        .await;

    let (core, _tmp) = test_core(&server, None).await;
    let token = session_token(&core).await;

    let mut admitted = 0;
    let mut limited = 0;
    for _ in 0..31 {
        let env = dispatch_tool(&core, "listOrders", json!({"token": token}))
            .await
            .to_value();
        if env["success"] == json!(true) {
            admitted += 1;
        } else {
            assert_eq!(env["error"], json!("rate_limit_exceeded"));
            assert!(env["retry_after"].as_f64().unwrap() >= 0.0);
            limited += 1;
        }
    }

    // orders bucket: burst 20, refill 0.0167/s
    assert_eq!(admitted, 20);
    assert_eq!(limited, 11);
}

#[tokio::test]
async fn upstream_429_retries_then_surfaces_retry_after() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/auth/o2/token")
        .with_status(200)
        .with_body(TOKEN_BODY)
        .create_async()
        .await;

    // initial attempt plus three retries
    let throttled = server
        .mock("GET", "/orders/v0/orders/123-1234567-1234567")
        .with_status(429)
        .with_header("Retry-After", "0.05")
        .with_body(r#"{"errors":[{"code":"QuotaExceeded","message":"slow down"}]}"#)
        .expect(4)
        .create_async()
        .await;

    let (core, _tmp) = test_core(&server, None).await;
    let token = session_token(&core).await;

    let env = dispatch_tool(
        &core,
        "getOrder",
        json!({"token": token, "orderId": "123-1234567-1234567"}),
    )
    .await
    .to_value();

    assert_eq!(env["success"], json!(false));
    assert_eq!(env["error"], json!("rate_limit_exceeded"));
    assert!(env["retry_after"].as_f64().unwrap() > 0.0);
    throttled.assert_async().await;
}

#[tokio::test]
async fn upstream_401_forces_one_credential_refresh() {
    let mut server = mockito::Server::new_async().await;
    // first mint plus the forced refresh after the 401
    let token_mock = server
        .mock("POST", "/auth/o2/token")
        .with_status(200)
        .with_body(TOKEN_BODY)
        .expect(2)
        .create_async()
        .await;

    let unauthorized = server
        .mock("GET", "/orders/v0/orders/123-1234567-1234567")
        .with_status(401)
        .with_body(r#"{"errors":[{"code":"Unauthorized","message":"expired"}]}"#)
        .expect(2)
        .create_async()
        .await;

    let (core, _tmp) = test_core(&server, None).await;
    let token = session_token(&core).await;

    let env = dispatch_tool(
        &core,
        "getOrder",
        json!({"token": token, "orderId": "123-1234567-1234567"}),
    )
    .await
    .to_value();

    assert_eq!(env["success"], json!(false));
    assert_eq!(env["error"], json!("auth_failed"));
    token_mock.assert_async().await;
    unauthorized.assert_async().await;
}

#[tokio::test]
async fn terminal_4xx_is_upstream_error_without_retry() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/auth/o2/token")
        .with_status(200)
        .with_body(TOKEN_BODY)
        .create_async()
        .await;

    let bad_request = server
        .mock("GET", "/orders/v0/orders/BAD-ORDER-ID")
        .with_status(400)
        .with_body(r#"{"errors":[{"code":"InvalidInput","message":"bad order id"}]}"#)
        .expect(1)
        .create_async()
        .await;

    let (core, _tmp) = test_core(&server, None).await;
    let token = session_token(&core).await;

    let env = dispatch_tool(
        &core,
        "getOrder",
        json!({"token": token, "orderId": "BAD-ORDER-ID"}),
    )
    .await
    .to_value();

    assert_eq!(env["success"], json!(false));
    assert_eq!(env["error"], json!("upstream_error"));
    assert_eq!(env["status_code"], json!(400));
    assert_eq!(env["details"][0]["code"], json!("InvalidInput"));
    bad_request.assert_async().await;
}

#[tokio::test]
async fn pagination_concatenates_pages_in_order() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/auth/o2/token")
        .with_status(200)
        .with_body(TOKEN_BODY)
        .create_async()
        .await;

    // mockito gives the most recently declared matching mock priority, so
    // the catch-all first page goes first and the token-specific page last
    let first_page = server
        .mock("GET", "/orders/v0/orders")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            r#"{"payload":{"Orders":[{"AmazonOrderId":"A"},{"AmazonOrderId":"B"}],"NextToken":"page2"}}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let second_page = server
        .mock("GET", "/orders/v0/orders")
        .match_query(Matcher::UrlEncoded("NextToken".into(), "page2".into()))
        .with_status(200)
        .with_body(r#"{"payload":{"Orders":[{"AmazonOrderId":"C"}]}}"#)
        .expect(1)
        .create_async()
        .await;

    let limits = "\"/orders/v0/orders\":\n  rate: 1000.0\n  burst: 1000\n";
    let (core, _tmp) = test_core(&server, Some(limits)).await;
    let token = session_token(&core).await;

    let env = dispatch_tool(&core, "listOrders", json!({"token": token}))
        .await
        .to_value();

    assert_eq!(env["success"], json!(true), "envelope: {}", env);
    let orders = env["data"].as_array().unwrap();
    let ids: Vec<&str> = orders
        .iter()
        .map(|o| o["AmazonOrderId"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["A", "B", "C"]);
    assert_eq!(env["metadata"]["pagination_complete"], json!(true));

    first_page.assert_async().await;
    second_page.assert_async().await;
}

#[tokio::test]
async fn submit_feed_runs_the_three_step_flow() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/auth/o2/token")
        .with_status(200)
        .with_body(TOKEN_BODY)
        .create_async()
        .await;

    let upload_path = "/upload/feed-doc-1";
    let create_document = server
        .mock("POST", "/feeds/2021-06-30/documents")
        .with_status(201)
        .with_body(&format!(
            r#"{{"feedDocumentId":"doc-1","url":"{}{}"}}"#,
            server.url(),
            upload_path
        ))
        .expect(1)
        .create_async()
        .await;

    let upload = server
        .mock("PUT", upload_path)
        .match_header("content-type", "text/xml; charset=UTF-8")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let create_feed = server
        .mock("POST", "/feeds/2021-06-30/feeds")
        .match_body(Matcher::PartialJson(json!({
            "feedType": "POST_INVENTORY_AVAILABILITY_DATA",
            "inputFeedDocumentId": "doc-1"
        })))
        .with_status(202)
        .with_body(r#"{"feedId":"feed-77"}"#)
        .expect(1)
        .create_async()
        .await;

    let (core, _tmp) = test_core(&server, None).await;
    let token = session_token(&core).await;

    let env = dispatch_tool(
        &core,
        "bulkUpdateFbmInventory",
        json!({
            "token": token,
            "updatesJsonArray": [
                {"sku": "JL-BC002", "quantity": 25, "handling_time": 2}
            ]
        }),
    )
    .await
    .to_value();

    assert_eq!(env["success"], json!(true), "envelope: {}", env);
    assert_eq!(env["data"]["feedId"], json!("feed-77"));
    assert_eq!(env["metadata"]["items_submitted"], json!(1));

    create_document.assert_async().await;
    upload.assert_async().await;
    create_feed.assert_async().await;
}
