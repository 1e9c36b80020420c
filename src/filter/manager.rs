// Filter application - single filters, chains, custom expressions, default reduction

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::core::errors::BridgeError;
use crate::filter::ast::Expr;
use crate::filter::catalog::{
    FilterCatalog, FilterDefinition, FilterKind, FilterSearch, ParamType, SeedDocument,
};
use crate::filter::eval::{eval, EvalLimits};
use crate::filter::parser::parse;
use crate::utils::time::parse_iso8601;

/// Embedded seed documents imported on first catalog open.
pub const SEED_DOCUMENTS: &[(&str, &str)] = &[
    ("orders", include_str!("seed/orders.json")),
    ("order_items", include_str!("seed/order_items.json")),
    ("inventory", include_str!("seed/inventory.json")),
    ("common", include_str!("seed/common.json")),
    ("chains", include_str!("seed/chains.json")),
];

/// Caller-facing filter options shared by every read operation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    #[serde(default)]
    pub filter_id: Option<String>,
    #[serde(default)]
    pub filter_chain: Option<String>,
    #[serde(default)]
    pub custom_filter: Option<String>,
    #[serde(default)]
    pub filter_params: Option<Value>,
    #[serde(default)]
    pub reduce_response: bool,
}

impl FilterOptions {
    pub fn is_empty(&self) -> bool {
        self.filter_id.is_none()
            && self.filter_chain.is_none()
            && self.custom_filter.is_none()
            && !self.reduce_response
    }
}

/// Result of post-processing: transformed data plus size accounting.
#[derive(Debug, Clone)]
pub struct FilterApplication {
    pub data: Value,
    pub metadata: Map<String, Value>,
}

/// The filter engine: catalog-backed application of named filters, chains,
/// ad-hoc expressions, and per-endpoint default reduction.
pub struct FilterEngine {
    catalog: FilterCatalog,
    limits: EvalLimits,
}

fn canonical_size(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn reduction_percent(original: usize, fin: usize) -> f64 {
    if original == 0 {
        0.0
    } else {
        round1((original as f64 - fin as f64) / original as f64 * 100.0)
    }
}

impl FilterEngine {
    pub fn new(catalog: FilterCatalog) -> Self {
        Self {
            catalog,
            limits: EvalLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: EvalLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn catalog(&self) -> &FilterCatalog {
        &self.catalog
    }

    /// Import the embedded seed documents unless the catalog already carries
    /// them. Imports are idempotent, so a partially-seeded catalog heals.
    pub async fn ensure_seeded(&self) -> Result<(), BridgeError> {
        if self.catalog.is_seeded().await? {
            return Ok(());
        }
        let mut total = 0usize;
        for (name, raw) in SEED_DOCUMENTS {
            let doc: SeedDocument = serde_json::from_str(raw).map_err(|e| {
                BridgeError::Internal(format!("corrupt seed document '{}': {}", name, e))
            })?;
            total += self.catalog.import_document(&doc).await?;
        }
        self.catalog.mark_seeded().await?;
        info!(filters = total, "filter catalog seeded");
        Ok(())
    }

    /// Apply the requested filtering to a payload. `endpoint` is the current
    /// operation name, used for default reduction lookup.
    pub async fn apply(
        &self,
        data: Value,
        options: &FilterOptions,
        endpoint: &str,
    ) -> Result<FilterApplication, BridgeError> {
        let params = Self::parse_params(options)?;
        let original_size = canonical_size(&data);

        let (result, applied, extra) = if let Some(ref chain) = options.filter_chain {
            self.apply_chain_spec(data, chain, &params).await?
        } else if let Some(ref id) = options.filter_id {
            let (value, applied) = self.apply_by_id(data, id, &params).await?;
            (value, applied, Map::new())
        } else if let Some(ref expression) = options.custom_filter {
            let value = self.apply_custom(data, expression)?;
            let mut extra = Map::new();
            extra.insert(
                "custom_filter".to_string(),
                Value::String(expression.clone()),
            );
            (value, vec!["custom".to_string()], extra)
        } else if options.reduce_response {
            match self.default_reduction_filter(endpoint).await? {
                Some(id) => {
                    let (value, applied) = self.apply_by_id(data, &id, &params).await?;
                    (value, applied, Map::new())
                }
                None => {
                    let mut extra = Map::new();
                    extra.insert(
                        "note".to_string(),
                        Value::String(format!(
                            "no default reduction filter registered for '{}'",
                            endpoint
                        )),
                    );
                    (data, Vec::new(), extra)
                }
            }
        } else {
            (data, Vec::new(), Map::new())
        };

        let final_size = canonical_size(&result);
        let mut metadata = Map::new();
        metadata.insert(
            "original_size_bytes".to_string(),
            Value::from(original_size),
        );
        metadata.insert("final_size_bytes".to_string(), Value::from(final_size));
        metadata.insert(
            "reduction_percent".to_string(),
            Value::from(reduction_percent(original_size, final_size)),
        );
        metadata.insert(
            "filters_applied".to_string(),
            Value::Array(applied.into_iter().map(Value::String).collect()),
        );
        for (k, v) in extra {
            metadata.insert(k, v);
        }

        Ok(FilterApplication {
            data: result,
            metadata,
        })
    }

    fn parse_params(options: &FilterOptions) -> Result<HashMap<String, Value>, BridgeError> {
        match &options.filter_params {
            None | Some(Value::Null) => Ok(HashMap::new()),
            Some(Value::Object(map)) => {
                Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            }
            // tolerate a JSON-encoded object, which some callers send
            Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => {
                    Ok(map.into_iter().collect())
                }
                _ => Err(BridgeError::invalid_input(
                    "filterParams must be a JSON object",
                )),
            },
            Some(_) => Err(BridgeError::invalid_input(
                "filterParams must be a JSON object",
            )),
        }
    }

    /// A comma-separated list of filter ids, or a single id that may name a
    /// stored chain.
    async fn apply_chain_spec(
        &self,
        data: Value,
        spec: &str,
        params: &HashMap<String, Value>,
    ) -> Result<(Value, Vec<String>, Map<String, Value>), BridgeError> {
        let ids: Vec<String> = spec
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if ids.is_empty() {
            return Err(BridgeError::invalid_input("filterChain is empty"));
        }

        if ids.len() == 1 {
            let (value, applied) = self.apply_by_id(data, &ids[0], params).await?;
            return Ok((value, applied, Map::new()));
        }

        // resolve every step before evaluating anything
        let mut steps = Vec::with_capacity(ids.len());
        for id in &ids {
            let def = self.resolve(id).await?;
            if def.kind == FilterKind::Chain {
                return Err(BridgeError::invalid_input(format!(
                    "chain filter '{}' cannot be a step of an ad-hoc chain",
                    id
                )));
            }
            steps.push(def);
        }

        let (value, applied, step_results) = self.run_steps(data, &steps, params)?;
        let mut extra = Map::new();
        extra.insert("step_results".to_string(), Value::Array(step_results));
        Ok((value, applied, extra))
    }

    async fn apply_by_id(
        &self,
        data: Value,
        id: &str,
        params: &HashMap<String, Value>,
    ) -> Result<(Value, Vec<String>), BridgeError> {
        let def = self.resolve(id).await?;

        if def.kind == FilterKind::Chain {
            let mut steps = Vec::with_capacity(def.chain_steps.len());
            for step_id in &def.chain_steps {
                let step = self.resolve(step_id).await?;
                if step.kind == FilterKind::Chain {
                    return Err(BridgeError::invalid_input(format!(
                        "chain '{}' nests chain filter '{}'",
                        id, step_id
                    )));
                }
                steps.push(step);
            }
            let (value, applied, _) = self.run_steps(data, &steps, params)?;
            return Ok((value, applied));
        }

        let value = self.apply_definition(&def, data, params)?;
        Ok((value, vec![def.id.clone()]))
    }

    fn run_steps(
        &self,
        data: Value,
        steps: &[Arc<FilterDefinition>],
        params: &HashMap<String, Value>,
    ) -> Result<(Value, Vec<String>, Vec<Value>), BridgeError> {
        let mut current = data;
        let mut applied = Vec::with_capacity(steps.len());
        let mut step_results = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            let before = canonical_size(&current);
            current = self.apply_definition(step, current, params)?;
            let after = canonical_size(&current);
            debug!(
                step = %step.id,
                size_before = before,
                size_after = after,
                "chain step applied"
            );
            step_results.push(serde_json::json!({
                "step_order": index + 1,
                "filter_id": step.id,
                "size_before": before,
                "size_after": after,
                "reduction_percent": reduction_percent(before, after),
            }));
            applied.push(step.id.clone());
        }

        Ok((current, applied, step_results))
    }

    /// Bind declared parameters onto the AST and evaluate. Unknown caller
    /// parameters are ignored; missing required ones are rejected.
    fn apply_definition(
        &self,
        def: &FilterDefinition,
        data: Value,
        params: &HashMap<String, Value>,
    ) -> Result<Value, BridgeError> {
        let expr = parse(&def.expression)?;
        let bound = bind_declared_params(&expr, def, params)?;
        eval(&bound, &data, self.limits)
    }

    fn apply_custom(&self, data: Value, expression: &str) -> Result<Value, BridgeError> {
        let expr = parse(expression)?;
        eval(&expr, &data, self.limits)
    }

    async fn resolve(&self, id: &str) -> Result<Arc<FilterDefinition>, BridgeError> {
        self.catalog
            .get_by_id(id)
            .await?
            .ok_or_else(|| BridgeError::invalid_input(format!("unknown filter '{}'", id)))
    }

    /// The registered field filter with the highest estimated reduction for
    /// an endpoint, if any.
    pub async fn default_reduction_filter(
        &self,
        endpoint: &str,
    ) -> Result<Option<String>, BridgeError> {
        let candidates = self
            .catalog
            .search(&FilterSearch {
                endpoint: Some(endpoint.to_string()),
                kind: Some(FilterKind::Field),
                ..Default::default()
            })
            .await?;

        Ok(candidates
            .iter()
            .filter(|def| def.estimated_reduction_percent.is_some())
            .max_by_key(|def| def.estimated_reduction_percent.unwrap_or(0))
            .map(|def| def.id.clone()))
    }
}

/// Substitute declared `{param}` placeholders with typed literal values.
fn bind_declared_params(
    expr: &Expr,
    def: &FilterDefinition,
    supplied: &HashMap<String, Value>,
) -> Result<Expr, BridgeError> {
    let mut bindings: HashMap<String, Value> = HashMap::new();

    for param in &def.parameters {
        match supplied.get(&param.name) {
            Some(value) => {
                bindings.insert(
                    param.name.clone(),
                    coerce_param(&param.name, param.param_type, value)?,
                );
            }
            None => match &param.default {
                Some(default) => {
                    bindings.insert(
                        param.name.clone(),
                        coerce_param(&param.name, param.param_type, default)?,
                    );
                }
                None if param.required => {
                    return Err(BridgeError::invalid_input(format!(
                        "required parameter '{}' not provided for filter '{}'",
                        param.name, def.id
                    )));
                }
                None => {}
            },
        }
    }

    Ok(substitute(expr, &bindings))
}

fn coerce_param(name: &str, expected: ParamType, value: &Value) -> Result<Value, BridgeError> {
    let ok = match expected {
        ParamType::String => value.is_string(),
        ParamType::Number => value.is_number(),
        ParamType::Boolean => value.is_boolean(),
        ParamType::Date => value
            .as_str()
            .map(|s| parse_iso8601(s).is_some())
            .unwrap_or(false),
    };
    if ok {
        Ok(value.clone())
    } else {
        Err(BridgeError::invalid_input(format!(
            "parameter '{}' must be a {}",
            name,
            expected.as_str()
        )))
    }
}

fn substitute(expr: &Expr, bindings: &HashMap<String, Value>) -> Expr {
    match expr {
        Expr::Param(name) => match bindings.get(name) {
            Some(value) => value_to_expr(value),
            None => expr.clone(),
        },
        Expr::Array(items) => Expr::Array(items.iter().map(|e| substitute(e, bindings)).collect()),
        Expr::Object(pairs) => Expr::Object(
            pairs
                .iter()
                .map(|(k, v)| (k.clone(), substitute(v, bindings)))
                .collect(),
        ),
        Expr::Unary(op, inner) => Expr::Unary(*op, Box::new(substitute(inner, bindings))),
        Expr::Binary(op, left, right) => Expr::Binary(
            *op,
            Box::new(substitute(left, bindings)),
            Box::new(substitute(right, bindings)),
        ),
        Expr::Pipe(stages) => Expr::Pipe(stages.iter().map(|e| substitute(e, bindings)).collect()),
        Expr::Call(name, args) => Expr::Call(
            name.clone(),
            args.iter().map(|e| substitute(e, bindings)).collect(),
        ),
        other => other.clone(),
    }
}

fn value_to_expr(value: &Value) -> Expr {
    match value {
        Value::Null => Expr::Null,
        Value::Bool(b) => Expr::Bool(*b),
        Value::Number(n) => Expr::Number(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => Expr::Str(s.clone()),
        Value::Array(items) => Expr::Array(items.iter().map(value_to_expr).collect()),
        Value::Object(map) => Expr::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_expr(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded_engine() -> FilterEngine {
        let catalog = FilterCatalog::open_in_memory().await.unwrap();
        let engine = FilterEngine::new(catalog);
        engine.ensure_seeded().await.unwrap();
        engine
    }

    // a full order record as the upstream actually returns it
    fn orders_fixture() -> Value {
        json!([
            {
                "AmazonOrderId": "123-1234567-1234567",
                "PurchaseDate": "2025-01-30T10:00:00Z",
                "LastUpdateDate": "2025-01-30T12:00:00Z",
                "OrderStatus": "Shipped",
                "FulfillmentChannel": "MFN",
                "SalesChannel": "Amazon.co.uk",
                "ShipServiceLevel": "Std UK Dom_1",
                "OrderTotal": {"Amount": "89.99", "CurrencyCode": "GBP"},
                "NumberOfItemsShipped": 1,
                "NumberOfItemsUnshipped": 0,
                "PaymentMethod": "Other",
                "PaymentMethodDetails": ["Standard"],
                "MarketplaceId": "A1F83G8C2ARO7P",
                "ShipmentServiceLevelCategory": "Standard",
                "OrderType": "StandardOrder",
                "EarliestShipDate": "2025-01-30T23:59:59Z",
                "LatestShipDate": "2025-01-31T23:59:59Z",
                "IsBusinessOrder": false,
                "IsPrime": false,
                "IsGlobalExpressEnabled": false,
                "IsPremiumOrder": false,
                "IsSoldByAB": false,
                "IsReplacementOrder": false,
                "HasRegulatedItems": false,
                "ShippingAddress": {"City": "London", "CountryCode": "GB", "PostalCode": "SW1A 1AA"},
                "BuyerInfo": {"BuyerEmail": "buyer@example.com"}
            }
        ])
    }

    #[tokio::test]
    async fn order_summary_reduces_by_eighty_percent() {
        let engine = seeded_engine().await;
        let options = FilterOptions {
            filter_id: Some("order_summary".to_string()),
            ..Default::default()
        };
        let result = engine
            .apply(orders_fixture(), &options, "listOrders")
            .await
            .unwrap();

        assert_eq!(
            result.data,
            json!([{
                "orderId": "123-1234567-1234567",
                "status": "Shipped",
                "total": "89.99",
                "currency": "GBP"
            }])
        );
        let reduction = result.metadata["reduction_percent"].as_f64().unwrap();
        assert!(reduction >= 80.0, "reduction was {}", reduction);
    }

    #[tokio::test]
    async fn high_value_items_with_threshold() {
        let engine = seeded_engine().await;
        let options = FilterOptions {
            filter_id: Some("high_value_items".to_string()),
            filter_params: Some(json!({"threshold": 50})),
            ..Default::default()
        };
        let input = json!([
            {"OrderItemId": "a", "ItemPrice": {"Amount": "75.00"}},
            {"OrderItemId": "b", "ItemPrice": {"Amount": "25.00"}}
        ]);
        let result = engine.apply(input, &options, "getOrderItems").await.unwrap();
        assert_eq!(
            result.data,
            json!([{"OrderItemId": "a", "ItemPrice": {"Amount": "75.00"}}])
        );
    }

    #[tokio::test]
    async fn chain_is_sequential_composition() {
        let engine = seeded_engine().await;
        let input = json!([
            {"AmazonOrderId": "A", "OrderStatus": "Shipped",
             "OrderTotal": {"Amount": "150.00", "CurrencyCode": "GBP"}},
            {"AmazonOrderId": "B", "OrderStatus": "Pending",
             "OrderTotal": {"Amount": "35.00", "CurrencyCode": "GBP"}}
        ]);

        let chained = engine
            .apply(
                input.clone(),
                &FilterOptions {
                    filter_chain: Some("high_value_orders,order_summary".to_string()),
                    ..Default::default()
                },
                "listOrders",
            )
            .await
            .unwrap();

        // equivalent to applying the two filters one after the other
        let first = engine
            .apply(
                input,
                &FilterOptions {
                    filter_id: Some("high_value_orders".to_string()),
                    ..Default::default()
                },
                "listOrders",
            )
            .await
            .unwrap();
        let second = engine
            .apply(
                first.data,
                &FilterOptions {
                    filter_id: Some("order_summary".to_string()),
                    ..Default::default()
                },
                "listOrders",
            )
            .await
            .unwrap();

        assert_eq!(chained.data, second.data);
        assert_eq!(
            chained.metadata["filters_applied"],
            json!(["high_value_orders", "order_summary"])
        );
        assert_eq!(
            chained.metadata["step_results"].as_array().unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn stored_chain_by_id() {
        let engine = seeded_engine().await;
        let input = json!([
            {"AmazonOrderId": "A", "OrderStatus": "Shipped",
             "OrderTotal": {"Amount": "150.00", "CurrencyCode": "GBP"}}
        ]);
        let result = engine
            .apply(
                input,
                &FilterOptions {
                    filter_chain: Some("high_value_order_summary".to_string()),
                    ..Default::default()
                },
                "listOrders",
            )
            .await
            .unwrap();
        assert_eq!(
            result.data,
            json!([{"orderId": "A", "status": "Shipped", "total": "150.00", "currency": "GBP"}])
        );
    }

    #[tokio::test]
    async fn unknown_chain_step_rejected_before_evaluation() {
        let engine = seeded_engine().await;
        let err = engine
            .apply(
                json!([]),
                &FilterOptions {
                    filter_chain: Some("high_value_orders,nonexistent".to_string()),
                    ..Default::default()
                },
                "listOrders",
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[tokio::test]
    async fn required_parameter_missing_is_invalid_input() {
        let engine = seeded_engine().await;
        let err = engine
            .apply(
                json!([]),
                &FilterOptions {
                    filter_id: Some("orders_by_status".to_string()),
                    ..Default::default()
                },
                "listOrders",
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[tokio::test]
    async fn parameter_type_mismatch_rejected() {
        let engine = seeded_engine().await;
        let err = engine
            .apply(
                json!([]),
                &FilterOptions {
                    filter_id: Some("high_value_items".to_string()),
                    filter_params: Some(json!({"threshold": "fifty"})),
                    ..Default::default()
                },
                "getOrderItems",
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[tokio::test]
    async fn custom_expression() {
        let engine = seeded_engine().await;
        let result = engine
            .apply(
                json!([{"x": 1}, {"x": 7}]),
                &FilterOptions {
                    custom_filter: Some("filter(.x > 5)".to_string()),
                    ..Default::default()
                },
                "listOrders",
            )
            .await
            .unwrap();
        assert_eq!(result.data, json!([{"x": 7}]));
        assert_eq!(result.metadata["filters_applied"], json!(["custom"]));
    }

    #[tokio::test]
    async fn custom_expression_parse_error_is_filter_failed() {
        let engine = seeded_engine().await;
        let err = engine
            .apply(
                json!([]),
                &FilterOptions {
                    custom_filter: Some("filter(".to_string()),
                    ..Default::default()
                },
                "listOrders",
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "filter_failed");
    }

    #[tokio::test]
    async fn default_reduction_picks_highest_estimate() {
        let engine = seeded_engine().await;
        let id = engine
            .default_reduction_filter("listOrders")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(id, "order_summary");
    }

    #[tokio::test]
    async fn reduce_response_without_default_passes_through() {
        let engine = seeded_engine().await;
        let input = json!({"raw": true});
        let result = engine
            .apply(
                input.clone(),
                &FilterOptions {
                    reduce_response: true,
                    ..Default::default()
                },
                "feedStatus",
            )
            .await
            .unwrap();
        assert_eq!(result.data, input);
        assert!(result.metadata.contains_key("note"));
    }

    #[tokio::test]
    async fn no_filtering_records_zero_reduction() {
        let engine = seeded_engine().await;
        let result = engine
            .apply(json!([1, 2, 3]), &FilterOptions::default(), "listOrders")
            .await
            .unwrap();
        assert_eq!(result.metadata["reduction_percent"], json!(0.0));
        assert_eq!(result.metadata["filters_applied"], json!([]));
    }

    #[tokio::test]
    async fn seed_test_cases_pass() {
        let engine = seeded_engine().await;
        for (name, raw) in SEED_DOCUMENTS {
            let doc: SeedDocument = serde_json::from_str(raw).unwrap();
            for seed in doc.filters.iter() {
                let def = engine.catalog().get_by_id(&seed.id).await.unwrap().unwrap();
                for test in &def.tests {
                    let result = engine
                        .apply_definition(&def, test.input.clone(), &HashMap::new())
                        .unwrap();
                    assert_eq!(
                        result, test.expected,
                        "seed test '{}' of {}::{} failed",
                        test.name, name, seed.id
                    );
                }
            }
        }
    }
}
