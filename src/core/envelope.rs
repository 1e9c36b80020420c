// Uniform success/error wrapper returned by every operation

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::errors::BridgeError;
use crate::utils::time::iso_timestamp;

/// The response envelope: `Ok { data, metadata }` or
/// `Err { error, message, details?, retry_after?, status_code?, metadata }`.
///
/// Serialized untagged; the `success` flag discriminates on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    Ok(OkEnvelope),
    Err(ErrEnvelope),
}

#[derive(Debug, Clone, Serialize)]
pub struct OkEnvelope {
    pub success: bool,
    pub data: Value,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrEnvelope {
    pub success: bool,
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub metadata: Map<String, Value>,
}

fn base_metadata() -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert("timestamp".to_string(), Value::String(iso_timestamp()));
    meta.insert(
        "request_id".to_string(),
        Value::String(Uuid::new_v4().to_string()),
    );
    meta
}

impl Envelope {
    pub fn ok(data: Value) -> Self {
        Self::Ok(OkEnvelope {
            success: true,
            data,
            metadata: base_metadata(),
        })
    }

    pub fn error(err: &BridgeError) -> Self {
        let details = match err {
            BridgeError::InvalidInput { details, .. } if !details.is_empty() => Some(Value::Array(
                details.iter().cloned().map(Value::String).collect(),
            )),
            BridgeError::Upstream { details, .. } if !details.is_empty() => {
                Some(Value::Array(details.clone()))
            }
            _ => None,
        };

        Self::Err(ErrEnvelope {
            success: false,
            error: err.code().to_string(),
            message: err.to_string(),
            details,
            retry_after: err.retry_after(),
            status_code: err.status_code(),
            metadata: base_metadata(),
        })
    }

    /// Attach or overwrite a metadata entry.
    pub fn with_meta(mut self, key: &str, value: Value) -> Self {
        match &mut self {
            Self::Ok(e) => e.metadata.insert(key.to_string(), value),
            Self::Err(e) => e.metadata.insert(key.to_string(), value),
        };
        self
    }

    /// Merge a whole metadata map (adapter extras, filter statistics).
    pub fn with_meta_map(mut self, extra: Map<String, Value>) -> Self {
        let meta = match &mut self {
            Self::Ok(e) => &mut e.metadata,
            Self::Err(e) => &mut e.metadata,
        };
        for (k, v) in extra {
            meta.insert(k, v);
        }
        self
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({
                "success": false,
                "error": "internal",
                "message": "envelope serialization failed",
            })
        })
    }
}

impl From<BridgeError> for Envelope {
    fn from(err: BridgeError) -> Self {
        Self::error(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_envelope_shape() {
        let env = Envelope::ok(json!({"orders": []})).with_meta("marketplace_id", json!("A1F83G8C2ARO7P"));
        let v = env.to_value();
        assert_eq!(v["success"], json!(true));
        assert!(v["metadata"]["timestamp"].as_str().unwrap().ends_with('Z'));
        assert!(v["metadata"]["request_id"].is_string());
        assert_eq!(v["metadata"]["marketplace_id"], json!("A1F83G8C2ARO7P"));
    }

    #[test]
    fn rate_limit_envelope_carries_retry_after() {
        let env = Envelope::error(&BridgeError::RateLimitExceeded { retry_after: 2.5 });
        let v = env.to_value();
        assert_eq!(v["success"], json!(false));
        assert_eq!(v["error"], json!("rate_limit_exceeded"));
        assert_eq!(v["retry_after"], json!(2.5));
    }

    #[test]
    fn invalid_input_details_are_listed() {
        let env = Envelope::error(&BridgeError::invalid_input_with(
            "Input validation failed",
            vec!["bad marketplace".into(), "bad date".into()],
        ));
        let v = env.to_value();
        assert_eq!(v["details"].as_array().unwrap().len(), 2);
    }
}
