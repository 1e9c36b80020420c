// AWS Signature Version 4 request signing

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::core::errors::BridgeError;

type HmacSha256 = Hmac<Sha256>;

/// Ephemeral signing credentials: a key/secret pair plus, when the pair was
/// minted through role assumption, a session token and expiry.
#[derive(Debug, Clone)]
pub struct SigningCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// The pieces of an HTTP request that participate in the signature.
#[derive(Debug)]
pub struct SignableRequest<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    /// Query pairs in caller order; canonicalization sorts them.
    pub query: &'a [(String, String)],
    pub body: &'a [u8],
    pub region: &'a str,
    pub service: &'a str,
    pub timestamp: DateTime<Utc>,
}

/// Headers produced by signing, to be attached verbatim to the request.
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    pub authorization: String,
    pub x_amz_date: String,
    pub x_amz_security_token: Option<String>,
}

/// RFC 3986 encoding with the unreserved set AWS mandates. Slashes in a URI
/// path are kept; everything else non-unreserved is percent-encoded.
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, BridgeError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| BridgeError::Internal(format!("hmac init failed: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Signing key chain: date, region, service, then the terminal literal.
fn derive_signing_key(
    secret: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, BridgeError> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// Produce the `Authorization` header and companions for a request.
pub fn sign(
    request: &SignableRequest<'_>,
    credentials: &SigningCredentials,
) -> Result<SignatureHeaders, BridgeError> {
    let amz_date = request.timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let date = request.timestamp.format("%Y%m%d").to_string();

    let mut query: Vec<(String, String)> = request
        .query
        .iter()
        .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
        .collect();
    query.sort();
    let canonical_query = query
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut canonical_headers = format!("host:{}\nx-amz-date:{}\n", request.host, amz_date);
    let mut signed_headers = "host;x-amz-date".to_string();
    if let Some(ref token) = credentials.session_token {
        canonical_headers.push_str(&format!("x-amz-security-token:{}\n", token));
        signed_headers.push_str(";x-amz-security-token");
    }

    let payload_hash = hex_sha256(request.body);
    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method.to_uppercase(),
        uri_encode(request.path, false),
        canonical_query,
        canonical_headers,
        signed_headers,
        payload_hash
    );

    let scope = format!(
        "{}/{}/{}/aws4_request",
        date, request.region, request.service
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(
        &credentials.secret_access_key,
        &date,
        request.region,
        request.service,
    )?;
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        credentials.access_key_id, scope, signed_headers, signature
    );

    Ok(SignatureHeaders {
        authorization,
        x_amz_date: amz_date,
        x_amz_security_token: credentials.session_token.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_credentials(session: Option<&str>) -> SigningCredentials {
        SigningCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: session.map(|s| s.to_string()),
            expires_at: None,
        }
    }

    #[test]
    fn signing_key_matches_published_vector() {
        // AWS's documented derivation example for 20150830/us-east-1/iam
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20150830",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    #[test]
    fn uri_encoding_rules() {
        assert_eq!(uri_encode("a b", true), "a%20b");
        assert_eq!(uri_encode("a/b", false), "a/b");
        assert_eq!(uri_encode("a/b", true), "a%2Fb");
        assert_eq!(uri_encode("-._~", true), "-._~");
        assert_eq!(uri_encode("£", true), "%C2%A3");
    }

    #[test]
    fn authorization_header_shape() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let query = vec![("MarketplaceIds".to_string(), "A1F83G8C2ARO7P".to_string())];
        let request = SignableRequest {
            method: "get",
            host: "sellingpartnerapi-eu.amazon.com",
            path: "/orders/v0/orders",
            query: &query,
            body: b"",
            region: "eu-west-1",
            service: "execute-api",
            timestamp: ts,
        };
        let headers = sign(&request, &test_credentials(None)).unwrap();

        assert!(headers.authorization.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20250601/eu-west-1/execute-api/aws4_request"
        ));
        assert!(headers.authorization.contains("SignedHeaders=host;x-amz-date,"));
        assert!(headers.authorization.contains("Signature="));
        assert_eq!(headers.x_amz_date, "20250601T120000Z");
        assert!(headers.x_amz_security_token.is_none());
    }

    #[test]
    fn session_token_joins_signed_headers() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let request = SignableRequest {
            method: "GET",
            host: "sellingpartnerapi-eu.amazon.com",
            path: "/orders/v0/orders",
            query: &[],
            body: b"",
            region: "eu-west-1",
            service: "execute-api",
            timestamp: ts,
        };
        let headers = sign(&request, &test_credentials(Some("SESSION"))).unwrap();
        assert!(headers
            .authorization
            .contains("SignedHeaders=host;x-amz-date;x-amz-security-token,"));
        assert_eq!(headers.x_amz_security_token.as_deref(), Some("SESSION"));
    }

    #[test]
    fn signing_is_deterministic() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let query = vec![
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ];
        let request = SignableRequest {
            method: "POST",
            host: "sellingpartnerapi-eu.amazon.com",
            path: "/feeds/2021-06-30/feeds",
            query: &query,
            body: br#"{"feedType":"POST_INVENTORY_AVAILABILITY_DATA"}"#,
            region: "eu-west-1",
            service: "execute-api",
            timestamp: ts,
        };
        let first = sign(&request, &test_credentials(None)).unwrap();
        let second = sign(&request, &test_credentials(None)).unwrap();
        assert_eq!(first.authorization, second.authorization);
    }
}
