//! Raw email retrieval from Amazon S3.
//!
//! SES receipt rules drop each inbound message into a bucket; this module
//! fetches it back with a SigV4-signed `GetObject`. Signing is done with
//! `hmac` + `sha2` directly, so no AWS SDK is pulled in.
//!
//! # Configuration
//!
//! ```toml
//! [s3]
//! region = "us-east-1"
//! # endpoint_url = "http://localhost:9000"   # MinIO / LocalStack
//! ```
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID` (required)
//! - `AWS_SECRET_ACCESS_KEY` (required)
//! - `AWS_SESSION_TOKEN` (optional, for temporary credentials)

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::{HttpConfig, S3Config};
use crate::error::UpstreamError;
use crate::traits::ObjectStore;

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "s3";

/// AWS credentials loaded from environment variables.
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self, UpstreamError> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| UpstreamError::MissingCredentials("AWS_ACCESS_KEY_ID"))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| UpstreamError::MissingCredentials("AWS_SECRET_ACCESS_KEY"))?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// [`ObjectStore`] backed by the S3 REST API.
pub struct S3ObjectStore {
    region: String,
    endpoint_url: Option<String>,
    client: reqwest::Client,
}

impl S3ObjectStore {
    pub fn new(s3: &S3Config, http: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(http.timeout())
            .build()
            .context("Failed to build S3 HTTP client")?;
        Ok(Self {
            region: s3.region.clone(),
            endpoint_url: s3.endpoint_url.clone(),
            client,
        })
    }

    /// Host and canonical URI for an object.
    ///
    /// Custom endpoints use path-style addressing (`/<bucket>/<key>`);
    /// AWS uses virtual-hosted style (`<bucket>.s3.<region>.amazonaws.com`).
    fn locate(&self, bucket: &str, key: &str) -> (String, String, String) {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        match &self.endpoint_url {
            Some(endpoint) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                let uri = format!("/{}/{}", uri_encode(bucket), encoded_key);
                (scheme.to_string(), host, uri)
            }
            None => (
                "https".to_string(),
                format!("{}.s3.{}.amazonaws.com", bucket, self.region),
                format!("/{}", encoded_key),
            ),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let creds = AwsCredentials::from_env()?;
        let (scheme, host, canonical_uri) = self.locate(bucket, key);
        let url = format!("{}://{}{}", scheme, host, canonical_uri);
        debug!(%bucket, %key, "S3 GetObject");

        let signed = sign_get(&creds, &self.region, &host, &canonical_uri, Utc::now());

        let mut req_builder = self
            .client
            .get(&url)
            .header("Authorization", &signed.authorization)
            .header("x-amz-content-sha256", &signed.payload_hash)
            .header("x-amz-date", &signed.amz_date);

        if let Some(ref token) = creds.session_token {
            req_builder = req_builder.header("x-amz-security-token", token);
        }

        let resp = req_builder
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;

        if !resp.status().is_success() {
            return Err(UpstreamError::from_response(SERVICE, resp).await.into());
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;
        Ok(bytes.to_vec())
    }
}

// ============ AWS SigV4 ============

struct SignedRequest {
    authorization: String,
    payload_hash: String,
    amz_date: String,
}

/// Signs an unpayloaded GET with AWS Signature Version 4.
fn sign_get(
    creds: &AwsCredentials,
    region: &str,
    host: &str,
    canonical_uri: &str,
    now: DateTime<Utc>,
) -> SignedRequest {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let payload_hash = hex_sha256(b"");

    let mut headers = vec![
        ("host".to_string(), host.to_string()),
        ("x-amz-content-sha256".to_string(), payload_hash.clone()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(ref token) = creds.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "GET\n{}\n\n{}\n{}\n{}",
        canonical_uri, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, region, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    SignedRequest {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key_id, credential_scope, signed_headers, signature
        ),
        payload_hash,
        amz_date,
    }
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding, leaving only `A-Z a-z 0-9 - _ . ~` untouched.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}
