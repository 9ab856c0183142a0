//! Typed errors for the upstream clients and signature checks.
//!
//! The orchestrator works in `anyhow::Result`; these types exist where a
//! caller needs to tell failure kinds apart (tests, log classification).

use thiserror::Error;

/// Failure of an outbound call to the card API, object storage, or SNS.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("{0} is not set")]
    MissingCredentials(&'static str),

    #[error("{service} request failed (HTTP {status}): {body}")]
    Http {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} request timed out")]
    Timeout { service: &'static str },

    #[error("{service} request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl UpstreamError {
    pub fn from_reqwest(service: &'static str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { service }
        } else {
            Self::Transport { service, source }
        }
    }

    /// Builds an `Http` error from a non-2xx response, keeping a short body excerpt.
    pub async fn from_response(service: &'static str, resp: reqwest::Response) -> Self {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Self::Http {
            service,
            status,
            body: body.chars().take(300).collect(),
        }
    }
}

/// Why an SNS envelope failed verification. Collapsed to `false` by
/// [`SnsVerifier::verify`](crate::signature::sns::SnsVerifier::verify).
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("untrusted SNS URL: {0}")]
    UntrustedUrl(String),

    #[error("certificate fetch failed: {0}")]
    CertFetch(String),

    #[error("invalid signing certificate: {0}")]
    Certificate(String),

    #[error("missing envelope field: {0}")]
    MissingField(&'static str),

    #[error("unsupported message type: {0}")]
    UnsupportedType(String),

    #[error("unsupported signature version: {0}")]
    UnsupportedVersion(String),

    #[error("signature is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("signature mismatch")]
    Mismatch,
}
