//! SNS message signature verification.
//!
//! SNS signs the canonical string of each envelope with the private key of
//! an X.509 certificate it publishes over HTTPS. Verification:
//!
//! 1. Validate `SigningCertURL` (https, `sns.<region>.amazonaws.com`, `.pem`).
//! 2. Fetch the certificate through a [`CertFetcher`] and extract its RSA key.
//! 3. Rebuild the string-to-sign for the message type.
//! 4. Check the PKCS#1 v1.5 signature (SHA-1 for version 1, SHA-256 for 2).
//!
//! Any failure along the way yields `false`; nothing here returns an error
//! to the HTTP layer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::warn;
use url::Url;
use x509_cert::der::{DecodePem, Encode};
use x509_cert::Certificate;

use crate::error::{SignatureError, UpstreamError};
use crate::events::{SnsEnvelope, SnsMessageKind};
use crate::traits::CertFetcher;

/// Verifies SNS envelopes against certificates from a [`CertFetcher`].
pub struct SnsVerifier {
    fetcher: Arc<dyn CertFetcher>,
    cert_host_suffix: String,
}

impl SnsVerifier {
    pub fn new(fetcher: Arc<dyn CertFetcher>, cert_host_suffix: impl Into<String>) -> Self {
        Self {
            fetcher,
            cert_host_suffix: cert_host_suffix.into(),
        }
    }

    /// Returns `true` only when the envelope is authentic. Fails closed.
    pub async fn verify(&self, envelope: &SnsEnvelope) -> bool {
        match self.check(envelope).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    message_id = %envelope.message_id,
                    topic_arn = %envelope.topic_arn,
                    error = %e,
                    "SNS signature rejected"
                );
                false
            }
        }
    }

    async fn check(&self, envelope: &SnsEnvelope) -> Result<(), SignatureError> {
        let cert_url = validate_sns_url(&envelope.signing_cert_url, &self.cert_host_suffix, true)?;
        let pem = self
            .fetcher
            .fetch_pem(cert_url.as_str())
            .await
            .map_err(|e| SignatureError::CertFetch(format!("{:#}", e)))?;
        let key = public_key_from_pem(&pem)?;
        let canonical = string_to_sign(envelope)?;
        let signature = STANDARD.decode(envelope.signature.trim())?;
        verify_with_key(
            &key,
            &envelope.signature_version,
            canonical.as_bytes(),
            &signature,
        )
    }

    pub fn cert_host_suffix(&self) -> &str {
        &self.cert_host_suffix
    }
}

/// Checks that `raw` points at an SNS endpoint before anything is fetched.
///
/// The host must be `sns.<region><suffix>` or `sns.<region><suffix>.cn`,
/// the scheme https, and for certificates the path must end in `.pem`.
pub fn validate_sns_url(
    raw: &str,
    host_suffix: &str,
    require_pem: bool,
) -> Result<Url, SignatureError> {
    let untrusted = || SignatureError::UntrustedUrl(raw.to_string());
    let url = Url::parse(raw).map_err(|_| untrusted())?;
    if url.scheme() != "https" || url.port().is_some() {
        return Err(untrusted());
    }
    let host = url.host_str().ok_or_else(untrusted)?.to_ascii_lowercase();
    let region = host
        .strip_prefix("sns.")
        .and_then(|rest| {
            rest.strip_suffix(host_suffix)
                .or_else(|| rest.strip_suffix(&format!("{}.cn", host_suffix)))
        })
        .ok_or_else(untrusted)?;
    let region_ok = !region.is_empty()
        && region
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !region_ok {
        return Err(untrusted());
    }
    if require_pem && !url.path().ends_with(".pem") {
        return Err(untrusted());
    }
    Ok(url)
}

/// Builds the newline-delimited canonical string SNS signs.
pub fn string_to_sign(envelope: &SnsEnvelope) -> Result<String, SignatureError> {
    let mut fields: Vec<(&str, &str)> = vec![
        ("Message", envelope.message.as_str()),
        ("MessageId", envelope.message_id.as_str()),
    ];
    match envelope.kind() {
        SnsMessageKind::Notification => {
            if let Some(subject) = envelope.subject.as_deref() {
                fields.push(("Subject", subject));
            }
            fields.push(("Timestamp", envelope.timestamp.as_str()));
            fields.push(("TopicArn", envelope.topic_arn.as_str()));
            fields.push(("Type", envelope.message_type.as_str()));
        }
        SnsMessageKind::SubscriptionConfirmation | SnsMessageKind::UnsubscribeConfirmation => {
            let subscribe_url = envelope
                .subscribe_url
                .as_deref()
                .ok_or(SignatureError::MissingField("SubscribeURL"))?;
            let token = envelope
                .token
                .as_deref()
                .ok_or(SignatureError::MissingField("Token"))?;
            fields.push(("SubscribeURL", subscribe_url));
            fields.push(("Timestamp", envelope.timestamp.as_str()));
            fields.push(("Token", token));
            fields.push(("TopicArn", envelope.topic_arn.as_str()));
            fields.push(("Type", envelope.message_type.as_str()));
        }
        SnsMessageKind::Unknown => {
            return Err(SignatureError::UnsupportedType(
                envelope.message_type.clone(),
            ))
        }
    }

    let mut out = String::new();
    for (name, value) in fields {
        out.push_str(name);
        out.push('\n');
        out.push_str(value);
        out.push('\n');
    }
    Ok(out)
}

/// Extracts the RSA public key from a PEM certificate.
pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey, SignatureError> {
    let cert = Certificate::from_pem(pem.as_bytes())
        .map_err(|e| SignatureError::Certificate(e.to_string()))?;
    let spki_der = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| SignatureError::Certificate(e.to_string()))?;
    RsaPublicKey::from_public_key_der(&spki_der)
        .map_err(|e| SignatureError::Certificate(e.to_string()))
}

pub fn verify_with_key(
    key: &RsaPublicKey,
    signature_version: &str,
    data: &[u8],
    signature: &[u8],
) -> Result<(), SignatureError> {
    let outcome = match signature_version {
        "1" => key.verify(Pkcs1v15Sign::new::<Sha1>(), &Sha1::digest(data), signature),
        "2" => key.verify(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(data), signature),
        other => return Err(SignatureError::UnsupportedVersion(other.to_string())),
    };
    outcome.map_err(|_| SignatureError::Mismatch)
}

// ============ HTTPS certificate fetcher ============

/// Fetches signing certificates over HTTPS, caching them by URL.
pub struct HttpCertFetcher {
    client: reqwest::Client,
    cache: Mutex<HashMap<String, String>>,
}

impl HttpCertFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn cached(&self, url: &str) -> Option<String> {
        self.cache.lock().ok().and_then(|c| c.get(url).cloned())
    }
}

#[async_trait]
impl CertFetcher for HttpCertFetcher {
    async fn fetch_pem(&self, url: &str) -> Result<String> {
        if let Some(pem) = self.cached(url) {
            return Ok(pem);
        }

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest("sns-cert", e))?;
        if !resp.status().is_success() {
            return Err(UpstreamError::from_response("sns-cert", resp).await.into());
        }
        let pem = resp
            .text()
            .await
            .map_err(|e| UpstreamError::from_reqwest("sns-cert", e))?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(url.to_string(), pem.clone());
        }
        Ok(pem)
    }
}
