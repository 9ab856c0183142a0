//! Trello REST client.
//!
//! Implements [`CardApi`] over `https://api.trello.com/1`. Card and list
//! lookups authenticate with `key`/`token` query parameters; attachment
//! downloads need the OAuth-style `Authorization` header instead.
//!
//! # Environment Variables
//!
//! - `TRELLO_API_KEY` (required)
//! - `TRELLO_TOKEN` (required)
//!
//! Both are read on every call, so a missing credential fails the current
//! event before any request leaves the process.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;
use url::Url;

use crate::config::{HttpConfig, TrelloConfig};
use crate::error::UpstreamError;
use crate::traits::{Card, CardApi, CardList, DownloadedFile};

const SERVICE: &str = "trello";

/// API key and token loaded from the environment.
struct TrelloCredentials {
    api_key: String,
    token: String,
}

impl TrelloCredentials {
    fn from_env() -> Result<Self, UpstreamError> {
        let api_key = non_empty_env("TRELLO_API_KEY")
            .ok_or(UpstreamError::MissingCredentials("TRELLO_API_KEY"))?;
        let token = non_empty_env("TRELLO_TOKEN")
            .ok_or(UpstreamError::MissingCredentials("TRELLO_TOKEN"))?;
        Ok(Self { api_key, token })
    }

    fn oauth_header(&self) -> String {
        format!(
            "OAuth oauth_consumer_key=\"{}\", oauth_token=\"{}\"",
            self.api_key, self.token
        )
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parses an attachment URL and admits it only when it is https on one of
/// `allowed_hosts` or a subdomain of one. Downloads carry the board
/// credentials, so nothing else may be fetched.
pub fn trusted_attachment_url(raw: &str, allowed_hosts: &[String]) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    if url.scheme() != "https" || url.port().is_some() {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    let trusted = allowed_hosts.iter().any(|allowed| {
        let allowed = allowed.trim().to_ascii_lowercase();
        host == allowed
            || host
                .strip_suffix(allowed.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    });
    trusted.then_some(url)
}

pub struct TrelloClient {
    base_url: String,
    client: reqwest::Client,
}

impl TrelloClient {
    pub fn new(trello: &TrelloConfig, http: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(http.timeout())
            .build()
            .context("Failed to build Trello HTTP client")?;
        Ok(Self {
            base_url: trello.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        fields: &str,
    ) -> Result<T> {
        let creds = TrelloCredentials::from_env()?;
        let url = format!("{}/{}", self.base_url, path);
        debug!(%url, "Trello GET");

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("fields", fields),
                ("key", creds.api_key.as_str()),
                ("token", creds.token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;

        if !resp.status().is_success() {
            return Err(UpstreamError::from_response(SERVICE, resp).await.into());
        }

        resp.json::<T>()
            .await
            .with_context(|| format!("Invalid Trello response for {}", path))
    }
}

#[async_trait]
impl CardApi for TrelloClient {
    async fn get_card(&self, card_id: &str) -> Result<Card> {
        self.get_json(&format!("cards/{}", card_id), "name,desc,idList")
            .await
    }

    async fn get_list(&self, list_id: &str) -> Result<CardList> {
        self.get_json(&format!("lists/{}", list_id), "name").await
    }

    async fn download_attachment(&self, url: &str) -> Result<DownloadedFile> {
        let creds = TrelloCredentials::from_env()?;

        let resp = self
            .client
            .get(url)
            .header(AUTHORIZATION, creds.oauth_header())
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;

        if !resp.status().is_success() {
            return Err(UpstreamError::from_response(SERVICE, resp).await.into());
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;

        Ok(DownloadedFile {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_header_format() {
        let creds = TrelloCredentials {
            api_key: "k".to_string(),
            token: "t".to_string(),
        };
        assert_eq!(
            creds.oauth_header(),
            r#"OAuth oauth_consumer_key="k", oauth_token="t""#
        );
    }

    #[test]
    fn attachment_url_must_be_https_on_an_allowed_host() {
        let allowed = vec!["trello.com".to_string()];
        for ok in [
            "https://trello.com/1/cards/c1/attachments/a1/download/photo.jpg",
            "https://api.trello.com/1/cards/c1/attachments/a1/download/photo.jpg",
            "https://Trello-Attachments.TRELLO.com/x/photo.jpg",
        ] {
            assert!(trusted_attachment_url(ok, &allowed).is_some(), "{ok}");
        }
        for bad in [
            "https://attacker.example/steal",
            "http://trello.com/1/cards/c1/attachments/a1/download/photo.jpg",
            "https://trello.com.attacker.example/photo.jpg",
            "https://eviltrello.com/photo.jpg",
            "https://trello.com:8443/photo.jpg",
            "https://attacker.example/trello.com/photo.jpg",
            "not a url",
        ] {
            assert!(trusted_attachment_url(bad, &allowed).is_none(), "{bad}");
        }
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let cfg = TrelloConfig {
            base_url: "https://api.trello.com/1/".to_string(),
            ..TrelloConfig::default()
        };
        let client = TrelloClient::new(&cfg, &HttpConfig::default()).unwrap();
        assert_eq!(client.base_url, "https://api.trello.com/1");
    }
}
