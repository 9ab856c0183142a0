use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub trello: TrelloConfig,
    #[serde(default)]
    pub sns: SnsConfig,
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub attachments: AttachmentConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrelloConfig {
    #[serde(default = "default_trello_base_url")]
    pub base_url: String,
    /// Shared secret for `x-trello-webhook`. `None` means open mode.
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// Registered callback URL, appended to the body before hashing when set.
    #[serde(default)]
    pub callback_url: Option<String>,
    /// Hosts that may receive the OAuth header on attachment downloads.
    /// An entry also admits its subdomains.
    #[serde(default = "default_attachment_hosts")]
    pub attachment_hosts: Vec<String>,
}

impl Default for TrelloConfig {
    fn default() -> Self {
        Self {
            base_url: default_trello_base_url(),
            webhook_secret: None,
            callback_url: None,
            attachment_hosts: default_attachment_hosts(),
        }
    }
}

fn default_trello_base_url() -> String {
    "https://api.trello.com/1".to_string()
}

fn default_attachment_hosts() -> Vec<String> {
    vec!["trello.com".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct SnsConfig {
    #[serde(default = "default_cert_host_suffix")]
    pub cert_host_suffix: String,
}

impl Default for SnsConfig {
    fn default() -> Self {
        Self {
            cert_host_suffix: default_cert_host_suffix(),
        }
    }
}

fn default_cert_host_suffix() -> String {
    ".amazonaws.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3Config {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmailConfig {
    #[serde(default = "default_repair_mailbox")]
    pub repair_mailbox: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            repair_mailbox: default_repair_mailbox(),
        }
    }
}

fn default_repair_mailbox() -> String {
    "repairs".to_string()
}

/// How `UpdateCard` list moves are gated before the vendor is touched.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ListGate {
    /// Reproduces the production condition, which admits every list name.
    #[default]
    Literal,
    /// Skips moves into "Incoming Repair" and "Daily Log In".
    SkipIntakeLists,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub list_gate: ListGate,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AttachmentConfig {
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            max_dimension: default_max_dimension(),
        }
    }
}

fn default_max_dimension() -> u32 {
    1200
}

impl Config {
    /// Config for commands that never touch the database or network.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/repairs.sqlite"),
            },
            server: ServerConfig {
                bind: "127.0.0.1:3000".to_string(),
            },
            http: HttpConfig::default(),
            trello: TrelloConfig::default(),
            sns: SnsConfig::default(),
            s3: S3Config::default(),
            email: EmailConfig::default(),
            reconcile: ReconcileConfig::default(),
            attachments: AttachmentConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if let Ok(secret) = std::env::var("TRELLO_WEBHOOK_SECRET") {
        config.trello.webhook_secret = Some(secret);
    }
    if config
        .trello
        .webhook_secret
        .as_deref()
        .is_some_and(str::is_empty)
    {
        config.trello.webhook_secret = None;
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.http.timeout_secs == 0 {
        anyhow::bail!("http.timeout_secs must be > 0");
    }

    if config.attachments.max_dimension == 0 {
        anyhow::bail!("attachments.max_dimension must be > 0");
    }

    if config.email.repair_mailbox.trim().is_empty() {
        anyhow::bail!("email.repair_mailbox must not be empty");
    }

    if !config.sns.cert_host_suffix.starts_with('.') {
        anyhow::bail!(
            "sns.cert_host_suffix must start with '.', got '{}'",
            config.sns.cert_host_suffix
        );
    }

    if config.trello.attachment_hosts.is_empty()
        || config
            .trello
            .attachment_hosts
            .iter()
            .any(|h| h.trim().is_empty() || h.starts_with('.'))
    {
        anyhow::bail!("trello.attachment_hosts needs at least one host, without a leading '.'");
    }

    if url::Url::parse(&config.trello.base_url).is_err() {
        anyhow::bail!("trello.base_url is not a valid URL: '{}'", config.trello.base_url);
    }

    Ok(())
}
