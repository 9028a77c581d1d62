use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    pub base_url: String,
    #[serde(default = "default_provisioning_path")]
    pub path: String,
    /// region -> provisioning base URL
    #[serde(default)]
    pub regions: HashMap<String, String>,
}

impl ProvisioningConfig {
    /// Endpoint for a tenant's region, falling back to the default base URL.
    pub fn endpoint_for(&self, region: Option<&str>) -> String {
        let base = region
            .and_then(|r| self.regions.get(r))
            .unwrap_or(&self.base_url);
        format!("{}{}", base.trim_end_matches('/'), self.path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamConfig {
    #[serde(default = "default_downstream_url")]
    pub base_url: String,
    #[serde(default = "default_extension")]
    pub default_extension: String,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_downstream_url(),
            default_extension: default_extension(),
            webhook_path: default_webhook_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub jwks_url: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    #[serde(default = "default_leeway")]
    pub leeway_secs: u64,
    /// Unset keeps fetched keys until an unknown key id forces a refresh.
    pub key_cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureConfig {
    #[serde(default = "default_max_skew")]
    pub max_skew_secs: i64,
    /// Fresh (timestamp, nonce) pairs are accepted more than once unless this is set.
    #[serde(default)]
    pub reject_replayed_nonces: bool,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            max_skew_secs: default_max_skew(),
            reject_replayed_nonces: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Features {
    #[serde(default = "default_true")]
    pub proxy_enabled: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self { proxy_enabled: true }
    }
}

/// Tenant material known before any lifecycle event arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSeed {
    pub tenant_id: String,
    pub api_key: Option<String>,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub provisioning: ProvisioningConfig,
    #[serde(default)]
    pub downstream: DownstreamConfig,
    pub platform: PlatformConfig,
    #[serde(default)]
    pub signature: SignatureConfig,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub tenants: Vec<TenantSeed>,
}

fn default_provisioning_path() -> String {
    "/api/v1/provisioning".to_string()
}

fn default_downstream_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_extension() -> String {
    "html".to_string()
}

fn default_webhook_path() -> String {
    "/webhooks".to_string()
}

fn default_leeway() -> u64 {
    60
}

fn default_max_skew() -> i64 {
    300
}

fn default_http_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading config file")?;
        let mut cfg: Config = serde_json::from_str(&raw).context("parsing config JSON")?;
        cfg.apply_env();
        Ok(cfg)
    }

    /// Environment takes precedence over the descriptor file.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("BRIDGE_PROVISIONING_URL") {
            self.provisioning.base_url = url;
        }
        if let Ok(url) = std::env::var("BRIDGE_DOWNSTREAM_URL") {
            self.downstream.base_url = url;
        }
        if let Ok(url) = std::env::var("BRIDGE_JWKS_URL") {
            self.platform.jwks_url = url;
        }
        if let Some(secs) = std::env::var("BRIDGE_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.http_timeout_secs = secs;
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn key_cache_ttl(&self) -> Option<Duration> {
        self.platform.key_cache_ttl_secs.map(Duration::from_secs)
    }

    /// Minimal config pointing every collaborator at the given URLs.
    pub fn with_endpoints(provisioning_url: &str, jwks_url: &str, downstream_url: &str) -> Self {
        Self {
            provisioning: ProvisioningConfig {
                base_url: provisioning_url.to_string(),
                path: default_provisioning_path(),
                regions: HashMap::new(),
            },
            downstream: DownstreamConfig {
                base_url: downstream_url.to_string(),
                ..DownstreamConfig::default()
            },
            platform: PlatformConfig {
                jwks_url: jwks_url.to_string(),
                issuer: None,
                audience: None,
                leeway_secs: default_leeway(),
                key_cache_ttl_secs: None,
            },
            signature: SignatureConfig::default(),
            http_timeout_secs: default_http_timeout(),
            features: Features::default(),
            tenants: Vec::new(),
        }
    }
}
