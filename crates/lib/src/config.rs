//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.relay/config.json`) and then overridden by
//! environment variables. Everything here is resolved once at process start; the result is
//! immutable and handed to the turn handler by value.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::tenant::{AllowList, MissingTenantPolicy};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Tenant allow-list settings.
    #[serde(default)]
    pub tenants: TenantsConfig,

    /// Upstream completion service (Azure OpenAI).
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Flags sent with every streamed reply.
    #[serde(default)]
    pub stream: StreamConfig,
}

/// Gateway bind, port, and auth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 3978). Overridden by PORT env.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Upper bound for handing one event to a slow client before the turn is abandoned.
    #[serde(default = "default_sink_timeout_secs")]
    pub sink_timeout_secs: u64,

    /// Auth settings. When absent, defaults to no auth for loopback bind.
    #[serde(default)]
    pub auth: GatewayAuthConfig,
}

/// Gateway auth: token or none (loopback-only when none).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAuthConfig {
    /// "none" = no shared secret (only safe when bind is loopback). "token" = require a bearer token.
    #[serde(default)]
    pub mode: GatewayAuthMode,

    /// Shared secret for `/api/messages`. Overridden by RELAY_GATEWAY_TOKEN env.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayAuthMode {
    /// No auth; allow only when bind is loopback.
    #[default]
    None,

    /// Require `Authorization: Bearer <token>` to match the configured token.
    Token,
}

fn default_gateway_port() -> u16 {
    3978
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_sink_timeout_secs() -> u64 {
    10
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            sink_timeout_secs: default_sink_timeout_secs(),
            auth: GatewayAuthConfig::default(),
        }
    }
}

/// Which tenants may talk to the bot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantsConfig {
    /// Comma-separated tenant ids. Empty means every tenant is allowed. Overridden by ALLOWED_TENANTS env.
    #[serde(default)]
    pub allowed: String,

    /// Deny messages that carry no tenant id while the allow-list is non-empty. Overridden by REQUIRE_TENANT_ID env.
    #[serde(default)]
    pub require_tenant_id: bool,
}

/// Azure OpenAI deployment settings. All four string fields are required to start the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub api_version: Option<String>,
    pub deployment: Option<String>,
    /// Bound on connecting and receiving response headers. The streamed body is not covered.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Max wait between two streamed fragments.
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_chunk_timeout_secs() -> u64 {
    60
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            api_version: None,
            deployment: None,
            request_timeout_secs: default_request_timeout_secs(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
        }
    }
}

/// Informational flags attached to streamed replies. They do not change control flow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    #[serde(default = "default_true")]
    pub feedback_loop: bool,
    #[serde(default = "default_true")]
    pub generated_by_ai_label: bool,
}

fn default_true() -> bool {
    true
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            feedback_loop: true,
            generated_by_ai_label: true,
        }
    }
}

/// Startup configuration failures. Fatal: the gateway does not start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {env} (or {key} in the config file)")]
    Missing {
        env: &'static str,
        key: &'static str,
    },
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Fully resolved upstream settings.
#[derive(Clone)]
pub struct UpstreamSettings {
    pub endpoint: String,
    pub api_key: String,
    pub api_version: String,
    pub deployment: String,
    pub request_timeout: Duration,
    pub chunk_timeout: Duration,
}

impl std::fmt::Debug for UpstreamSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSettings")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("api_version", &self.api_version)
            .field("deployment", &self.deployment)
            .field("request_timeout", &self.request_timeout)
            .field("chunk_timeout", &self.chunk_timeout)
            .finish()
    }
}

/// Tenant gate settings resolved from config and env.
#[derive(Debug, Clone)]
pub struct TenantSettings {
    pub allow_list: AllowList,
    pub missing_tenant: MissingTenantPolicy,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn is_truthy(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Resolve a required upstream field: env wins over config.
fn required(
    lookup: &dyn Fn(&str) -> Option<String>,
    env: &'static str,
    key: &'static str,
    from_config: Option<&String>,
) -> Result<String, ConfigError> {
    non_empty(lookup(env))
        .or_else(|| non_empty(from_config.cloned()))
        .ok_or(ConfigError::Missing { env, key })
}

/// Resolve upstream settings with an explicit variable lookup (tests pass a map).
pub fn resolve_upstream_with(
    config: &Config,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<UpstreamSettings, ConfigError> {
    let up = &config.upstream;
    let endpoint = required(
        lookup,
        "AZURE_OPENAI_ENDPOINT",
        "upstream.endpoint",
        up.endpoint.as_ref(),
    )?;
    if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
        return Err(ConfigError::Invalid {
            key: "upstream.endpoint",
            reason: format!("expected an http(s) URL, got {:?}", endpoint),
        });
    }
    let api_key = required(
        lookup,
        "AZURE_OPENAI_API_KEY",
        "upstream.apiKey",
        up.api_key.as_ref(),
    )?;
    let api_version = required(
        lookup,
        "AZURE_OPENAI_API_VERSION",
        "upstream.apiVersion",
        up.api_version.as_ref(),
    )?;
    let deployment = required(
        lookup,
        "AZURE_OPENAI_DEPLOYMENT_NAME",
        "upstream.deployment",
        up.deployment.as_ref(),
    )?;
    Ok(UpstreamSettings {
        endpoint: endpoint.trim_end_matches('/').to_string(),
        api_key,
        api_version,
        deployment,
        request_timeout: Duration::from_secs(up.request_timeout_secs.max(1)),
        chunk_timeout: Duration::from_secs(up.chunk_timeout_secs.max(1)),
    })
}

/// Resolve upstream settings from config and process environment.
pub fn resolve_upstream(config: &Config) -> Result<UpstreamSettings, ConfigError> {
    resolve_upstream_with(config, &env_var)
}

/// Resolve tenant settings with an explicit variable lookup. ALLOWED_TENANTS replaces
/// `tenants.allowed` whenever the variable is set, even to an empty string.
pub fn resolve_tenants_with(
    config: &Config,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> TenantSettings {
    let raw = lookup("ALLOWED_TENANTS").unwrap_or_else(|| config.tenants.allowed.clone());
    let require = lookup("REQUIRE_TENANT_ID")
        .map(|v| is_truthy(&v))
        .unwrap_or(config.tenants.require_tenant_id);
    TenantSettings {
        allow_list: AllowList::parse(&raw),
        missing_tenant: if require {
            MissingTenantPolicy::Deny
        } else {
            MissingTenantPolicy::Allow
        },
    }
}

pub fn resolve_tenants(config: &Config) -> TenantSettings {
    resolve_tenants_with(config, &env_var)
}

/// Resolve the gateway token with an explicit variable lookup.
pub fn resolve_gateway_token_with(
    config: &Config,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Option<String> {
    non_empty(lookup("RELAY_GATEWAY_TOKEN"))
        .or_else(|| non_empty(config.gateway.auth.token.clone()))
}

/// Resolve the gateway token: env RELAY_GATEWAY_TOKEN overrides config.
pub fn resolve_gateway_token(config: &Config) -> Option<String> {
    resolve_gateway_token_with(config, &env_var)
}

/// Apply the PORT override (hosting platforms inject it).
pub fn apply_port_override_with(config: &mut Config, lookup: &dyn Fn(&str) -> Option<String>) {
    if let Some(raw) = non_empty(lookup("PORT")) {
        match raw.parse::<u16>() {
            Ok(p) => config.gateway.port = p,
            Err(_) => log::warn!("ignoring invalid PORT value {:?}", raw),
        }
    }
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RELAY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".relay").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or the default). Missing file => default config.
/// The PORT env override is applied here. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    apply_port_override_with(&mut config, &env_var);
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    fn full_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com/"),
            ("AZURE_OPENAI_API_KEY", "secret"),
            ("AZURE_OPENAI_API_VERSION", "2024-06-01"),
            ("AZURE_OPENAI_DEPLOYMENT_NAME", "gpt-4o"),
        ]
    }

    #[test]
    fn default_gateway_port_and_bind() {
        let g = GatewayConfig::default();
        assert_eq!(g.port, 3978);
        assert_eq!(g.bind, "127.0.0.1");
    }

    #[test]
    fn empty_json_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.gateway.port, 3978);
        assert_eq!(config.upstream.chunk_timeout_secs, 60);
        assert!(config.stream.feedback_loop);
        assert!(config.stream.generated_by_ai_label);
    }

    #[test]
    fn upstream_from_env_trims_endpoint_slash() {
        let s = resolve_upstream_with(&Config::default(), &lookup(&full_env())).unwrap();
        assert_eq!(s.endpoint, "https://example.openai.azure.com");
        assert_eq!(s.deployment, "gpt-4o");
        assert!(!format!("{:?}", s).contains("secret"));
    }

    #[test]
    fn upstream_env_overrides_file() {
        let mut config = Config::default();
        config.upstream.deployment = Some("from-file".to_string());
        let s = resolve_upstream_with(&config, &lookup(&full_env())).unwrap();
        assert_eq!(s.deployment, "gpt-4o");
    }

    #[test]
    fn upstream_falls_back_to_file() {
        let mut config = Config::default();
        config.upstream.deployment = Some("from-file".to_string());
        let env: Vec<_> = full_env()
            .into_iter()
            .filter(|(k, _)| *k != "AZURE_OPENAI_DEPLOYMENT_NAME")
            .collect();
        let s = resolve_upstream_with(&config, &lookup(&env)).unwrap();
        assert_eq!(s.deployment, "from-file");
    }

    #[test]
    fn missing_api_key_is_config_error() {
        let env: Vec<_> = full_env()
            .into_iter()
            .filter(|(k, _)| *k != "AZURE_OPENAI_API_KEY")
            .collect();
        let err = resolve_upstream_with(&Config::default(), &lookup(&env)).unwrap_err();
        match err {
            ConfigError::Missing { env, .. } => assert_eq!(env, "AZURE_OPENAI_API_KEY"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn blank_value_counts_as_missing() {
        let mut env = full_env();
        env.retain(|(k, _)| *k != "AZURE_OPENAI_API_VERSION");
        env.push(("AZURE_OPENAI_API_VERSION", "   "));
        assert!(matches!(
            resolve_upstream_with(&Config::default(), &lookup(&env)),
            Err(ConfigError::Missing { .. })
        ));
    }

    #[test]
    fn endpoint_must_be_http_url() {
        let mut env = full_env();
        env.retain(|(k, _)| *k != "AZURE_OPENAI_ENDPOINT");
        env.push(("AZURE_OPENAI_ENDPOINT", "example.openai.azure.com"));
        assert!(matches!(
            resolve_upstream_with(&Config::default(), &lookup(&env)),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn tenants_env_replaces_file_list() {
        let mut config = Config::default();
        config.tenants.allowed = "file-tenant".to_string();
        let t = resolve_tenants_with(&config, &lookup(&[("ALLOWED_TENANTS", " t1, ,t2 ")]));
        assert_eq!(t.allow_list.ids(), ["t1", "t2"]);
        assert_eq!(t.missing_tenant, MissingTenantPolicy::Allow);
    }

    #[test]
    fn empty_tenants_env_means_permissive() {
        let mut config = Config::default();
        config.tenants.allowed = "file-tenant".to_string();
        let t = resolve_tenants_with(&config, &lookup(&[("ALLOWED_TENANTS", "")]));
        assert!(t.allow_list.is_empty());
    }

    #[test]
    fn require_tenant_id_from_env() {
        let t = resolve_tenants_with(&Config::default(), &lookup(&[("REQUIRE_TENANT_ID", "yes")]));
        assert_eq!(t.missing_tenant, MissingTenantPolicy::Deny);
    }

    #[test]
    fn gateway_token_env_wins_over_file() {
        let mut config = Config::default();
        config.gateway.auth.token = Some("from-file".to_string());
        assert_eq!(
            resolve_gateway_token_with(&config, &lookup(&[])).as_deref(),
            Some("from-file")
        );
        assert_eq!(
            resolve_gateway_token_with(&config, &lookup(&[("RELAY_GATEWAY_TOKEN", "from-env")]))
                .as_deref(),
            Some("from-env")
        );
    }

    #[test]
    fn port_override() {
        let mut config = Config::default();
        apply_port_override_with(&mut config, &lookup(&[("PORT", "8000")]));
        assert_eq!(config.gateway.port, 8000);
        apply_port_override_with(&mut config, &lookup(&[("PORT", "not-a-port")]));
        assert_eq!(config.gateway.port, 8000);
    }
}
