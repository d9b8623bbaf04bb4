//! Configuration loader and validator for the directory sync agent.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub directory: Directory,
    pub platform: Platform,
    #[serde(rename = "sync")]
    pub schedule: Schedule,
}

/// Directory (LDAP / Active Directory) connection and search settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Directory {
    pub url: String,
    pub bind_dn: String,
    pub bind_password: String,
    pub base_dn: String,
    pub user_search_base: Option<String>,
    pub search_filter: String,
    pub use_tls: bool,
    pub tls_skip_verify: bool,
    pub connect_timeout_secs: u64,
}

/// Remote platform settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Platform {
    pub url: String,
    pub tenant_id: String,
    pub api_key: String,
    pub request_timeout_secs: u64,
    pub probe_timeout_secs: u64,
}

/// Scheduling of sync cycles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Schedule {
    pub interval_secs: u64,
}

impl Default for Directory {
    fn default() -> Self {
        Self {
            url: "ldap://localhost:389".into(),
            bind_dn: String::new(),
            bind_password: String::new(),
            base_dn: String::new(),
            user_search_base: None,
            search_filter: "(objectClass=user)".into(),
            use_tls: false,
            tls_skip_verify: false,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000".into(),
            tenant_id: String::new(),
            api_key: String::new(),
            request_timeout_secs: 30,
            probe_timeout_secs: 10,
        }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
        }
    }
}

impl Directory {
    /// Base DN for the user search: `user_search_base` when set, else `base_dn`.
    pub fn search_base(&self) -> &str {
        self.user_search_base
            .as_deref()
            .filter(|base| !base.trim().is_empty())
            .unwrap_or(&self.base_dn)
    }

    pub fn endpoint(&self) -> Result<LdapEndpoint, ConfigError> {
        LdapEndpoint::parse(&self.url, self.use_tls)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Platform {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Schedule {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Host, port and transport security derived from the configured directory URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl LdapEndpoint {
    /// Accepts `ldap://host[:port]`, `ldaps://host[:port]` or a bare `host[:port]`.
    /// The scheme wins over `use_tls`; a bare host falls back to the toggle.
    pub fn parse(raw: &str, use_tls: bool) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        let lower = raw.to_ascii_lowercase();
        let (rest, tls) = if lower.starts_with("ldaps://") {
            (&raw["ldaps://".len()..], true)
        } else if lower.starts_with("ldap://") {
            (&raw["ldap://".len()..], false)
        } else if lower.contains("://") {
            return Err(ConfigError::InvalidValue {
                var: "directory.url".into(),
                message: format!("unsupported scheme in '{}'", raw),
            });
        } else {
            (raw, use_tls)
        };

        let invalid = |message: String| ConfigError::InvalidValue {
            var: "directory.url".into(),
            message,
        };
        let parse_port = |port: &str| {
            port.parse::<u16>()
                .map_err(|_| invalid(format!("invalid port '{}'", port)))
        };
        let default_port = if tls { 636 } else { 389 };

        let authority = rest.split('/').next().unwrap_or_default();
        // IPv6 literals are bracketed; a port may only follow the closing `]`.
        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (addr, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid(format!("unterminated IPv6 address in '{}'", raw)))?;
            let port = match after {
                "" => default_port,
                _ => match after.strip_prefix(':') {
                    Some(port) => parse_port(port)?,
                    None => return Err(invalid(format!("unexpected '{}' after address", after))),
                },
            };
            (addr, port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, parse_port(port)?),
                None => (authority, default_port),
            }
        };

        if host.is_empty() {
            return Err(invalid(format!("missing host in '{}'", raw)));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }

    pub fn url(&self) -> String {
        let scheme = if self.tls { "ldaps" } else { "ldap" };
        if self.host.contains(':') {
            format!("{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            format!("{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

/// Load configuration from an optional YAML file, overlay the process
/// environment (after reading `.env` if present) and validate the result.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();
    load_with(path, |key| std::env::var(key).ok())
}

/// Same as [`load`] but with an explicit environment lookup.
pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut cfg = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            serde_yaml::from_str(&content)?
        }
        None => Config::default(),
    };
    apply_env(&mut cfg, lookup)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Overlay environment variables on top of `cfg`. Empty values are ignored.
pub fn apply_env<F>(cfg: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("AD_HOST") {
        cfg.directory.url = v;
    }
    if let Some(v) = get("AD_USERNAME") {
        cfg.directory.bind_dn = v;
    }
    if let Some(v) = get("AD_PASSWORD") {
        cfg.directory.bind_password = v;
    }
    if let Some(v) = get("AD_BASE_DN") {
        cfg.directory.base_dn = v;
    }
    if let Some(v) = get("AD_USER_SEARCH_BASE") {
        cfg.directory.user_search_base = Some(v);
    }
    if let Some(v) = get("AD_USER_SEARCH_FILTER") {
        cfg.directory.search_filter = v;
    }
    if let Some(v) = get("AD_USE_SSL") {
        cfg.directory.use_tls = parse_bool("AD_USE_SSL", &v)?;
    }
    if let Some(v) = get("AD_TLS_SKIP_VERIFY") {
        cfg.directory.tls_skip_verify = parse_bool("AD_TLS_SKIP_VERIFY", &v)?;
    }

    if let Some(v) = get("PLATFORM_URL") {
        cfg.platform.url = v;
    }
    if let Some(v) = get("TENANT_ID") {
        cfg.platform.tenant_id = v;
    }
    if let Some(v) = get("API_KEY") {
        cfg.platform.api_key = v;
    }

    if let Some(v) = get("SYNC_INTERVAL") {
        cfg.schedule.interval_secs =
            v.trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::InvalidValue {
                    var: "SYNC_INTERVAL".into(),
                    message: e.to_string(),
                })?;
    }
    Ok(())
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    let required = [
        ("directory.url", &cfg.directory.url),
        ("directory.bind_dn", &cfg.directory.bind_dn),
        ("directory.bind_password", &cfg.directory.bind_password),
        ("directory.base_dn", &cfg.directory.base_dn),
        ("directory.search_filter", &cfg.directory.search_filter),
        ("platform.url", &cfg.platform.url),
        ("platform.tenant_id", &cfg.platform.tenant_id),
        ("platform.api_key", &cfg.platform.api_key),
    ];
    for (name, value) in required {
        if value.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("{} must be non-empty", name)));
        }
    }

    cfg.directory.endpoint()?;

    match Url::parse(cfg.platform.url.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        _ => {
            return Err(ConfigError::Invalid(format!(
                "platform.url must be an http(s) URL, got '{}'",
                cfg.platform.url
            )))
        }
    }

    if cfg.directory.connect_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "directory.connect_timeout_secs must be > 0".into(),
        ));
    }
    if cfg.platform.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "platform.request_timeout_secs must be > 0".into(),
        ));
    }
    if cfg.platform.probe_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "platform.probe_timeout_secs must be > 0".into(),
        ));
    }
    if cfg.schedule.interval_secs == 0 {
        return Err(ConfigError::Invalid("sync.interval_secs must be > 0".into()));
    }

    Ok(())
}

/// Returns an example YAML configuration.
pub fn example() -> &'static str {
    r#"directory:
  url: "ldap://dc01.example.com:389"
  bind_dn: "CN=svc-sync,OU=Service Accounts,DC=example,DC=com"
  bind_password: "YOUR_BIND_PASSWORD"
  base_dn: "DC=example,DC=com"
  user_search_base: "OU=Staff,DC=example,DC=com"
  search_filter: "(objectClass=user)"
  use_tls: false
  tls_skip_verify: false
  connect_timeout_secs: 10

platform:
  url: "https://platform.example.com"
  tenant_id: "YOUR_TENANT_ID"
  api_key: "YOUR_SYNC_API_KEY"
  request_timeout_secs: 30
  probe_timeout_secs: 10

sync:
  interval_secs: 3600
"#
}
