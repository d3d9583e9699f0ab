#![forbid(unsafe_code)]

use std::env;
use std::net::SocketAddr;

use parkspot_contracts::parking::DEFAULT_LOG_COLLECTION;
use parkspot_contracts::store_config::StoreConnectionConfig;
use parkspot_contracts::ContractViolation;
use parkspot_os::{CleanupPolicy, ShellConfig};
use tracing::info;

pub const ENV_HTTP_BIND: &str = "PARKSPOT_HTTP_BIND";
pub const ENV_BASE_PATH: &str = "PARKSPOT_BASE_PATH";
pub const ENV_COLLECTION: &str = "PARKSPOT_COLLECTION";
pub const ENV_CLEANUP_POLICY: &str = "PARKSPOT_CLEANUP_POLICY";
pub const ENV_PROJECT_ID: &str = "PARKSPOT_PROJECT_ID";
pub const ENV_API_KEY: &str = "PARKSPOT_API_KEY";
pub const ENV_SENDER_ID: &str = "PARKSPOT_SENDER_ID";

pub const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_BASE_PATH: &str = "/parkspot";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("store connection: {0}")]
    Connection(#[from] ContractViolation),
}

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub bind: SocketAddr,
    pub base_path: String,
    pub shell: ShellConfig,
    pub connection: StoreConnectionConfig,
}

impl AdapterConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or_default = |key: &'static str, default: &str| -> String {
            lookup(key).unwrap_or_else(|| {
                info!("{key} not set, using default: {default}");
                default.to_string()
            })
        };
        let required = |key: &'static str| lookup(key).ok_or(ConfigError::Missing(key));

        let bind = or_default(ENV_HTTP_BIND, DEFAULT_HTTP_BIND)
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                key: ENV_HTTP_BIND,
                reason: e.to_string(),
            })?;
        let base_path = parse_base_path(&or_default(ENV_BASE_PATH, DEFAULT_BASE_PATH))?;

        let collection = or_default(ENV_COLLECTION, DEFAULT_LOG_COLLECTION);
        if collection.is_empty()
            || !collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::Invalid {
                key: ENV_COLLECTION,
                reason: "must be non-empty ascii alphanumeric or '_'".to_string(),
            });
        }
        let raw_policy = or_default(ENV_CLEANUP_POLICY, CleanupPolicy::default().as_str());
        let cleanup = CleanupPolicy::parse(&raw_policy).ok_or_else(|| ConfigError::Invalid {
            key: ENV_CLEANUP_POLICY,
            reason: format!("unknown policy {raw_policy:?}"),
        })?;

        let connection = StoreConnectionConfig::v1(
            required(ENV_PROJECT_ID)?,
            required(ENV_API_KEY)?,
            required(ENV_SENDER_ID)?,
        )?;

        Ok(Self {
            bind,
            base_path,
            shell: ShellConfig {
                collection,
                cleanup,
            },
            connection,
        })
    }

    /// Prefix prepended to asset and API urls in the served page.
    pub fn asset_prefix(&self) -> &str {
        if self.base_path == "/" {
            ""
        } else {
            &self.base_path
        }
    }
}

fn parse_base_path(raw: &str) -> Result<String, ConfigError> {
    let path = raw.trim();
    let invalid = |reason: &str| ConfigError::Invalid {
        key: ENV_BASE_PATH,
        reason: reason.to_string(),
    };
    if !path.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }
    if path.len() > 1 && path.ends_with('/') {
        return Err(invalid("must not end with '/'"));
    }
    if !path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_'))
    {
        return Err(invalid("may only contain ascii alphanumerics, '/', '-' and '_'"));
    }
    Ok(path.to_string())
}
