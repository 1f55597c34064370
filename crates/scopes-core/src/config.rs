use crate::protocol::Adapter;
use crate::transport::TransportKind;
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const DEFAULT_MIDDLEWARE_KIND: &str = "queue";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeConfig {
    #[serde(default = "default_middleware_kind")]
    pub default_middleware: String,
    #[serde(default)]
    pub middleware_configfile: String,
    #[serde(default = "default_endpoint_dir")]
    pub endpoint_dir: String,
    #[serde(default = "default_registry_identity")]
    pub registry_identity: String,
    #[serde(default = "default_registry_server")]
    pub registry_server: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_middleware: default_middleware_kind(),
            middleware_configfile: String::new(),
            endpoint_dir: default_endpoint_dir(),
            registry_identity: default_registry_identity(),
            registry_server: default_registry_server(),
        }
    }
}

impl RuntimeConfig {
    pub fn with_endpoint_dir(endpoint_dir: impl Into<String>) -> Self {
        Self {
            endpoint_dir: endpoint_dir.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        TransportKind::from_tag(&self.default_middleware)?;
        if self.endpoint_dir.trim().is_empty() {
            anyhow::bail!("endpoint_dir is required");
        }
        if self.registry_identity.trim().is_empty() {
            anyhow::bail!("registry_identity is required");
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MiddlewareConfig {
    #[serde(default = "default_twoway_timeout_ms")]
    pub twoway_timeout_ms: u64,
    #[serde(default)]
    pub pools: PoolSizes,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolSizes {
    #[serde(default = "default_scope_threads")]
    pub scope: usize,
    #[serde(default = "default_query_threads")]
    pub query: usize,
    #[serde(default = "default_ctrl_threads")]
    pub ctrl: usize,
    #[serde(default = "default_reply_threads")]
    pub reply: usize,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            twoway_timeout_ms: default_twoway_timeout_ms(),
            pools: PoolSizes::default(),
        }
    }
}

impl Default for PoolSizes {
    fn default() -> Self {
        Self {
            scope: default_scope_threads(),
            query: default_query_threads(),
            ctrl: default_ctrl_threads(),
            reply: default_reply_threads(),
        }
    }
}

impl MiddlewareConfig {
    pub fn twoway_timeout(&self) -> Duration {
        Duration::from_millis(self.twoway_timeout_ms.max(10))
    }
}

impl PoolSizes {
    pub fn threads_for(&self, adapter: Adapter) -> usize {
        let raw = match adapter {
            Adapter::Scope => self.scope,
            Adapter::Query => self.query,
            Adapter::Ctrl => self.ctrl,
            Adapter::Reply => self.reply,
        };
        raw.max(1)
    }
}

pub fn load_runtime_config(path: &Path) -> Result<RuntimeConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read runtime config file: {}", path.display()))?;
    let config: RuntimeConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parse runtime config file: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("validate runtime config file: {}", path.display()))?;
    Ok(config)
}

pub fn load_middleware_config(path: &Path) -> Result<MiddlewareConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read middleware config file: {}", path.display()))?;
    let config: MiddlewareConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parse middleware config file: {}", path.display()))?;
    Ok(config)
}

pub fn save_runtime_config(path: &Path, config: &RuntimeConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create config dir: {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
        .with_context(|| format!("write runtime config file: {}", path.display()))?;
    Ok(())
}

fn default_middleware_kind() -> String {
    DEFAULT_MIDDLEWARE_KIND.to_string()
}

fn default_endpoint_dir() -> String {
    "/tmp/scopes-endpoints".to_string()
}

fn default_registry_identity() -> String {
    "Registry".to_string()
}

fn default_registry_server() -> String {
    "registry".to_string()
}

const fn default_twoway_timeout_ms() -> u64 {
    5000
}

const fn default_scope_threads() -> usize {
    2
}

const fn default_query_threads() -> usize {
    4
}

const fn default_ctrl_threads() -> usize {
    1
}

const fn default_reply_threads() -> usize {
    1
}
