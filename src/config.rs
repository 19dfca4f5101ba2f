use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::logging::LogFormat;

pub const ENV_PREFIX: &str = "TEZOS_DELEGATION";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub db_path: Option<String>,
    pub upstream_url: Option<String>,
    pub addr: Option<String>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/tezos-delegation/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let parsed: Self = toml::from_str(&data)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        Ok(parsed)
    }

    /// Applies `TEZOS_DELEGATION_<SECTION>_<KEY>` variables from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}_{suffix}"));
        if let Some(url) = var("UPSTREAM_BASE_URL") {
            self.upstream.base_url = url;
        }
        if let Some(path) = var("STORAGE_DB_PATH") {
            self.storage.db_path = path;
        }
        if let Some(addr) = var("SERVER_ADDR") {
            self.server.addr = addr;
        }
        if let Some(raw) = var("DEBUG") {
            self.debug = raw
                .trim()
                .parse()
                .map_err(|_| anyhow!("{ENV_PREFIX}_DEBUG must be true or false, got {raw:?}"))?;
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(db_path) = overrides.db_path {
            self.storage.db_path = db_path;
        }
        if let Some(url) = overrides.upstream_url {
            self.upstream.base_url = url;
        }
        if let Some(addr) = overrides.addr {
            self.server.addr = addr;
        }
    }

    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.upstream.base_url)
            .with_context(|| format!("invalid upstream base_url: {}", self.upstream.base_url))?;
        if self.upstream.timeout_secs == 0 {
            bail!("upstream.timeout_secs must be greater than zero");
        }
        if self.upstream.page_limit == 0 {
            bail!("upstream.page_limit must be greater than zero");
        }
        if self.ingest.run_timeout_secs == 0 {
            bail!("ingest.run_timeout_secs must be greater than zero");
        }
        if self.storage.db_path.trim().is_empty() {
            bail!("storage.db_path cannot be empty");
        }
        self.server_addr()?;
        Ok(())
    }

    pub fn server_addr(&self) -> Result<SocketAddr> {
        self.server
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid server addr {}: {e}", self.server.addr))
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn default_template() -> String {
        let template = r#"debug = false
log_format = "human"

[upstream]
base_url = "https://api.tzkt.io/v1"
timeout_secs = 10
page_limit = 100

[storage]
db_path = "~/.local/share/tezos-delegation/delegations.db"

[server]
addr = "127.0.0.1:8080"

[ingest]
run_timeout_secs = 60
"#;
        template.to_string()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            log_format: LogFormat::default(),
            upstream: UpstreamConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            page_limit: default_page_limit(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.tzkt.io/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_page_limit() -> u32 {
    100
}

fn default_db_path() -> String {
    "~/.local/share/tezos-delegation/delegations.db".to_string()
}

fn default_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_run_timeout_secs() -> u64 {
    60
}
