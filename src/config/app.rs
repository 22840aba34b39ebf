// src/config/app.rs
//! Layered configuration: built-in defaults, then an optional TOML file, then
//! environment variables. Secrets are read from the environment only.

use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "ANALYST_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/analyst.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the snapshot, run log, pending post and chart files.
    pub data_dir: PathBuf,
    pub sources: SourcesConfig,
    pub insight: InsightConfig,
    pub compose: ComposeConfig,
    pub publish: PublishConfig,
    pub ledger: LedgerConfig,
    pub chart: ChartConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub chain_name: String,
    pub rpc_url: String,
    pub llama_protocols_url: String,
    pub stablecoin_chains_url: String,
    pub stablecoins_url: String,
    /// Pre-fetched ecosystem feed; defaults to `<data_dir>/x-ecosystem-feed.json`.
    pub ecosystem_feed_path: Option<PathBuf>,
    pub ecosystem_max_age_secs: u64,
    pub http_timeout_secs: u64,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct InsightConfig {
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub min_confidence: f64,
    /// File with the system instruction sent alongside the data.
    pub policy_path: Option<PathBuf>,
    pub timeout_secs: u64,
    pub referer: String,
    pub title: String,
    #[serde(skip)]
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ComposeConfig {
    pub banned_terms: Vec<String>,
    pub banned_symbols: Vec<String>,
    pub max_len: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub post_url: String,
    pub upload_url: String,
    /// Account handle used to build public status URLs.
    pub handle: String,
    pub timeout_secs: u64,
    pub deferred_fallback: bool,
    #[serde(skip)]
    pub credentials: Option<XCredentials>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct XCredentials {
    pub api_key: String,
    pub api_key_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

impl fmt::Debug for XCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XCredentials")
            .field("api_key_len", &self.api_key.len())
            .field("access_token_len", &self.access_token.len())
            .finish()
    }
}

impl fmt::Debug for InsightConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsightConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("min_confidence", &self.min_confidence)
            .field("policy_path", &self.policy_path)
            .field("api_key_len", &self.api_key.len())
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Falls back to `sources.rpc_url` when unset.
    pub rpc_url: Option<String>,
    pub contract_address: Option<String>,
    /// Sender account, unlocked at the signing node behind `rpc_url`.
    pub from_address: Option<String>,
    /// Deployment record (`{"address": "0x..."}`) consulted when no address is configured.
    pub deployment_file: PathBuf,
    pub summary_max_bytes: usize,
    pub confirm_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub finding_event_topic: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    pub enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            sources: SourcesConfig::default(),
            insight: InsightConfig::default(),
            compose: ComposeConfig::default(),
            publish: PublishConfig::default(),
            ledger: LedgerConfig::default(),
            chart: ChartConfig::default(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            chain_name: "Base".to_string(),
            rpc_url: "https://mainnet.base.org".to_string(),
            llama_protocols_url: "https://api.llama.fi/protocols".to_string(),
            stablecoin_chains_url: "https://stablecoins.llama.fi/stablecoinchains".to_string(),
            stablecoins_url: "https://stablecoins.llama.fi/stablecoins?includePrices=true"
                .to_string(),
            ecosystem_feed_path: None,
            ecosystem_max_age_secs: 5 * 60 * 60,
            http_timeout_secs: 20,
        }
    }
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            model: "google/gemini-2.0-flash-001".to_string(),
            temperature: 0.7,
            max_tokens: 500,
            min_confidence: 7.0,
            policy_path: None,
            timeout_secs: 60,
            referer: "https://github.com/onchain-analyst/onchain-analyst".to_string(),
            title: "Onchain Analyst".to_string(),
            api_key: String::new(),
        }
    }
}

pub const DEFAULT_BANNED_TERMS: &[&str] = &[
    "game changer",
    "landscape",
    "delve",
    "revolutionize",
    "meticulous",
    "game-changer",
    "groundbreaking",
    "unprecedented",
    "paradigm",
    "synergy",
    "leverage",
    "holistic",
    "robust",
    "seamless",
    "cutting-edge",
    "innovative",
    "transformative",
    "disruptive",
];

pub const DEFAULT_BANNED_SYMBOLS: &[&str] = &[
    "🚀", "💎", "🌙", "📈", "🔥", "👀", "👁️", "🕵️", "😅", "🤯", "💝", "🧩", "♟️",
];

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            banned_terms: DEFAULT_BANNED_TERMS.iter().map(|s| s.to_string()).collect(),
            banned_symbols: DEFAULT_BANNED_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            max_len: 280,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            post_url: "https://api.twitter.com/2/tweets".to_string(),
            upload_url: "https://upload.twitter.com/1.1/media/upload.json".to_string(),
            handle: "i".to_string(),
            timeout_secs: 15,
            deferred_fallback: true,
            credentials: None,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            contract_address: None,
            from_address: None,
            deployment_file: PathBuf::from("deployed.json"),
            summary_max_bytes: 200,
            confirm_timeout_secs: 120,
            poll_interval_ms: 2_000,
            finding_event_topic: crate::ledger::abi::NEW_FINDING_TOPIC.to_string(),
        }
    }
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl AppConfig {
    /// Resolve the full configuration for the process: `.env`, optional TOML file,
    /// environment overrides, then validation. Any error here is fatal at startup.
    pub fn load() -> Result<Self, ConfigError> {
        let cfg = Self::resolve()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Same layering as [`AppConfig::load`] without validation, for read-only
    /// commands that never touch the backends.
    pub fn resolve() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let explicit = std::env::var(ENV_CONFIG_PATH).is_ok();

        let mut cfg = if path.exists() {
            Self::from_toml_file(&path)?
        } else if explicit {
            return Err(ConfigError::Invalid {
                key: ENV_CONFIG_PATH,
                reason: format!("{} does not exist", path.display()),
            });
        } else {
            Self::default()
        };

        cfg.apply_env(|k| std::env::var(k).ok())?;
        cfg.resolve_contract_address()?;
        Ok(cfg)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&data).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Overlay environment values. `lookup` is injected so tests need not touch the
    /// process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("ANALYST_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("BASE_RPC_URL") {
            self.sources.rpc_url = v;
        }
        if let Some(v) = get("OPENROUTER_API_KEY") {
            self.insight.api_key = v;
        }
        if let Some(v) = get("OPENROUTER_MODEL") {
            self.insight.model = v;
        }
        if let Some(v) = get("INSIGHT_POLICY_PATH") {
            self.insight.policy_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("MIN_CONFIDENCE") {
            self.insight.min_confidence = v.parse().map_err(|_| ConfigError::Invalid {
                key: "MIN_CONFIDENCE",
                reason: format!("not a number: {v}"),
            })?;
        }
        if let Some(v) = get("CONTRACT_ADDRESS") {
            self.ledger.contract_address = Some(v);
        }
        if let Some(v) = get("ANALYST_ADDRESS") {
            self.ledger.from_address = Some(v);
        }
        if let Some(v) = get("X_HANDLE") {
            self.publish.handle = v;
        }
        if let Some(v) = get("PUBLISH_TIMEOUT_SECS") {
            self.publish.timeout_secs = v.parse().map_err(|_| ConfigError::Invalid {
                key: "PUBLISH_TIMEOUT_SECS",
                reason: format!("not an integer: {v}"),
            })?;
        }
        if let Some(v) = get("DEFERRED_FALLBACK") {
            self.publish.deferred_fallback = parse_flag(&v);
        }
        if let Some(v) = get("CHART_ENABLED") {
            self.chart.enabled = parse_flag(&v);
        }

        let creds = [
            get("X_API_KEY"),
            get("X_API_KEY_SECRET"),
            get("X_ACCESS_TOKEN"),
            get("X_ACCESS_TOKEN_SECRET"),
        ];
        match creds {
            [Some(api_key), Some(api_key_secret), Some(access_token), Some(access_token_secret)] => {
                self.publish.credentials = Some(XCredentials {
                    api_key,
                    api_key_secret,
                    access_token,
                    access_token_secret,
                });
            }
            [None, None, None, None] => {}
            _ => {
                return Err(ConfigError::Invalid {
                    key: "X_API_KEY",
                    reason: "X API credentials must be set together (X_API_KEY, X_API_KEY_SECRET, X_ACCESS_TOKEN, X_ACCESS_TOKEN_SECRET)".to_string(),
                })
            }
        }
        Ok(())
    }

    /// Fall back to the deployment record when no contract address is configured.
    pub fn resolve_contract_address(&mut self) -> Result<(), ConfigError> {
        if self.ledger.contract_address.is_some() || !self.ledger.deployment_file.exists() {
            return Ok(());
        }
        #[derive(Deserialize)]
        struct Deployment {
            address: String,
        }
        let path = &self.ledger.deployment_file;
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let d: Deployment = serde_json::from_str(&data).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        self.ledger.contract_address = Some(d.address);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.insight.api_key.is_empty() {
            return Err(ConfigError::Missing("OPENROUTER_API_KEY"));
        }
        if !(1.0..=10.0).contains(&self.insight.min_confidence) {
            return Err(ConfigError::Invalid {
                key: "MIN_CONFIDENCE",
                reason: format!("{} is outside 1..=10", self.insight.min_confidence),
            });
        }
        let contract = self
            .ledger
            .contract_address
            .as_deref()
            .ok_or(ConfigError::Missing("CONTRACT_ADDRESS"))?;
        check_address("CONTRACT_ADDRESS", contract)?;
        let from = self
            .ledger
            .from_address
            .as_deref()
            .ok_or(ConfigError::Missing("ANALYST_ADDRESS"))?;
        check_address("ANALYST_ADDRESS", from)?;
        if self.compose.max_len <= 3 {
            return Err(ConfigError::Invalid {
                key: "compose.max_len",
                reason: "must leave room for the ellipsis".to_string(),
            });
        }
        if self.publish.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "PUBLISH_TIMEOUT_SECS",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("last-snapshot.json")
    }

    pub fn run_log_path(&self) -> PathBuf {
        self.data_dir.join("runs.jsonl")
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.data_dir.join("metrics.prom")
    }

    pub fn chart_path(&self) -> PathBuf {
        self.data_dir.join("post-chart.png")
    }

    pub fn ecosystem_feed_path(&self) -> PathBuf {
        self.sources
            .ecosystem_feed_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("x-ecosystem-feed.json"))
    }

    pub fn ledger_rpc_url(&self) -> &str {
        self.ledger
            .rpc_url
            .as_deref()
            .unwrap_or(&self.sources.rpc_url)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.sources.http_timeout_secs)
    }
}

fn parse_flag(v: &str) -> bool {
    matches!(
        v.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn check_address(key: &'static str, addr: &str) -> Result<(), ConfigError> {
    let hex_part = addr.strip_prefix("0x").unwrap_or("");
    if hex_part.len() == 40 && hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key,
            reason: format!("not a 20-byte hex address: {addr}"),
        })
    }
}
