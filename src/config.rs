use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// What to do with an item whose remote append (or conversion) fails.
///
/// `SkipAndRetry` leaves the item out of the ledger so a future run tries it
/// again. `SkipAndSuppress` records it anyway, trading a lost item for not
/// re-downloading permanently broken files on every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    #[default]
    SkipAndRetry,
    SkipAndSuppress,
}

/// Explicit runtime configuration. Constructed once in main and passed into
/// the components that need it; nothing reads process globals after startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bot_token: String,
    pub owner_user_id: i64,
    /// Channel for the announcement post. Absent disables announcing.
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub giphy_api_key: Option<String>,
    /// Database URL; defaults to a SQLite file in the user data directory.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_batch_cap")]
    pub batch_cap: usize,
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
    #[serde(default = "default_preview_seconds")]
    pub preview_seconds: u32,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_batch_cap() -> usize {
    50
}
fn default_fetch_limit() -> usize {
    300
}
fn default_preview_seconds() -> u32 {
    2
}

impl Config {
    /// Load from a TOML file when given, otherwise from the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Self::from_env(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file: {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("parsing config file: {}", path.display()))
    }

    pub fn from_env() -> Result<Self> {
        let bot_token = require_env("BOT_TOKEN")?;
        let owner_user_id = require_env("OWNER_USER_ID")?
            .parse()
            .context("OWNER_USER_ID must be an integer")?;
        Ok(Self {
            bot_token,
            owner_user_id,
            channel_id: optional_env("TARGET_CHANNEL_ID"),
            giphy_api_key: optional_env("GIPHY_API_KEY"),
            database_url: optional_env("DATABASE_URL"),
            batch_cap: optional_env("BATCH_CAP")
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_batch_cap),
            fetch_limit: optional_env("FETCH_LIMIT")
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_fetch_limit),
            preview_seconds: default_preview_seconds(),
            failure_policy: match optional_env("FAILURE_POLICY").as_deref() {
                Some("skip-and-suppress") => FailurePolicy::SkipAndSuppress,
                _ => FailurePolicy::SkipAndRetry,
            },
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .with_context(|| format!("missing required environment variable {key}"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
