use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const TOKEN_VAR: &str = "TELEBOT_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub api_base_url: String,
    pub poll_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub list_chunk_chars: usize,
    pub allowed_owners: Vec<i64>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.telegram.org".to_string(),
            poll_timeout_secs: 30,
            download_timeout_secs: 600,
            list_chunk_chars: 3000,
            allowed_owners: Vec::new(),
        }
    }
}

impl BotConfig {
    pub fn owner_allowed(&self, owner_id: i64) -> bool {
        self.allowed_owners.is_empty() || self.allowed_owners.contains(&owner_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub on_startup: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { on_startup: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VaultConfig {
    pub bot: BotConfig,
    pub scan: ScanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialVaultConfig {
    bot: Option<BotConfig>,
    scan: Option<ScanConfig>,
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "true" | "TRUE" | "yes" | "on" => Some(true),
        "0" | "false" | "FALSE" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_owner_list(raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|_| {
                ConfigError::InvalidConfig(format!("invalid owner id in allow list: {s}"))
            })
        })
        .collect()
}

fn validate(cfg: &VaultConfig) -> Result<(), ConfigError> {
    if cfg.bot.api_base_url.trim().is_empty() {
        return Err(ConfigError::InvalidConfig(
            "bot api base url cannot be empty".to_string(),
        ));
    }
    if cfg.bot.poll_timeout_secs == 0 {
        return Err(ConfigError::InvalidConfig(
            "invalid poll timeout: must be >= 1 second".to_string(),
        ));
    }
    if cfg.bot.download_timeout_secs == 0 {
        return Err(ConfigError::InvalidConfig(
            "invalid download timeout: must be >= 1 second".to_string(),
        ));
    }
    if cfg.bot.list_chunk_chars < 100 {
        return Err(ConfigError::InvalidConfig(
            "invalid list chunk size: must be >= 100 characters".to_string(),
        ));
    }
    Ok(())
}

pub fn resolve_config_path(vault_home: &Path) -> PathBuf {
    match env::var("AUDIOVAULT_CONFIG_PATH") {
        Ok(custom) if !custom.trim().is_empty() => PathBuf::from(custom.trim()),
        _ => vault_home.join("audiovault.toml"),
    }
}

fn merge_file_config(base: &mut VaultConfig, path: &Path) -> Result<(), ConfigError> {
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(path)
        .map_err(|err| ConfigError::InvalidConfig(format!("{}: {err}", path.display())))?;
    let parsed: PartialVaultConfig = toml::from_str(&raw).map_err(|err| {
        ConfigError::InvalidConfig(format!("failed to parse {}: {err}", path.display()))
    })?;
    if let Some(bot) = parsed.bot {
        base.bot = bot;
    }
    if let Some(scan) = parsed.scan {
        base.scan = scan;
    }
    Ok(())
}

/// Defaults, then the TOML file at `path` if present, then `AUDIOVAULT_*`
/// variables from `lookup`.
pub fn load_config_with(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<VaultConfig, ConfigError> {
    let mut cfg = VaultConfig::default();
    merge_file_config(&mut cfg, path)?;

    let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(url) = var("AUDIOVAULT_BOT_API_URL") {
        cfg.bot.api_base_url = url.trim().trim_end_matches('/').to_string();
    }
    if let Some(secs) = var("AUDIOVAULT_POLL_TIMEOUT_SECS").and_then(|v| v.trim().parse().ok()) {
        cfg.bot.poll_timeout_secs = secs;
    }
    if let Some(secs) =
        var("AUDIOVAULT_DOWNLOAD_TIMEOUT_SECS").and_then(|v| v.trim().parse().ok())
    {
        cfg.bot.download_timeout_secs = secs;
    }
    if let Some(chars) = var("AUDIOVAULT_LIST_CHUNK_CHARS").and_then(|v| v.trim().parse().ok()) {
        cfg.bot.list_chunk_chars = chars;
    }
    if let Some(owners) = var("AUDIOVAULT_ALLOWED_OWNERS") {
        cfg.bot.allowed_owners = parse_owner_list(&owners)?;
    }
    if let Some(flag) = var("AUDIOVAULT_SCAN_ON_STARTUP").and_then(|v| parse_bool(&v)) {
        cfg.scan.on_startup = flag;
    }

    validate(&cfg)?;
    Ok(cfg)
}

pub fn load_config(vault_home: &Path) -> Result<VaultConfig, ConfigError> {
    load_config_with(&resolve_config_path(vault_home), |name| env::var(name).ok())
}

pub fn bot_token() -> Result<String, ConfigError> {
    bot_token_with(|name| env::var(name).ok())
}

fn bot_token_with(lookup: impl Fn(&str) -> Option<String>) -> Result<String, ConfigError> {
    match lookup(TOKEN_VAR) {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err(ConfigError::MissingCredential { var: TOKEN_VAR }),
    }
}
