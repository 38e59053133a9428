//! Configuration module
//!
//! Loaded from a TOML file, with `.env` support and a few environment
//! overrides for deployment. The signer bearer token is never read from
//! files; it comes from `WALLETFLOW_SIGNER_TOKEN` only.

use crate::rpc_manager::{PollOptions, RetryPolicy};
use crate::swap::SwapSettings;
use crate::types::{Asset, MAX_DECIMALS};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_RPC_ENDPOINTS: &str = "WALLETFLOW_RPC_ENDPOINTS";
pub const ENV_SIGNER_URL: &str = "WALLETFLOW_SIGNER_URL";
pub const ENV_QUOTE_URL: &str = "WALLETFLOW_QUOTE_URL";
pub const ENV_SIGNER_TOKEN: &str = "WALLETFLOW_SIGNER_TOKEN";

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub rpc: RpcConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub confirmation: ConfirmationConfig,

    pub signer: SignerConfig,

    #[serde(default)]
    pub swap: SwapConfig,

    /// Known tokens; native SOL is implicit
    #[serde(default)]
    pub assets: Vec<AssetConfig>,

    #[serde(default)]
    pub payments: PaymentsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Candidates in preference order; normally a single trusted proxy
    pub endpoints: Vec<String>,

    /// Per-call timeout
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,

    /// processed | confirmed | finalized
    #[serde(default = "default_commitment")]
    pub commitment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    #[serde(default = "default_confirmation_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_confirmation_interval_ms")]
    pub interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignerConfig {
    pub base_url: String,
    #[serde(default = "default_signer_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapConfig {
    #[serde(default = "default_quote_url")]
    pub quote_url: String,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u16,
    #[serde(default = "default_quote_ttl_secs")]
    pub quote_ttl_secs: u64,
    /// Client-side cap on quote API calls
    #[serde(default = "default_quote_rps")]
    pub requests_per_second: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetConfig {
    pub symbol: String,
    pub mint: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentsConfig {
    /// Tag prepended verbatim to every memo
    #[serde(default)]
    pub memo_prefix: Option<String>,
}

// Default value functions
fn default_rpc_timeout_ms() -> u64 { 10_000 }
fn default_commitment() -> String { "confirmed".to_string() }
fn default_max_attempts() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 250 }
fn default_max_delay_ms() -> u64 { 4_000 }
fn default_confirmation_timeout_ms() -> u64 { 15_000 }
fn default_confirmation_interval_ms() -> u64 { 1_000 }
fn default_signer_timeout_ms() -> u64 { 20_000 }
fn default_quote_url() -> String { "https://lite-api.jup.ag/swap/v1".to_string() }
fn default_debounce_ms() -> u64 { 500 }
fn default_slippage_bps() -> u16 { 50 }
fn default_quote_ttl_secs() -> u64 { 30 }
fn default_quote_rps() -> u32 { 5 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_confirmation_timeout_ms(),
            interval_ms: default_confirmation_interval_ms(),
        }
    }
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            quote_url: default_quote_url(),
            debounce_ms: default_debounce_ms(),
            slippage_bps: default_slippage_bps(),
            quote_ttl_secs: default_quote_ttl_secs(),
            requests_per_second: default_quote_rps(),
        }
    }
}

impl Config {
    /// Load `path`, apply `.env` and environment overrides, then validate
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("Failed to parse config TOML")
    }

    /// Apply overrides from `lookup` (normally the process environment)
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoints) = lookup(ENV_RPC_ENDPOINTS) {
            self.rpc.endpoints = endpoints
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(url) = lookup(ENV_SIGNER_URL) {
            self.signer.base_url = url;
        }
        if let Some(url) = lookup(ENV_QUOTE_URL) {
            self.swap.quote_url = url;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rpc.endpoints.is_empty() {
            bail!("rpc.endpoints must list at least one endpoint");
        }
        let mut seen = HashSet::new();
        for endpoint in &self.rpc.endpoints {
            require_http_url("rpc.endpoints", endpoint)?;
            if !seen.insert(endpoint.trim_end_matches('/')) {
                bail!("rpc.endpoints lists {} more than once", endpoint);
            }
        }
        self.commitment()?;
        require_http_url("signer.base_url", &self.signer.base_url)?;
        require_http_url("swap.quote_url", &self.swap.quote_url)?;

        for (name, value) in [
            ("rpc.timeout_ms", self.rpc.timeout_ms),
            ("retry.max_attempts", self.retry.max_attempts as u64),
            ("confirmation.timeout_ms", self.confirmation.timeout_ms),
            ("confirmation.interval_ms", self.confirmation.interval_ms),
            ("signer.request_timeout_ms", self.signer.request_timeout_ms),
            ("swap.quote_ttl_secs", self.swap.quote_ttl_secs),
            ("swap.requests_per_second", self.swap.requests_per_second as u64),
        ] {
            if value == 0 {
                bail!("{} must be greater than zero", name);
            }
        }
        if self.swap.slippage_bps > 10_000 {
            bail!("swap.slippage_bps must be at most 10000, got {}", self.swap.slippage_bps);
        }

        let mut symbols = HashSet::new();
        for asset in &self.assets {
            if asset.decimals > MAX_DECIMALS {
                bail!("asset {} has {} decimals, max is {}", asset.symbol, asset.decimals, MAX_DECIMALS);
            }
            if asset.symbol.eq_ignore_ascii_case("SOL") || !symbols.insert(asset.symbol.to_ascii_uppercase()) {
                bail!("asset symbol {} is duplicated", asset.symbol);
            }
            Pubkey::from_str(&asset.mint)
                .with_context(|| format!("asset {} has an invalid mint", asset.symbol))?;
        }
        Ok(())
    }

    pub fn commitment(&self) -> anyhow::Result<CommitmentConfig> {
        match self.rpc.commitment.as_str() {
            "processed" => Ok(CommitmentConfig::processed()),
            "confirmed" => Ok(CommitmentConfig::confirmed()),
            "finalized" => Ok(CommitmentConfig::finalized()),
            other => bail!("rpc.commitment '{}' is not processed, confirmed or finalized", other),
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay_ms: self.retry.base_delay_ms,
            max_delay_ms: self.retry.max_delay_ms,
            ..RetryPolicy::default()
        }
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            timeout: Duration::from_millis(self.confirmation.timeout_ms),
            interval: Duration::from_millis(self.confirmation.interval_ms),
        }
    }

    pub fn signer_timeout(&self) -> Duration {
        Duration::from_millis(self.signer.request_timeout_ms)
    }

    pub fn swap_settings(&self) -> SwapSettings {
        SwapSettings {
            debounce: Duration::from_millis(self.swap.debounce_ms),
            slippage_bps: self.swap.slippage_bps,
            quote_ttl: Duration::from_secs(self.swap.quote_ttl_secs),
        }
    }

    /// Every configured token as an [`Asset`]
    pub fn token_assets(&self) -> anyhow::Result<Vec<Asset>> {
        self.assets
            .iter()
            .map(|a| {
                let mint = Pubkey::from_str(&a.mint)
                    .with_context(|| format!("asset {} has an invalid mint", a.symbol))?;
                Ok(Asset::token(mint, a.decimals))
            })
            .collect()
    }

    /// Look an asset up by symbol ("SOL" is the native coin) or by mint address
    pub fn resolve_asset(&self, name: &str) -> anyhow::Result<Asset> {
        if name.eq_ignore_ascii_case("SOL") {
            return Ok(Asset::Native);
        }
        let found = self
            .assets
            .iter()
            .find(|a| a.symbol.eq_ignore_ascii_case(name) || a.mint == name);
        match found {
            Some(a) => Ok(Asset::token(Pubkey::from_str(&a.mint)?, a.decimals)),
            None => bail!("unknown asset '{}'", name),
        }
    }
}

fn require_http_url(field: &str, value: &str) -> anyhow::Result<()> {
    let url = url::Url::parse(value).with_context(|| format!("{} '{}' is not a URL", field, value))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("{} '{}' must use http or https", field, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    fn sample() -> &'static str {
        r#"
            [rpc]
            endpoints = ["https://rpc.example"]

            [signer]
            base_url = "https://wallet.example/api"

            [[assets]]
            symbol = "USDC"
            mint = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"
            decimals = 6
        "#
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = Config::from_toml_str(sample()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.rpc.timeout_ms, 10_000);
        assert_eq!(config.commitment().unwrap(), CommitmentConfig::confirmed());
        assert_eq!(config.retry_policy().max_attempts, 3);
        assert_eq!(config.retry_policy().base_delay_ms, 250);
        assert_eq!(config.poll_options(), PollOptions::default());
        assert_eq!(config.swap_settings(), SwapSettings::default());
        assert!(config.payments.memo_prefix.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::from_toml_str(sample()).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_RPC_ENDPOINTS, "https://a.example, https://b.example"),
            (ENV_SIGNER_URL, "https://signer.internal"),
        ]);
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.rpc.endpoints, vec!["https://a.example", "https://b.example"]);
        assert_eq!(config.signer.base_url, "https://signer.internal");
        assert_eq!(config.swap.quote_url, default_quote_url());
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = Config::from_toml_str(sample()).unwrap();

        let mut c = base.clone();
        c.rpc.endpoints.clear();
        assert!(c.validate().is_err());

        let mut c = base.clone();
        c.rpc.endpoints.push("https://rpc.example/".to_string());
        assert!(c.validate().is_err());

        let mut c = base.clone();
        c.signer.base_url = "ws://wallet.example".to_string();
        assert!(c.validate().is_err());

        let mut c = base.clone();
        c.retry.max_attempts = 0;
        assert!(c.validate().is_err());

        let mut c = base.clone();
        c.assets[0].decimals = 20;
        assert!(c.validate().is_err());

        let mut c = base.clone();
        c.assets.push(c.assets[0].clone());
        assert!(c.validate().is_err());

        let mut c = base;
        c.rpc.commitment = "max".to_string();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_resolve_asset() {
        let config = Config::from_toml_str(sample()).unwrap();
        assert_eq!(config.resolve_asset("sol").unwrap(), Asset::Native);
        let usdc = config.resolve_asset("usdc").unwrap();
        assert_eq!(usdc, Asset::token(Pubkey::from_str(USDC).unwrap(), 6));
        assert_eq!(config.resolve_asset(USDC).unwrap(), usdc);
        assert!(config.resolve_asset("BONK").is_err());
        assert_eq!(config.token_assets().unwrap(), vec![usdc]);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("walletflow.toml");
        std::fs::write(&path, sample()).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.assets.len(), 1);
        assert!(Config::load(dir.path().join("missing.toml")).is_err());
    }
}
