//! Configuration management for the transaction executor
//!
//! Loads configuration from a TOML file with environment variable substitution.
//! Secrets are never written into the file: the wallet section names the
//! environment variable that holds the key.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration path, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// `local` (development node accounts) or `remote` (local signing)
    pub provider_type: String,
    pub endpoint_url: String,
    /// Tried in order when the primary endpoint fails a read
    #[serde(default)]
    pub fallback_urls: Vec<String>,
    /// Queried from the node when absent
    pub chain_id: Option<u64>,
    /// Bound on waiting for the receipt
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Estimated from the node when absent
    pub gas_limit: Option<u64>,
    /// Quoted from the node when absent
    pub gas_price_wei: Option<u64>,
    #[serde(default)]
    pub gas_price_strategy: GasPriceStrategy,
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "default_poll_initial_ms")]
    pub poll_initial_ms: u64,
    #[serde(default = "default_poll_max_ms")]
    pub poll_max_ms: u64,
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
    /// Index into `eth_accounts` used with the `local` provider
    #[serde(default)]
    pub local_account_index: usize,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    #[default]
    Legacy,
    Eip1559,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Name of the environment variable holding the hex private key
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key_env: default_private_key_env(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus text file written when the process finishes
    pub textfile_path: Option<PathBuf>,
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_confirmations() -> u64 {
    1
}

fn default_poll_initial_ms() -> u64 {
    500
}

fn default_poll_max_ms() -> u64 {
    8_000
}

fn default_submit_timeout_ms() -> u64 {
    30_000
}

fn default_private_key_env() -> String {
    "EXECUTOR_PRIVATE_KEY".to_string()
}

impl Settings {
    /// Load settings from the given path, or the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
            .with_context(|| format!("Invalid config file: {:?}", config_path))
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml(input: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration.
    ///
    /// `provider_type` is checked when the backend is selected, before any
    /// client exists.
    fn validate(&self) -> Result<()> {
        let executor = &self.executor;

        if executor.endpoint_url.trim().is_empty() {
            anyhow::bail!("executor.endpoint_url is required");
        }
        if executor.timeout_ms == 0 {
            anyhow::bail!("executor.timeout_ms must be greater than zero");
        }
        if executor.submit_timeout_ms == 0 {
            anyhow::bail!("executor.submit_timeout_ms must be greater than zero");
        }
        if executor.poll_initial_ms == 0 {
            anyhow::bail!("executor.poll_initial_ms must be greater than zero");
        }
        if executor.poll_max_ms < executor.poll_initial_ms {
            anyhow::bail!("executor.poll_max_ms must not be below executor.poll_initial_ms");
        }
        if executor.confirmations == 0 {
            anyhow::bail!("executor.confirmations must be at least 1");
        }
        if executor.gas_limit == Some(0) {
            anyhow::bail!("executor.gas_limit must be greater than zero");
        }
        if self.wallet.private_key_env.trim().is_empty() {
            anyhow::bail!("wallet.private_key_env must name an environment variable");
        }

        Ok(())
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_initial_ms)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
