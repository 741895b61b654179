//! Configuration management for the interop finalizer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chain::ChainKind;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub finalizer: FinalizerConfig,
    pub database: Option<DatabaseConfig>,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chains: HashMap<String, ChainConfig>,
    pub wallet: WalletConfig,
    #[serde(default)]
    pub contracts: ContractAddresses,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FinalizerConfig {
    #[serde(default = "default_gateway_chain_id")]
    pub gateway_chain_id: u64,
    #[serde(default = "default_finality_poll_ms")]
    pub source_finality_poll_ms: u64,
    #[serde(default = "default_finality_poll_ms")]
    pub gateway_finality_poll_ms: u64,
    #[serde(default = "default_root_poll_ms")]
    pub root_ingestion_poll_ms: u64,
    #[serde(default = "default_queue_poll_ms")]
    pub broadcast_poll_ms: u64,
    #[serde(default = "default_queue_poll_ms")]
    pub queue_poll_ms: u64,
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub force_block_production: bool,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
}

impl FinalizerConfig {
    /// Sleep intervals between unsuccessful polls of each stage
    pub fn poll_intervals(&self) -> PollIntervals {
        PollIntervals {
            source_finality: Duration::from_millis(self.source_finality_poll_ms),
            gateway_finality: Duration::from_millis(self.gateway_finality_poll_ms),
            root_ingestion: Duration::from_millis(self.root_ingestion_poll_ms),
            broadcast: Duration::from_millis(self.broadcast_poll_ms),
            queue: Duration::from_millis(self.queue_poll_ms),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// Stage-specific poll intervals
#[derive(Debug, Clone, Copy)]
pub struct PollIntervals {
    pub source_finality: Duration,
    pub gateway_finality: Duration,
    pub root_ingestion: Duration,
    pub broadcast: Duration,
    pub queue: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            source_finality: Duration::from_millis(default_finality_poll_ms()),
            gateway_finality: Duration::from_millis(default_finality_poll_ms()),
            root_ingestion: Duration::from_millis(default_root_poll_ms()),
            broadcast: Duration::from_millis(default_queue_poll_ms()),
            queue: Duration::from_millis(default_queue_poll_ms()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub role: ChainRole,
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: u64,
    pub enabled: bool,
}

/// Role a configured chain plays in the interop topology
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChainRole {
    L1,
    Gateway,
    Rollup,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub user_private_key_env: Option<String>,
    pub finalizer_private_key_env: Option<String>,
}

/// Well-known system contract addresses of the deployment
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContractAddresses {
    pub interop_root_storage: Address,
    pub interop_handler: Address,
    pub interop_center: Address,
    pub standard_trigger_account: Address,
    pub native_token_vault: Address,
    pub asset_router: Address,
    pub l1_messenger: Address,
}

impl Default for ContractAddresses {
    fn default() -> Self {
        Self {
            interop_root_storage: system_address(0x0001_0008),
            interop_handler: system_address(0x0001_000c),
            interop_center: system_address(0x0001_000b),
            standard_trigger_account: system_address(0x0001_000f),
            native_token_vault: system_address(0x0001_0004),
            asset_router: system_address(0x0001_0003),
            l1_messenger: system_address(0x8008),
        }
    }
}

/// Address of a system contract living in the low address space
fn system_address(suffix: u32) -> Address {
    Address::from_low_u64_be(suffix as u64)
}

impl Settings {
    /// Load settings from the file named by `FINALIZER_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("FINALIZER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.rollup_chains().is_empty() {
            anyhow::bail!("At least one rollup chain must be enabled");
        }

        let gateways = self
            .enabled_chains()
            .into_iter()
            .filter(|(_, c)| c.role == ChainRole::Gateway)
            .count();
        if gateways != 1 {
            anyhow::bail!("Exactly one gateway chain must be enabled, found {}", gateways);
        }

        for (name, chain) in &self.chains {
            if !chain.enabled {
                continue;
            }
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
            let reserved = match name.as_str() {
                "l1" => Some(ChainRole::L1),
                "gateway" => Some(ChainRole::Gateway),
                _ => None,
            };
            if let Some(role) = reserved {
                if chain.role != role {
                    anyhow::bail!("Chain name {} is reserved for the {:?} role", name, role);
                }
            }
            ChainKind::from_config(name, chain.role)
                .map_err(|e| anyhow::anyhow!("Chain {}: {}", name, e))?;
        }

        if self.finalizer.gateway_finality_poll_ms == 0 || self.finalizer.queue_poll_ms == 0 {
            tracing::warn!("Zero poll interval configured - runners will spin");
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Enabled chains that can be finalization targets
    pub fn rollup_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.enabled_chains()
            .into_iter()
            .filter(|(_, c)| c.role == ChainRole::Rollup)
            .collect()
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    let mut result = input.to_string();
    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

fn default_gateway_chain_id() -> u64 {
    506
}

fn default_finality_poll_ms() -> u64 {
    500
}

fn default_root_poll_ms() -> u64 {
    5_000
}

fn default_queue_poll_ms() -> u64 {
    1_000
}

fn default_receipt_timeout_secs() -> u64 {
    120
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_max_gas_price_gwei() -> u64 {
    100
}

fn default_true() -> bool {
    true
}
