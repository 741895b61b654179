//! Chain module - handles multi-chain connections and finality checks
//!
//! This module provides:
//! - Chain identifiers for the interop topology (L1, gateway, rollups)
//! - The [`ChainClient`] surface the finalization engine consumes
//! - Multi-RPC provider management with automatic failover
//! - Source finality and interop root ingestion checks

pub mod client;
pub mod finality;
pub mod provider;

pub use client::ChainClient;
pub use finality::{ChainMover, FinalityOracle};
pub use provider::ChainProvider;

use crate::config::{ChainRole, Settings};
use crate::error::{FinalizerError, FinalizerResult};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Identifier of a chain in the interop topology
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChainKind {
    L1,
    Gateway,
    Rollup(String),
}

impl ChainKind {
    /// Build the identifier of a configured chain
    pub fn from_config(name: &str, role: ChainRole) -> FinalizerResult<Self> {
        match role {
            ChainRole::L1 => Ok(ChainKind::L1),
            ChainRole::Gateway => Ok(ChainKind::Gateway),
            ChainRole::Rollup => match name.parse::<ChainKind>()? {
                kind @ ChainKind::Rollup(_) => Ok(kind),
                other => Err(FinalizerError::InvalidConfiguration(format!(
                    "rollup chain cannot be named {}",
                    other
                ))),
            },
        }
    }

    /// Only rollups can receive finalized interop transactions
    pub fn is_finalization_target(&self) -> bool {
        matches!(self, ChainKind::Rollup(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            ChainKind::L1 => "l1",
            ChainKind::Gateway => "gateway",
            ChainKind::Rollup(name) => name,
        }
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainKind {
    type Err = FinalizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "l1" => Ok(ChainKind::L1),
            "gateway" => Ok(ChainKind::Gateway),
            "" => Err(FinalizerError::MalformedIdentifier(
                "empty chain name".to_string(),
            )),
            name if name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_') =>
            {
                Ok(ChainKind::Rollup(name.to_string()))
            }
            other => Err(FinalizerError::MalformedIdentifier(format!(
                "invalid chain name {:?}",
                other
            ))),
        }
    }
}

impl TryFrom<String> for ChainKind {
    type Error = FinalizerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChainKind> for String {
    fn from(kind: ChainKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Manages connections to all configured chains
pub struct ChainManager {
    /// Chain providers indexed by chain identifier
    providers: DashMap<ChainKind, Arc<ChainProvider>>,
}

impl ChainManager {
    /// Create a new chain manager with all configured chains
    pub async fn new(settings: &Settings) -> FinalizerResult<Self> {
        let providers = DashMap::new();
        let receipt_timeout = Duration::from_secs(settings.finalizer.receipt_timeout_secs);

        for (name, chain_config) in settings.enabled_chains() {
            let kind = ChainKind::from_config(name, chain_config.role)?;

            info!("Initializing chain {} (ID: {})", kind, chain_config.chain_id);

            let provider = ChainProvider::new(
                kind.clone(),
                chain_config.clone(),
                settings.contracts.clone(),
                receipt_timeout,
            )
            .await?;
            providers.insert(kind.clone(), Arc::new(provider));

            info!("Chain {} initialized successfully", kind);
        }

        Ok(Self { providers })
    }

    /// Get provider for a specific chain
    pub fn get_provider(&self, chain: &ChainKind) -> FinalizerResult<Arc<ChainProvider>> {
        self.providers
            .get(chain)
            .map(|p| p.clone())
            .ok_or_else(|| FinalizerError::ChainNotFound {
                chain: chain.to_string(),
            })
    }

    /// Get the engine-facing client for a specific chain
    pub fn client(&self, chain: &ChainKind) -> FinalizerResult<Arc<dyn ChainClient>> {
        let provider: Arc<dyn ChainClient> = self.get_provider(chain)?;
        Ok(provider)
    }

    /// Health check for all chains
    pub async fn health_check(&self) -> Vec<(ChainKind, bool)> {
        let providers: Vec<_> = self
            .providers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let checks = providers.into_iter().map(|(kind, provider)| async move {
            let healthy = provider.health_check().await;
            if !healthy {
                warn!("Chain {} health check failed", kind);
            }
            crate::metrics::record_chain_health(&kind, healthy);
            (kind, healthy)
        });

        futures::future::join_all(checks).await
    }

    /// Get all connected chains
    pub fn connected_chains(&self) -> Vec<ChainKind> {
        self.providers.iter().map(|e| e.key().clone()).collect()
    }

    /// Connected chains that run a finalizer
    pub fn finalization_targets(&self) -> Vec<ChainKind> {
        self.connected_chains()
            .into_iter()
            .filter(ChainKind::is_finalization_target)
            .collect()
    }
}
