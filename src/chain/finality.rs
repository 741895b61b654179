//! Source finality and interop root ingestion checks
//!
//! A request becomes executable on its target chain once:
//! - the source block holding it is tagged `finalized` on the source chain
//! - the gateway batch aggregating it has been sealed (its proof resolves)
//! - the target chain has ingested a non-zero interop root for that batch
//!
//! Roots are only ingested when the target produces blocks, so quiet chains
//! can be nudged with a [`ChainMover`].

use super::{ChainClient, ChainKind};
use crate::coordination::InteropRequest;
use crate::error::FinalizerResult;

use async_trait::async_trait;
use ethers::types::H256;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Something able to make a chain produce a new block
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainMover: Send + Sync {
    /// Submit a no-op transaction; returns its hash
    async fn move_chain(&self) -> FinalizerResult<H256>;
}

/// Finality checks on behalf of one target chain
pub struct FinalityOracle {
    /// Target chain identifier
    chain: ChainKind,
    /// Target chain client
    target: Arc<dyn ChainClient>,
    /// Highest finalized block seen per source chain id
    finalized_heads: RwLock<HashMap<u64, u64>>,
}

impl FinalityOracle {
    pub fn new(chain: ChainKind, target: Arc<dyn ChainClient>) -> Self {
        Self {
            chain,
            target,
            finalized_heads: RwLock::new(HashMap::new()),
        }
    }

    /// Whether the request's source block is finalized on its source chain.
    /// `false` while the source block is still unknown.
    pub async fn is_finalized_on_source(&self, request: &InteropRequest) -> FinalizerResult<bool> {
        let Some(block_number) = request.source_block_number else {
            return Ok(false);
        };
        let source_chain_id = request.source.chain_id();

        // Finality never moves backwards, so a cached head is enough
        if let Some(&head) = self.finalized_heads.read().await.get(&source_chain_id) {
            if head >= block_number {
                return Ok(true);
            }
        }

        let head = request.source.finalized_block_number().await?;
        {
            let mut heads = self.finalized_heads.write().await;
            let cached = heads.entry(source_chain_id).or_insert(head);
            *cached = (*cached).max(head);
        }

        let finalized = head >= block_number;
        if finalized {
            info!(
                "Source block {} of {:?} finalized on chain {} (head {})",
                block_number, request.source_tx_hash, source_chain_id, head
            );
        } else {
            debug!(
                "Source block {} of {:?} not finalized yet (head {})",
                block_number, request.source_tx_hash, head
            );
        }
        Ok(finalized)
    }

    /// Whether the target chain stores a non-zero root for the gateway batch
    pub async fn has_non_zero_interop_root(
        &self,
        gateway_chain_id: u64,
        batch_number: u128,
    ) -> FinalizerResult<bool> {
        let root = self.target.interop_root(gateway_chain_id, batch_number).await?;
        let ingested = !root.is_zero();

        crate::metrics::record_root_poll(&self.chain, ingested);
        debug!(
            "Interop root ({}, {}) on {}: {:?}",
            gateway_chain_id, batch_number, self.chain, root
        );
        Ok(ingested)
    }

    /// Best-effort nudge of the target chain; errors are logged and dropped
    pub async fn force_block_production(&self, mover: &dyn ChainMover) {
        match mover.move_chain().await {
            Ok(tx_hash) => {
                debug!("Forced block production on {} with {:?}", self.chain, tx_hash);
                crate::metrics::record_block_production(&self.chain, true);
            }
            Err(e) => {
                warn!("Failed to force block production on {}: {}", self.chain, e);
                crate::metrics::record_block_production(&self.chain, false);
            }
        }
    }
}
