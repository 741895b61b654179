//! Chain provider with multi-RPC support and automatic failover

use super::{ChainClient, ChainKind};
use crate::config::{ChainConfig, ContractAddresses};
use crate::error::{FinalizerError, FinalizerResult};
use crate::proof::{abi, ProofBundle, ProofMode};
use crate::tx::FeeData;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use lazy_static::lazy_static;
use serde::Deserialize;
use sha3::{Digest, Keccak256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, warn};

abigen!(
    L2InteropRootStorage,
    r#"[
        function interopRoots(uint256 chainId, uint256 batchNumber) external view returns (bytes32)
    ]"#
);

lazy_static! {
    /// Topic of `L1MessageSent(address,bytes32,bytes)` emitted by the L1 messenger
    static ref L1_MESSAGE_SENT: H256 =
        H256::from_slice(&Keccak256::digest(b"L1MessageSent(address,bytes32,bytes)"));
}

/// L2→L1 log entry attached to rollup receipts
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct L2ToL1Log {
    sender: Address,
}

/// Response of `zks_getL2ToL1LogProof`
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct LogProof {
    proof: Vec<H256>,
    id: u64,
    root: H256,
}

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain identifier
    kind: ChainKind,
    /// Chain configuration
    config: ChainConfig,
    /// System contract addresses
    contracts: ContractAddresses,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Arc<Provider<Http>>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// How long to wait for a broadcast transaction to be included
    receipt_timeout: Duration,
}

impl ChainProvider {
    /// Create a new chain provider
    pub async fn new(
        kind: ChainKind,
        config: ChainConfig,
        contracts: ContractAddresses,
        receipt_timeout: Duration,
    ) -> FinalizerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(Arc::new(provider));
                    debug!("Added HTTP provider for chain {}: {}", kind, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(FinalizerError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            kind,
            config,
            contracts,
            http_providers,
            current_provider: AtomicUsize::new(0),
            receipt_timeout,
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> Arc<Provider<Http>> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        self.http_providers[idx % self.http_providers.len()].clone()
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.kind, next);
    }

    fn connection_error(&self, message: impl ToString) -> FinalizerError {
        FinalizerError::ChainConnection {
            chain_id: self.config.chain_id,
            message: message.to_string(),
        }
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> FinalizerResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!("Failed to get block number from chain {}: {}", self.kind, e);
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed"))
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.kind, e);
                false
            }
        }
    }

    /// Index of the `message_index`-th messenger entry among the receipt's L2→L1 logs
    fn l2_to_l1_log_index(
        &self,
        receipt: &TransactionReceipt,
        message_index: usize,
    ) -> FinalizerResult<Option<u64>> {
        let logs: Vec<L2ToL1Log> = match receipt.other.get_deserialized("l2ToL1Logs") {
            Some(Ok(logs)) => logs,
            Some(Err(e)) => {
                return Err(self.connection_error(format!("malformed l2ToL1Logs: {}", e)))
            }
            None => return Ok(None),
        };

        Ok(logs
            .iter()
            .enumerate()
            .filter(|(_, log)| log.sender == self.contracts.l1_messenger)
            .nth(message_index)
            .map(|(position, _)| position as u64))
    }

    fn receipt_u64(&self, receipt: &TransactionReceipt, field: &str) -> FinalizerResult<Option<u64>> {
        match receipt.other.get_deserialized::<U64>(field) {
            Some(Ok(value)) => Ok(Some(value.as_u64())),
            Some(Err(e)) => Err(self.connection_error(format!("malformed {}: {}", field, e))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ChainClient for ChainProvider {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    async fn finalized_block_number(&self) -> FinalizerResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block(BlockNumber::Finalized).await {
                Ok(Some(block)) => {
                    return block
                        .number
                        .map(|n| n.as_u64())
                        .ok_or_else(|| self.connection_error("finalized block has no number"));
                }
                Ok(None) => return Ok(0),
                Err(e) => {
                    warn!("Failed to get finalized block from chain {}: {}", self.kind, e);
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed"))
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> FinalizerResult<Option<TransactionReceipt>> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_transaction_receipt(tx_hash).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) => {
                    warn!("Failed to get receipt from chain {}: {}", self.kind, e);
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed to get receipt"))
    }

    async fn get_transaction_count(&self, address: Address) -> FinalizerResult<U256> {
        self.http()
            .get_transaction_count(address, None)
            .await
            .map_err(|e| self.connection_error(e))
    }

    async fn get_fee_data(&self) -> FinalizerResult<FeeData> {
        let (max_fee, priority_fee) = self
            .http()
            .estimate_eip1559_fees(None)
            .await
            .map_err(|e| self.connection_error(e))?;

        let fees = FeeData {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: priority_fee,
        }
        .capped(self.config.max_gas_price_gwei);

        debug!("Fee data for chain {}: {:?}", self.kind, fees);
        Ok(fees)
    }

    async fn broadcast_transaction(&self, raw: Bytes) -> FinalizerResult<TransactionReceipt> {
        let provider = self.http();
        let pending = provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| FinalizerError::BroadcastFailed(e.to_string()))?;
        let tx_hash = pending.tx_hash();
        debug!("Broadcast {:?} on chain {}", tx_hash, self.kind);

        match timeout(self.receipt_timeout, pending.interval(Duration::from_millis(500))).await {
            Ok(Ok(Some(receipt))) => Ok(receipt),
            Ok(Ok(None)) => Err(FinalizerError::BroadcastFailed(format!(
                "transaction {:?} dropped from mempool",
                tx_hash
            ))),
            Ok(Err(e)) => Err(self.connection_error(e)),
            Err(_) => Err(FinalizerError::Timeout {
                operation: format!("receipt of {:?}", tx_hash),
            }),
        }
    }

    async fn get_withdrawal_proof(
        &self,
        tx_hash: H256,
        message_index: usize,
        mode: ProofMode,
    ) -> FinalizerResult<Option<ProofBundle>> {
        let Some(receipt) = self.get_transaction_receipt(tx_hash).await? else {
            return Ok(None);
        };

        let messenger = self.contracts.l1_messenger;
        let Some(log) = receipt
            .logs
            .iter()
            .filter(|log| log.address == messenger && log.topics.first() == Some(&*L1_MESSAGE_SENT))
            .nth(message_index)
        else {
            return Ok(None);
        };

        let Some(sender_topic) = log.topics.get(1) else {
            return Ok(None);
        };
        let sender = Address::from_slice(&sender_topic.as_bytes()[12..]);
        let message = abi::decode_log_message(&log.data)?;

        let Some(l2_to_l1_log_index) = self.l2_to_l1_log_index(&receipt, message_index)? else {
            return Ok(None);
        };
        let (Some(l1_batch_number), Some(tx_number)) = (
            self.receipt_u64(&receipt, "l1BatchNumber")?,
            self.receipt_u64(&receipt, "l1BatchTxIndex")?,
        ) else {
            // Not sealed into a batch yet
            return Ok(None);
        };
        let l2_tx_number_in_block = u16::try_from(tx_number)
            .map_err(|_| self.connection_error(format!("l1BatchTxIndex {} out of range", tx_number)))?;

        let proof: Option<LogProof> = self
            .http()
            .request("zks_getL2ToL1LogProof", (tx_hash, l2_to_l1_log_index, mode))
            .await
            .map_err(|e| self.connection_error(e))?;

        let Some(proof) = proof else {
            debug!("Log proof for {:?}[{}] not available yet", tx_hash, message_index);
            return Ok(None);
        };

        debug!(
            "Log proof for {:?}[{}]: batch {} id {} root {:?}",
            tx_hash, message_index, l1_batch_number, proof.id, proof.root
        );

        Ok(Some(ProofBundle {
            proof: proof.proof,
            message,
            sender,
            l1_batch_number,
            l2_tx_number_in_block,
            l2_message_index: proof.id,
        }))
    }

    async fn interop_root(
        &self,
        gateway_chain_id: u64,
        batch_number: u128,
    ) -> FinalizerResult<H256> {
        let storage = L2InteropRootStorage::new(self.contracts.interop_root_storage, self.http());
        let root = storage
            .interop_roots(U256::from(gateway_chain_id), U256::from(batch_number))
            .call()
            .await
            .map_err(|e| self.connection_error(e))?;

        Ok(H256::from(root))
    }
}
