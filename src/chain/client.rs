//! The chain surface consumed by the finalization engine

use crate::error::FinalizerResult;
use crate::proof::{ProofBundle, ProofMode};
use crate::tx::FeeData;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};

/// Read/broadcast access to one chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Numeric chain id
    fn chain_id(&self) -> u64;

    /// Number of the most recent block tagged `finalized`
    async fn finalized_block_number(&self) -> FinalizerResult<u64>;

    /// Receipt of a transaction, if it has been included
    async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> FinalizerResult<Option<TransactionReceipt>>;

    /// Current nonce of an account
    async fn get_transaction_count(&self, address: Address) -> FinalizerResult<U256>;

    /// EIP-1559 fee parameters for a new transaction
    async fn get_fee_data(&self) -> FinalizerResult<FeeData>;

    /// Broadcast a serialized transaction and wait for its inclusion receipt
    async fn broadcast_transaction(&self, raw: Bytes) -> FinalizerResult<TransactionReceipt>;

    /// Withdrawal proof for the `message_index`-th L2→L1 message of a
    /// transaction. `None` when the message or its proof is not available yet.
    async fn get_withdrawal_proof(
        &self,
        tx_hash: H256,
        message_index: usize,
        mode: ProofMode,
    ) -> FinalizerResult<Option<ProofBundle>>;

    /// Interop root stored for `(gateway_chain_id, batch_number)`; zero when unset
    async fn interop_root(
        &self,
        gateway_chain_id: u64,
        batch_number: u128,
    ) -> FinalizerResult<H256>;
}
