//! In-memory chain and message fixtures shared by unit tests

use crate::chain::ChainClient;
use crate::config::ContractAddresses;
use crate::error::{FinalizerError, FinalizerResult};
use crate::proof::abi::{GasFields, InteropCall};
use crate::proof::{InteropBundle, InteropTrigger, ProofBundle, ProofMode};
use crate::tx::FeeData;

use alloy_primitives::{Address as AlloyAddress, Bytes as AlloyBytes, B256, U256 as AlloyU256};
use alloy_sol_types::SolValue;
use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use ethers::utils::keccak256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub const BUNDLE_IDENTIFIER: u8 = 0x01;
pub const TRIGGER_IDENTIFIER: u8 = 0x02;
pub const TRIGGER_GAS_LIMIT: u64 = 30_000_000;

const DESTINATION_CHAIN_ID: u64 = 271;

pub fn interop_center() -> Address {
    ContractAddresses::default().interop_center
}

pub fn trigger(gas_per_pubdata: u64) -> InteropTrigger {
    InteropTrigger {
        destinationChainId: AlloyU256::from(DESTINATION_CHAIN_ID),
        sender: AlloyAddress::from([0xaa; 20]),
        recipient: AlloyAddress::from([0xcc; 20]),
        feeBundleHash: B256::from([0x0f; 32]),
        executionBundleHash: B256::from([0x0e; 32]),
        gasFields: GasFields {
            gasLimit: AlloyU256::from(TRIGGER_GAS_LIMIT),
            gasPerPubdataByteLimit: AlloyU256::from(gas_per_pubdata),
            refundRecipient: AlloyAddress::from([0xaa; 20]),
            paymaster: AlloyAddress::ZERO,
            paymasterInput: AlloyBytes::new(),
        },
    }
}

pub fn bundle(calls: usize) -> InteropBundle {
    InteropBundle {
        destinationChainId: AlloyU256::from(DESTINATION_CHAIN_ID),
        calls: (0..calls)
            .map(|i| InteropCall {
                directCall: i == 0,
                to: AlloyAddress::from([0x10 + i as u8; 20]),
                from: AlloyAddress::from([0xaa; 20]),
                value: AlloyU256::from(i as u64 * 1_000),
                data: AlloyBytes::from(vec![i as u8; i]),
            })
            .collect(),
        executionAddress: AlloyAddress::from([0xbb; 20]),
    }
}

/// Proof whose metadata places the gateway batch leaf at index 5
pub fn gateway_proof(batch: u128) -> Vec<H256> {
    let mut proof: Vec<H256> = (0..8u8).map(|i| H256::repeat_byte(0x30 + i)).collect();

    let mut metadata = [0u8; 32];
    metadata[0] = 0x01;
    metadata[1] = 2;
    metadata[2] = 1;
    proof[0] = H256::from(metadata);

    let mut leaf = [0u8; 32];
    leaf[..16].copy_from_slice(&batch.to_be_bytes());
    proof[5] = H256::from(leaf);
    proof
}

/// A message sent by the interop center, proven in gateway batch `batch`
pub fn proof_bundle(identifier: u8, payload: &[u8], batch: u64) -> ProofBundle {
    message_proof(identifier, payload, batch, batch as u128)
}

fn message_proof(identifier: u8, payload: &[u8], l1_batch: u64, gateway_batch: u128) -> ProofBundle {
    let mut message = Vec::with_capacity(payload.len() + 1);
    message.push(identifier);
    message.extend_from_slice(payload);

    ProofBundle {
        proof: gateway_proof(gateway_batch),
        message: Bytes::from(message),
        sender: interop_center(),
        l1_batch_number: l1_batch,
        l2_tx_number_in_block: 3,
        l2_message_index: 1,
    }
}

pub fn receipt(hash: H256, status: u64) -> TransactionReceipt {
    TransactionReceipt {
        transaction_hash: hash,
        status: Some(status.into()),
        ..Default::default()
    }
}

/// In-memory chain: finalized head, interop transactions, roots and broadcasts
pub struct FakeChain {
    chain_id: u64,
    finalized: AtomicU64,
    receipts: DashMap<H256, TransactionReceipt>,
    proofs: DashMap<(H256, usize), ProofBundle>,
    roots: DashMap<(u64, u128), H256>,
    broadcasts: Mutex<Vec<Bytes>>,
    /// Fee lookups left to fail with a connection error
    fee_failures: AtomicU64,
}

impl FakeChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            finalized: AtomicU64::new(0),
            receipts: DashMap::new(),
            proofs: DashMap::new(),
            roots: DashMap::new(),
            broadcasts: Mutex::new(Vec::new()),
            fee_failures: AtomicU64::new(0),
        }
    }

    pub fn set_finalized(&self, block: u64) {
        self.finalized.store(block, Ordering::SeqCst);
    }

    /// Make the next `count` fee lookups fail as if the RPC dropped
    pub fn fail_fee_data(&self, count: u64) {
        self.fee_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_interop_root(&self, gateway_chain_id: u64, batch: u128, root: H256) {
        self.roots.insert((gateway_chain_id, batch), root);
    }

    /// Mine an interop transaction carrying fee bundle, execution bundle and trigger
    pub fn add_interop_tx(&self, hash: H256, block: u64, batch: u128, gas_per_pubdata: u64) {
        let mut mined = receipt(hash, 1);
        mined.block_number = Some(block.into());
        self.receipts.insert(hash, mined);

        let messages = [
            (BUNDLE_IDENTIFIER, bundle(1).abi_encode()),
            (BUNDLE_IDENTIFIER, bundle(2).abi_encode()),
            (TRIGGER_IDENTIFIER, trigger(gas_per_pubdata).abi_encode()),
        ];
        for (index, (identifier, payload)) in messages.into_iter().enumerate() {
            self.proofs.insert(
                (hash, index),
                message_proof(identifier, &payload, block, batch),
            );
        }
    }

    pub fn broadcasts(&self) -> Vec<Bytes> {
        self.broadcasts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn finalized_block_number(&self) -> FinalizerResult<u64> {
        Ok(self.finalized.load(Ordering::SeqCst))
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> FinalizerResult<Option<TransactionReceipt>> {
        Ok(self.receipts.get(&tx_hash).map(|r| r.clone()))
    }

    async fn get_transaction_count(&self, _address: Address) -> FinalizerResult<U256> {
        Ok(U256::from(self.broadcasts.lock().unwrap().len()))
    }

    async fn get_fee_data(&self) -> FinalizerResult<FeeData> {
        let failing = self
            .fee_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(FinalizerError::ChainConnection {
                chain_id: self.chain_id,
                message: "connection reset".to_string(),
            });
        }
        Ok(FeeData {
            max_fee_per_gas: U256::from(250_000_000u64),
            max_priority_fee_per_gas: U256::zero(),
        })
    }

    async fn broadcast_transaction(&self, raw: Bytes) -> FinalizerResult<TransactionReceipt> {
        let hash = H256::from(keccak256(&raw));
        self.broadcasts.lock().unwrap().push(raw);
        Ok(receipt(hash, 1))
    }

    async fn get_withdrawal_proof(
        &self,
        tx_hash: H256,
        message_index: usize,
        _mode: ProofMode,
    ) -> FinalizerResult<Option<ProofBundle>> {
        Ok(self
            .proofs
            .get(&(tx_hash, message_index))
            .map(|p| p.clone()))
    }

    async fn interop_root(
        &self,
        gateway_chain_id: u64,
        batch_number: u128,
    ) -> FinalizerResult<H256> {
        Ok(self
            .roots
            .get(&(gateway_chain_id, batch_number))
            .map(|root| *root)
            .unwrap_or_else(H256::zero))
    }
}
