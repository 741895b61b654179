//! Assembly and broadcast of the destination-chain interop transaction

use super::envelope::{Eip712Transaction, PaymasterParams};
use crate::chain::ChainClient;
use crate::config::ContractAddresses;
use crate::error::{FinalizerError, FinalizerResult};
use crate::proof::abi::{
    encode_bundle_execution, encode_trigger_signature, to_ethers_address, to_ethers_bytes,
    to_ethers_u256,
};
use crate::proof::{extract_message, DecodedMessage, InteropBundle, InteropTrigger};

use ethers::types::{Bytes, TransactionReceipt, H256, U256};
use tracing::{debug, info};

/// Log index of the fee bundle among a source transaction's interop messages
pub const FEE_BUNDLE_LOG_INDEX: usize = 0;
/// Log index of the execution bundle
pub const EXECUTION_BUNDLE_LOG_INDEX: usize = 1;
/// Log index of the trigger
pub const TRIGGER_LOG_INDEX: usize = 2;

/// Builds the interop transaction replaying a source request on its target
#[derive(Debug, Clone)]
pub struct TransactionAssembler {
    contracts: ContractAddresses,
}

impl TransactionAssembler {
    pub fn new(contracts: ContractAddresses) -> Self {
        Self { contracts }
    }

    /// Decode the three interop messages of `source_tx_hash` and build the
    /// destination transaction. `None` while any message is still missing.
    pub async fn assemble(
        &self,
        source: &dyn ChainClient,
        target: &dyn ChainClient,
        source_tx_hash: H256,
    ) -> FinalizerResult<Option<Eip712Transaction>> {
        let center = self.contracts.interop_center;

        let Some(trigger) =
            extract_message::<InteropTrigger>(source, source_tx_hash, TRIGGER_LOG_INDEX, center)
                .await?
        else {
            debug!("Trigger of {:?} not produced yet", source_tx_hash);
            return Ok(None);
        };
        let Some(fee) =
            extract_message::<InteropBundle>(source, source_tx_hash, FEE_BUNDLE_LOG_INDEX, center)
                .await?
        else {
            return Ok(None);
        };
        let Some(execution) = extract_message::<InteropBundle>(
            source,
            source_tx_hash,
            EXECUTION_BUNDLE_LOG_INDEX,
            center,
        )
        .await?
        else {
            return Ok(None);
        };

        let nonce = target
            .get_transaction_count(self.contracts.standard_trigger_account)
            .await?;
        let fees = target.get_fee_data().await?;

        Ok(Some(self.build(target.chain_id(), nonce, fees, &trigger, &fee, &execution)))
    }

    fn build(
        &self,
        chain_id: u64,
        nonce: U256,
        fees: super::FeeData,
        trigger: &DecodedMessage<InteropTrigger>,
        fee: &DecodedMessage<InteropBundle>,
        execution: &DecodedMessage<InteropBundle>,
    ) -> Eip712Transaction {
        let gas = &trigger.payload.gasFields;

        let data = encode_bundle_execution(&execution.raw_payload, &execution.inclusion_proof);
        let custom_signature = encode_trigger_signature(
            &fee.raw_payload,
            &fee.inclusion_proof,
            trigger.payload.sender,
            gas.refundRecipient,
            &trigger.inclusion_proof,
        );

        Eip712Transaction {
            chain_id,
            nonce,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
            max_fee_per_gas: fees.max_fee_per_gas,
            gas_limit: to_ethers_u256(gas.gasLimit),
            from: self.contracts.standard_trigger_account,
            to: self.contracts.interop_handler,
            value: U256::zero(),
            data: Bytes::from(data),
            gas_per_pubdata: to_ethers_u256(gas.gasPerPubdataByteLimit),
            factory_deps: Vec::new(),
            custom_signature: Bytes::from(custom_signature),
            paymaster_params: PaymasterParams {
                paymaster: to_ethers_address(gas.paymaster),
                paymaster_input: to_ethers_bytes(&gas.paymasterInput),
            },
        }
    }

    /// Assemble and broadcast, waiting for the inclusion receipt.
    ///
    /// `Ok(None)` when the trigger or a bundle is not available yet. A
    /// rejected or reverted transaction is [`FinalizerError::BroadcastFailed`].
    pub async fn assemble_and_broadcast(
        &self,
        source: &dyn ChainClient,
        target: &dyn ChainClient,
        source_tx_hash: H256,
    ) -> FinalizerResult<Option<TransactionReceipt>> {
        let Some(tx) = self.assemble(source, target, source_tx_hash).await? else {
            return Ok(None);
        };

        debug!(
            "Interop tx for {:?}: nonce {} gas limit {} max cost {}",
            source_tx_hash,
            tx.nonce,
            tx.gas_limit,
            super::FeeData {
                max_fee_per_gas: tx.max_fee_per_gas,
                max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
            }
            .max_cost(tx.gas_limit)
        );

        // Errors from here on are final, the transaction may have landed
        let receipt = target
            .broadcast_transaction(tx.encode()?)
            .await
            .map_err(|e| {
                if e.is_retryable() {
                    FinalizerError::BroadcastFailed(format!(
                        "outcome of interop transaction for {:?} unknown: {}",
                        source_tx_hash, e
                    ))
                } else {
                    e
                }
            })?;
        if receipt.status != Some(1u64.into()) {
            return Err(FinalizerError::BroadcastFailed(format!(
                "interop transaction {:?} reverted on chain {}",
                receipt.transaction_hash,
                target.chain_id()
            )));
        }

        info!(
            "Finalized {:?} on chain {} in tx {:?}",
            source_tx_hash,
            target.chain_id(),
            receipt.transaction_hash
        );
        Ok(Some(receipt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::client::MockChainClient;
    use crate::proof::{ProofMode, REQUIRED_L2_GAS_PRICE_PER_PUBDATA};
    use crate::testing;
    use crate::tx::FeeData;
    use alloy_sol_types::SolValue;
    use ethers::utils::rlp::Rlp;

    fn source_with_messages(with_trigger: bool) -> MockChainClient {
        let trigger = testing::trigger(REQUIRED_L2_GAS_PRICE_PER_PUBDATA);
        let fee = testing::bundle(1);
        let execution = testing::bundle(2);

        let mut source = MockChainClient::new();
        source.expect_chain_id().return_const(270u64);
        source
            .expect_get_withdrawal_proof()
            .returning(move |_, index, mode| {
                assert_eq!(mode, ProofMode::ProofBasedGateway);
                Ok(match index {
                    TRIGGER_LOG_INDEX if with_trigger => Some(testing::proof_bundle(
                        testing::TRIGGER_IDENTIFIER,
                        &trigger.abi_encode(),
                        9,
                    )),
                    FEE_BUNDLE_LOG_INDEX => Some(testing::proof_bundle(
                        testing::BUNDLE_IDENTIFIER,
                        &fee.abi_encode(),
                        9,
                    )),
                    EXECUTION_BUNDLE_LOG_INDEX => Some(testing::proof_bundle(
                        testing::BUNDLE_IDENTIFIER,
                        &execution.abi_encode(),
                        9,
                    )),
                    _ => None,
                })
            });
        source
    }

    fn target() -> MockChainClient {
        let mut target = MockChainClient::new();
        target.expect_chain_id().return_const(271u64);
        target
            .expect_get_transaction_count()
            .withf(|address| *address == ContractAddresses::default().standard_trigger_account)
            .returning(|_| Ok(U256::from(12u64)));
        target.expect_get_fee_data().returning(|| {
            Ok(FeeData {
                max_fee_per_gas: U256::from(250_000_000u64),
                max_priority_fee_per_gas: U256::zero(),
            })
        });
        target
    }

    #[tokio::test]
    async fn builds_interop_transaction_from_messages() {
        let source = source_with_messages(true);
        let target = target();
        let assembler = TransactionAssembler::new(ContractAddresses::default());

        let tx = assembler
            .assemble(&source, &target, H256::repeat_byte(3))
            .await
            .unwrap()
            .unwrap();

        let contracts = ContractAddresses::default();
        assert_eq!(tx.chain_id, 271);
        assert_eq!(tx.nonce, U256::from(12u64));
        assert_eq!(tx.from, contracts.standard_trigger_account);
        assert_eq!(tx.to, contracts.interop_handler);
        assert_eq!(tx.value, U256::zero());
        assert_eq!(tx.gas_limit, U256::from(testing::TRIGGER_GAS_LIMIT));
        assert_eq!(tx.gas_per_pubdata, U256::from(REQUIRED_L2_GAS_PRICE_PER_PUBDATA));
        assert_eq!(tx.max_fee_per_gas, U256::from(250_000_000u64));

        let (payload, _proof) =
            <(alloy_primitives::Bytes, alloy_primitives::Bytes)>::abi_decode_params(&tx.data, true)
                .unwrap();
        let execution = InteropBundle::abi_decode(&payload, true).unwrap();
        assert_eq!(execution.calls.len(), 2);

        let (fee_payload, _, sender, refund, _) = <(
            alloy_primitives::Bytes,
            alloy_primitives::Bytes,
            alloy_primitives::Address,
            alloy_primitives::Address,
            alloy_primitives::Bytes,
        )>::abi_decode_params(&tx.custom_signature, true)
        .unwrap();
        assert_eq!(InteropBundle::abi_decode(&fee_payload, true).unwrap().calls.len(), 1);
        let trigger = testing::trigger(REQUIRED_L2_GAS_PRICE_PER_PUBDATA);
        assert_eq!(sender, trigger.sender);
        assert_eq!(refund, trigger.gasFields.refundRecipient);
    }

    #[tokio::test]
    async fn missing_trigger_aborts_quietly() {
        let source = source_with_messages(false);
        let mut target = MockChainClient::new();
        target.expect_broadcast_transaction().never();

        let assembler = TransactionAssembler::new(ContractAddresses::default());
        let receipt = assembler
            .assemble_and_broadcast(&source, &target, H256::repeat_byte(3))
            .await
            .unwrap();
        assert!(receipt.is_none());
    }

    #[tokio::test]
    async fn broadcasts_envelope_and_returns_receipt() {
        let source = source_with_messages(true);
        let mut target = target();
        target
            .expect_broadcast_transaction()
            .times(1)
            .withf(|raw| raw[0] == 0x71 && Rlp::new(&raw[1..]).item_count().unwrap() == 16)
            .returning(|_| Ok(testing::receipt(H256::repeat_byte(9), 1)));

        let assembler = TransactionAssembler::new(ContractAddresses::default());
        let receipt = assembler
            .assemble_and_broadcast(&source, &target, H256::repeat_byte(3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(receipt.transaction_hash, H256::repeat_byte(9));
    }

    #[tokio::test]
    async fn reverted_transaction_is_a_broadcast_failure() {
        let source = source_with_messages(true);
        let mut target = target();
        target
            .expect_broadcast_transaction()
            .returning(|_| Ok(testing::receipt(H256::repeat_byte(9), 0)));

        let assembler = TransactionAssembler::new(ContractAddresses::default());
        let err = assembler
            .assemble_and_broadcast(&source, &target, H256::repeat_byte(3))
            .await
            .unwrap_err();
        assert!(matches!(err, FinalizerError::BroadcastFailed(_)));
    }

    #[tokio::test]
    async fn rejected_broadcast_propagates() {
        let source = source_with_messages(true);
        let mut target = target();
        target
            .expect_broadcast_transaction()
            .returning(|_| Err(FinalizerError::BroadcastFailed("nonce too low".to_string())));

        let assembler = TransactionAssembler::new(ContractAddresses::default());
        let err = assembler
            .assemble_and_broadcast(&source, &target, H256::repeat_byte(3))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn lost_broadcast_reply_is_not_retryable() {
        let source = source_with_messages(true);
        let mut target = target();
        target.expect_broadcast_transaction().times(1).returning(|_| {
            Err(FinalizerError::Timeout {
                operation: "receipt".to_string(),
            })
        });

        let assembler = TransactionAssembler::new(ContractAddresses::default());
        let err = assembler
            .assemble_and_broadcast(&source, &target, H256::repeat_byte(3))
            .await
            .unwrap_err();
        assert!(matches!(err, FinalizerError::BroadcastFailed(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn fee_lookup_failure_stays_retryable() {
        let source = source_with_messages(true);
        let mut target = MockChainClient::new();
        target.expect_chain_id().return_const(271u64);
        target
            .expect_get_transaction_count()
            .returning(|_| Ok(U256::from(12u64)));
        target.expect_get_fee_data().returning(|| {
            Err(FinalizerError::ChainConnection {
                chain_id: 271,
                message: "connection reset".to_string(),
            })
        });
        target.expect_broadcast_transaction().never();

        let assembler = TransactionAssembler::new(ContractAddresses::default());
        let err = assembler
            .assemble_and_broadcast(&source, &target, H256::repeat_byte(3))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
