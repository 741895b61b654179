//! Gateway batch resolution and interop message extraction

use super::abi::{
    to_alloy_address, to_ethers_bytes, InteropBundle, InteropTrigger, L2Message,
    MessageInclusionProof,
};
use super::{DecodeError, ProofBundle, ProofMode, REQUIRED_L2_GAS_PRICE_PER_PUBDATA};
use crate::chain::ChainClient;
use crate::error::FinalizerResult;

use alloy_primitives::{Bytes, B256, U256};
use alloy_sol_types::{SolStruct, SolType, SolValue};
use ethers::types::{Address, H256};
use tracing::debug;

/// Batch number of the gateway batch that aggregated the proven message.
///
/// Element 0 of the proof is metadata: byte 1 holds the length of the
/// log-leaf proof segment and byte 2 the length of the batch-leaf segment.
/// The gateway batch leaf sits right after both segments (and the batch
/// root between them), and its first 16 bytes are the batch number.
pub fn resolve_gateway_batch(proof: &[H256]) -> Result<u128, DecodeError> {
    let metadata = proof.first().ok_or(DecodeError::EmptyProof)?.as_bytes();
    let log_leaf_len = metadata[1] as usize;
    let batch_leaf_len = metadata[2] as usize;

    let index = 1 + log_leaf_len + 1 + batch_leaf_len;
    let leaf = proof.get(index).ok_or(DecodeError::ProofTooShort {
        index,
        len: proof.len(),
    })?;

    let mut batch = [0u8; 16];
    batch.copy_from_slice(&leaf.as_bytes()[..16]);
    Ok(u128::from_be_bytes(batch))
}

/// A schema an L2→L1 interop message can be decoded against
pub trait InteropMessage: SolStruct + Send {
    /// Check message-specific invariants after decoding
    fn validate(&self, _log_index: usize) -> Result<(), DecodeError> {
        Ok(())
    }
}

impl InteropMessage for InteropTrigger {
    fn validate(&self, log_index: usize) -> Result<(), DecodeError> {
        let required = U256::from(REQUIRED_L2_GAS_PRICE_PER_PUBDATA);
        if self.gasFields.gasPerPubdataByteLimit != required {
            return Err(DecodeError::TriggerNotFound {
                log_index,
                found: self.gasFields.gasPerPubdataByteLimit.to_string(),
            });
        }
        Ok(())
    }
}

impl InteropMessage for InteropBundle {}

/// A decoded message together with the encodings the destination chain expects
#[derive(Debug, Clone)]
pub struct DecodedMessage<T> {
    pub payload: T,
    /// ABI-encoded payload, identifier byte stripped
    pub raw_payload: ethers::types::Bytes,
    /// ABI-encoded [`MessageInclusionProof`]
    pub inclusion_proof: ethers::types::Bytes,
    pub l1_batch_number: u64,
    pub l2_message_index: u64,
}

/// Fetch and decode the `log_index`-th interop message of a source transaction.
///
/// `Ok(None)` means the message (or its proof) is not available, which
/// callers treat the same as "not yet": poll again later.
pub async fn extract_message<T: InteropMessage>(
    source: &dyn ChainClient,
    tx_hash: H256,
    log_index: usize,
    interop_center: Address,
) -> FinalizerResult<Option<DecodedMessage<T>>> {
    let Some(bundle) = source
        .get_withdrawal_proof(tx_hash, log_index, ProofMode::ProofBasedGateway)
        .await?
    else {
        debug!("No interop message at {:?}[{}] yet", tx_hash, log_index);
        return Ok(None);
    };

    let decoded = decode_message(&bundle, source.chain_id(), log_index, interop_center)?;
    Ok(Some(decoded))
}

/// Decode a message against `T` and wrap it with its inclusion proof
pub fn decode_message<T: InteropMessage>(
    bundle: &ProofBundle,
    source_chain_id: u64,
    log_index: usize,
    interop_center: Address,
) -> Result<DecodedMessage<T>, DecodeError> {
    if bundle.sender != interop_center {
        return Err(DecodeError::UnexpectedSender {
            expected: interop_center,
            found: bundle.sender,
        });
    }

    let (_identifier, payload_bytes) = bundle
        .message
        .split_first()
        .ok_or(DecodeError::EmptyMessage)?;

    let payload = <T as SolType>::abi_decode(payload_bytes, true)?;
    payload.validate(log_index)?;

    let wrapper = MessageInclusionProof {
        chainId: U256::from(source_chain_id),
        l1BatchNumber: U256::from(bundle.l1_batch_number),
        l2MessageIndex: U256::from(bundle.l2_message_index),
        message: L2Message {
            txNumberInBatch: bundle.l2_tx_number_in_block,
            sender: to_alloy_address(interop_center),
            data: Bytes::copy_from_slice(&bundle.message),
        },
        proof: bundle.proof.iter().map(|word| B256::from(word.0)).collect(),
    };

    Ok(DecodedMessage {
        payload,
        raw_payload: ethers::types::Bytes::from(payload_bytes.to_vec()),
        inclusion_proof: to_ethers_bytes(&Bytes::from(wrapper.abi_encode())),
        l1_batch_number: bundle.l1_batch_number,
        l2_message_index: bundle.l2_message_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::client::MockChainClient;
    use crate::error::FinalizerError;
    use crate::testing;
    use alloy_primitives::Address as AlloyAddress;

    fn proof_with_metadata(log_leaf_len: u8, batch_leaf_len: u8, total: usize) -> Vec<H256> {
        let mut proof: Vec<H256> = (0..total)
            .map(|i| H256::from_low_u64_be(0xfeed_0000 + i as u64))
            .collect();
        let mut metadata = [0u8; 32];
        metadata[0] = 0x01;
        metadata[1] = log_leaf_len;
        metadata[2] = batch_leaf_len;
        metadata[3] = 0x01;
        proof[0] = H256::from(metadata);
        proof
    }

    fn batch_leaf(batch: u128) -> H256 {
        let mut word = [0x5au8; 32];
        word[..16].copy_from_slice(&batch.to_be_bytes());
        H256::from(word)
    }

    #[test]
    fn gateway_batch_follows_both_segments() {
        let mut proof = proof_with_metadata(3, 2, 10);
        // 1 metadata + 3 log leaf + 1 batch root + 2 batch leaf
        proof[7] = batch_leaf(42);
        assert_eq!(resolve_gateway_batch(&proof).unwrap(), 42);
        assert_eq!(resolve_gateway_batch(&proof).unwrap(), 42);
    }

    #[test]
    fn gateway_batch_ignores_unrelated_bytes() {
        // 1 metadata + 1 log leaf + 1 batch root, leaf at index 3
        let mut proof = proof_with_metadata(1, 0, 6);
        proof[3] = batch_leaf(0x0102_0304);
        assert_eq!(resolve_gateway_batch(&proof).unwrap(), 0x0102_0304);

        // metadata bytes other than the two lengths
        let mut meta = proof[0].0;
        meta[0] = 0xff;
        meta[3] = 0xee;
        meta[31] = 0xdd;
        proof[0] = H256::from(meta);
        // trailing half of the batch leaf
        let mut leaf = proof[3].0;
        leaf[16..].copy_from_slice(&[0x99; 16]);
        proof[3] = H256::from(leaf);
        // every other element
        proof[1] = H256::repeat_byte(0x11);
        proof[2] = H256::repeat_byte(0x22);
        proof[4] = H256::zero();
        proof[5] = H256::repeat_byte(0x33);

        assert_eq!(resolve_gateway_batch(&proof).unwrap(), 0x0102_0304);
    }

    #[test]
    fn gateway_batch_reads_full_sixteen_bytes() {
        let mut proof = proof_with_metadata(0, 0, 3);
        proof[2] = batch_leaf(u128::MAX - 1);
        assert_eq!(resolve_gateway_batch(&proof).unwrap(), u128::MAX - 1);
    }

    #[test]
    fn gateway_batch_rejects_short_proofs() {
        assert!(matches!(
            resolve_gateway_batch(&[]),
            Err(DecodeError::EmptyProof)
        ));
        let proof = proof_with_metadata(4, 4, 5);
        assert!(matches!(
            resolve_gateway_batch(&proof),
            Err(DecodeError::ProofTooShort { index: 10, len: 5 })
        ));
    }

    #[test]
    fn decodes_trigger_and_wraps_proof() {
        let trigger = testing::trigger(REQUIRED_L2_GAS_PRICE_PER_PUBDATA);
        let bundle = testing::proof_bundle(testing::TRIGGER_IDENTIFIER, &trigger.abi_encode(), 9);

        let decoded: DecodedMessage<InteropTrigger> =
            decode_message(&bundle, 270, 2, testing::interop_center()).unwrap();
        assert_eq!(decoded.payload, trigger);
        assert_eq!(decoded.raw_payload.as_ref(), &bundle.message[1..]);

        let wrapper =
            <MessageInclusionProof as SolType>::abi_decode(&decoded.inclusion_proof, true).unwrap();
        assert_eq!(wrapper.chainId, U256::from(270u64));
        assert_eq!(wrapper.l1BatchNumber, U256::from(9u64));
        assert_eq!(wrapper.l2MessageIndex, U256::from(bundle.l2_message_index));
        assert_eq!(wrapper.message.txNumberInBatch, bundle.l2_tx_number_in_block);
        assert_eq!(wrapper.message.sender, to_alloy_address(testing::interop_center()));
        assert_eq!(wrapper.message.data.as_ref(), bundle.message.as_ref());
        assert_eq!(wrapper.proof.len(), bundle.proof.len());
    }

    #[test]
    fn rejects_trigger_with_wrong_pubdata_price() {
        let trigger = testing::trigger(REQUIRED_L2_GAS_PRICE_PER_PUBDATA + 1);
        let bundle = testing::proof_bundle(testing::TRIGGER_IDENTIFIER, &trigger.abi_encode(), 9);

        let err = decode_message::<InteropTrigger>(&bundle, 270, 2, testing::interop_center())
            .unwrap_err();
        match err {
            DecodeError::TriggerNotFound { log_index, found } => {
                assert_eq!(log_index, 2);
                assert_eq!(found, "801");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn decodes_bundle_calls_in_order() {
        let bundle_payload = testing::bundle(3);
        let proof_bundle =
            testing::proof_bundle(testing::BUNDLE_IDENTIFIER, &bundle_payload.abi_encode(), 9);

        let decoded: DecodedMessage<InteropBundle> =
            decode_message(&proof_bundle, 270, 1, testing::interop_center()).unwrap();
        assert_eq!(decoded.payload.calls, bundle_payload.calls);
        assert_eq!(decoded.payload.executionAddress, bundle_payload.executionAddress);
    }

    #[test]
    fn rejects_foreign_sender_and_empty_message() {
        let trigger = testing::trigger(REQUIRED_L2_GAS_PRICE_PER_PUBDATA);
        let mut bundle =
            testing::proof_bundle(testing::TRIGGER_IDENTIFIER, &trigger.abi_encode(), 9);
        bundle.sender = Address::repeat_byte(0x66);
        assert!(matches!(
            decode_message::<InteropTrigger>(&bundle, 270, 2, testing::interop_center()),
            Err(DecodeError::UnexpectedSender { .. })
        ));

        bundle.sender = testing::interop_center();
        bundle.message = ethers::types::Bytes::new();
        assert!(matches!(
            decode_message::<InteropTrigger>(&bundle, 270, 2, testing::interop_center()),
            Err(DecodeError::EmptyMessage)
        ));
    }

    #[test]
    fn garbage_payload_is_an_abi_error() {
        let bundle = testing::proof_bundle(testing::BUNDLE_IDENTIFIER, &[0x01, 0x02, 0x03], 9);
        assert!(matches!(
            decode_message::<InteropBundle>(&bundle, 270, 0, testing::interop_center()),
            Err(DecodeError::Abi(_))
        ));
    }

    #[tokio::test]
    async fn absent_message_is_not_an_error() {
        let mut source = MockChainClient::new();
        source
            .expect_get_withdrawal_proof()
            .withf(|_, index, mode| *index == 5 && *mode == ProofMode::ProofBasedGateway)
            .returning(|_, _, _| Ok(None));
        source.expect_chain_id().return_const(270u64);

        let result = extract_message::<InteropTrigger>(
            &source,
            H256::repeat_byte(1),
            5,
            testing::interop_center(),
        )
        .await;
        assert!(tokio_test::assert_ok!(result).is_none());
    }

    #[tokio::test]
    async fn extraction_surfaces_malformed_messages() {
        let trigger = testing::trigger(1);
        let bundle = testing::proof_bundle(testing::TRIGGER_IDENTIFIER, &trigger.abi_encode(), 9);

        let mut source = MockChainClient::new();
        source
            .expect_get_withdrawal_proof()
            .returning(move |_, _, _| Ok(Some(bundle.clone())));
        source.expect_chain_id().return_const(270u64);

        let err = extract_message::<InteropTrigger>(
            &source,
            H256::repeat_byte(1),
            2,
            testing::interop_center(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FinalizerError::MalformedMessage(_)));
    }

    #[test]
    fn alloy_and_ethers_addresses_agree() {
        let alloy = AlloyAddress::from([0x0b; 20]);
        assert_eq!(to_alloy_address(Address::repeat_byte(0x0b)), alloy);
    }
}
