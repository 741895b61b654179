//! ABI schemas of interop messages and the destination verifier

use super::DecodeError;

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolValue};

sol! {
    #[derive(Debug, PartialEq, Eq)]
    struct GasFields {
        uint256 gasLimit;
        uint256 gasPerPubdataByteLimit;
        address refundRecipient;
        address paymaster;
        bytes paymasterInput;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct InteropTrigger {
        uint256 destinationChainId;
        address sender;
        address recipient;
        bytes32 feeBundleHash;
        bytes32 executionBundleHash;
        GasFields gasFields;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct InteropCall {
        bool directCall;
        address to;
        address from;
        uint256 value;
        bytes data;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct InteropBundle {
        uint256 destinationChainId;
        InteropCall[] calls;
        address executionAddress;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct L2Message {
        uint16 txNumberInBatch;
        address sender;
        bytes data;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct MessageInclusionProof {
        uint256 chainId;
        uint256 l1BatchNumber;
        uint256 l2MessageIndex;
        L2Message message;
        bytes32[] proof;
    }
}

/// Payload of an `L1MessageSent` log: `abi.encode(bytes)`
pub fn decode_log_message(data: &[u8]) -> Result<ethers::types::Bytes, DecodeError> {
    let message = Bytes::abi_decode(data, true)?;
    Ok(to_ethers_bytes(&message))
}

/// Calldata of the interop transaction: `abi.encode(bundle, proof)`
pub fn encode_bundle_execution(payload: &[u8], proof: &[u8]) -> Vec<u8> {
    (
        Bytes::copy_from_slice(payload),
        Bytes::copy_from_slice(proof),
    )
        .abi_encode_params()
}

/// Custom signature carrying the fee bundle and trigger proofs
pub fn encode_trigger_signature(
    fee_payload: &[u8],
    fee_proof: &[u8],
    trigger_sender: Address,
    refund_recipient: Address,
    trigger_proof: &[u8],
) -> Vec<u8> {
    (
        Bytes::copy_from_slice(fee_payload),
        Bytes::copy_from_slice(fee_proof),
        trigger_sender,
        refund_recipient,
        Bytes::copy_from_slice(trigger_proof),
    )
        .abi_encode_params()
}

pub(crate) fn to_alloy_address(address: ethers::types::Address) -> Address {
    Address::from(address.0)
}

pub(crate) fn to_ethers_address(address: Address) -> ethers::types::Address {
    ethers::types::Address::from_slice(address.as_slice())
}

pub(crate) fn to_ethers_u256(value: U256) -> ethers::types::U256 {
    ethers::types::U256::from_big_endian(&value.to_be_bytes::<32>())
}

pub(crate) fn to_ethers_bytes(bytes: &Bytes) -> ethers::types::Bytes {
    ethers::types::Bytes::from(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    fn sample_bundle() -> InteropBundle {
        InteropBundle {
            destinationChainId: U256::from(271u64),
            calls: vec![
                InteropCall {
                    directCall: true,
                    to: Address::from([0x0f; 20]),
                    from: Address::from([0xaa; 20]),
                    value: U256::from(200_000_000_000_000_000u64),
                    data: Bytes::new(),
                },
                InteropCall {
                    directCall: false,
                    to: Address::from([0x03; 20]),
                    from: Address::from([0xaa; 20]),
                    value: U256::ZERO,
                    data: Bytes::from(vec![0x01, 0xde, 0xad, 0xbe, 0xef]),
                },
            ],
            executionAddress: Address::from([0xbb; 20]),
        }
    }

    #[test]
    fn bundle_calls_keep_order_and_fields() {
        let bundle = sample_bundle();
        let decoded = InteropBundle::abi_decode(&bundle.abi_encode(), true).unwrap();

        assert_eq!(decoded.calls.len(), 2);
        assert_eq!(decoded.calls, bundle.calls);
        assert!(decoded.calls[0].directCall);
        assert!(!decoded.calls[1].directCall);
        assert_eq!(decoded.calls[1].data.as_ref(), &[0x01, 0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn execution_data_is_two_dynamic_params() {
        let encoded = encode_bundle_execution(&[0xaa; 3], &[0xbb; 40]);
        let (payload, proof) = <(Bytes, Bytes)>::abi_decode_params(&encoded, true).unwrap();
        assert_eq!(payload.as_ref(), &[0xaa; 3]);
        assert_eq!(proof.len(), 40);
        // offsets of both params head the encoding
        assert_eq!(encoded[31], 0x40);
    }

    #[test]
    fn trigger_signature_layout() {
        let sender = Address::from([0x11; 20]);
        let refund = Address::from([0x22; 20]);
        let encoded = encode_trigger_signature(&[1], &[2, 2], sender, refund, &[3, 3, 3]);

        let (fee, fee_proof, s, r, trigger_proof) =
            <(Bytes, Bytes, Address, Address, Bytes)>::abi_decode_params(&encoded, true).unwrap();
        assert_eq!(fee.as_ref(), &[1]);
        assert_eq!(fee_proof.as_ref(), &[2, 2]);
        assert_eq!(s, sender);
        assert_eq!(r, refund);
        assert_eq!(trigger_proof.as_ref(), &[3, 3, 3]);
    }

    #[test]
    fn log_message_payload() {
        let payload = Bytes::from(vec![0x01, 0x02, 0x03]);
        let data = payload.abi_encode();
        assert_eq!(decode_log_message(&data).unwrap().as_ref(), &[0x01, 0x02, 0x03]);
        assert!(decode_log_message(&[0u8; 5]).is_err());
    }

    #[test]
    fn inclusion_proof_roundtrip() {
        let wrapper = MessageInclusionProof {
            chainId: U256::from(271u64),
            l1BatchNumber: U256::from(12u64),
            l2MessageIndex: U256::from(3u64),
            message: L2Message {
                txNumberInBatch: 4,
                sender: Address::from([0x0b; 20]),
                data: Bytes::from(vec![1, 2, 3]),
            },
            proof: vec![B256::repeat_byte(7), B256::repeat_byte(8)],
        };
        let decoded = MessageInclusionProof::abi_decode(&wrapper.abi_encode(), true).unwrap();
        assert_eq!(decoded, wrapper);
    }

    #[test]
    fn address_and_word_conversions() {
        let eth = ethers::types::Address::from_low_u64_be(0x1000f);
        assert_eq!(to_ethers_address(to_alloy_address(eth)), eth);
        assert_eq!(
            to_ethers_u256(U256::from(30_000_000u64)),
            ethers::types::U256::from(30_000_000u64)
        );
    }
}
