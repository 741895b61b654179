//! Native EIP-712 transaction envelope of the destination rollups

use crate::error::{FinalizerError, FinalizerResult};

use ethers::types::{Address, Bytes, U256};
use ethers::utils::rlp::RlpStream;

/// Transaction type byte of EIP-712 rollup transactions
pub const EIP712_TX_TYPE: u8 = 0x71;

/// Paymaster settings carried by the envelope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymasterParams {
    pub paymaster: Address,
    pub paymaster_input: Bytes,
}

/// Unsigned EIP-712 transaction whose authorization lives in `custom_signature`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip712Transaction {
    pub chain_id: u64,
    pub nonce: U256,
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
    pub gas_limit: U256,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub gas_per_pubdata: U256,
    pub factory_deps: Vec<Bytes>,
    pub custom_signature: Bytes,
    pub paymaster_params: PaymasterParams,
}

impl Eip712Transaction {
    /// Serialize as `0x71 || rlp(fields)`, ready for `eth_sendRawTransaction`
    pub fn encode(&self) -> FinalizerResult<Bytes> {
        if self.custom_signature.is_empty() {
            return Err(FinalizerError::BroadcastFailed(
                "EIP-712 transaction without custom signature".to_string(),
            ));
        }

        let mut rlp = RlpStream::new_list(16);
        rlp.append(&self.nonce);
        rlp.append(&self.max_priority_fee_per_gas);
        rlp.append(&self.max_fee_per_gas);
        rlp.append(&self.gas_limit);
        rlp.append(&self.to);
        rlp.append(&self.value);
        rlp.append(&self.data.as_ref());
        // chain id with empty r and s
        rlp.append(&self.chain_id);
        rlp.append_empty_data();
        rlp.append_empty_data();
        rlp.append(&self.chain_id);
        rlp.append(&self.from);
        rlp.append(&self.gas_per_pubdata);

        rlp.begin_list(self.factory_deps.len());
        for dep in &self.factory_deps {
            rlp.append(&dep.as_ref());
        }

        rlp.append(&self.custom_signature.as_ref());

        rlp.begin_list(2);
        rlp.append(&self.paymaster_params.paymaster);
        rlp.append(&self.paymaster_params.paymaster_input.as_ref());

        let body = rlp.out();
        let mut encoded = Vec::with_capacity(body.len() + 1);
        encoded.push(EIP712_TX_TYPE);
        encoded.extend_from_slice(&body);
        Ok(Bytes::from(encoded))
    }
}
