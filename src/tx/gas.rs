//! Fee parameters for destination-chain transactions

use ethers::types::U256;

/// EIP-1559 fee parameters read live from a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeeData {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

impl FeeData {
    /// Clamp both fees to a gwei ceiling, keeping priority <= max fee
    pub fn capped(self, max_gas_price_gwei: u64) -> Self {
        let ceiling = gwei(max_gas_price_gwei);
        let max_fee_per_gas = self.max_fee_per_gas.min(ceiling);
        Self {
            max_fee_per_gas,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas.min(max_fee_per_gas),
        }
    }

    /// Upper bound of the fee paid for `gas_limit`
    pub fn max_cost(&self, gas_limit: U256) -> U256 {
        gas_limit.saturating_mul(self.max_fee_per_gas)
    }
}

fn gwei(amount: u64) -> U256 {
    U256::from(amount).saturating_mul(U256::exp10(9))
}
