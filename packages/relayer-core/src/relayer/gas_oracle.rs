use alloy_primitives::U256;
use alloy_sol_types::SolCall;

use super::{contracts, RelayKind};
use crate::{
    config::ContractConfig,
    types::{L1Block, TxPayload},
    Result,
};

/// 把源链区块的 base fee 写入目标链 gas price oracle。
/// 各区块之间没有顺序依赖，单个区块失败不影响后续区块。
#[derive(Debug, Clone)]
pub struct GasOracleRelay {
    oracle_address: String,
    gas_limit: u64,
}

impl GasOracleRelay {
    pub fn new(oracle_address: impl Into<String>, gas_limit: u64) -> Self {
        Self {
            oracle_address: oracle_address.into(),
            gas_limit,
        }
    }

    pub fn from_config(contracts: &ContractConfig) -> Self {
        Self::new(
            contracts.gas_price_oracle_address.clone(),
            contracts.oracle_gas_limit,
        )
    }
}

impl RelayKind for GasOracleRelay {
    type Record = L1Block;

    const ORDERED: bool = false;

    fn name(&self) -> &'static str {
        "gas-oracle-relayer"
    }

    fn build_payload(&self, block: &L1Block) -> Result<TxPayload> {
        let call = contracts::setL1BaseFeeCall {
            l1BaseFee: U256::from(block.base_fee),
        };

        Ok(TxPayload {
            to: self.oracle_address.clone(),
            value: "0x0".to_string(),
            gas_limit: self.gas_limit,
            data: call.abi_encode(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_l1_base_fee_encoding() {
        let relay = GasOracleRelay::new("0x5300000000000000000000000000000000000002", 50_000);
        let block = L1Block {
            base_fee: 0x1234,
            ..L1Block::new(42, "gas-oracle-1")
        };

        let payload = relay.build_payload(&block).unwrap();
        assert_eq!(payload.to, "0x5300000000000000000000000000000000000002");
        assert_eq!(payload.gas_limit, 50_000);
        assert_eq!(payload.data.len(), 36);
        assert_eq!(&payload.data[..4], &contracts::setL1BaseFeeCall::SELECTOR);
        assert_eq!(&payload.data[34..], &[0x12, 0x34]);
    }
}
