use alloy_primitives::U256;
use alloy_sol_types::SolCall;

use super::{contracts, RelayKind};
use crate::{
    config::ContractConfig,
    types::{L1Message, TxPayload},
    Error, Result,
};

/// 把源链消息中继到目标链 messenger 合约，队列索引必须严格递增
#[derive(Debug, Clone)]
pub struct MessageRelay {
    messenger_address: String,
}

impl MessageRelay {
    pub fn new(messenger_address: impl Into<String>) -> Self {
        Self {
            messenger_address: messenger_address.into(),
        }
    }

    pub fn from_config(contracts: &ContractConfig) -> Self {
        Self::new(contracts.messenger_address.clone())
    }
}

impl RelayKind for MessageRelay {
    type Record = L1Message;

    const ORDERED: bool = true;

    fn name(&self) -> &'static str {
        "message-relayer"
    }

    fn build_payload(&self, msg: &L1Message) -> Result<TxPayload> {
        if msg.gas_limit == 0 {
            return Err(Error::Payload(format!(
                "message {} has zero gas limit",
                msg.msg_hash
            )));
        }

        let call = contracts::relayMessageCall {
            from: contracts::address("sender", &msg.sender)?,
            to: contracts::address("target", &msg.target)?,
            value: contracts::quantity("value", &msg.value)?,
            nonce: U256::from(msg.queue_index),
            message: contracts::bytes("calldata", &msg.calldata)?,
        };

        Ok(TxPayload {
            to: self.messenger_address.clone(),
            value: "0x0".to_string(),
            gas_limit: msg.gas_limit,
            data: call.abi_encode(),
        })
    }
}
