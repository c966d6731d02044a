//! 目标链合约调用的 ABI 定义，选择器和编码由 `sol!` 从函数签名生成

use alloy_primitives::{Address, Bytes, U256};
use std::str::FromStr;

use crate::{Error, Result};

alloy_sol_types::sol! {
    // L2 messenger
    function relayMessage(address from, address to, uint256 value, uint256 nonce, bytes message);

    // L1 gas price oracle
    function setL1BaseFee(uint256 l1BaseFee);
}

pub fn address(field: &str, raw: &str) -> Result<Address> {
    Address::from_str(raw)
        .map_err(|e| Error::Payload(format!("{}: invalid address {}: {}", field, raw, e)))
}

/// 十六进制数量（如 `0x19ece`），空值视为 0
pub fn quantity(field: &str, raw: &str) -> Result<U256> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| Error::Payload(format!("{}: invalid quantity {}: {}", field, raw, e)))
}

pub fn bytes(field: &str, raw: &str) -> Result<Bytes> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| Error::Payload(format!("{}: invalid hex {}: {}", field, raw, e)))
}
