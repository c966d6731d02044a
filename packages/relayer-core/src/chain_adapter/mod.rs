use alloy_primitives::keccak256;
use async_trait::async_trait;
use crate::{
    types::{TransactionRequest, TxInfo, TxReceipt},
    Result,
};

/// 目标链客户端特征，定义了发送器与链交互所需的基本功能
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// 获取最新区块高度
    async fn block_number(&self) -> Result<u64>;

    /// 获取账户下一个可用 nonce（包含 pending 交易）
    async fn nonce(&self, address: &str) -> Result<u64>;

    /// 获取节点建议的 gas price
    async fn gas_price(&self) -> Result<u64>;

    /// 由节点托管的 `from` 账户签名，返回已签名的原始交易，不广播
    async fn sign_transaction(&self, tx: &TransactionRequest) -> Result<Vec<u8>>;

    /// 广播已签名的原始交易，返回交易哈希
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String>;

    /// 查询交易（含未打包的），节点不认识时返回 `None`
    async fn transaction_by_hash(&self, tx_hash: &str) -> Result<Option<TxInfo>>;

    /// 查询交易回执，未上链时返回 `None`
    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>>;
}

/// 已签名原始交易的哈希，广播前即可确定
pub fn tx_hash(raw: &[u8]) -> String {
    format!("0x{}", hex::encode(keccak256(raw)))
}

pub mod jsonrpc;

pub use jsonrpc::JsonRpcClient;
