use serde::{Deserialize, Serialize};
use std::fmt;

/// 关联标识：消息哈希或区块哈希，用于把链上交易与记录对应起来
pub type CorrelationId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MessageStatus {
    #[default]
    Pending,
    Submitted,
    Confirmed,
    RelayFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GasOracleStatus {
    #[default]
    Pending,
    Importing,
    Imported,
    Failed,
}

/// 记录状态机的四个阶段，消息和区块共用同一套流转规则
pub trait RecordStatus:
    Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    const PENDING: Self;
    const SUBMITTED: Self;
    const SUCCEEDED: Self;
    const FAILED: Self;

    fn is_terminal(&self) -> bool {
        *self == Self::SUCCEEDED || *self == Self::FAILED
    }
}

impl RecordStatus for MessageStatus {
    const PENDING: Self = MessageStatus::Pending;
    const SUBMITTED: Self = MessageStatus::Submitted;
    const SUCCEEDED: Self = MessageStatus::Confirmed;
    const FAILED: Self = MessageStatus::RelayFailed;
}

impl RecordStatus for GasOracleStatus {
    const PENDING: Self = GasOracleStatus::Pending;
    const SUBMITTED: Self = GasOracleStatus::Importing;
    const SUCCEEDED: Self = GasOracleStatus::Imported;
    const FAILED: Self = GasOracleStatus::Failed;
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Submitted => "submitted",
            MessageStatus::Confirmed => "confirmed",
            MessageStatus::RelayFailed => "relay_failed",
        };
        f.write_str(s)
    }
}

impl fmt::Display for GasOracleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GasOracleStatus::Pending => "pending",
            GasOracleStatus::Importing => "importing",
            GasOracleStatus::Imported => "imported",
            GasOracleStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 状态更新时一并写入的附加字段
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    /// `None` 表示保持原值
    pub tx_hash: Option<String>,
    pub submitted_at: Option<u64>,
    /// 清空目标链交易哈希和提交时间（重新排队时使用）
    pub clear_tx: bool,
}

impl StatusUpdate {
    pub fn submitted(tx_hash: String, submitted_at: u64) -> Self {
        Self {
            tx_hash: Some(tx_hash),
            submitted_at: Some(submitted_at),
            clear_tx: false,
        }
    }

    pub fn with_tx_hash(tx_hash: Option<String>) -> Self {
        Self {
            tx_hash,
            ..Default::default()
        }
    }

    pub fn cleared() -> Self {
        Self {
            clear_tx: true,
            ..Default::default()
        }
    }
}

/// 可被中继的持久化记录
pub trait Record: Clone + fmt::Debug + Send + Sync + 'static {
    type Status: RecordStatus;

    /// 关联标识（唯一）
    fn correlation_id(&self) -> &str;
    /// 链上原生序号（队列索引或区块高度，唯一）
    fn sequence(&self) -> u64;
    fn status(&self) -> Self::Status;
    fn tx_hash(&self) -> Option<&str>;
    fn submitted_at(&self) -> Option<u64>;
    fn apply(&mut self, status: Self::Status, update: &StatusUpdate);
}

/// 源链上观察到、等待中继到目标链的消息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct L1Message {
    pub queue_index: u64,
    pub msg_hash: String,
    pub height: u64,
    pub sender: String,
    pub value: String,
    pub gas_limit: u64,
    pub target: String,
    pub calldata: String,
    pub layer1_hash: String,
    #[serde(default)]
    pub layer2_hash: Option<String>,
    #[serde(default)]
    pub submitted_at: Option<u64>,
    #[serde(default)]
    pub status: MessageStatus,
}

impl L1Message {
    pub fn new(queue_index: u64, msg_hash: impl Into<String>) -> Self {
        Self {
            queue_index,
            msg_hash: msg_hash.into(),
            ..Default::default()
        }
    }
}

impl Record for L1Message {
    type Status = MessageStatus;

    fn correlation_id(&self) -> &str {
        &self.msg_hash
    }

    fn sequence(&self) -> u64 {
        self.queue_index
    }

    fn status(&self) -> MessageStatus {
        self.status
    }

    fn tx_hash(&self) -> Option<&str> {
        self.layer2_hash.as_deref()
    }

    fn submitted_at(&self) -> Option<u64> {
        self.submitted_at
    }

    fn apply(&mut self, status: MessageStatus, update: &StatusUpdate) {
        self.status = status;
        if update.clear_tx {
            self.layer2_hash = None;
            self.submitted_at = None;
        }
        if let Some(hash) = &update.tx_hash {
            self.layer2_hash = Some(hash.clone());
        }
        if let Some(ts) = update.submitted_at {
            self.submitted_at = Some(ts);
        }
    }
}

/// 源链区块，携带需要同步到目标链 gas oracle 的 base fee
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct L1Block {
    pub number: u64,
    pub hash: String,
    #[serde(default)]
    pub base_fee: u64,
    #[serde(default)]
    pub oracle_tx_hash: Option<String>,
    #[serde(default)]
    pub submitted_at: Option<u64>,
    #[serde(default)]
    pub gas_oracle_status: GasOracleStatus,
}

impl L1Block {
    pub fn new(number: u64, hash: impl Into<String>) -> Self {
        Self {
            number,
            hash: hash.into(),
            ..Default::default()
        }
    }
}

impl Record for L1Block {
    type Status = GasOracleStatus;

    fn correlation_id(&self) -> &str {
        &self.hash
    }

    fn sequence(&self) -> u64 {
        self.number
    }

    fn status(&self) -> GasOracleStatus {
        self.gas_oracle_status
    }

    fn tx_hash(&self) -> Option<&str> {
        self.oracle_tx_hash.as_deref()
    }

    fn submitted_at(&self) -> Option<u64> {
        self.submitted_at
    }

    fn apply(&mut self, status: GasOracleStatus, update: &StatusUpdate) {
        self.gas_oracle_status = status;
        if update.clear_tx {
            self.oracle_tx_hash = None;
            self.submitted_at = None;
        }
        if let Some(hash) = &update.tx_hash {
            self.oracle_tx_hash = Some(hash.clone());
        }
        if let Some(ts) = update.submitted_at {
            self.submitted_at = Some(ts);
        }
    }
}

/// 交易在目标链上的最终结果通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub id: CorrelationId,
    pub is_successful: bool,
    /// 由链上监控产生时携带的目标链交易哈希
    pub tx_hash: Option<String>,
}

impl Confirmation {
    pub fn new(id: impl Into<CorrelationId>, is_successful: bool) -> Self {
        Self {
            id: id.into(),
            is_successful,
            tx_hash: None,
        }
    }
}

/// 发往目标链的交易内容，由编排器构造、发送器签名广播
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxPayload {
    pub to: String,
    /// 0x 前缀的十六进制数量
    pub value: String,
    pub gas_limit: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: String,
    pub to: String,
    pub value: String,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub nonce: u64,
    pub data: Vec<u8>,
}

impl TransactionRequest {
    pub fn new(from: &str, payload: &TxPayload, nonce: u64, gas_price: u64) -> Self {
        Self {
            from: from.to_string(),
            to: payload.to.clone(),
            value: payload.value.clone(),
            gas_limit: payload.gas_limit,
            gas_price,
            nonce,
            data: payload.data.clone(),
        }
    }
}

/// 节点记录的交易信息，用于接管重启前发出的交易
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInfo {
    pub nonce: u64,
    pub gas_price: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub success: bool,
}
