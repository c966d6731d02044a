pub mod config;
pub mod types;
pub mod store;
pub mod chain_adapter;
pub mod sender;
pub mod relayer;
pub mod shutdown;

pub use config::Config;
pub use types::{
    Confirmation, GasOracleStatus, L1Block, L1Message, MessageStatus, Record, RecordStatus,
    TxPayload,
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid payload: {0}")]
    Payload(String),

    #[error("Correlation id already in flight: {0}")]
    DuplicateSubmission(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

impl Error {
    /// 瞬时错误：结果不确定，重试即可，不应改变记录状态。
    /// 广播遇到这类错误时交易可能已被节点收到
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Store(_))
    }
}
