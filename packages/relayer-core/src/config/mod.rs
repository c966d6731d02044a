use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use crate::Error;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChainConfig {
    pub id: String,
    pub name: String,
    pub rpc_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_rpc_retry_delay_ms")]
    pub rpc_retry_delay_ms: u64,
}

impl ChainConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn rpc_retry_delay(&self) -> Duration {
        Duration::from_millis(self.rpc_retry_delay_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ContractConfig {
    pub messenger_address: String,
    pub gas_price_oracle_address: String,
    #[serde(default = "default_oracle_gas_limit")]
    pub oracle_gas_limit: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GasPolicyKind {
    Fixed,
    #[default]
    Escalating,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GasConfig {
    #[serde(default)]
    pub policy: GasPolicyKind,
    /// 固定策略的 gas price，也是递增策略的下限（wei）
    #[serde(default = "default_gas_price")]
    pub gas_price: u64,
    #[serde(default = "default_escalate_percent")]
    pub escalate_percent: u64,
    #[serde(default = "default_max_gas_price")]
    pub max_gas_price: u64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            policy: GasPolicyKind::default(),
            gas_price: default_gas_price(),
            escalate_percent: default_escalate_percent(),
            max_gas_price: default_max_gas_price(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SenderConfig {
    /// 节点托管的签名账户
    pub from: String,
    /// 确认深度。回执所在区块算第 1 个确认，头部区块高度为 `block + n - 1` 时达到 n
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// 交易多少个区块未上链后替换重发
    #[serde(default = "default_escalate_blocks")]
    pub escalate_blocks: u64,
    #[serde(default = "default_max_resubmits")]
    pub max_resubmits: u32,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub gas: GasConfig,
}

impl SenderConfig {
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            confirmations: default_confirmations(),
            check_interval_ms: default_check_interval_ms(),
            escalate_blocks: default_escalate_blocks(),
            max_resubmits: default_max_resubmits(),
            channel_capacity: default_channel_capacity(),
            gas: GasConfig::default(),
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelayerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// 超过该时长仍处于已提交状态且无人跟踪的记录视为孤儿
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            batch_size: default_batch_size(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
        }
    }
}

impl RelayerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub chain: ChainConfig,
    pub contracts: ContractConfig,
    pub message_sender: SenderConfig,
    pub gas_oracle_sender: SenderConfig,
    #[serde(default)]
    pub relayer: RelayerConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self, Error> {
        let path = config_path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let is_toml = path.extension().map_or(false, |ext| ext == "toml");
        let config = if is_toml {
            Self::from_toml_str(&config_str)?
        } else {
            Self::from_json_str(&config_str)?
        };

        config.validate()?;

        Ok(config)
    }

    pub fn from_json_str(s: &str) -> Result<Self, Error> {
        serde_json::from_str(s)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        toml::from_str(s)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.chain.rpc_url.trim().is_empty() {
            return Err(Error::Config("Chain rpc_url must not be empty".to_string()));
        }
        if self.chain.request_timeout_ms == 0 {
            return Err(Error::Config("Request timeout must be greater than 0".to_string()));
        }

        validate_address("contracts.messenger_address", &self.contracts.messenger_address)?;
        validate_address(
            "contracts.gas_price_oracle_address",
            &self.contracts.gas_price_oracle_address,
        )?;
        if self.contracts.oracle_gas_limit == 0 {
            return Err(Error::Config("Oracle gas limit must be greater than 0".to_string()));
        }

        for (name, sender) in [
            ("message_sender", &self.message_sender),
            ("gas_oracle_sender", &self.gas_oracle_sender),
        ] {
            validate_sender(name, sender)?;
        }

        // 中继器配置
        if self.relayer.poll_interval_ms == 0 {
            return Err(Error::Config("Relayer poll interval must be greater than 0".to_string()));
        }
        if self.relayer.max_retries == 0 {
            return Err(Error::Config("Relayer max retries must be greater than 0".to_string()));
        }
        if self.relayer.batch_size == 0 {
            return Err(Error::Config("Relayer batch size must be greater than 0".to_string()));
        }

        Ok(())
    }
}

fn validate_sender(name: &str, sender: &SenderConfig) -> Result<(), Error> {
    validate_address(&format!("{}.from", name), &sender.from)?;
    if sender.check_interval_ms == 0 {
        return Err(Error::Config(format!("{}: check interval must be greater than 0", name)));
    }
    if sender.escalate_blocks == 0 {
        return Err(Error::Config(format!("{}: escalate blocks must be greater than 0", name)));
    }
    if sender.channel_capacity == 0 {
        return Err(Error::Config(format!("{}: channel capacity must be greater than 0", name)));
    }
    if sender.gas.max_gas_price < sender.gas.gas_price {
        return Err(Error::Config(format!(
            "{}: max gas price {} is below gas price {}",
            name, sender.gas.max_gas_price, sender.gas.gas_price
        )));
    }
    Ok(())
}

pub(crate) fn validate_address(field: &str, address: &str) -> Result<(), Error> {
    let raw = address
        .strip_prefix("0x")
        .ok_or_else(|| Error::Config(format!("{}: address must be 0x-prefixed: {}", field, address)))?;
    let bytes = hex::decode(raw)
        .map_err(|e| Error::Config(format!("{}: invalid address {}: {}", field, address, e)))?;
    if bytes.len() != 20 {
        return Err(Error::Config(format!("{}: address must be 20 bytes: {}", field, address)));
    }
    Ok(())
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_rpc_retry_delay_ms() -> u64 {
    500
}

fn default_oracle_gas_limit() -> u64 {
    100_000
}

fn default_gas_price() -> u64 {
    1_000_000_000
}

fn default_escalate_percent() -> u64 {
    25
}

fn default_max_gas_price() -> u64 {
    500_000_000_000
}

fn default_confirmations() -> u64 {
    6
}

fn default_check_interval_ms() -> u64 {
    3_000
}

fn default_escalate_blocks() -> u64 {
    10
}

fn default_max_resubmits() -> u32 {
    3
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_batch_size() -> usize {
    100
}

fn default_confirmation_timeout_secs() -> u64 {
    600
}
