use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    chain_adapter::ChainClient,
    config::{GasConfig, GasPolicyKind},
    Result,
};

/// 节点接受替换交易所需的最小涨幅（百分比）
pub const MIN_REPLACEMENT_BUMP_PERCENT: u64 = 10;

/// 可插拔的 gas 定价策略
#[async_trait]
pub trait GasPolicy: Send + Sync {
    /// 首次发送时的 gas price
    async fn initial_price(&self, client: &dyn ChainClient) -> Result<u64>;

    /// 卡住的交易替换重发时的 gas price。
    /// 无法达到节点接受替换的最小涨幅时返回 `None`，此时不应发送替换交易
    fn escalate(&self, previous: u64) -> Option<u64>;
}

pub fn from_config(config: &GasConfig) -> Arc<dyn GasPolicy> {
    match config.policy {
        GasPolicyKind::Fixed => Arc::new(FixedGasPolicy::new(config.gas_price)),
        GasPolicyKind::Escalating => Arc::new(EscalatingGasPolicy::new(
            config.gas_price,
            config.escalate_percent,
            config.max_gas_price,
        )),
    }
}

fn bump(price: u64, percent: u64) -> u64 {
    let increase = (price.saturating_mul(percent) / 100).max(1);
    price.saturating_add(increase)
}

/// 候选价格必须严格高于原价且满足最小涨幅
fn replacement(previous: u64, candidate: u64) -> Option<u64> {
    (candidate > previous && candidate >= bump(previous, MIN_REPLACEMENT_BUMP_PERCENT))
        .then_some(candidate)
}

/// 固定价格；替换时仅按节点最小涨幅上调
#[derive(Debug, Clone)]
pub struct FixedGasPolicy {
    gas_price: u64,
}

impl FixedGasPolicy {
    pub fn new(gas_price: u64) -> Self {
        Self { gas_price }
    }
}

#[async_trait]
impl GasPolicy for FixedGasPolicy {
    async fn initial_price(&self, _client: &dyn ChainClient) -> Result<u64> {
        Ok(self.gas_price)
    }

    fn escalate(&self, previous: u64) -> Option<u64> {
        replacement(previous, bump(previous, MIN_REPLACEMENT_BUMP_PERCENT))
    }
}

/// 以节点报价为准（不低于下限），替换时按百分比递增，封顶 `max_price`
#[derive(Debug, Clone)]
pub struct EscalatingGasPolicy {
    min_price: u64,
    percent: u64,
    max_price: u64,
}

impl EscalatingGasPolicy {
    pub fn new(min_price: u64, percent: u64, max_price: u64) -> Self {
        Self {
            min_price,
            percent: percent.max(MIN_REPLACEMENT_BUMP_PERCENT),
            max_price,
        }
    }
}

#[async_trait]
impl GasPolicy for EscalatingGasPolicy {
    async fn initial_price(&self, client: &dyn ChainClient) -> Result<u64> {
        let suggested = client.gas_price().await?;
        Ok(suggested.max(self.min_price).min(self.max_price))
    }

    fn escalate(&self, previous: u64) -> Option<u64> {
        replacement(previous, bump(previous, self.percent).min(self.max_price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_adapter::MockChainClient;

    #[tokio::test]
    async fn test_fixed_policy() {
        let client = MockChainClient::new();
        let policy = FixedGasPolicy::new(100);
        assert_eq!(policy.initial_price(&client).await.unwrap(), 100);
        assert_eq!(policy.escalate(100), Some(110));
        // 极小价格也至少上调 1
        assert_eq!(policy.escalate(1), Some(2));
        assert_eq!(policy.escalate(u64::MAX), None);
    }

    #[tokio::test]
    async fn test_escalating_policy_bounds() {
        let mut client = MockChainClient::new();
        client.expect_gas_price().times(2).returning(|| Ok(50));
        let floor = EscalatingGasPolicy::new(80, 25, 1_000);
        assert_eq!(floor.initial_price(&client).await.unwrap(), 80);

        let capped = EscalatingGasPolicy::new(10, 25, 40);
        assert_eq!(capped.initial_price(&client).await.unwrap(), 40);

        assert_eq!(floor.escalate(100), Some(125));
        assert_eq!(floor.escalate(900), Some(1_000));
    }

    #[test]
    fn test_escalate_at_cap_refuses_replacement() {
        let policy = EscalatingGasPolicy::new(10, 25, 100);
        assert_eq!(policy.escalate(100), None);
        // 封顶后涨幅不足节点最小要求
        assert_eq!(policy.escalate(95), None);
        assert_eq!(policy.escalate(90), Some(100));
    }

    #[test]
    fn test_percent_not_below_replacement_minimum() {
        let policy = EscalatingGasPolicy::new(1, 1, u64::MAX);
        assert_eq!(policy.escalate(1_000), Some(1_100));
    }
}
