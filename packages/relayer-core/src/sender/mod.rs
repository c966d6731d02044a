use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use log::{debug, error, info, warn};

use crate::{
    chain_adapter::{self, ChainClient},
    config::{validate_address, SenderConfig},
    shutdown::Shutdown,
    types::{Confirmation, CorrelationId, TransactionRequest, TxInfo, TxPayload, TxReceipt},
    Error, Result,
};

pub mod gas;

pub use gas::{EscalatingGasPolicy, FixedGasPolicy, GasPolicy};

const CANCEL_GAS_LIMIT: u64 = 21_000;

/// 一笔在途交易。替换重发时沿用同一 nonce，所有历史哈希都保留用于查回执
#[derive(Debug, Clone)]
struct PendingTx {
    /// `None` 表示恢复跟踪的交易，nonce 需要先向节点查回
    nonce: Option<u64>,
    payload: Option<TxPayload>,
    /// 该 nonce 上最近一次发送的价格，替换和取消都必须高于它
    gas_price: u64,
    tx_hashes: Vec<String>,
    /// 占用同一 nonce 的取消交易
    cancel_hashes: Vec<String>,
    sent_at_block: u64,
    attempts: u32,
}

impl PendingTx {
    /// 已登记、尚未广播
    fn reserved() -> Self {
        Self {
            nonce: None,
            payload: None,
            gas_price: 0,
            tx_hashes: Vec::new(),
            cancel_hashes: Vec::new(),
            sent_at_block: 0,
            attempts: 0,
        }
    }

    fn is_broadcast(&self) -> bool {
        !self.tx_hashes.is_empty()
    }
}

/// 交易发送器：按关联标识登记在途交易，监控回执并通过有界通道投递确认
pub struct Sender {
    name: String,
    config: SenderConfig,
    client: Arc<dyn ChainClient>,
    gas_policy: Arc<dyn GasPolicy>,
    pending: Mutex<HashMap<CorrelationId, PendingTx>>,
    nonce: Mutex<Option<u64>>,
    confirm_tx: mpsc::Sender<Confirmation>,
    confirm_rx: Mutex<Option<mpsc::Receiver<Confirmation>>>,
}

impl Sender {
    pub fn new(
        name: impl Into<String>,
        config: SenderConfig,
        client: Arc<dyn ChainClient>,
        gas_policy: Arc<dyn GasPolicy>,
    ) -> Self {
        let (confirm_tx, confirm_rx) = mpsc::channel(config.channel_capacity.max(1));
        Self {
            name: name.into(),
            config,
            client,
            gas_policy,
            pending: Mutex::new(HashMap::new()),
            nonce: Mutex::new(None),
            confirm_tx,
            confirm_rx: Mutex::new(Some(confirm_rx)),
        }
    }

    /// 按配置选择 gas 策略
    pub fn from_config(
        name: impl Into<String>,
        config: SenderConfig,
        client: Arc<dyn ChainClient>,
    ) -> Self {
        let gas_policy = gas::from_config(&config.gas);
        Self::new(name, config, client, gas_policy)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 取走确认通道的接收端，只能取一次
    pub async fn take_confirmations(&self) -> Option<mpsc::Receiver<Confirmation>> {
        self.confirm_rx.lock().await.take()
    }

    /// 构造、签名并广播交易，登记 `id` 以便之后把确认对应回记录。
    /// 同一 `id` 仍在途时拒绝重复提交。
    ///
    /// 广播结果不明（网络超时等）时交易可能已进入交易池，此时返回已知的哈希并保留登记，
    /// 之后由回执检查和替换流程收敛；只有确定没有发出时才返回错误并释放登记。
    pub async fn submit(&self, id: &str, payload: TxPayload) -> Result<String> {
        validate_payload(&payload)?;

        {
            let mut pending = self.pending.lock().await;
            if pending.contains_key(id) {
                return Err(Error::DuplicateSubmission(id.to_string()));
            }
            pending.insert(id.to_string(), PendingTx::reserved());
        }

        match self.broadcast(id, payload).await {
            Ok(tx_hash) => Ok(tx_hash),
            Err(e) => {
                self.pending.lock().await.remove(id);
                Err(e)
            }
        }
    }

    async fn broadcast(&self, id: &str, payload: TxPayload) -> Result<String> {
        let block = self.client.block_number().await?;
        let gas_price = self.gas_policy.initial_price(self.client.as_ref()).await?;

        // 持锁直到广播结束，保证 nonce 按提交顺序分配
        let mut nonce_guard = self.nonce.lock().await;
        let nonce = match *nonce_guard {
            Some(nonce) => nonce,
            None => self.client.nonce(&self.config.from).await?,
        };

        let request = TransactionRequest::new(&self.config.from, &payload, nonce, gas_price);
        let (raw, tx_hash) = match self.sign(&request).await {
            Ok(signed) => signed,
            Err(e) => {
                *nonce_guard = None;
                return Err(e);
            }
        };

        // 广播前记下哈希，结果不明时仍能按哈希跟踪
        let tracked = PendingTx {
            nonce: Some(nonce),
            payload: Some(payload),
            gas_price,
            tx_hashes: vec![tx_hash.clone()],
            cancel_hashes: Vec::new(),
            sent_at_block: block,
            attempts: 0,
        };
        let registered = self.update_pending(id, |p| *p = tracked).await;
        if !registered {
            // 签名期间已被注入确认，不再跟踪
            debug!("[{}] {} resolved while broadcasting", self.name, id);
        }

        match self.send_signed(&raw, &tx_hash).await {
            Ok(()) => {
                *nonce_guard = Some(nonce + 1);
                info!(
                    "[{}] submitted {} as tx {} (nonce {}, gas price {})",
                    self.name, id, tx_hash, nonce, gas_price
                );
                Ok(tx_hash)
            }
            Err(e) => {
                // 下次发送前从节点重新同步
                *nonce_guard = None;
                Err(e)
            }
        }
    }

    /// 由节点签名并在本地计算交易哈希
    async fn sign(&self, request: &TransactionRequest) -> Result<(Vec<u8>, String)> {
        let raw = self.client.sign_transaction(request).await?;
        let tx_hash = chain_adapter::tx_hash(&raw);
        Ok((raw, tx_hash))
    }

    /// 广播已签名交易。暂时性错误无法判断节点是否收到，按已发出处理
    async fn send_signed(&self, raw: &[u8], tx_hash: &str) -> Result<()> {
        match self.client.send_raw_transaction(raw).await {
            Ok(returned) => {
                if !returned.eq_ignore_ascii_case(tx_hash) {
                    warn!(
                        "[{}] node returned tx hash {} for signed tx {}",
                        self.name, returned, tx_hash
                    );
                }
                Ok(())
            }
            Err(e) if e.is_transient() => {
                warn!(
                    "[{}] broadcast of tx {} is ambiguous ({}), tracking it by hash",
                    self.name, tx_hash, e
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// 重新跟踪一笔已广播的交易（进程重启后恢复孤儿记录）
    pub async fn resume(&self, id: &str, tx_hash: &str) -> Result<()> {
        let block = self.client.block_number().await?;
        let mut pending = self.pending.lock().await;
        if pending.contains_key(id) {
            return Err(Error::DuplicateSubmission(id.to_string()));
        }
        pending.insert(
            id.to_string(),
            PendingTx {
                tx_hashes: vec![tx_hash.to_string()],
                sent_at_block: block,
                ..PendingTx::reserved()
            },
        );
        info!("[{}] resumed tracking {} via tx {}", self.name, id, tx_hash);
        Ok(())
    }

    /// 直接投递确认，主要用于测试；同时撤销该标识的登记
    pub async fn send_confirmation(&self, confirmation: Confirmation) -> Result<()> {
        self.pending.lock().await.remove(&confirmation.id);
        self.confirm_tx
            .send(confirmation)
            .await
            .map_err(|_| Error::ChannelClosed(self.name.clone()))
    }

    pub async fn is_pending(&self, id: &str) -> bool {
        self.pending.lock().await.contains_key(id)
    }

    /// 在途交易最新一次广播的哈希
    pub async fn pending_tx_hash(&self, id: &str) -> Option<String> {
        self.pending
            .lock()
            .await
            .get(id)
            .and_then(|tx| tx.tx_hashes.last().cloned())
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// 检查一轮在途交易：达到确认深度的投递确认，长时间未上链的替换或取消
    pub async fn check_pending(&self) -> Result<()> {
        let snapshot: Vec<(CorrelationId, PendingTx)> = self
            .pending
            .lock()
            .await
            .iter()
            .filter(|(_, tx)| tx.is_broadcast())
            .map(|(id, tx)| (id.clone(), tx.clone()))
            .collect();
        if snapshot.is_empty() {
            return Ok(());
        }

        let head = self.client.block_number().await?;
        for (id, tx) in snapshot {
            match self.find_outcome(&tx).await {
                Ok(Some((receipt, success))) => {
                    // 回执所在区块本身算一个确认；节点高度落后于回执时不计
                    let depth = head
                        .checked_sub(receipt.block_number)
                        .map_or(0, |behind| behind + 1);
                    if depth >= self.config.confirmations {
                        self.confirm(&id, success, tx.tx_hashes.last().cloned()).await;
                    } else {
                        debug!(
                            "[{}] {} mined at {}, depth {}/{}",
                            self.name, id, receipt.block_number, depth, self.config.confirmations
                        );
                    }
                }
                Ok(None) => {
                    if head.saturating_sub(tx.sent_at_block) >= self.config.escalate_blocks {
                        self.handle_stuck(&id, tx, head).await;
                    }
                }
                Err(e) => warn!("[{}] failed to fetch receipt for {}: {}", self.name, id, e),
            }
        }
        Ok(())
    }

    /// 查找占用该 nonce 的已上链交易。取消交易上链说明原交易不会再执行，按失败处理
    async fn find_outcome(&self, tx: &PendingTx) -> Result<Option<(TxReceipt, bool)>> {
        if let Some(receipt) = self.find_receipt(&tx.tx_hashes).await? {
            let success = receipt.success;
            return Ok(Some((receipt, success)));
        }
        Ok(self
            .find_receipt(&tx.cancel_hashes)
            .await?
            .map(|receipt| (receipt, false)))
    }

    async fn find_receipt(&self, hashes: &[String]) -> Result<Option<TxReceipt>> {
        // 同一 nonce 上最多只有一笔上链
        for hash in hashes.iter().rev() {
            if let Some(receipt) = self.client.transaction_receipt(hash).await? {
                return Ok(Some(receipt));
            }
        }
        Ok(None)
    }

    /// 未上链的交易：先替换重发，次数用尽后用取消交易占掉 nonce。
    /// 只有取消交易上链后才确认失败，之前一直保留登记
    async fn handle_stuck(&self, id: &str, mut tx: PendingTx, head: u64) {
        let nonce = match tx.nonce {
            Some(nonce) => nonce,
            None => match self.recover_nonce(id, &tx, head).await {
                Some(info) => {
                    tx.gas_price = info.gas_price;
                    info.nonce
                }
                None => return,
            },
        };

        if tx.attempts < self.config.max_resubmits {
            match tx.payload.clone() {
                Some(payload) => self.replace(id, &tx, nonce, &payload, head).await,
                None => {
                    debug!("[{}] still waiting for resumed tx of {}", self.name, id);
                    self.update_pending(id, |p| {
                        p.attempts += 1;
                        p.sent_at_block = head;
                    })
                    .await;
                }
            }
            return;
        }

        self.cancel_nonce(id, &tx, nonce, head).await;
    }

    /// 恢复跟踪的交易向节点查回 nonce 和价格；节点不认识时继续等待
    async fn recover_nonce(&self, id: &str, tx: &PendingTx, head: u64) -> Option<TxInfo> {
        let hash = tx.tx_hashes.last()?;
        match self.client.transaction_by_hash(hash).await {
            Ok(Some(info)) => {
                debug!(
                    "[{}] resumed tx {} of {} has nonce {}",
                    self.name, hash, id, info.nonce
                );
                let adopted = info.clone();
                self.update_pending(id, |p| {
                    p.nonce = Some(adopted.nonce);
                    p.gas_price = adopted.gas_price;
                })
                .await;
                Some(info)
            }
            Ok(None) => {
                warn!(
                    "[{}] resumed tx {} of {} is unknown to the node, still waiting",
                    self.name, hash, id
                );
                self.update_pending(id, |p| p.sent_at_block = head).await;
                None
            }
            Err(e) => {
                warn!("[{}] failed to look up tx {} of {}: {}", self.name, hash, id, e);
                None
            }
        }
    }

    async fn replace(&self, id: &str, tx: &PendingTx, nonce: u64, payload: &TxPayload, head: u64) {
        let Some(gas_price) = self.gas_policy.escalate(tx.gas_price) else {
            error!(
                "[{}] cannot raise gas price {} of {} enough to replace it, waiting",
                self.name, tx.gas_price, id
            );
            self.update_pending(id, |p| {
                p.attempts += 1;
                p.sent_at_block = head;
            })
            .await;
            return;
        };

        let request = TransactionRequest::new(&self.config.from, payload, nonce, gas_price);
        match self.sign_and_send(&request).await {
            Ok(tx_hash) => {
                warn!(
                    "[{}] replaced stuck tx of {} with {} (nonce {}, gas price {} -> {})",
                    self.name, id, tx_hash, nonce, tx.gas_price, gas_price
                );
                self.update_pending(id, |p| {
                    p.tx_hashes.push(tx_hash);
                    p.gas_price = gas_price;
                    p.attempts += 1;
                    p.sent_at_block = head;
                })
                .await;
            }
            Err(e) => {
                warn!("[{}] failed to replace tx of {}: {}", self.name, id, e);
                self.update_pending(id, |p| {
                    p.attempts += 1;
                    p.sent_at_block = head;
                })
                .await;
            }
        }
    }

    /// 用一笔空转账占掉卡住的 nonce，避免后续交易被阻塞。
    /// 每个等待窗口至多发一笔，价格逐次上调
    async fn cancel_nonce(&self, id: &str, tx: &PendingTx, nonce: u64, head: u64) {
        let Some(gas_price) = self.gas_policy.escalate(tx.gas_price) else {
            error!(
                "[{}] cannot raise gas price {} to cancel nonce {} of {}, waiting",
                self.name, tx.gas_price, nonce, id
            );
            self.update_pending(id, |p| p.sent_at_block = head).await;
            return;
        };

        let payload = TxPayload {
            to: self.config.from.clone(),
            value: "0x0".to_string(),
            gas_limit: CANCEL_GAS_LIMIT,
            data: Vec::new(),
        };
        let request = TransactionRequest::new(&self.config.from, &payload, nonce, gas_price);
        match self.sign_and_send(&request).await {
            Ok(tx_hash) => {
                error!(
                    "[{}] {} not mined after {} resubmits, cancelling nonce {} with tx {}",
                    self.name, id, tx.attempts, nonce, tx_hash
                );
                self.update_pending(id, |p| {
                    p.cancel_hashes.push(tx_hash);
                    p.gas_price = gas_price;
                    p.sent_at_block = head;
                })
                .await;
            }
            Err(e) => {
                warn!("[{}] failed to cancel nonce {} of {}: {}", self.name, nonce, id, e);
                self.update_pending(id, |p| p.sent_at_block = head).await;
            }
        }
    }

    async fn sign_and_send(&self, request: &TransactionRequest) -> Result<String> {
        let (raw, tx_hash) = self.sign(request).await?;
        self.send_signed(&raw, &tx_hash).await?;
        Ok(tx_hash)
    }

    /// 登记仍存在时修改，返回是否找到登记
    async fn update_pending<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut PendingTx),
    {
        match self.pending.lock().await.get_mut(id) {
            Some(tx) => {
                f(tx);
                true
            }
            None => false,
        }
    }

    /// 每个登记只投递一次：先移除登记，移除成功才投递
    async fn confirm(&self, id: &str, success: bool, tx_hash: Option<String>) {
        if self.pending.lock().await.remove(id).is_none() {
            return;
        }
        let confirmation = Confirmation {
            id: id.to_string(),
            is_successful: success,
            tx_hash,
        };
        if self.confirm_tx.send(confirmation).await.is_err() {
            error!("[{}] confirmation receiver dropped, lost confirmation for {}", self.name, id);
        }
    }

    /// 周期性检查在途交易，直到收到关闭信号
    pub async fn run(self: Arc<Self>, mut shutdown: Shutdown) {
        info!("[{}] sender started", self.name);
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = sleep(self.config.check_interval()) => {
                    if let Err(e) = self.check_pending().await {
                        warn!("[{}] failed to check pending txs: {}", self.name, e);
                    }
                }
            }
        }
        info!("[{}] sender stopped", self.name);
    }
}

fn validate_payload(payload: &TxPayload) -> Result<()> {
    validate_address("to", &payload.to).map_err(|e| Error::Payload(e.to_string()))?;
    let digits = payload
        .value
        .strip_prefix("0x")
        .ok_or_else(|| Error::Payload(format!("value must be 0x-prefixed: {}", payload.value)))?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::Payload(format!("invalid value: {}", payload.value)));
    }
    if payload.gas_limit == 0 {
        return Err(Error::Payload("gas limit must be greater than 0".to_string()));
    }
    Ok(())
}
