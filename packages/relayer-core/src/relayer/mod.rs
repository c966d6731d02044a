use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use log::{debug, error, info, warn};

use crate::{
    config::RelayerConfig,
    sender::Sender,
    shutdown::Shutdown,
    store::RecordStore,
    types::{Confirmation, Record, RecordStatus, StatusUpdate, TxPayload},
    Error, Result,
};

mod contracts;
pub mod gas_oracle;
pub mod message;

pub use gas_oracle::GasOracleRelay;
pub use message::MessageRelay;

/// 一类可中继记录：决定记录类型、交易内容以及是否必须按序提交
pub trait RelayKind: Send + Sync + 'static {
    type Record: Record;

    /// 为 true 时一条记录提交失败即停止本批次，避免后面的序号先上链
    const ORDERED: bool;

    fn name(&self) -> &'static str;

    fn build_payload(&self, record: &Self::Record) -> Result<TxPayload>;
}

/// 处理一条确认的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Applied,
    /// 没有对应记录
    Unknown,
    /// 记录状态已不满足前置条件（重复投递等）
    Stale,
}

type StatusOf<K> = <<K as RelayKind>::Record as Record>::Status;

pub type MessageRelayer = Relayer<MessageRelay>;
pub type GasOracleRelayer = Relayer<GasOracleRelay>;

/// 中继编排器：提交待中继记录，并消费发送器的确认推进记录状态
pub struct Relayer<K: RelayKind> {
    kind: K,
    config: RelayerConfig,
    store: Arc<dyn RecordStore<K::Record>>,
    sender: Arc<Sender>,
    confirmations: Mutex<Option<mpsc::Receiver<Confirmation>>>,
}

impl<K: RelayKind> Relayer<K> {
    pub async fn new(
        kind: K,
        config: RelayerConfig,
        store: Arc<dyn RecordStore<K::Record>>,
        sender: Arc<Sender>,
    ) -> Result<Self> {
        let confirmations = sender.take_confirmations().await.ok_or_else(|| {
            Error::Config(format!(
                "Confirmations of sender {} are already consumed",
                sender.name()
            ))
        })?;

        Ok(Self {
            kind,
            config,
            store,
            sender,
            confirmations: Mutex::new(Some(confirmations)),
        })
    }

    pub fn sender(&self) -> &Arc<Sender> {
        &self.sender
    }

    /// 提交所有待中继记录（按序号升序），返回成功标记为已提交的数量
    pub async fn process_saved_events(&self) -> Result<usize> {
        self.submit_pending(None).await
    }

    async fn submit_pending(&self, mut shutdown: Option<&mut Shutdown>) -> Result<usize> {
        let records = self.store.get_pending(self.config.batch_size).await?;
        if records.is_empty() {
            return Ok(0);
        }
        debug!("[{}] {} pending records", self.kind.name(), records.len());

        let mut submitted = 0;
        for record in records {
            // 只在记录之间响应关闭，单条记录要么完整提交要么保持待处理
            if let Some(shutdown) = shutdown.as_deref_mut() {
                if shutdown.is_shutdown() {
                    info!("[{}] shutdown requested, stop submitting", self.kind.name());
                    break;
                }
            }

            let id = record.correlation_id();
            let payload = match self.kind.build_payload(&record) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(
                        "[{}] cannot build payload for {} (seq {}): {}",
                        self.kind.name(),
                        id,
                        record.sequence(),
                        e
                    );
                    if K::ORDERED {
                        break;
                    }
                    continue;
                }
            };

            let tx_hash = match self.sender.submit(id, payload).await {
                Ok(tx_hash) => tx_hash,
                Err(Error::DuplicateSubmission(_)) => {
                    // 上次广播成功但写库失败，发送器仍在跟踪这笔交易
                    match self.sender.pending_tx_hash(id).await {
                        Some(tx_hash) => {
                            warn!(
                                "[{}] {} already in flight as {}, recording it",
                                self.kind.name(),
                                id,
                                tx_hash
                            );
                            tx_hash
                        }
                        None => {
                            debug!("[{}] {} is being broadcast, skip", self.kind.name(), id);
                            if K::ORDERED {
                                break;
                            }
                            continue;
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "[{}] failed to submit {} (seq {}): {}",
                        self.kind.name(),
                        id,
                        record.sequence(),
                        e
                    );
                    if K::ORDERED {
                        break;
                    }
                    continue;
                }
            };

            let update = StatusUpdate::submitted(tx_hash.clone(), unix_now()?);
            let applied = self
                .write_status(
                    id,
                    <StatusOf<K> as RecordStatus>::PENDING,
                    <StatusOf<K> as RecordStatus>::SUBMITTED,
                    update,
                )
                .await?;
            if applied {
                info!(
                    "[{}] {} (seq {}) submitted in tx {}",
                    self.kind.name(),
                    id,
                    record.sequence(),
                    tx_hash
                );
                submitted += 1;
            } else {
                warn!(
                    "[{}] {} left pending before its submission was recorded",
                    self.kind.name(),
                    id
                );
            }
        }

        Ok(submitted)
    }

    /// 处理一条确认。只从已提交状态推进到终态，重复或过期的确认不产生任何写入
    pub async fn handle_confirmation(&self, confirmation: &Confirmation) -> Result<ConfirmOutcome> {
        let id = confirmation.id.as_str();
        let Some(record) = self.store.get_by_correlation_id(id).await? else {
            warn!("[{}] confirmation for unknown id {}, dropped", self.kind.name(), id);
            return Ok(ConfirmOutcome::Unknown);
        };

        let new_status = if confirmation.is_successful {
            <StatusOf<K> as RecordStatus>::SUCCEEDED
        } else {
            <StatusOf<K> as RecordStatus>::FAILED
        };
        let update = StatusUpdate::with_tx_hash(confirmation.tx_hash.clone());

        if self
            .write_status(
                id,
                <StatusOf<K> as RecordStatus>::SUBMITTED,
                new_status,
                update.clone(),
            )
            .await?
        {
            info!("[{}] {} -> {}", self.kind.name(), id, new_status);
            return Ok(ConfirmOutcome::Applied);
        }

        // 链上监控的确认先于提交记录写入到达
        if confirmation.tx_hash.is_some()
            && self
                .write_status(
                    id,
                    <StatusOf<K> as RecordStatus>::PENDING,
                    new_status,
                    update,
                )
                .await?
        {
            warn!(
                "[{}] {} -> {} before its submission was recorded",
                self.kind.name(),
                id,
                new_status
            );
            return Ok(ConfirmOutcome::Applied);
        }

        warn!(
            "[{}] ignoring confirmation for {} in status {}",
            self.kind.name(),
            id,
            record.status()
        );
        Ok(ConfirmOutcome::Stale)
    }

    /// 找出超时且无人跟踪的已提交记录（通常是进程重启留下的），恢复跟踪或判定失败
    pub async fn reconcile_stale(&self) -> Result<usize> {
        let now = unix_now()?;
        let submitted = self
            .store
            .get_by_status(
                <StatusOf<K> as RecordStatus>::SUBMITTED,
                usize::MAX,
            )
            .await?;

        let mut recovered = 0;
        for record in submitted {
            let id = record.correlation_id();
            let age = now.saturating_sub(record.submitted_at().unwrap_or(0));
            if age < self.config.confirmation_timeout_secs || self.sender.is_pending(id).await {
                continue;
            }

            match record.tx_hash() {
                Some(tx_hash) => match self.sender.resume(id, tx_hash).await {
                    Ok(()) => {
                        warn!(
                            "[{}] {} orphaned for {}s, resumed tracking {}",
                            self.kind.name(),
                            id,
                            age,
                            tx_hash
                        );
                        recovered += 1;
                    }
                    Err(Error::DuplicateSubmission(_)) => {}
                    Err(e) => warn!("[{}] failed to resume {}: {}", self.kind.name(), id, e),
                },
                None => {
                    error!(
                        "[{}] {} submitted without tx hash, marking failed",
                        self.kind.name(),
                        id
                    );
                    if self
                        .write_status(
                            id,
                            <StatusOf<K> as RecordStatus>::SUBMITTED,
                            <StatusOf<K> as RecordStatus>::FAILED,
                            StatusUpdate::default(),
                        )
                        .await?
                    {
                        recovered += 1;
                    }
                }
            }
        }
        Ok(recovered)
    }

    /// 运维操作：把失败的记录重新放回待中继队列
    pub async fn requeue(&self, id: &str) -> Result<bool> {
        let applied = self
            .write_status(
                id,
                <StatusOf<K> as RecordStatus>::FAILED,
                <StatusOf<K> as RecordStatus>::PENDING,
                StatusUpdate::cleared(),
            )
            .await?;
        if applied {
            info!("[{}] {} requeued", self.kind.name(), id);
        } else {
            warn!("[{}] {} is not in a failed state, not requeued", self.kind.name(), id);
        }
        Ok(applied)
    }

    /// 带重试的条件写入，采用线性增长的重试延迟
    async fn write_status(
        &self,
        id: &str,
        expected: StatusOf<K>,
        new: StatusOf<K>,
        update: StatusUpdate,
    ) -> Result<bool> {
        let mut retry_count = 0;
        loop {
            match self
                .store
                .update_status(id, expected, new, update.clone())
                .await
            {
                Ok(applied) => return Ok(applied),
                Err(e) => {
                    retry_count += 1;
                    if retry_count >= self.config.max_retries {
                        error!(
                            "[{}] max retries ({}) reached writing {} -> {} for {}: {}",
                            self.kind.name(),
                            self.config.max_retries,
                            expected,
                            new,
                            id,
                            e
                        );
                        return Err(e);
                    }
                    let delay = self.config.retry_delay() * retry_count;
                    warn!(
                        "[{}] retry {}/{} writing status of {} after {:?}: {}",
                        self.kind.name(),
                        retry_count,
                        self.config.max_retries,
                        id,
                        delay,
                        e
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// 并发运行提交循环和确认循环，直到收到关闭信号
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) -> Result<()> {
        let receiver = self.confirmations.lock().await.take().ok_or_else(|| {
            Error::Config(format!("Relayer {} is already running", self.kind.name()))
        })?;
        info!("[{}] relayer started", self.kind.name());

        let submit = tokio::spawn(self.clone().submission_loop(shutdown.clone()));
        let confirm = tokio::spawn(self.clone().confirmation_loop(receiver, shutdown));
        let (submit, confirm) = tokio::join!(submit, confirm);
        for result in [submit, confirm] {
            if let Err(e) = result {
                error!("[{}] relayer task failed: {}", self.kind.name(), e);
            }
        }

        info!("[{}] relayer stopped", self.kind.name());
        Ok(())
    }

    async fn submission_loop(self: Arc<Self>, mut shutdown: Shutdown) {
        loop {
            if let Err(e) = self.submit_pending(Some(&mut shutdown)).await {
                warn!("[{}] failed to process saved events: {}", self.kind.name(), e);
            }
            if let Err(e) = self.reconcile_stale().await {
                warn!("[{}] failed to reconcile stale records: {}", self.kind.name(), e);
            }

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = sleep(self.config.poll_interval()) => {}
            }
        }
    }

    async fn confirmation_loop(
        self: Arc<Self>,
        mut receiver: mpsc::Receiver<Confirmation>,
        mut shutdown: Shutdown,
    ) {
        loop {
            let confirmation = tokio::select! {
                _ = shutdown.recv() => break,
                maybe = receiver.recv() => match maybe {
                    Some(confirmation) => confirmation,
                    None => {
                        warn!("[{}] confirmation channel closed", self.kind.name());
                        break;
                    }
                },
            };

            // 存储不可用时持续重试，确认不能丢
            while let Err(e) = self.handle_confirmation(&confirmation).await {
                error!(
                    "[{}] failed to handle confirmation for {}: {}",
                    self.kind.name(),
                    confirmation.id,
                    e
                );
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = sleep(self.config.poll_interval()) => {}
                }
            }
        }
    }
}

fn unix_now() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| Error::Chain(format!("Failed to get current time: {}", e)))
}
