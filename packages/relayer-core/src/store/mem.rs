use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::RecordStore;
use crate::{
    types::{L1Block, L1Message, Record, StatusUpdate},
    Error, Result,
};

/// 单类记录的内存表：按序号排序，另建关联标识索引
#[derive(Debug)]
struct Table<R> {
    rows: BTreeMap<u64, R>,
    by_id: HashMap<String, u64>,
}

impl<R> Default for Table<R> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            by_id: HashMap::new(),
        }
    }
}

impl<R: Record> Table<R> {
    fn insert(&mut self, records: Vec<R>) -> Result<()> {
        // 先整体校验再写入，保证批量插入要么全部成功要么不生效
        let mut seen_ids = HashMap::new();
        for record in &records {
            let id = record.correlation_id();
            if self.by_id.contains_key(id) || seen_ids.insert(id.to_string(), ()).is_some() {
                return Err(Error::Store(format!("duplicate correlation id: {}", id)));
            }
            if self.rows.contains_key(&record.sequence())
                || records
                    .iter()
                    .filter(|r| r.sequence() == record.sequence())
                    .count()
                    > 1
            {
                return Err(Error::Store(format!("duplicate sequence: {}", record.sequence())));
            }
        }

        for record in records {
            self.by_id
                .insert(record.correlation_id().to_string(), record.sequence());
            self.rows.insert(record.sequence(), record);
        }
        Ok(())
    }

    fn by_status(&self, status: R::Status, limit: usize) -> Vec<R> {
        self.rows
            .values()
            .filter(|r| r.status() == status)
            .take(limit)
            .cloned()
            .collect()
    }

    fn get(&self, id: &str) -> Option<R> {
        self.by_id
            .get(id)
            .and_then(|seq| self.rows.get(seq))
            .cloned()
    }

    fn compare_and_set(
        &mut self,
        id: &str,
        expected: R::Status,
        new: R::Status,
        update: &StatusUpdate,
    ) -> bool {
        let Some(seq) = self.by_id.get(id) else {
            return false;
        };
        match self.rows.get_mut(seq) {
            Some(record) if record.status() == expected => {
                record.apply(new, update);
                true
            }
            _ => false,
        }
    }
}

/// 内存记录存储，消息和区块各占一张表，互不影响
#[derive(Clone, Default)]
pub struct InMemoryStore {
    messages: Arc<RwLock<Table<L1Message>>>,
    blocks: Arc<RwLock<Table<L1Block>>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore<L1Message> for InMemoryStore {
    async fn insert(&self, records: Vec<L1Message>) -> Result<()> {
        self.messages.write().await.insert(records)
    }

    async fn get_by_status(
        &self,
        status: <L1Message as Record>::Status,
        limit: usize,
    ) -> Result<Vec<L1Message>> {
        Ok(self.messages.read().await.by_status(status, limit))
    }

    async fn get_by_correlation_id(&self, id: &str) -> Result<Option<L1Message>> {
        Ok(self.messages.read().await.get(id))
    }

    async fn update_status(
        &self,
        id: &str,
        expected: <L1Message as Record>::Status,
        new: <L1Message as Record>::Status,
        update: StatusUpdate,
    ) -> Result<bool> {
        Ok(self
            .messages
            .write()
            .await
            .compare_and_set(id, expected, new, &update))
    }
}

#[async_trait]
impl RecordStore<L1Block> for InMemoryStore {
    async fn insert(&self, records: Vec<L1Block>) -> Result<()> {
        self.blocks.write().await.insert(records)
    }

    async fn get_by_status(
        &self,
        status: <L1Block as Record>::Status,
        limit: usize,
    ) -> Result<Vec<L1Block>> {
        Ok(self.blocks.read().await.by_status(status, limit))
    }

    async fn get_by_correlation_id(&self, id: &str) -> Result<Option<L1Block>> {
        Ok(self.blocks.read().await.get(id))
    }

    async fn update_status(
        &self,
        id: &str,
        expected: <L1Block as Record>::Status,
        new: <L1Block as Record>::Status,
        update: StatusUpdate,
    ) -> Result<bool> {
        Ok(self
            .blocks
            .write()
            .await
            .compare_and_set(id, expected, new, &update))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GasOracleStatus, MessageStatus};

    fn messages(store: &InMemoryStore) -> &dyn RecordStore<L1Message> {
        store
    }

    fn blocks(store: &InMemoryStore) -> &dyn RecordStore<L1Block> {
        store
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicates() {
        let store = InMemoryStore::new();
        messages(&store)
            .insert(vec![L1Message::new(1, "msg_hash1"), L1Message::new(2, "msg_hash2")])
            .await
            .unwrap();

        let dup_hash = messages(&store).insert(vec![L1Message::new(3, "msg_hash1")]).await;
        assert!(matches!(dup_hash, Err(Error::Store(_))));

        let dup_index = messages(&store).insert(vec![L1Message::new(2, "msg_hash3")]).await;
        assert!(dup_index.is_err());

        // 批内重复同样拒绝，且不写入任何一条
        let dup_in_batch = messages(&store)
            .insert(vec![L1Message::new(5, "msg_hash5"), L1Message::new(5, "msg_hash6")])
            .await;
        assert!(dup_in_batch.is_err());
        assert!(messages(&store)
            .get_by_correlation_id("msg_hash5")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_pending_ordered_by_queue_index() {
        let store = InMemoryStore::new();
        messages(&store)
            .insert(vec![
                L1Message::new(3, "c"),
                L1Message::new(1, "a"),
                L1Message::new(2, "b"),
            ])
            .await
            .unwrap();

        let pending = messages(&store).get_pending(10).await.unwrap();
        let order: Vec<u64> = pending.iter().map(|m| m.queue_index).collect();
        assert_eq!(order, vec![1, 2, 3]);

        let limited = messages(&store).get_pending(2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        let store = InMemoryStore::new();
        messages(&store).insert(vec![L1Message::new(1, "msg-1")]).await.unwrap();

        let applied = messages(&store)
            .update_status(
                "msg-1",
                MessageStatus::Pending,
                MessageStatus::Submitted,
                StatusUpdate::submitted("0xabc".to_string(), 42),
            )
            .await
            .unwrap();
        assert!(applied);

        // 期望状态不匹配时不写入
        let applied = messages(&store)
            .update_status(
                "msg-1",
                MessageStatus::Pending,
                MessageStatus::Confirmed,
                StatusUpdate::default(),
            )
            .await
            .unwrap();
        assert!(!applied);

        let msg = messages(&store).get_by_correlation_id("msg-1").await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Submitted);
        assert_eq!(msg.layer2_hash.as_deref(), Some("0xabc"));
        assert_eq!(msg.submitted_at, Some(42));

        let unknown = messages(&store)
            .update_status(
                "msg-unknown",
                MessageStatus::Pending,
                MessageStatus::Submitted,
                StatusUpdate::default(),
            )
            .await
            .unwrap();
        assert!(!unknown);
    }

    #[tokio::test]
    async fn test_tables_are_isolated() {
        let store = InMemoryStore::new();
        messages(&store).insert(vec![L1Message::new(0, "shared-hash")]).await.unwrap();
        // 区块表可使用相同哈希，不与消息表冲突
        blocks(&store).insert(vec![L1Block::new(0, "shared-hash")]).await.unwrap();

        let applied = blocks(&store)
            .update_status(
                "shared-hash",
                GasOracleStatus::Pending,
                GasOracleStatus::Importing,
                StatusUpdate::default(),
            )
            .await
            .unwrap();
        assert!(applied);

        let msg = messages(&store).get_by_correlation_id("shared-hash").await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Pending);
        let block = blocks(&store).get_by_correlation_id("shared-hash").await.unwrap().unwrap();
        assert_eq!(block.gas_oracle_status, GasOracleStatus::Importing);
    }

    #[tokio::test]
    async fn test_cleared_update_resets_tx_fields() {
        let store = InMemoryStore::new();
        blocks(&store).insert(vec![L1Block::new(7, "gas-oracle-7")]).await.unwrap();
        blocks(&store)
            .update_status(
                "gas-oracle-7",
                GasOracleStatus::Pending,
                GasOracleStatus::Failed,
                StatusUpdate::submitted("0xdead".to_string(), 1),
            )
            .await
            .unwrap();
        blocks(&store)
            .update_status(
                "gas-oracle-7",
                GasOracleStatus::Failed,
                GasOracleStatus::Pending,
                StatusUpdate::cleared(),
            )
            .await
            .unwrap();

        let block = blocks(&store).get_by_correlation_id("gas-oracle-7").await.unwrap().unwrap();
        assert_eq!(block.gas_oracle_status, GasOracleStatus::Pending);
        assert_eq!(block.oracle_tx_hash, None);
        assert_eq!(block.submitted_at, None);
    }
}
