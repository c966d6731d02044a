use async_trait::async_trait;
use crate::{types::{Record, RecordStatus, StatusUpdate}, Result};

pub mod mem;

pub use mem::InMemoryStore;

/// 记录存储特征。实现必须保证 `update_status` 的比较并交换语义是原子的，
/// 提交路径和确认路径依赖它在没有全局锁的情况下避免丢失更新。
#[async_trait]
pub trait RecordStore<R: Record>: Send + Sync {
    /// 批量插入，关联标识或序号重复时整体失败
    async fn insert(&self, records: Vec<R>) -> Result<()>;

    /// 按状态查询，结果按序号升序
    async fn get_by_status(&self, status: R::Status, limit: usize) -> Result<Vec<R>>;

    async fn get_by_correlation_id(&self, id: &str) -> Result<Option<R>>;

    /// 仅当当前状态等于 `expected` 时写入 `new`，返回是否写入
    async fn update_status(
        &self,
        id: &str,
        expected: R::Status,
        new: R::Status,
        update: StatusUpdate,
    ) -> Result<bool>;

    async fn get_pending(&self, limit: usize) -> Result<Vec<R>> {
        self.get_by_status(R::Status::PENDING, limit).await
    }
}
