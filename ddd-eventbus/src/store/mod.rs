//! 事件存储（EventStore）
//!
//! 记录每个已发布事件及其投递状态，供分发循环推进状态、供诊断工具查询。
//! 实现需保证单条操作（`add`/`update_status`）自身线性一致，调用方无需额外加锁；
//! 不提供跨记录事务。
//!
mod inmemory;
mod record;

pub use inmemory::InMemoryEventStore;
pub use record::{EventRecord, EventStatus, RecordFilter};

use crate::{error::EventBusResult as Result, event::Event};
use async_trait::async_trait;

/// 事件存储协议
#[async_trait]
pub trait EventStore: Send + Sync {
    /// 以 `Pending` 状态创建记录；ID 已存在时返回 `DuplicateEvent`
    async fn add(&self, event: Event) -> Result<EventRecord>;

    /// 推进状态；不存在返回 `NotFound`，违反状态机返回 `InvalidTransition`
    async fn update_status(
        &self,
        id: &str,
        status: EventStatus,
        error: Option<String>,
    ) -> Result<EventRecord>;

    async fn get(&self, id: &str) -> Result<Option<EventRecord>>;

    /// 按插入顺序返回匹配的记录
    async fn query(&self, filter: &RecordFilter) -> Result<Vec<EventRecord>>;
}
