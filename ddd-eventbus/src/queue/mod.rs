//! 事件队列（EventQueue）
//!
//! 解耦发布与消费的有序缓冲：
//! - `enqueue` 不会无限期阻塞生产者（要么立即入队，要么在策略允许的时长内等待）；
//! - `dequeue` 休眠等待直到有事件或超时，超时返回 `Ok(None)` 而非错误；
//! - 多生产者、多 worker 并发安全，不包含任何处理器知识。
//!
mod inmemory;

pub use inmemory::InMemoryEventQueue;

use crate::{error::EventBusResult as Result, event::Event};
use async_trait::async_trait;
use std::time::Duration;

/// 事件队列协议
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// 追加到队尾；有界且已满时返回 `QueueFull`
    async fn enqueue(&self, event: Event) -> Result<()>;

    /// 阻塞等待队首事件，`timeout` 内无事件返回 `Ok(None)`
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Event>>;

    /// 当前排队中的事件数
    fn len(&self) -> usize;

    /// 该事件是否仍在队列中等待出队，回收器据此避免重复入队
    fn contains(&self, event_id: &str) -> bool;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
