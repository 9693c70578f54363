//! 事件发布器（EventPublisher）
//!
//! 面向生产者的入口：先写存储，再入队。
//! - 存储写入失败（如 `DuplicateEvent`）时不会入队，原样返回该错误；
//! - 入队失败时返回 `EnqueueFailed`，记录保持 `Pending`，交由回收器补偿重投。
//!
use crate::error::{EventBusError, EventBusResult as Result};
use crate::event::Event;
use crate::queue::EventQueue;
use crate::store::{EventRecord, EventStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct EventPublisher {
    store: Arc<dyn EventStore>,
    queue: Arc<dyn EventQueue>,
}

impl EventPublisher {
    pub fn new(store: Arc<dyn EventStore>, queue: Arc<dyn EventQueue>) -> Self {
        Self { store, queue }
    }

    pub async fn publish(&self, event: Event) -> Result<EventRecord> {
        let record = self.store.add(event.clone()).await?;

        if let Err(e) = self.queue.enqueue(event).await {
            tracing::warn!(
                event_id = %record.event_id(),
                event_type = %record.event().event_type(),
                error = %e,
                "event stored but not enqueued, left pending"
            );
            return Err(EventBusError::EnqueueFailed {
                event_id: record.event_id().to_string(),
                source: Box::new(e),
            });
        }

        tracing::debug!(
            event_id = %record.event_id(),
            event_type = %record.event().event_type(),
            "event published"
        );
        Ok(record)
    }

    /// 按顺序逐个发布，遇到首个失败即停止
    pub async fn publish_all<I>(&self, events: I) -> Result<Vec<EventRecord>>
    where
        I: IntoIterator<Item = Event> + Send,
        I::IntoIter: Send,
    {
        let mut records = Vec::new();
        for event in events {
            records.push(self.publish(event).await?);
        }
        Ok(records)
    }
}
