//! 事件回收器（PendingReclaimer）
//!
//! 对遗留事件进行补偿重投：
//! - `Pending`：已入库但入队失败的发布；
//! - `Failed`：失败后重投入队失败，未能进入下一轮的事件。
//!
//! 仍在队列中等待出队的记录会被跳过，积压期间反复回收不会让队列膨胀。
//! 仅回收最后更新距今超过 `min_age` 的记录；`min_age` 应大于最大退避时长，
//! 否则可能提前重投正在等待退避的事件。重复投递由状态机吸收：
//! 已处理或正在处理的事件出队后会被跳过。
//!
use crate::error::{EventBusError, EventBusResult as Result};
use crate::queue::EventQueue;
use crate::store::{EventStatus, EventStore, RecordFilter};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct PendingReclaimer {
    store: Arc<dyn EventStore>,
    queue: Arc<dyn EventQueue>,
}

impl PendingReclaimer {
    pub fn new(store: Arc<dyn EventStore>, queue: Arc<dyn EventQueue>) -> Self {
        Self { store, queue }
    }

    /// 重新入队遗留记录，返回重投数量；入队失败时中止本轮并返回错误
    pub async fn reclaim(&self, min_age: Duration) -> Result<usize> {
        let min_age = chrono::Duration::from_std(min_age)
            .map_err(|e| EventBusError::invalid_config(format!("reclaim min_age: {e}")))?;
        let cutoff = Utc::now() - min_age;

        let mut reclaimed = 0;
        for status in [EventStatus::Pending, EventStatus::Failed] {
            let stale = self
                .store
                .query(&RecordFilter {
                    status: Some(status),
                    updated_until: Some(cutoff),
                    ..Default::default()
                })
                .await?;

            for record in stale {
                if self.queue.contains(record.event_id()) {
                    continue;
                }
                if let Err(e) = self.queue.enqueue(record.event().clone()).await {
                    tracing::warn!(
                        event_id = %record.event_id(),
                        reclaimed,
                        error = %e,
                        "reclaim aborted, enqueue failed"
                    );
                    return Err(e);
                }
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            tracing::info!(reclaimed, "stale events re-enqueued");
        }
        Ok(reclaimed)
    }
}
