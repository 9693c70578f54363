//! 内存版事件队列（InMemoryEventQueue）
//!
//! 基于 `tokio::sync::mpsc` 实现：发送端天然支持多生产者，接收端由异步互斥锁
//! 在多个 worker 间共享，空闲 worker 在 `recv` 上休眠而不是轮询。
//!
//! 注意：仅驻留内存，进程退出时尚未出队的事件会丢失。

use super::EventQueue;
use crate::config::{EventBusConfig, OverflowPolicy};
use crate::error::{EventBusError, EventBusResult as Result};
use crate::event::Event;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio::time::{self, Instant};

enum Sender {
    Bounded {
        tx: mpsc::Sender<Event>,
        capacity: usize,
        overflow: OverflowPolicy,
    },
    Unbounded(mpsc::UnboundedSender<Event>),
}

enum Receiver {
    Bounded(mpsc::Receiver<Event>),
    Unbounded(mpsc::UnboundedReceiver<Event>),
}

impl Receiver {
    async fn recv(&mut self) -> Option<Event> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }
}

pub struct InMemoryEventQueue {
    tx: Sender,
    rx: Mutex<Receiver>,
    depth: AtomicUsize,
    /// 排队中的事件 ID 及其副本数
    queued: DashMap<String, usize>,
    closed: AtomicBool,
}

impl InMemoryEventQueue {
    pub fn unbounded() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self::with_parts(Sender::Unbounded(tx), Receiver::Unbounded(rx))
    }

    /// 创建有界队列，`capacity` 为 0 时按 1 处理
    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self::with_parts(
            Sender::Bounded {
                tx,
                capacity,
                overflow,
            },
            Receiver::Bounded(rx),
        )
    }

    pub fn from_config(config: &EventBusConfig) -> Self {
        match config.queue_capacity {
            Some(capacity) => Self::bounded(capacity, config.overflow),
            None => Self::unbounded(),
        }
    }

    fn with_parts(tx: Sender, rx: Receiver) -> Self {
        Self {
            tx,
            rx: Mutex::new(rx),
            depth: AtomicUsize::new(0),
            queued: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        match &self.tx {
            Sender::Bounded { capacity, .. } => Some(*capacity),
            Sender::Unbounded(_) => None,
        }
    }

    /// 拒绝后续入队；已入队的事件仍可被取出
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn track(&self, event_id: &str) {
        *self.queued.entry(event_id.to_string()).or_insert(0) += 1;
    }

    fn untrack(&self, event_id: &str) {
        self.queued.remove_if_mut(event_id, |_, copies| {
            *copies -= 1;
            *copies == 0
        });
    }

    async fn send(&self, event: Event) -> Result<()> {
        match &self.tx {
            Sender::Unbounded(tx) => tx.send(event).map_err(|_| EventBusError::QueueClosed),
            Sender::Bounded {
                tx,
                capacity,
                overflow: OverflowPolicy::Reject,
            } => tx.try_send(event).map_err(|e| match e {
                TrySendError::Full(_) => EventBusError::QueueFull {
                    capacity: *capacity,
                },
                TrySendError::Closed(_) => EventBusError::QueueClosed,
            }),
            Sender::Bounded {
                tx,
                capacity,
                overflow: OverflowPolicy::Wait(wait),
            } => tx.send_timeout(event, *wait).await.map_err(|e| match e {
                SendTimeoutError::Timeout(_) => EventBusError::QueueFull {
                    capacity: *capacity,
                },
                SendTimeoutError::Closed(_) => EventBusError::QueueClosed,
            }),
        }
    }
}

impl Default for InMemoryEventQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[async_trait]
impl EventQueue for InMemoryEventQueue {
    async fn enqueue(&self, event: Event) -> Result<()> {
        if self.is_closed() {
            return Err(EventBusError::QueueClosed);
        }

        // 先计数再发送，避免消费者先于计数完成出队
        let event_id = event.id().to_string();
        self.depth.fetch_add(1, Ordering::AcqRel);
        self.track(&event_id);
        let sent = self.send(event).await;
        if sent.is_err() {
            self.untrack(&event_id);
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
        sent
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Event>> {
        let deadline = Instant::now() + timeout;

        let Ok(mut rx) = time::timeout_at(deadline, self.rx.lock()).await else {
            return Ok(None);
        };

        match time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(event)) => {
                self.untrack(event.id());
                self.depth.fetch_sub(1, Ordering::AcqRel);
                Ok(Some(event))
            }
            // 发送端由队列自身持有，不会先于接收端释放
            Ok(None) => Err(EventBusError::QueueClosed),
            Err(_elapsed) => Ok(None),
        }
    }

    fn len(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    fn contains(&self, event_id: &str) -> bool {
        self.queued.contains_key(event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ev(id: &str) -> Event {
        Event::builder().id(id).event_type("t").build()
    }

    #[tokio::test]
    async fn fifo_order() {
        let q = InMemoryEventQueue::unbounded();
        for i in 0..10 {
            q.enqueue(ev(&format!("e-{i}"))).await.unwrap();
        }
        assert_eq!(q.len(), 10);

        for i in 0..10 {
            let got = q.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
            assert_eq!(got.id(), format!("e-{i}"));
        }
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn dequeue_times_out_with_none() {
        let q = InMemoryEventQueue::unbounded();
        let got = q.dequeue(Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn bounded_reject_reports_queue_full() {
        let q = InMemoryEventQueue::bounded(2, OverflowPolicy::Reject);
        q.enqueue(ev("a")).await.unwrap();
        q.enqueue(ev("b")).await.unwrap();

        let err = q.enqueue(ev("c")).await.unwrap_err();
        assert!(matches!(err, EventBusError::QueueFull { capacity: 2 }));
        assert_eq!(q.len(), 2);
    }

    #[tokio::test]
    async fn bounded_wait_times_out_then_full() {
        let q = InMemoryEventQueue::bounded(1, OverflowPolicy::Wait(Duration::from_millis(20)));
        q.enqueue(ev("a")).await.unwrap();

        let err = q.enqueue(ev("b")).await.unwrap_err();
        assert!(matches!(err, EventBusError::QueueFull { capacity: 1 }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn bounded_wait_succeeds_once_space_frees() {
        let q = Arc::new(InMemoryEventQueue::bounded(
            1,
            OverflowPolicy::Wait(Duration::from_secs(2)),
        ));
        q.enqueue(ev("a")).await.unwrap();

        let consumer = {
            let q = q.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                q.dequeue(Duration::from_secs(1)).await
            })
        };

        q.enqueue(ev("b")).await.unwrap();
        let first = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(first.id(), "a");
        let second = q.dequeue(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(second.id(), "b");
    }

    #[tokio::test]
    async fn contains_tracks_queued_copies() {
        let q = InMemoryEventQueue::bounded(2, OverflowPolicy::Reject);
        q.enqueue(ev("a")).await.unwrap();
        q.enqueue(ev("a")).await.unwrap();
        assert!(q.enqueue(ev("b")).await.is_err());
        assert!(q.contains("a"));
        assert!(!q.contains("b"));

        q.dequeue(Duration::from_millis(10)).await.unwrap();
        assert!(q.contains("a"));
        q.dequeue(Duration::from_millis(10)).await.unwrap();
        assert!(!q.contains("a"));
    }

    #[tokio::test]
    async fn closed_queue_rejects_enqueue_but_drains() {
        let q = InMemoryEventQueue::unbounded();
        q.enqueue(ev("a")).await.unwrap();
        q.close();

        assert!(matches!(
            q.enqueue(ev("b")).await,
            Err(EventBusError::QueueClosed)
        ));
        let got = q.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(got.id(), "a");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumers_see_each_event_once() {
        let q = Arc::new(InMemoryEventQueue::unbounded());
        for i in 0..200 {
            q.enqueue(ev(&format!("e-{i}"))).await.unwrap();
        }

        let mut consumers = Vec::new();
        for _ in 0..4 {
            let q = q.clone();
            consumers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(e) = q.dequeue(Duration::from_millis(50)).await.unwrap() {
                    seen.push(e.id().to_string());
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for c in consumers {
            all.extend(c.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 200);
    }
}
