//! 事件总线（EventBus）
//!
//! 统一编排“发布 → 存储 → 入队 → 分发处理”：
//! - 发布：委托 `EventPublisher`，先写存储再入队；
//! - 分发：启动 N 个独立 worker 并发消费队列，失败隔离与重试见 `dispatch`；
//! - 回收：可选的周期任务，补偿重投遗留的 `Pending`/`Failed` 记录；
//! - 提供停止与等待的 `BusHandle`。
//!
use super::dispatch::Dispatcher;
use super::{EventHandler, EventPublisher, HandlerLifetime, HandlerRegistry, PendingReclaimer};
use crate::config::EventBusConfig;
use crate::error::{EventBusError, EventBusResult as Result};
use crate::event::Event;
use crate::queue::{EventQueue, InMemoryEventQueue};
use crate::store::{EventRecord, EventStore, InMemoryEventStore, RecordFilter};
use bon::Builder;
use std::{sync::Arc, time::Duration};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

// 导入由 bon::Builder 生成的 typestate 模块与状态转换别名
use self::event_bus_builder::{IsUnset, SetRegistry, State as BuilderState};

/// EventBus：
/// - 存储与队列可插拔（任意 `EventStore`/`EventQueue` 实现）
/// - 处理器可在运行期间继续注册，对后续出队的事件立即生效
#[derive(Builder)]
pub struct EventBus {
    event_store: Arc<dyn EventStore>,
    event_queue: Arc<dyn EventQueue>,
    #[builder(default)]
    registry: Arc<HandlerRegistry>,
    #[builder(default)]
    config: EventBusConfig,
}

impl<S: BuilderState> EventBusBuilder<S> {
    /// 以共享实例注册处理器：`(事件类型, 处理器)`
    pub fn event_handlers<T, I>(self, handlers: I) -> EventBusBuilder<SetRegistry<S>>
    where
        <S as BuilderState>::Registry: IsUnset,
        T: Into<String>,
        I: IntoIterator<Item = (T, Arc<dyn EventHandler>)>,
    {
        self.registry(Arc::new(HandlerRegistry::from_shared(handlers)))
    }
}

impl EventBus {
    /// 使用内存存储与内存队列构建
    pub fn in_memory(config: EventBusConfig) -> Result<Self> {
        config.validate()?;
        let queue = InMemoryEventQueue::from_config(&config);

        Ok(Self::builder()
            .event_store(Arc::new(InMemoryEventStore::new()))
            .event_queue(Arc::new(queue))
            .config(config)
            .build())
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn publisher(&self) -> EventPublisher {
        EventPublisher::new(self.event_store.clone(), self.event_queue.clone())
    }

    /// 发布事件；返回时事件已入库且已入队，处理结果只能通过存储查询
    pub async fn publish(&self, event: Event) -> Result<EventRecord> {
        self.publisher().publish(event).await
    }

    pub fn register<F, H>(
        &self,
        event_type: impl Into<String>,
        lifetime: HandlerLifetime,
        factory: F,
    ) where
        F: Fn() -> H + Send + Sync + 'static,
        H: EventHandler + 'static,
    {
        self.registry.register(event_type, lifetime, factory);
    }

    pub fn register_shared(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.registry.register_shared(event_type, handler);
    }

    /// 查询事件的当前记录；不存在返回 `NotFound`
    pub async fn query_status(&self, event_id: &str) -> Result<EventRecord> {
        self.event_store
            .get(event_id)
            .await?
            .ok_or_else(|| EventBusError::NotFound {
                event_id: event_id.to_string(),
            })
    }

    pub async fn query(&self, filter: &RecordFilter) -> Result<Vec<EventRecord>> {
        self.event_store.query(filter).await
    }

    pub fn queue_len(&self) -> usize {
        self.event_queue.len()
    }

    /// 立即执行一轮回收；未配置 `reclaim` 时使用默认的 `min_age`
    pub async fn reclaim_pending(&self) -> Result<usize> {
        let min_age = self.config.reclaim.unwrap_or_default().min_age;
        self.reclaimer().reclaim(min_age).await
    }

    fn reclaimer(&self) -> PendingReclaimer {
        PendingReclaimer::new(self.event_store.clone(), self.event_queue.clone())
    }

    /// 启动分发 worker（及可选的回收任务），返回可用于停止/等待的句柄
    pub fn start(self: Arc<Self>) -> Result<BusHandle> {
        self.config.validate()?;

        let token = CancellationToken::new();
        let dispatcher = Arc::new(Dispatcher::new(
            self.event_store.clone(),
            self.event_queue.clone(),
            self.registry.clone(),
            self.config.clone(),
            token.clone(),
        ));
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(self.config.workers + 1);

        // dispatch workers（长循环）
        for worker in 0..self.config.workers {
            tasks.push(tokio::spawn(dispatcher.clone().run_worker(worker)));
        }

        // reclaim worker（周期任务）
        if let Some(reclaim) = self.config.reclaim {
            let reclaimer = self.reclaimer();

            tasks.push(Self::spawn_periodic(token.clone(), reclaim.interval, move || {
                let reclaimer = reclaimer.clone();
                async move {
                    if let Err(e) = reclaimer.reclaim(reclaim.min_age).await {
                        tracing::warn!(error = %e, "periodic reclaim failed");
                    }
                }
            }));
        }

        tracing::info!(
            workers = self.config.workers,
            max_attempts = self.config.max_attempts,
            "event bus started"
        );

        Ok(BusHandle {
            token,
            tasks,
            retries: dispatcher.retries(),
            grace: self.config.shutdown_grace,
        })
    }

    fn spawn_periodic<F, Fut>(
        token: CancellationToken,
        interval: Duration,
        mut f: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // 首个 tick 立即返回，跳过以免启动即回收
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => f().await,
                }
            }
        })
    }
}

/// 总线运行句柄：用于优雅停止与等待任务结束
pub struct BusHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    retries: TaskTracker,
    grace: Duration,
}

impl BusHandle {
    /// 发出停止信号：worker 处理完手头事件后不再出队
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 等待所有任务结束（不发出停止信号）
    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            report_join(t.await);
        }
        self.retries.close();
        self.retries.wait().await;
    }

    /// 发出停止信号并在宽限期内等待在途处理完成；超时则中止剩余任务
    pub async fn stop(mut self) -> Result<()> {
        self.shutdown();
        let grace = self.grace;
        let mut tasks = std::mem::take(&mut self.tasks);
        let retries = self.retries.clone();

        let drained = time::timeout(grace, async {
            for t in tasks.iter_mut() {
                report_join(t.await);
            }
            retries.close();
            retries.wait().await;
        })
        .await;

        if drained.is_err() {
            for t in &tasks {
                t.abort();
            }
            tracing::warn!(grace = ?grace, "event bus stop timed out, remaining tasks aborted");
            return Err(EventBusError::ShutdownTimeout { grace });
        }

        tracing::info!("event bus stopped");
        Ok(())
    }
}

impl Drop for BusHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn report_join(result: std::result::Result<(), JoinError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "event bus task ended abnormally");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EventStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventHandler for Counting {
        fn handler_name(&self) -> &str {
            "counting"
        }
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Sleepy;

    #[async_trait]
    impl EventHandler for Sleepy {
        fn handler_name(&self) -> &str {
            "sleepy"
        }
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    async fn wait_for_status(bus: &EventBus, id: &str, status: EventStatus) -> EventRecord {
        time::timeout(Duration::from_secs(5), async {
            loop {
                let record = bus.query_status(id).await.unwrap();
                if record.status() == status {
                    return record;
                }
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("status reached in time")
    }

    #[tokio::test]
    async fn in_memory_rejects_invalid_config() {
        let cfg = EventBusConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(
            EventBus::in_memory(cfg),
            Err(EventBusError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn query_status_unknown_is_not_found() {
        let bus = EventBus::in_memory(EventBusConfig::default()).unwrap();
        assert!(matches!(
            bus.query_status("missing").await,
            Err(EventBusError::NotFound { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn builder_with_shared_handlers_dispatches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let bus = Arc::new(
            EventBus::builder()
                .event_store(Arc::new(InMemoryEventStore::new()))
                .event_queue(Arc::new(InMemoryEventQueue::unbounded()))
                .event_handlers([(
                    "ping",
                    Arc::new(Counting {
                        calls: calls.clone(),
                    }) as Arc<dyn EventHandler>,
                )])
                .config(EventBusConfig {
                    poll_interval: Duration::from_millis(20),
                    ..Default::default()
                })
                .build(),
        );

        let handle = bus.clone().start().unwrap();
        let record = bus.publish(Event::new("ping", serde_json::json!({}))).await.unwrap();
        let done = wait_for_status(&bus, record.event_id(), EventStatus::Processed).await;
        handle.stop().await.unwrap();

        assert_eq!(done.attempts(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_times_out_on_hanging_handler() {
        let bus = Arc::new(
            EventBus::in_memory(EventBusConfig {
                poll_interval: Duration::from_millis(20),
                shutdown_grace: Duration::from_millis(100),
                ..Default::default()
            })
            .unwrap(),
        );
        bus.register_shared("slow", Arc::new(Sleepy));

        let handle = bus.clone().start().unwrap();
        let record = bus.publish(Event::new("slow", serde_json::json!({}))).await.unwrap();
        wait_for_status(&bus, record.event_id(), EventStatus::Processing).await;

        assert!(matches!(
            handle.stop().await,
            Err(EventBusError::ShutdownTimeout { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn periodic_reclaim_recovers_unqueued_publish() {
        let bus = Arc::new(
            EventBus::in_memory(EventBusConfig {
                queue_capacity: Some(1),
                poll_interval: Duration::from_millis(20),
                reclaim: Some(crate::config::ReclaimConfig {
                    interval: Duration::from_millis(50),
                    min_age: Duration::ZERO,
                }),
                ..Default::default()
            })
            .unwrap(),
        );

        bus.publish(Event::builder().id("a").event_type("t").build())
            .await
            .unwrap();
        let err = bus
            .publish(Event::builder().id("b").event_type("t").build())
            .await
            .unwrap_err();
        assert!(matches!(err, EventBusError::EnqueueFailed { .. }));
        assert_eq!(bus.query_status("b").await.unwrap().status(), EventStatus::Pending);

        let handle = bus.clone().start().unwrap();
        wait_for_status(&bus, "a", EventStatus::Processed).await;
        let b = wait_for_status(&bus, "b", EventStatus::Processed).await;
        handle.stop().await.unwrap();

        assert_eq!(b.attempts(), 1);
    }

    #[tokio::test]
    async fn reclaim_pending_uses_configured_min_age() {
        let bus = EventBus::in_memory(EventBusConfig {
            queue_capacity: Some(1),
            reclaim: Some(crate::config::ReclaimConfig {
                interval: Duration::from_secs(60),
                min_age: Duration::from_secs(3600),
            }),
            ..Default::default()
        })
        .unwrap();
        bus.publish(Event::new("t", serde_json::json!({}))).await.unwrap();

        assert_eq!(bus.reclaim_pending().await.unwrap(), 0);
        assert_eq!(bus.queue_len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn periodic_reclaim_does_not_grow_a_backlog() {
        let bus = Arc::new(
            EventBus::in_memory(EventBusConfig {
                poll_interval: Duration::from_millis(20),
                shutdown_grace: Duration::from_millis(100),
                reclaim: Some(crate::config::ReclaimConfig {
                    interval: Duration::from_millis(50),
                    min_age: Duration::ZERO,
                }),
                ..Default::default()
            })
            .unwrap(),
        );
        bus.register_shared("slow", Arc::new(Sleepy));
        for i in 0..5 {
            bus.publish(Event::builder().id(format!("s-{i}")).event_type("slow").build())
                .await
                .unwrap();
        }

        let handle = bus.clone().start().unwrap();
        wait_for_status(&bus, "s-0", EventStatus::Processing).await;
        time::sleep(Duration::from_millis(400)).await;

        assert_eq!(bus.queue_len(), 4);
        assert!(matches!(
            handle.stop().await,
            Err(EventBusError::ShutdownTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn panicked_task_join_error_is_reported() {
        let crashed: std::result::Result<(), JoinError> =
            tokio::spawn(async { panic!("worker bug") }).await;
        assert!(crashed.as_ref().is_err_and(|e| e.is_panic()));
        report_join(crashed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_leaves_undequeued_events_in_queue() {
        let bus = Arc::new(EventBus::in_memory(EventBusConfig::default()).unwrap());
        let handle = bus.clone().start().unwrap();
        handle.stop().await.unwrap();

        bus.publish(Event::new("late", serde_json::json!({}))).await.unwrap();
        assert_eq!(bus.queue_len(), 1);
    }
}
