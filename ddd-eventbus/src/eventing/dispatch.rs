//! 分发循环
//!
//! 每个 worker 独立执行：出队 → 置 `Processing` → 解析处理器 → 隔离并发调用 → 汇总结果。
//! - 全部成功：`Processed`；
//! - 任一失败：记录首个错误，未达上限则置 `Failed` 并（退避后）重新入队队尾，
//!   否则置 `Exhausted` 且不再重投；
//! - 单个处理器的错误、panic 与超时只影响它自己，不会中断同事件的其他处理器或 worker。
//!
use super::registry::Registration;
use super::{EventHandler, HandlerRegistry};
use crate::config::EventBusConfig;
use crate::error::EventBusError;
use crate::event::Event;
use crate::queue::EventQueue;
use crate::store::{EventStatus, EventStore};
use futures_util::{FutureExt, StreamExt, stream};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// 出队出错后的暂停，避免后端故障时空转
const ERROR_PAUSE: Duration = Duration::from_millis(100);

/// 重投入队被拒（如队列已满）后的重试间隔
const REQUEUE_PAUSE: Duration = Duration::from_millis(20);

pub(crate) struct Dispatcher {
    store: Arc<dyn EventStore>,
    queue: Arc<dyn EventQueue>,
    registry: Arc<HandlerRegistry>,
    config: EventBusConfig,
    token: CancellationToken,
    retries: TaskTracker,
}

impl Dispatcher {
    pub(crate) fn new(
        store: Arc<dyn EventStore>,
        queue: Arc<dyn EventQueue>,
        registry: Arc<HandlerRegistry>,
        config: EventBusConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            config,
            token,
            retries: TaskTracker::new(),
        }
    }

    /// 延迟重投任务的跟踪器，停止时需等待其清空
    pub(crate) fn retries(&self) -> TaskTracker {
        self.retries.clone()
    }

    pub(crate) async fn run_worker(self: Arc<Self>, worker: usize) {
        tracing::info!(worker, "dispatch worker started");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                next = self.queue.dequeue(self.config.poll_interval) => next,
            };

            match next {
                // 已取出的事件即使收到停止信号也会处理完
                Ok(Some(event)) => self.dispatch(event).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(worker, error = %e, "dequeue failed");
                    tokio::select! {
                        biased;
                        _ = self.token.cancelled() => break,
                        _ = time::sleep(ERROR_PAUSE) => {}
                    }
                }
            }
        }

        tracing::info!(worker, "dispatch worker stopped");
    }

    pub(crate) async fn dispatch(self: &Arc<Self>, event: Event) {
        let record = match self
            .store
            .update_status(event.id(), EventStatus::Processing, None)
            .await
        {
            Ok(record) => record,
            // 已处理、已耗尽或正由其他 worker 处理：丢弃这次重复投递
            Err(EventBusError::InvalidTransition { from, .. }) => {
                tracing::debug!(
                    event_id = %event.id(),
                    status = ?from,
                    "skipping delivery of non-dispatchable event"
                );
                return;
            }
            Err(e) => {
                tracing::error!(
                    event_id = %event.id(),
                    event_type = %event.event_type(),
                    error = %e,
                    "failed to claim event for dispatch"
                );
                return;
            }
        };

        let attempt = record.attempts();
        let registrations = self.registry.registrations(event.event_type());
        tracing::debug!(
            event_id = %event.id(),
            event_type = %event.event_type(),
            attempt,
            handlers = registrations.len(),
            "dispatching event"
        );

        let outcomes = self.invoke_all(&event, registrations).await;
        let first_failure = outcomes.into_iter().find_map(Result::err);

        match first_failure {
            None => {
                self.mark(&event, EventStatus::Processed, None).await;
            }
            Some(err) if attempt < self.config.max_attempts => {
                if self
                    .mark(&event, EventStatus::Failed, Some(err.to_string()))
                    .await
                {
                    let delay = self.config.backoff.delay_for_attempt(attempt);
                    tracing::warn!(
                        event_id = %event.id(),
                        event_type = %event.event_type(),
                        attempt,
                        delay = ?delay,
                        error = %err,
                        "event dispatch failed, scheduling retry"
                    );
                    self.schedule_retry(event, delay).await;
                }
            }
            Some(err) => {
                if self
                    .mark(&event, EventStatus::Exhausted, Some(err.to_string()))
                    .await
                {
                    tracing::error!(
                        event_id = %event.id(),
                        event_type = %event.event_type(),
                        attempt,
                        error = %err,
                        "event exhausted, no further retries"
                    );
                }
            }
        }
    }

    async fn invoke_all(
        &self,
        event: &Event,
        registrations: Vec<Arc<Registration>>,
    ) -> Vec<Result<(), EventBusError>> {
        let timeout = self.config.handler_timeout;
        let calls: Vec<_> = registrations
            .into_iter()
            .enumerate()
            .map(|(slot, registration)| invoke_registered(registration, slot, event, timeout))
            .collect();

        // buffered 保持注册顺序，便于确定“首个错误”
        stream::iter(calls)
            .buffered(self.config.handler_concurrency.max(1))
            .collect()
            .await
    }

    async fn mark(&self, event: &Event, status: EventStatus, error: Option<String>) -> bool {
        match self.store.update_status(event.id(), status, error).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(
                    event_id = %event.id(),
                    status = ?status,
                    error = %e,
                    "failed to record dispatch outcome"
                );
                false
            }
        }
    }

    async fn schedule_retry(self: &Arc<Self>, event: Event, delay: Duration) {
        if delay.is_zero() {
            match self.queue.enqueue(event.clone()).await {
                Ok(()) => return,
                Err(EventBusError::QueueClosed) => {
                    self.abandon_retry(&event, &EventBusError::QueueClosed);
                    return;
                }
                // 队列已满时不能在 worker 内等待，否则唯一的消费者会阻塞自己
                Err(e) => {
                    tracing::debug!(event_id = %event.id(), error = %e, "retry enqueue deferred");
                }
            }
        }

        let this = self.clone();
        self.retries.spawn(async move {
            // 停止时不再等待退避，直接入队以便持久化队列保留该事件
            tokio::select! {
                biased;
                _ = this.token.cancelled() => {}
                _ = time::sleep(delay) => {}
            }
            this.requeue(event).await;
        });
    }

    /// 重投入队直至成功；仅在队列关闭或停止后仍失败时放弃，记录保持 `Failed`
    async fn requeue(&self, event: Event) {
        loop {
            let err = match self.queue.enqueue(event.clone()).await {
                Ok(()) => return,
                Err(e) => e,
            };

            if matches!(err, EventBusError::QueueClosed) || self.token.is_cancelled() {
                self.abandon_retry(&event, &err);
                return;
            }

            tracing::debug!(
                event_id = %event.id(),
                error = %err,
                "retry enqueue rejected, will try again"
            );
            tokio::select! {
                biased;
                _ = self.token.cancelled() => {}
                _ = time::sleep(REQUEUE_PAUSE) => {}
            }
        }
    }

    fn abandon_retry(&self, event: &Event, err: &EventBusError) {
        tracing::warn!(
            event_id = %event.id(),
            event_type = %event.event_type(),
            error = %err,
            "retry enqueue failed, event left failed for reclaim"
        );
    }
}

/// 在隔离边界内构造处理器并调用；工厂 panic 只算该处理器的一次失败
async fn invoke_registered(
    registration: Arc<Registration>,
    slot: usize,
    event: &Event,
    timeout: Option<Duration>,
) -> Result<(), EventBusError> {
    match panic::catch_unwind(AssertUnwindSafe(|| registration.instance())) {
        Ok(handler) => invoke(handler, event, timeout).await,
        Err(payload) => {
            let handler = format!("{}#{slot}", event.event_type());
            let reason = panic_message(payload.as_ref());
            tracing::warn!(
                handler = %handler,
                event_id = %event.id(),
                reason = %reason,
                "event handler factory panicked"
            );
            Err(EventBusError::HandlerPanicked { handler, reason })
        }
    }
}

async fn invoke(
    handler: Arc<dyn EventHandler>,
    event: &Event,
    timeout: Option<Duration>,
) -> Result<(), EventBusError> {
    let name = handler.handler_name().to_string();
    let call = AssertUnwindSafe(handler.handle(event)).catch_unwind();

    let outcome = match timeout {
        Some(limit) => match time::timeout(limit, call).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => {
                tracing::warn!(
                    handler = %name,
                    event_id = %event.id(),
                    timeout = ?limit,
                    "event handler timed out"
                );
                return Err(EventBusError::HandlerTimeout {
                    handler: name,
                    timeout: limit,
                });
            }
        },
        None => call.await,
    };

    match outcome {
        Ok(Ok(())) => {
            tracing::debug!(handler = %name, event_id = %event.id(), "event handled");
            Ok(())
        }
        Ok(Err(e)) => {
            tracing::warn!(
                handler = %name,
                event_id = %event.id(),
                error = %e,
                "event handler failed"
            );
            Err(EventBusError::HandlerFailed {
                handler: name,
                reason: format!("{e:#}"),
            })
        }
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            tracing::warn!(
                handler = %name,
                event_id = %event.id(),
                reason = %reason,
                "event handler panicked"
            );
            Err(EventBusError::HandlerPanicked {
                handler: name,
                reason,
            })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
