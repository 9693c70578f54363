//! 进程内事件总线（ddd-eventbus）
//!
//! 以发布/订阅解耦领域事件的生产者与一个或多个处理器，并在发布与处理之间
//! 提供可插拔的存储与缓冲：
//! - 事件（`event`）与投递记录/状态机（`store`）
//! - 有序、并发安全的事件队列（`queue`）
//! - 处理器注册、解析与分发循环（`eventing`）
//! - 配置（`config`）与统一错误（`error`）
//!
//! 投递语义为“至少一次”：处理器失败会按配置重试，处理器需保证幂等。
//! 本 crate 只定义存储与队列需满足的协议，并附带内存实现；
//! 跨进程分发与重启后的持久化由具体后端自行决定。
//!
//! 典型用法：
//! 1. 构建 `EventBus`（`EventBus::in_memory` 或 `EventBus::builder()` 注入自定义后端）；
//! 2. 为事件类型注册处理器（`register`/`register_shared`，运行期间亦可追加）；
//! 3. `start` 启动分发 worker，`publish` 发布事件；
//! 4. 通过 `query_status`/`query` 观察处理结果，`BusHandle::stop` 优雅停止。
//!
pub mod config;
pub mod error;
pub mod event;
pub mod eventing;
pub mod queue;
pub mod store;

pub use config::{EventBusConfig, OverflowPolicy, ReclaimConfig, RetryBackoff};
pub use error::{EventBusError, EventBusResult};
pub use event::Event;
pub use eventing::{
    BusHandle, EventBus, EventHandler, EventPublisher, HandlerFactory, HandlerLifetime,
    HandlerRegistry, PendingReclaimer,
};
pub use queue::{EventQueue, InMemoryEventQueue};
pub use store::{EventRecord, EventStatus, EventStore, InMemoryEventStore, RecordFilter};
