//! 事件子系统（eventing）
//!
//! 提供事件发布/订阅与处理的运行时：
//! - `EventPublisher`：生产者入口，先写存储再入队；
//! - `EventHandler`：对事件进行消费处理；
//! - `HandlerRegistry`：事件类型到处理器的注册与按生命周期解析；
//! - `EventBus`：编排存储、队列与分发 worker，并发执行、失败隔离与重试；
//! - `PendingReclaimer`：对入队失败或重投失败的遗留事件进行补偿。
//!
//! 该模块只依赖 `EventStore`/`EventQueue` 协议，不绑定具体的存储与队列实现。
//!
pub mod bus;
mod dispatch;
pub mod handler;
pub mod publisher;
pub mod reclaimer;
pub mod registry;

pub use bus::{BusHandle, EventBus};
pub use handler::EventHandler;
pub use publisher::EventPublisher;
pub use reclaimer::PendingReclaimer;
pub use registry::{HandlerFactory, HandlerLifetime, HandlerRegistry};
