//! 事件总线统一错误定义
//!
//! 按来源划分为发布、队列、存储、处理器、基础设施与生命周期几类，
//! 便于调用方按类别决定是否重试。
//!
use crate::store::EventStatus;
use std::time::Duration;
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EventBusError {
    // --- 发布 ---
    #[error("duplicate event: id={event_id}")]
    DuplicateEvent { event_id: String },
    #[error("enqueue failed: id={event_id}, reason={source}")]
    EnqueueFailed {
        event_id: String,
        #[source]
        source: Box<EventBusError>,
    },

    // --- 队列 ---
    #[error("queue full: capacity={capacity}")]
    QueueFull { capacity: usize },
    #[error("queue closed")]
    QueueClosed,

    // --- 存储 ---
    #[error("event not found: id={event_id}")]
    NotFound { event_id: String },
    #[error("invalid status transition: id={event_id}, from={from:?}, to={to:?}")]
    InvalidTransition {
        event_id: String,
        from: EventStatus,
        to: EventStatus,
    },

    // --- 处理器 ---
    #[error("event handler error: handler={handler}, reason={reason}")]
    HandlerFailed { handler: String, reason: String },
    #[error("event handler timed out: handler={handler}, timeout={timeout:?}")]
    HandlerTimeout { handler: String, timeout: Duration },
    #[error("event handler panicked: handler={handler}, reason={reason}")]
    HandlerPanicked { handler: String, reason: String },

    // --- 基础设施 ---
    #[error("event store error: {reason}")]
    Store { reason: String },
    #[error("event queue error: {reason}")]
    Queue { reason: String },

    // --- 生命周期/配置 ---
    #[error("shutdown timed out after {grace:?}")]
    ShutdownTimeout { grace: Duration },
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },
}

impl EventBusError {
    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store {
            reason: reason.into(),
        }
    }

    pub fn queue(reason: impl Into<String>) -> Self {
        Self::Queue {
            reason: reason.into(),
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// 基础设施类错误（存储/队列后端不可用），调用方可在下一轮重试
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::Queue { .. })
    }
}

/// 统一 Result 类型别名
pub type EventBusResult<T> = Result<T, EventBusError>;
