//! 总线配置
//!
//! 所有项均可选，`Default` 给出：无界队列、单 worker、最多 3 次投递、
//! 立即重试、处理器不超时。
//!
use crate::error::{EventBusError, EventBusResult};
use std::time::Duration;

/// 有界队列满时的处理策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// 立即以 `QueueFull` 拒绝
    #[default]
    Reject,
    /// 最多等待给定时长（背压），超时后 `QueueFull`
    Wait(Duration),
}

/// 失败重投前的退避策略
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum RetryBackoff {
    /// 立即重新入队
    #[default]
    None,
    /// 固定延迟
    Fixed(Duration),
    /// 指数退避：initial * multiplier^(attempt-1)，封顶 max
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl RetryBackoff {
    /// 已完成 `attempt` 次投递后，下一次投递前的等待时长
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match *self {
            Self::None => Duration::ZERO,
            Self::Fixed(delay) => delay,
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = initial.as_secs_f64() * multiplier.powi(exp);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    max
                } else {
                    Duration::from_secs_f64(secs.max(0.0))
                }
            }
        }
    }
}

/// 待处理事件回收（补偿重投）配置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReclaimConfig {
    /// 扫描间隔
    pub interval: Duration,
    /// 记录最后更新距今至少多久才被视为“遗留”
    pub min_age: Duration,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            min_age: Duration::from_secs(60),
        }
    }
}

/// 事件总线配置
#[derive(Clone, Debug)]
pub struct EventBusConfig {
    /// 队列容量上限，`None` 表示无界
    pub queue_capacity: Option<usize>,
    /// 队列满时的策略
    pub overflow: OverflowPolicy,
    /// 并发分发 worker 数
    pub workers: usize,
    /// 单个事件的最大投递次数（含首次）
    pub max_attempts: u32,
    /// 重投退避
    pub backoff: RetryBackoff,
    /// 单个处理器的超时，`None` 表示不限
    pub handler_timeout: Option<Duration>,
    /// 单事件广播给多个 handler 时的并发
    pub handler_concurrency: usize,
    /// worker 单次阻塞出队的等待时长
    pub poll_interval: Duration,
    /// 停止时等待在途处理完成的宽限期
    pub shutdown_grace: Duration,
    /// 周期回收，`None` 表示关闭
    pub reclaim: Option<ReclaimConfig>,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: None,
            overflow: OverflowPolicy::Reject,
            workers: 1,
            max_attempts: 3,
            backoff: RetryBackoff::None,
            handler_timeout: None,
            handler_concurrency: 8,
            poll_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(30),
            reclaim: None,
        }
    }
}

impl EventBusConfig {
    pub fn validate(&self) -> EventBusResult<()> {
        if self.workers == 0 {
            return Err(EventBusError::invalid_config("workers must be > 0"));
        }
        if self.max_attempts == 0 {
            return Err(EventBusError::invalid_config("max_attempts must be > 0"));
        }
        if self.handler_concurrency == 0 {
            return Err(EventBusError::invalid_config(
                "handler_concurrency must be > 0",
            ));
        }
        if self.queue_capacity == Some(0) {
            return Err(EventBusError::invalid_config(
                "queue_capacity must be > 0 when bounded",
            ));
        }
        if let RetryBackoff::Exponential { multiplier, .. } = self.backoff {
            if !(multiplier.is_finite() && multiplier >= 1.0) {
                return Err(EventBusError::invalid_config(
                    "backoff multiplier must be a finite value >= 1.0",
                ));
            }
        }
        Ok(())
    }
}
