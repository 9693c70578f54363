//! 事件处理器（EventHandler）
//!
//! 定义消费某类事件的处理逻辑与元信息（名称）。订阅的事件类型由注册时指定，
//! 同一处理器可注册到多个类型。
//!
use crate::event::Event;
use async_trait::async_trait;

/// 事件处理器：处理某一类型的事件
///
/// 总线提供“至少一次”投递：失败重试时同一事件可能被处理多次，
/// 实现方需保证幂等或能容忍重复投递。
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 处理器名称（用于失败记录与日志）
    fn handler_name(&self) -> &str;
    /// 处理事件
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}
