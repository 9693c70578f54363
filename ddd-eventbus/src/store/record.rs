//! 事件记录与投递状态机
//!
use crate::event::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 事件投递状态
///
/// ```text
/// Pending    -> Processing
/// Processing -> Processed | Failed | Exhausted
/// Failed     -> Processing
/// ```
///
/// `Exhausted` 是 `Failed` 的终态子状态：已达最大投递次数，不再自动重试。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    Pending,
    Processing,
    Processed,
    Failed,
    Exhausted,
}

impl EventStatus {
    pub fn can_transition_to(self, next: EventStatus) -> bool {
        use EventStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Processed)
                | (Processing, Failed)
                | (Processing, Exhausted)
                | (Failed, Processing)
        )
    }

    pub fn is_failed(self) -> bool {
        matches!(self, Self::Failed | Self::Exhausted)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Processed | Self::Exhausted)
    }
}

/// 存储中的事件记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    event: Event,
    status: EventStatus,
    attempts: u32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(event: Event) -> Self {
        let now = Utc::now();
        Self {
            event,
            status: EventStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn event_id(&self) -> &str {
        self.event.id()
    }

    pub fn status(&self) -> EventStatus {
        self.status
    }

    /// 已发生的投递次数
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// 按状态机推进；非法转换时返回当前状态且不做任何修改。
    ///
    /// 进入 `Processing` 计一次投递；`Processed` 清空错误；
    /// `Failed`/`Exhausted` 记录错误。
    pub fn transition(
        &mut self,
        next: EventStatus,
        error: Option<String>,
    ) -> Result<(), EventStatus> {
        if !self.status.can_transition_to(next) {
            return Err(self.status);
        }

        match next {
            EventStatus::Processing => self.attempts += 1,
            EventStatus::Processed => self.last_error = None,
            EventStatus::Failed | EventStatus::Exhausted => {
                if error.is_some() {
                    self.last_error = error;
                }
            }
            EventStatus::Pending => {}
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// 只读查询条件，各项为 AND 关系
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub status: Option<EventStatus>,
    pub event_type: Option<String>,
    /// 最后更新时间不晚于该时刻
    pub updated_until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub fn with_status(status: EventStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &EventRecord) -> bool {
        if self.status.is_some_and(|s| s != record.status) {
            return false;
        }
        if let Some(t) = &self.event_type {
            if t != record.event.event_type() {
                return false;
            }
        }
        if self.updated_until.is_some_and(|b| record.updated_at > b) {
            return false;
        }
        true
    }
}
