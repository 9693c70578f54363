//! 事件（Event）
//!
//! 总线上流转的不可变值：唯一 ID、逻辑事件类型、JSON 负载与创建时间。
//! 去重与相等性仅以 ID 为准。
//!
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct Event {
    /// 事件唯一标识符（缺省为 UUID v4）
    #[builder(into, default = Uuid::new_v4().to_string())]
    id: String,
    /// 事件类型，用于匹配处理器
    #[builder(into)]
    event_type: String,
    /// 事件负载
    #[builder(default)]
    payload: Value,
    /// 事件创建时间
    #[builder(default = Utc::now())]
    created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
