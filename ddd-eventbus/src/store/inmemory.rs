//! 内存版事件存储（InMemoryEventStore）
//!
//! 基于 `DashMap` 的分片锁，每条记录的读改写在同一把分片锁内完成。
//! 典型用途：测试环境、示例与本地开发；进程退出即丢失。

use super::{EventRecord, EventStatus, EventStore, RecordFilter};
use crate::error::{EventBusError, EventBusResult as Result};
use crate::event::Event;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};

struct Stored {
    seq: u64,
    record: EventRecord,
}

#[derive(Default)]
pub struct InMemoryEventStore {
    records: DashMap<String, Stored>,
    next_seq: AtomicU64,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn add(&self, event: Event) -> Result<EventRecord> {
        match self.records.entry(event.id().to_string()) {
            Entry::Occupied(o) => Err(EventBusError::DuplicateEvent {
                event_id: o.key().clone(),
            }),
            Entry::Vacant(v) => {
                let record = EventRecord::new(event);
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                v.insert(Stored {
                    seq,
                    record: record.clone(),
                });
                Ok(record)
            }
        }
    }

    async fn update_status(
        &self,
        id: &str,
        status: EventStatus,
        error: Option<String>,
    ) -> Result<EventRecord> {
        let mut stored = self
            .records
            .get_mut(id)
            .ok_or_else(|| EventBusError::NotFound {
                event_id: id.to_string(),
            })?;

        stored
            .record
            .transition(status, error)
            .map_err(|from| EventBusError::InvalidTransition {
                event_id: id.to_string(),
                from,
                to: status,
            })?;

        Ok(stored.record.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<EventRecord>> {
        Ok(self.records.get(id).map(|s| s.record.clone()))
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<EventRecord>> {
        let mut matched: Vec<(u64, EventRecord)> = self
            .records
            .iter()
            .filter(|s| filter.matches(&s.record))
            .map(|s| (s.seq, s.record.clone()))
            .collect();
        matched.sort_by_key(|(seq, _)| *seq);

        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(matched.into_iter().take(limit).map(|(_, r)| r).collect())
    }
}
