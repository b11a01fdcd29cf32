use crate::core::{Result, StageError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Domain event queued on a unit of work and published only after a
/// successful commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub name: String,
    pub payload: serde_json::Value,
    pub raised_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new<P: Serialize>(name: &str, payload: &P) -> Result<Self> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| StageError::Config(format!("event '{}' payload: {}", name, e)))?;
        Ok(Self {
            name: name.to_string(),
            payload,
            raised_at: Utc::now(),
        })
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, events: Vec<DomainEvent>) -> Result<()>;
}

/// Sink that keeps published events in memory.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    published: Mutex<Vec<DomainEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Result<Vec<DomainEvent>> {
        Ok(self.published.lock()?.clone())
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn publish(&self, events: Vec<DomainEvent>) -> Result<()> {
        self.published.lock()?.extend(events);
        Ok(())
    }
}
