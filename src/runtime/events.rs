use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::runtime::execution::ExecutionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEventType {
    ActivityCancelled,
    ActivityStarted,
}

impl fmt::Display for LifecycleEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEventType::ActivityCancelled => write!(f, "ACTIVITY_CANCELLED"),
            LifecycleEventType::ActivityStarted => write!(f, "ACTIVITY_STARTED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub event_type: LifecycleEventType,
    pub activity_id: String,
    pub process_instance_id: Uuid,
    pub execution_id: ExecutionId,
}

/// Receives lifecycle events of a change-state call, synchronously and in order.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, event: &LifecycleEvent);
}

/// Discards everything.
pub struct NullSink;

impl NotificationSink for NullSink {
    fn deliver(&self, _event: &LifecycleEvent) {}
}

pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn deliver(&self, event: &LifecycleEvent) {
        info!(
            instance_id = %event.process_instance_id,
            execution_id = %event.execution_id,
            activity_id = %event.activity_id,
            "{}", event.event_type
        );
    }
}

/// Keeps every delivered event, mostly for tests.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl NotificationSink for RecordingSink {
    fn deliver(&self, event: &LifecycleEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event.clone());
    }
}

/// Buffers the events of one call until its edits are committed.
pub struct Notifier {
    process_instance_id: Uuid,
    buffer: Vec<LifecycleEvent>,
}

impl Notifier {
    pub fn new(process_instance_id: Uuid) -> Self {
        Self {
            process_instance_id,
            buffer: Vec::new(),
        }
    }

    pub fn activity_cancelled(&mut self, execution_id: ExecutionId, activity_id: &str) {
        self.push(LifecycleEventType::ActivityCancelled, execution_id, activity_id);
    }

    pub fn activity_started(&mut self, execution_id: ExecutionId, activity_id: &str) {
        self.push(LifecycleEventType::ActivityStarted, execution_id, activity_id);
    }

    fn push(&mut self, event_type: LifecycleEventType, execution_id: ExecutionId, activity_id: &str) {
        self.buffer.push(LifecycleEvent {
            event_type,
            activity_id: activity_id.to_string(),
            process_instance_id: self.process_instance_id,
            execution_id,
        });
    }

    pub fn into_events(self) -> Vec<LifecycleEvent> {
        self.buffer
    }
}

pub fn deliver_all(sink: &dyn NotificationSink, events: &[LifecycleEvent]) {
    for event in events {
        sink.deliver(event);
    }
}
