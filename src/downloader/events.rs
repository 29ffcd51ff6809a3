use serde::Serialize;

use crate::model::record::{TaskRecord, TaskStatus};

/// Events emitted by the download system
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum TaskEvent {
    /// Task was created and admitted to the waiting queue
    Added { record: TaskRecord },

    /// Task status changed; carries the full record so listeners can
    /// filter on status, completion or flags
    StatusChanged { record: TaskRecord },

    /// Progress advanced (download in progress)
    ProgressUpdated {
        id: i64,
        downloaded_bytes: u64,
        total_bytes: i64,
        realtime_bps: f64,
        percent: i32,
    },

    /// Task reached the terminal Complete state.
    ///
    /// Delivery is at-least-once per completion transition; duplicates
    /// are harmless because `is_complete` is latched.
    Completed { record: TaskRecord, play_sound: bool },

    /// Task was removed or deleted
    Removed { id: i64 },
}

impl TaskEvent {
    /// Get the task id from any event type
    pub fn task_id(&self) -> i64 {
        match self {
            TaskEvent::Added { record } => record.id,
            TaskEvent::StatusChanged { record } => record.id,
            TaskEvent::ProgressUpdated { id, .. } => *id,
            TaskEvent::Completed { record, .. } => record.id,
            TaskEvent::Removed { id } => *id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            TaskEvent::Added { .. } => "ADDED",
            TaskEvent::StatusChanged { .. } => "STATUS_CHANGED",
            TaskEvent::ProgressUpdated { .. } => "PROGRESS_UPDATED",
            TaskEvent::Completed { .. } => "COMPLETED",
            TaskEvent::Removed { .. } => "REMOVED",
        }
    }
}

/// Event bus for publishing and subscribing to task events.
///
/// Cheap to clone; all clones publish into the same channel. Publishing
/// for a state transition always happens after the matching persistence
/// write.
#[derive(Clone)]
pub struct EventBus {
    sender: tokio::sync::broadcast::Sender<TaskEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: TaskEvent) {
        let event_type = event.event_type();
        let task_id = event.task_id();

        match self.sender.send(event) {
            Ok(subscriber_count) => {
                tracing::trace!(
                    "Published {} event for task {} to {} subscribers",
                    event_type,
                    task_id,
                    subscriber_count
                );
            }
            Err(_) => {
                tracing::trace!("No subscribers for {} event (task {})", event_type, task_id);
            }
        }
    }

    /// Convenience: publish a status snapshot of the record.
    pub fn publish_status(&self, record: &TaskRecord) {
        self.publish(TaskEvent::StatusChanged {
            record: record.clone(),
        });
    }

    /// Convenience: publish completion, honoring the sound setting.
    pub fn publish_completed(&self, record: &TaskRecord) {
        debug_assert_eq!(record.status, TaskStatus::Complete);
        let play_sound =
            record.settings.play_notification_sound && !record.settings.hide_notification;
        self.publish(TaskEvent::Completed {
            record: record.clone(),
            play_sound,
        });
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();

        bus.publish(TaskEvent::ProgressUpdated {
            id: 42,
            downloaded_bytes: 1000,
            total_bytes: 10_000,
            realtime_bps: 100.0,
            percent: 10,
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.task_id(), 42);
        assert_eq!(event.event_type(), "PROGRESS_UPDATED");
    }

    #[tokio::test]
    async fn completed_event_carries_sound_flag() {
        use crate::config::SettingsSnapshot;
        use crate::model::record::TaskRecord;

        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let mut record =
            TaskRecord::new(1, "https://h/f", "/tmp", "f", SettingsSnapshot::default());
        record.apply_complete(Some(10));
        bus.publish_completed(&record);

        match rx.recv().await.unwrap() {
            TaskEvent::Completed { play_sound, .. } => assert!(play_sound),
            other => panic!("unexpected event {:?}", other.event_type()),
        }
    }
}
