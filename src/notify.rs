use chrono::NaiveDateTime;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    Enrolled { class_id: Ulid, enrollment_id: Ulid, student_id: Ulid },
    EnrollmentDropped { class_id: Ulid, enrollment_id: Ulid, student_id: Ulid },
    EnrollmentCancelled { class_id: Ulid, enrollment_id: Ulid, student_id: Ulid },
    EnrollmentDeleted { class_id: Ulid, enrollment_id: Ulid, student_id: Ulid },
    ClassUpdated { class_id: Ulid },
    ClassStatusChanged { class_id: Ulid, active: bool },
    ClassSessionsScheduled { class_id: Ulid, sessions: usize },
    SessionRequested { session_id: Ulid, start: NaiveDateTime },
    SessionConfirmed { session_id: Ulid },
    SessionCancelled { session_id: Ulid, reason: Option<String> },
    SessionRescheduled { session_id: Ulid, from: NaiveDateTime, to: NaiveDateTime },
}

impl NotificationKind {
    pub fn label(&self) -> &'static str {
        match self {
            NotificationKind::Enrolled { .. } => "enrolled",
            NotificationKind::EnrollmentDropped { .. } => "enrollment_dropped",
            NotificationKind::EnrollmentCancelled { .. } => "enrollment_cancelled",
            NotificationKind::EnrollmentDeleted { .. } => "enrollment_deleted",
            NotificationKind::ClassUpdated { .. } => "class_updated",
            NotificationKind::ClassStatusChanged { .. } => "class_status_changed",
            NotificationKind::ClassSessionsScheduled { .. } => "class_sessions_scheduled",
            NotificationKind::SessionRequested { .. } => "session_requested",
            NotificationKind::SessionConfirmed { .. } => "session_confirmed",
            NotificationKind::SessionCancelled { .. } => "session_cancelled",
            NotificationKind::SessionRescheduled { .. } => "session_rescheduled",
        }
    }
}

/// One message for one counterpart user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: Ulid,
    pub kind: NotificationKind,
    pub at: NaiveDateTime,
}

/// Broadcast hub keyed by recipient user.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a user's notifications. Creates the channel if needed.
    pub fn subscribe(&self, user_id: Ulid) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Deliver to the recipient's channel. No-op if nobody is listening;
    /// a channel whose receivers have all gone is dropped here.
    pub fn send(&self, notification: Notification) {
        metrics::counter!(
            crate::observability::NOTIFICATIONS_TOTAL,
            "kind" => notification.kind.label()
        )
        .increment(1);
        let recipient = notification.recipient;
        let delivered = match self.channels.get(&recipient) {
            Some(sender) => sender.send(notification).is_ok(),
            None => return,
        };
        if !delivered {
            self.remove(&recipient);
        }
    }

    /// Drop a user's channel once all their receivers are gone.
    pub fn remove(&self, user_id: &Ulid) {
        self.channels
            .remove_if(user_id, |_, sender| sender.receiver_count() == 0);
    }
}
