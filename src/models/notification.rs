use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::LocalizedText;
use crate::store::{collections, DocKey};

/// Lifecycle states. `completed`, `cancelled` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Scheduled,
    Sent,
    Completed,
    Cancelled,
    Failed,
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationStatus::Scheduled => "scheduled",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Completed => "completed",
            NotificationStatus::Cancelled => "cancelled",
            NotificationStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for NotificationStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(NotificationStatus::Scheduled),
            "sent" => Ok(NotificationStatus::Sent),
            "completed" => Ok(NotificationStatus::Completed),
            "cancelled" => Ok(NotificationStatus::Cancelled),
            "failed" => Ok(NotificationStatus::Failed),
            _ => Err(crate::error::Error::Validation(format!(
                "unknown status: {s}"
            ))),
        }
    }
}

/// Aggregated yes/no counters. `total_customers` is the snapshot of the
/// ward's customer count taken at creation and refreshed at send time; it is
/// the response-rate denominator and is never live-recomputed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseStats {
    pub yes_count: i64,
    pub no_count: i64,
    pub total_customers: i64,
}

/// One scheduled pickup announcement targeted at a ward.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub ward_id: Uuid,
    /// Denormalized for display and topic addressing.
    pub ward_number: i64,
    pub scheduled_at: DateTime<Utc>,
    pub message_text: LocalizedText,
    pub status: NotificationStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    /// Fanout receipt id returned by the push service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<String>,
    /// Dedup claim for the at-least-once post-commit fanout reaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fanout_claimed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Set on the original when a reschedule supersedes it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rescheduled_to: Option<Uuid>,
    /// Set on the replacement, pointing back at the original.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_notification_id: Option<Uuid>,
    pub is_rescheduled: bool,
    /// Admin-supplied reason carried on the replacement record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reschedule_reason: Option<String>,
    pub response_stats: ResponseStats,
}

impl Notification {
    pub fn doc_key(id: Uuid) -> DocKey {
        DocKey::new(collections::NOTIFICATIONS, id.to_string())
    }

    /// Responses are accepted while the notification is `sent` and the
    /// pickup time has not passed.
    pub fn response_window_open(&self, now: DateTime<Utc>) -> bool {
        self.status == NotificationStatus::Sent && now <= self.scheduled_at
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationRequest {
    pub ward_number: i64,
    /// RFC 3339 date-time.
    pub scheduled_at: String,
    pub message_text: String,
    pub message_text_alt: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    /// RFC 3339 date-time of the replacement pickup.
    pub scheduled_at: String,
    pub message_text: Option<String>,
    pub message_text_alt: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNotificationsQuery {
    pub ward_number: Option<i64>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}
