use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::{LinkStatus, ReservationStatus};

// -- JWT Claims --

/// JWT claims shared between yoyaku-api (login issuance) and the auth
/// middleware. Canonical definition lives here in yoyaku-types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub exp: usize,
}

// -- Reminders --

/// Fixed reminder offsets. The kind is part of the idempotency key, so a
/// reservation may legitimately receive one of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReminderKind {
    #[serde(rename = "7d_before")]
    SevenDaysBefore,
    #[serde(rename = "1d_before")]
    OneDayBefore,
}

impl ReminderKind {
    pub const ALL: [ReminderKind; 2] = [ReminderKind::SevenDaysBefore, ReminderKind::OneDayBefore];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderKind::SevenDaysBefore => "7d_before",
            ReminderKind::OneDayBefore => "1d_before",
        }
    }

    pub fn parse(s: &str) -> Option<ReminderKind> {
        match s {
            "7d_before" => Some(ReminderKind::SevenDaysBefore),
            "1d_before" => Some(ReminderKind::OneDayBefore),
            _ => None,
        }
    }

    /// Days between the target civil day and the reservation's civil day.
    pub fn offset_days(&self) -> i64 {
        match self {
            ReminderKind::SevenDaysBefore => 7,
            ReminderKind::OneDayBefore => 1,
        }
    }
}

/// Delivery channel of a reminder attempt. Only LINE exists today, but the
/// channel is part of the reminder-log key so new channels never collide
/// with old log rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderChannel {
    Line,
}

impl ReminderChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderChannel::Line => "line",
        }
    }

    pub fn parse(s: &str) -> Option<ReminderChannel> {
        match s {
            "line" => Some(ReminderChannel::Line),
            _ => None,
        }
    }
}

/// Outcome of one reminder delivery attempt, as logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderLogStatus {
    Sent,
    Failed,
}

impl ReminderLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderLogStatus::Sent => "sent",
            ReminderLogStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<ReminderLogStatus> {
        match s {
            "sent" => Some(ReminderLogStatus::Sent),
            "failed" => Some(ReminderLogStatus::Failed),
            _ => None,
        }
    }
}

// -- Domain models (API-facing) --

#[derive(Debug, Clone, Serialize)]
pub struct Customer {
    pub id: Uuid,
    pub display_name: String,
    pub phone_number: Option<String>,
    pub line_user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reservation {
    pub id: Uuid,
    pub store_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub duration_min: u32,
    pub status: ReservationStatus,
    pub note: Option<String>,
    pub link_status: Option<LinkStatus>,
}
