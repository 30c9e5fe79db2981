use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Customer, ReminderChannel, ReminderKind, ReminderLogStatus};
use crate::status::ReservationStatus;

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    /// Name of the store bound to this staff account. Store resolution is
    /// strictly by ownership, so every account gets its store at signup.
    pub store_name: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub email: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct StoreMeResponse {
    pub store_id: Uuid,
    pub store_name: String,
}

// -- Reservations --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationRequest {
    /// Either an existing customer id or a display name for a new walk-in
    /// customer. Exactly one is required.
    pub customer_id: Option<Uuid>,
    pub customer_name: Option<String>,
    /// JST wall-clock time, `YYYY-MM-DDTHH:MM:SS`. This is the single
    /// boundary where naive local time is accepted; it is converted to a UTC
    /// instant before anything is stored.
    pub start_at: String,
    pub duration_min: u32,
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationResponse {
    pub reservation: crate::models::Reservation,
    pub line_notification: LineNotification,
}

/// Outcome of the creation-time confirmation push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineNotification {
    Sent,
    /// Push failed (typically: recipient has not added the bot as a friend);
    /// the message is parked in the outbox for later delivery.
    Queued,
    /// The customer has no LINE identity yet, so there is nothing to send.
    Skipped,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReservationRequest {
    pub start_at: Option<String>,
    pub duration_min: Option<u32>,
    /// Tri-state: an absent field keeps the stored note, an explicit null
    /// clears it, a string replaces it.
    #[serde(default, deserialize_with = "double_option")]
    pub note: Option<Option<String>>,
}

fn double_option<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(de).map(Some)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkTokenResponse {
    pub liff_url: String,
    pub link_token: String,
    pub link_expires_at: DateTime<Utc>,
}

// -- Link confirmation (LIFF) --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmLinkRequest {
    pub reservation_id: Uuid,
    pub token: String,
    pub line_user_id: String,
    /// LINE profile display name, used only when a brand-new customer record
    /// has to be created for this identity.
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmLinkResponse {
    pub ok: bool,
    pub already_linked: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiffCancelRequest {
    pub reservation_id: Uuid,
    pub line_user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiffChangeRequest {
    pub reservation_id: Uuid,
    pub line_user_id: String,
}

/// One row of the customer-facing reservation list.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiffReservation {
    pub id: Uuid,
    pub store_name: String,
    pub start_at: DateTime<Utc>,
    pub duration_min: u32,
    pub status: ReservationStatus,
    pub note: Option<String>,
}

// -- Reminder reporting --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderOverviewResponse {
    pub store_id: Uuid,
    pub schedule: Vec<ScheduleEntry>,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub kind: ReminderKind,
    pub reservation_id: Uuid,
    pub reservation_start_at: DateTime<Utc>,
    pub send_at: DateTime<Utc>,
    pub customer_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub kind: ReminderKind,
    pub channel: ReminderChannel,
    pub status: ReminderLogStatus,
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
    pub reservation_start_at: DateTime<Utc>,
    pub customer_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderCustomersResponse {
    pub customers: Vec<ReminderCustomerEntry>,
}

/// Per-customer roll-up: the customer's next upcoming reservation and
/// whether each reminder kind has already gone out for it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderCustomerEntry {
    pub customer_id: Uuid,
    pub customer_name: String,
    pub phone_number: Option<String>,
    pub next_reservation_at: DateTime<Utc>,
    pub status: ReservationStatus,
    pub sent_7d: bool,
    pub sent_1d: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderStatsResponse {
    pub this_month: u64,
    pub next_month: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationSummary {
    pub id: Uuid,
    pub start_at: DateTime<Utc>,
    pub duration_min: u32,
    pub status: ReservationStatus,
    pub customer_name: Option<String>,
    pub note: Option<String>,
}

// -- Customers --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDetailResponse {
    pub customer: Customer,
    pub reservations: Vec<ReservationSummary>,
}

// -- Sweeps --

/// Aggregate result of one dispatch or outbox sweep. Partial failure is
/// reported here, never raised.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepReport {
    pub sent: usize,
    pub failed: usize,
}
