/// Database row types — these map directly to SQLite rows.
/// Distinct from the yoyaku-types API models to keep the DB layer
/// independent. Ids and timestamps are stored as TEXT and parsed at the
/// API boundary.

pub struct StaffUserRow {
    pub id: String,
    pub email: String,
    pub password: String,
}

pub struct StoreRow {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub user_id: Option<String>,
}

pub struct CustomerRow {
    pub id: String,
    pub display_name: String,
    pub phone_number: Option<String>,
    pub line_user_id: Option<String>,
}

pub struct ReservationRow {
    pub id: String,
    pub store_id: String,
    pub customer_id: Option<String>,
    pub start_at: String,
    pub end_at: String,
    pub duration_min: i64,
    pub status: String,
    pub note: Option<String>,
    pub link_token: Option<String>,
    pub link_status: Option<String>,
    pub link_expires_at: Option<String>,
}

/// One reservation due for a reminder, joined with its recipient identity.
/// A single deterministic shape — the join never comes back as
/// "maybe array, maybe scalar".
pub struct DueReservationRow {
    pub reservation_id: String,
    pub start_at: String,
    pub line_user_id: String,
    pub store_name: String,
}

/// Contact context for webhook reply handling.
pub struct ReservationContactRow {
    pub reservation_id: String,
    pub status: String,
    pub customer_line_user_id: Option<String>,
    pub store_phone: Option<String>,
}

/// An upcoming live reservation joined with its customer, for the
/// per-customer reminder roll-up.
pub struct CustomerReservationRow {
    pub reservation_id: String,
    pub start_at: String,
    pub status: String,
    pub customer_id: String,
    pub customer_name: String,
    pub phone_number: Option<String>,
}

pub struct UpcomingReservationRow {
    pub id: String,
    pub start_at: String,
    pub duration_min: i64,
    pub status: String,
    pub note: Option<String>,
    pub customer_name: Option<String>,
}

pub struct ReminderLogRow {
    pub id: String,
    pub reservation_id: String,
    pub kind: String,
    pub channel: String,
    pub status: String,
    pub error: Option<String>,
    pub attempted_at: String,
}

pub struct ReminderHistoryRow {
    pub id: String,
    pub reservation_id: String,
    pub kind: String,
    pub channel: String,
    pub status: String,
    pub error: Option<String>,
    pub attempted_at: String,
    pub reservation_start_at: String,
    pub customer_name: Option<String>,
}

pub struct OutboxRow {
    pub id: String,
    pub line_user_id: String,
    pub customer_id: Option<String>,
    pub reservation_id: Option<String>,
    pub message: String,
    pub status: String,
    pub attempts: i64,
    pub last_error: Option<String>,
}

pub struct LiffReservationRow {
    pub id: String,
    pub start_at: String,
    pub duration_min: i64,
    pub status: String,
    pub note: Option<String>,
    pub store_name: String,
}
