//! Determines which (reservation, kind) pairs are due to fire at a given
//! "now". Read-only; side effects happen in the dispatcher.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::debug;

use yoyaku_db::{parse_ts, ts, Database};
use yoyaku_types::models::{ReminderChannel, ReminderKind};

use crate::time;

#[derive(Debug, Clone)]
pub struct DueReminder {
    pub reservation_id: String,
    pub kind: ReminderKind,
    pub start_at: DateTime<Utc>,
    pub line_user_id: String,
    pub store_name: String,
}

/// For each kind, targets the civil day `now + offset` and collects
/// reservations starting on that day that have no sent log yet. The two
/// kinds use independent exclusion sets: a reservation seen in the 7-day
/// window never fires the 1-day reminder early, and may legitimately
/// receive both kinds on their respective days.
pub fn due_reminders(db: &Database, now: DateTime<Utc>) -> Result<Vec<DueReminder>> {
    let mut due = Vec::new();

    for kind in ReminderKind::ALL {
        let target = time::shift_civil_date(now, kind.offset_days());
        let (start, end) = time::civil_day_utc_bounds(target);

        let rows = db.due_reservations(
            &ts(start),
            &ts(end),
            kind.as_str(),
            ReminderChannel::Line.as_str(),
        )?;
        debug!("{} candidates for {} on {}", rows.len(), kind.as_str(), target);

        for row in rows {
            due.push(DueReminder {
                start_at: parse_ts(&row.start_at)?,
                reservation_id: row.reservation_id,
                kind,
                line_user_id: row.line_user_id,
                store_name: row.store_name,
            });
        }
    }

    Ok(due)
}
