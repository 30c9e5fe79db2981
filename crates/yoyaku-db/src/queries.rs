use crate::models::{
    CustomerReservationRow, CustomerRow, DueReservationRow, LiffReservationRow, OutboxRow,
    ReminderHistoryRow, ReminderLogRow, ReservationContactRow, ReservationRow, StaffUserRow,
    StoreRow, UpcomingReservationRow,
};
use crate::Database;
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Staff users --

    pub fn create_staff_user(
        &self,
        id: &str,
        email: &str,
        password_hash: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO staff_users (id, email, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id, email, password_hash, created_at),
            )?;
            Ok(())
        })
    }

    pub fn get_staff_by_email(&self, email: &str) -> Result<Option<StaffUserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, email, password FROM staff_users WHERE email = ?1",
                [email],
                |row| {
                    Ok(StaffUserRow {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        password: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    // -- Stores --

    pub fn create_store(
        &self,
        id: &str,
        name: &str,
        phone_number: Option<&str>,
        email: Option<&str>,
        user_id: Option<&str>,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO stores (id, name, phone_number, email, user_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, name, phone_number, email, user_id, created_at),
            )?;
            Ok(())
        })
    }

    /// Store resolution is fail-closed: a staff user maps to a store only
    /// through `stores.user_id`. No email or first-row fallback.
    pub fn get_store_for_user(&self, user_id: &str) -> Result<Option<StoreRow>> {
        self.with_conn(|conn| query_store(conn, "user_id", user_id))
    }

    pub fn get_store(&self, id: &str) -> Result<Option<StoreRow>> {
        self.with_conn(|conn| query_store(conn, "id", id))
    }

    // -- Customers --

    pub fn create_customer(
        &self,
        id: &str,
        display_name: &str,
        phone_number: Option<&str>,
        line_user_id: Option<&str>,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO customers (id, display_name, phone_number, line_user_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, display_name, phone_number, line_user_id, created_at),
            )?;
            Ok(())
        })
    }

    pub fn get_customer(&self, id: &str) -> Result<Option<CustomerRow>> {
        self.with_conn(|conn| query_customer(conn, "id", id))
    }

    pub fn get_customer_by_line_id(&self, line_user_id: &str) -> Result<Option<CustomerRow>> {
        self.with_conn(|conn| query_customer(conn, "line_user_id", line_user_id))
    }

    // -- Reservations --

    #[allow(clippy::too_many_arguments)]
    pub fn create_reservation(
        &self,
        id: &str,
        store_id: &str,
        customer_id: Option<&str>,
        start_at: &str,
        end_at: &str,
        duration_min: i64,
        note: Option<&str>,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO reservations
                     (id, store_id, customer_id, start_at, end_at, duration_min, status, note, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'scheduled', ?7, ?8)",
                (id, store_id, customer_id, start_at, end_at, duration_min, note, created_at),
            )?;
            Ok(())
        })
    }

    pub fn get_reservation(&self, id: &str) -> Result<Option<ReservationRow>> {
        self.with_conn(|conn| query_reservation(conn, id))
    }

    /// Reservation joined with its customer's LINE identity and the store's
    /// phone number, for webhook reply handling.
    pub fn get_reservation_contact(&self, id: &str) -> Result<Option<ReservationContactRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT r.id, r.status, c.line_user_id, s.phone_number
                 FROM reservations r
                 LEFT JOIN customers c ON r.customer_id = c.id
                 JOIN stores s ON r.store_id = s.id
                 WHERE r.id = ?1",
                [id],
                |row| {
                    Ok(ReservationContactRow {
                        reservation_id: row.get(0)?,
                        status: row.get(1)?,
                        customer_line_user_id: row.get(2)?,
                        store_phone: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn list_store_reservations(
        &self,
        store_id: &str,
        from_ts: &str,
    ) -> Result<Vec<UpcomingReservationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.start_at, r.duration_min, r.status, r.note, c.display_name
                 FROM reservations r
                 LEFT JOIN customers c ON r.customer_id = c.id
                 WHERE r.store_id = ?1 AND r.start_at >= ?2
                 ORDER BY r.start_at ASC",
            )?;
            let rows = stmt
                .query_map((store_id, from_ts), |row| {
                    Ok(UpcomingReservationRow {
                        id: row.get(0)?,
                        start_at: row.get(1)?,
                        duration_min: row.get(2)?,
                        status: row.get(3)?,
                        note: row.get(4)?,
                        customer_name: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Upcoming live reservations joined with their customer, ordered by
    /// start time. Walk-in rows without a customer are excluded.
    pub fn upcoming_customer_reservations(
        &self,
        store_id: &str,
        from_ts: &str,
    ) -> Result<Vec<CustomerReservationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.start_at, r.status, c.id, c.display_name, c.phone_number
                 FROM reservations r
                 JOIN customers c ON r.customer_id = c.id
                 WHERE r.store_id = ?1 AND r.start_at >= ?2
                   AND r.status IN ('scheduled', 'visit_planned')
                 ORDER BY r.start_at ASC",
            )?;
            let rows = stmt
                .query_map((store_id, from_ts), |row| {
                    Ok(CustomerReservationRow {
                        reservation_id: row.get(0)?,
                        start_at: row.get(1)?,
                        status: row.get(2)?,
                        customer_id: row.get(3)?,
                        customer_name: row.get(4)?,
                        phone_number: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// One customer's reservations at one store, oldest first.
    pub fn list_customer_reservations(
        &self,
        customer_id: &str,
        store_id: &str,
    ) -> Result<Vec<UpcomingReservationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.start_at, r.duration_min, r.status, r.note, c.display_name
                 FROM reservations r
                 JOIN customers c ON r.customer_id = c.id
                 WHERE r.customer_id = ?1 AND r.store_id = ?2
                 ORDER BY r.start_at ASC",
            )?;
            let rows = stmt
                .query_map((customer_id, store_id), |row| {
                    Ok(UpcomingReservationRow {
                        id: row.get(0)?,
                        start_at: row.get(1)?,
                        duration_min: row.get(2)?,
                        status: row.get(3)?,
                        note: row.get(4)?,
                        customer_name: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_reservations_for_line_user(
        &self,
        line_user_id: &str,
        from_ts: &str,
    ) -> Result<Vec<LiffReservationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.start_at, r.duration_min, r.status, r.note, s.name
                 FROM reservations r
                 JOIN customers c ON r.customer_id = c.id
                 JOIN stores s ON r.store_id = s.id
                 WHERE c.line_user_id = ?1 AND r.start_at >= ?2
                 ORDER BY r.start_at ASC",
            )?;
            let rows = stmt
                .query_map((line_user_id, from_ts), |row| {
                    Ok(LiffReservationRow {
                        id: row.get(0)?,
                        start_at: row.get(1)?,
                        duration_min: row.get(2)?,
                        status: row.get(3)?,
                        note: row.get(4)?,
                        store_name: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_reservation_status(&self, id: &str, status: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE reservations SET status = ?2 WHERE id = ?1",
                (id, status),
            )?;
            Ok(())
        })
    }

    pub fn update_reservation_schedule(
        &self,
        id: &str,
        start_at: &str,
        end_at: &str,
        duration_min: i64,
        note: Option<&str>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE reservations
                 SET start_at = ?2, end_at = ?3, duration_min = ?4, note = ?5
                 WHERE id = ?1",
                (id, start_at, end_at, duration_min, note),
            )?;
            Ok(())
        })
    }

    pub fn set_link_token(
        &self,
        id: &str,
        token: &str,
        qr_url: &str,
        expires_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE reservations
                 SET link_token = ?2, link_status = 'pending',
                     link_qr_url = ?3, link_expires_at = ?4
                 WHERE id = ?1",
                (id, token, qr_url, expires_at),
            )?;
            Ok(())
        })
    }

    pub fn count_active_reservations_between(
        &self,
        store_id: &str,
        start_ts: &str,
        end_ts: &str,
    ) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM reservations
                 WHERE store_id = ?1
                   AND status IN ('scheduled', 'visit_planned')
                   AND start_at >= ?2 AND start_at < ?3",
                (store_id, start_ts, end_ts),
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    // -- Reminder eligibility --

    /// Reservations starting inside `[start_ts, end_ts)` that still owe a
    /// reminder of `kind` on `channel`. The sent-log exclusion here is the
    /// sole idempotency gate; failed attempts are deliberately NOT excluded
    /// so the next sweep retries them.
    pub fn due_reservations(
        &self,
        start_ts: &str,
        end_ts: &str,
        kind: &str,
        channel: &str,
    ) -> Result<Vec<DueReservationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.start_at, c.line_user_id, s.name
                 FROM reservations r
                 JOIN customers c ON r.customer_id = c.id
                 JOIN stores s ON r.store_id = s.id
                 WHERE r.start_at >= ?1 AND r.start_at < ?2
                   AND r.status IN ('scheduled', 'visit_planned')
                   AND c.line_user_id IS NOT NULL
                   AND NOT EXISTS (
                       SELECT 1 FROM reminder_logs l
                       WHERE l.reservation_id = r.id
                         AND l.kind = ?3 AND l.channel = ?4
                         AND l.status = 'sent'
                   )
                 ORDER BY r.start_at ASC",
            )?;
            let rows = stmt
                .query_map((start_ts, end_ts, kind, channel), |row| {
                    Ok(DueReservationRow {
                        reservation_id: row.get(0)?,
                        start_at: row.get(1)?,
                        line_user_id: row.get(2)?,
                        store_name: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Reminder logs --

    /// Idempotent: a second sent row for the same key is silently ignored.
    /// This guards the race between two sweep instances that both saw the
    /// reservation as due.
    pub fn record_reminder_sent(
        &self,
        id: &str,
        reservation_id: &str,
        kind: &str,
        channel: &str,
        attempted_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO reminder_logs (id, reservation_id, kind, channel, status, attempted_at)
                 VALUES (?1, ?2, ?3, ?4, 'sent', ?5)
                 ON CONFLICT(reservation_id, kind, channel) WHERE status = 'sent'
                 DO NOTHING",
                (id, reservation_id, kind, channel, attempted_at),
            )?;
            Ok(())
        })
    }

    /// Not idempotency-suppressed: repeated failures overwrite the previous
    /// failure row, keeping only the most recent error text.
    pub fn record_reminder_failure(
        &self,
        id: &str,
        reservation_id: &str,
        kind: &str,
        channel: &str,
        error: &str,
        attempted_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO reminder_logs (id, reservation_id, kind, channel, status, error, attempted_at)
                 VALUES (?1, ?2, ?3, ?4, 'failed', ?5, ?6)
                 ON CONFLICT(reservation_id, kind, channel) WHERE status = 'failed'
                 DO UPDATE SET error = excluded.error, attempted_at = excluded.attempted_at",
                (id, reservation_id, kind, channel, error, attempted_at),
            )?;
            Ok(())
        })
    }

    pub fn reminder_logs_for_reservation(&self, reservation_id: &str) -> Result<Vec<ReminderLogRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, reservation_id, kind, channel, status, error, attempted_at
                 FROM reminder_logs WHERE reservation_id = ?1
                 ORDER BY attempted_at ASC",
            )?;
            let rows = stmt
                .query_map([reservation_id], |row| {
                    Ok(ReminderLogRow {
                        id: row.get(0)?,
                        reservation_id: row.get(1)?,
                        kind: row.get(2)?,
                        channel: row.get(3)?,
                        status: row.get(4)?,
                        error: row.get(5)?,
                        attempted_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-check which of `reservation_ids` already have a sent log for
    /// the given kind/channel.
    pub fn sent_reservation_ids(
        &self,
        kind: &str,
        channel: &str,
        reservation_ids: &[String],
    ) -> Result<Vec<String>> {
        if reservation_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (3..=reservation_ids.len() + 2).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT reservation_id FROM reminder_logs
                 WHERE kind = ?1 AND channel = ?2 AND status = 'sent'
                   AND reservation_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&kind, &channel];
            for id in reservation_ids {
                params.push(id as &dyn rusqlite::types::ToSql);
            }

            let rows = stmt
                .query_map(params.as_slice(), |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn reminder_history_for_store(
        &self,
        store_id: &str,
        limit: u32,
    ) -> Result<Vec<ReminderHistoryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT l.id, l.reservation_id, l.kind, l.channel, l.status, l.error,
                        l.attempted_at, r.start_at, c.display_name
                 FROM reminder_logs l
                 JOIN reservations r ON l.reservation_id = r.id
                 LEFT JOIN customers c ON r.customer_id = c.id
                 WHERE r.store_id = ?1
                 ORDER BY l.attempted_at DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map((store_id, limit), |row| {
                    Ok(ReminderHistoryRow {
                        id: row.get(0)?,
                        reservation_id: row.get(1)?,
                        kind: row.get(2)?,
                        channel: row.get(3)?,
                        status: row.get(4)?,
                        error: row.get(5)?,
                        attempted_at: row.get(6)?,
                        reservation_start_at: row.get(7)?,
                        customer_name: row.get(8)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- LINE outbox --

    pub fn enqueue_outbox(
        &self,
        id: &str,
        line_user_id: &str,
        customer_id: Option<&str>,
        reservation_id: Option<&str>,
        message: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO line_outbox (id, line_user_id, customer_id, reservation_id, message, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
                (id, line_user_id, customer_id, reservation_id, message, created_at),
            )?;
            Ok(())
        })
    }

    /// Oldest-first batch of pending entries for the periodic sweep.
    pub fn pending_outbox(&self, limit: u32) -> Result<Vec<OutboxRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, line_user_id, customer_id, reservation_id, message, status, attempts, last_error
                 FROM line_outbox
                 WHERE status = 'pending'
                 ORDER BY created_at ASC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], map_outbox_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// All pending entries for one identity, oldest first — the
    /// "recipient became reachable" drain.
    pub fn pending_outbox_for_user(&self, line_user_id: &str) -> Result<Vec<OutboxRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, line_user_id, customer_id, reservation_id, message, status, attempts, last_error
                 FROM line_outbox
                 WHERE status = 'pending' AND line_user_id = ?1
                 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map([line_user_id], map_outbox_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn mark_outbox_sent(&self, id: &str, sent_at: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE line_outbox
                 SET status = 'sent', sent_at = ?2, last_error = NULL
                 WHERE id = ?1",
                (id, sent_at),
            )?;
            Ok(())
        })
    }

    /// Records a failed attempt. The entry stays pending (so the next sweep
    /// retries it) until `max_attempts` is reached, then flips to the
    /// terminal failed state.
    pub fn record_outbox_failure(
        &self,
        id: &str,
        error: &str,
        attempted_at: &str,
        max_attempts: i64,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE line_outbox
                 SET attempts = attempts + 1,
                     last_error = ?2,
                     attempted_at = ?3,
                     status = CASE WHEN attempts + 1 >= ?4 THEN 'failed' ELSE 'pending' END
                 WHERE id = ?1",
                (id, error, attempted_at, max_attempts),
            )?;
            Ok(())
        })
    }

    pub fn get_outbox(&self, id: &str) -> Result<Option<OutboxRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, line_user_id, customer_id, reservation_id, message, status, attempts, last_error
                 FROM line_outbox WHERE id = ?1",
                [id],
                map_outbox_row,
            )
            .optional()
        })
    }
}

fn query_store(conn: &Connection, column: &str, value: &str) -> Result<Option<StoreRow>> {
    let sql = format!(
        "SELECT id, name, address, phone_number, email, user_id FROM stores WHERE {} = ?1",
        column
    );
    conn.query_row(&sql, [value], |row| {
        Ok(StoreRow {
            id: row.get(0)?,
            name: row.get(1)?,
            address: row.get(2)?,
            phone_number: row.get(3)?,
            email: row.get(4)?,
            user_id: row.get(5)?,
        })
    })
    .optional()
}

fn query_customer(conn: &Connection, column: &str, value: &str) -> Result<Option<CustomerRow>> {
    let sql = format!(
        "SELECT id, display_name, phone_number, line_user_id FROM customers WHERE {} = ?1",
        column
    );
    conn.query_row(&sql, [value], |row| {
        Ok(CustomerRow {
            id: row.get(0)?,
            display_name: row.get(1)?,
            phone_number: row.get(2)?,
            line_user_id: row.get(3)?,
        })
    })
    .optional()
}

pub(crate) fn query_reservation(conn: &Connection, id: &str) -> Result<Option<ReservationRow>> {
    conn.query_row(
        "SELECT id, store_id, customer_id, start_at, end_at, duration_min, status, note,
                link_token, link_status, link_expires_at
         FROM reservations WHERE id = ?1",
        [id],
        |row| {
            Ok(ReservationRow {
                id: row.get(0)?,
                store_id: row.get(1)?,
                customer_id: row.get(2)?,
                start_at: row.get(3)?,
                end_at: row.get(4)?,
                duration_min: row.get(5)?,
                status: row.get(6)?,
                note: row.get(7)?,
                link_token: row.get(8)?,
                link_status: row.get(9)?,
                link_expires_at: row.get(10)?,
            })
        },
    )
    .optional()
}

fn map_outbox_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxRow> {
    Ok(OutboxRow {
        id: row.get(0)?,
        line_user_id: row.get(1)?,
        customer_id: row.get(2)?,
        reservation_id: row.get(3)?,
        message: row.get(4)?,
        status: row.get(5)?,
        attempts: row.get(6)?,
        last_error: row.get(7)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
