use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS staff_users (
            id          TEXT PRIMARY KEY,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS stores (
            id            TEXT PRIMARY KEY,
            name          TEXT NOT NULL,
            address       TEXT,
            phone_number  TEXT,
            email         TEXT,
            user_id       TEXT REFERENCES staff_users(id),
            created_at    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_stores_user
            ON stores(user_id);

        CREATE TABLE IF NOT EXISTS customers (
            id            TEXT PRIMARY KEY,
            display_name  TEXT NOT NULL,
            phone_number  TEXT,
            line_user_id  TEXT UNIQUE,
            created_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS reservations (
            id               TEXT PRIMARY KEY,
            store_id         TEXT NOT NULL REFERENCES stores(id),
            customer_id      TEXT REFERENCES customers(id),
            start_at         TEXT NOT NULL,
            end_at           TEXT NOT NULL,
            duration_min     INTEGER NOT NULL,
            status           TEXT NOT NULL DEFAULT 'scheduled',
            note             TEXT,
            link_token       TEXT,
            link_status      TEXT,
            link_qr_url      TEXT,
            link_expires_at  TEXT,
            created_at       TEXT NOT NULL
        );

        -- Storage-layer overlap guard: one live reservation per store slot.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_reservations_slot
            ON reservations(store_id, start_at)
            WHERE status != 'cancelled';

        CREATE INDEX IF NOT EXISTS idx_reservations_start
            ON reservations(start_at, status);

        CREATE INDEX IF NOT EXISTS idx_reservations_customer
            ON reservations(customer_id);

        CREATE TABLE IF NOT EXISTS reminder_logs (
            id              TEXT PRIMARY KEY,
            reservation_id  TEXT NOT NULL REFERENCES reservations(id) ON DELETE CASCADE,
            kind            TEXT NOT NULL,
            channel         TEXT NOT NULL,
            status          TEXT NOT NULL,
            error           TEXT,
            attempted_at    TEXT NOT NULL
        );

        -- Idempotency gate: at most one sent row per (reservation, kind,
        -- channel). The latest failed attempt is kept alongside as history.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_reminder_logs_sent
            ON reminder_logs(reservation_id, kind, channel)
            WHERE status = 'sent';

        CREATE UNIQUE INDEX IF NOT EXISTS idx_reminder_logs_failed
            ON reminder_logs(reservation_id, kind, channel)
            WHERE status = 'failed';

        CREATE TABLE IF NOT EXISTS line_outbox (
            id              TEXT PRIMARY KEY,
            line_user_id    TEXT NOT NULL,
            customer_id     TEXT REFERENCES customers(id) ON DELETE SET NULL,
            reservation_id  TEXT REFERENCES reservations(id) ON DELETE CASCADE,
            message         TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'pending',
            attempts        INTEGER NOT NULL DEFAULT 0,
            last_error      TEXT,
            attempted_at    TEXT,
            sent_at         TEXT,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_outbox_pending
            ON line_outbox(status, created_at);

        CREATE INDEX IF NOT EXISTS idx_outbox_user
            ON line_outbox(line_user_id, status);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
