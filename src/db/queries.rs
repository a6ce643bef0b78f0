use std::collections::HashSet;

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::models::{
    Apartment, Booking, BookingExtension, BookingStatus, DoorStatus, ExtensionStatus,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BOOKING_COLUMNS: &str = "id, apartment_id, renter_id, start_date, end_date, status, \
     extension_requested, extension_end_date, extension_duration_hours, extension_price, \
     payment_id, cancellation_reason, door_status, chat_room_id, created_at, updated_at";

const EXTENSION_COLUMNS: &str =
    "id, booking_id, duration_hours, price, status, payment_id, requested_at, approved_at";

pub fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(s: &str) -> anyhow::Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .map(|naive| naive.and_utc())
        .with_context(|| format!("invalid timestamp in booking store: {s}"))
}

fn parse_opt_ts(s: Option<String>) -> anyhow::Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

fn collect<T>(
    rows: impl Iterator<Item = rusqlite::Result<anyhow::Result<T>>>,
) -> anyhow::Result<Vec<T>> {
    let mut out = vec![];
    for row in rows {
        out.push(row??);
    }
    Ok(out)
}

// ── Apartments ──

pub fn insert_apartment(conn: &Connection, apartment: &Apartment) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO apartments (id, owner_id, is_free) VALUES (?1, ?2, ?3)",
        params![apartment.id, apartment.owner_id, apartment.is_free],
    )?;
    Ok(())
}

pub fn get_apartment(conn: &Connection, id: i64) -> anyhow::Result<Option<Apartment>> {
    let apartment = conn
        .query_row(
            "SELECT id, owner_id, is_free FROM apartments WHERE id = ?1",
            params![id],
            |row| {
                Ok(Apartment {
                    id: row.get(0)?,
                    owner_id: row.get(1)?,
                    is_free: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(apartment)
}

pub fn get_apartment_owner(conn: &Connection, apartment_id: i64) -> anyhow::Result<Option<i64>> {
    let owner = conn
        .query_row(
            "SELECT owner_id FROM apartments WHERE id = ?1",
            params![apartment_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(owner)
}

/// Returns true when the stored flag actually changed.
pub fn set_apartment_free(conn: &Connection, id: i64, is_free: bool) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE apartments SET is_free = ?1 WHERE id = ?2 AND is_free != ?1",
        params![is_free, id],
    )?;
    Ok(count > 0)
}

/// Writes every flag in one transaction and returns how many rows changed.
pub fn set_apartments_free_many(conn: &Connection, flags: &[(i64, bool)]) -> anyhow::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut changed = 0;
    {
        let mut stmt =
            tx.prepare("UPDATE apartments SET is_free = ?1 WHERE id = ?2 AND is_free != ?1")?;
        for (id, is_free) in flags {
            changed += stmt.execute(params![is_free, id])?;
        }
    }
    tx.commit()?;
    Ok(changed)
}

pub fn get_unavailable_apartment_ids(conn: &Connection) -> anyhow::Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM apartments WHERE is_free = 0 ORDER BY id")?;
    let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
    let mut ids = vec![];
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

// ── Availability ──

/// Conflict predicate shared by the single and batched availability queries.
/// Parameters: ?1 now, ?2 lookahead end, ?3 creation cutoff.
const CONFLICT_CLAUSE: &str = "(
        status = 'active'
        OR (status IN ('approved', 'pending', 'awaiting_payment')
            AND start_date <= ?2 AND end_date > ?1)
        OR (status = 'created' AND created_at >= ?3
            AND start_date <= ?2 AND end_date > ?1)
    )";

pub struct ConflictWindow {
    pub now: DateTime<Utc>,
    pub lookahead_end: DateTime<Utc>,
    pub creation_cutoff: DateTime<Utc>,
}

impl ConflictWindow {
    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(fmt_ts(&self.now)),
            Value::Text(fmt_ts(&self.lookahead_end)),
            Value::Text(fmt_ts(&self.creation_cutoff)),
        ]
    }
}

pub fn has_conflicting_booking(
    conn: &Connection,
    apartment_id: i64,
    window: &ConflictWindow,
) -> anyhow::Result<bool> {
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM bookings WHERE apartment_id = ?4 AND {CONFLICT_CLAUSE})"
    );
    let mut values = window.values();
    values.push(Value::Integer(apartment_id));
    let exists: bool = conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
    Ok(exists)
}

/// Subset of `apartment_ids` that currently have a conflicting booking.
pub fn conflicting_apartments(
    conn: &Connection,
    apartment_ids: &[i64],
    window: &ConflictWindow,
) -> anyhow::Result<HashSet<i64>> {
    if apartment_ids.is_empty() {
        return Ok(HashSet::new());
    }

    let placeholders = (0..apartment_ids.len())
        .map(|i| format!("?{}", i + 4))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT DISTINCT apartment_id FROM bookings
         WHERE apartment_id IN ({placeholders}) AND {CONFLICT_CLAUSE}"
    );

    let mut values = window.values();
    values.extend(apartment_ids.iter().map(|id| Value::Integer(*id)));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), |row| row.get::<_, i64>(0))?;
    let mut busy = HashSet::new();
    for row in rows {
        busy.insert(row?);
    }
    Ok(busy)
}

// ── Bookings ──

pub fn create_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO bookings (apartment_id, renter_id, start_date, end_date, status,
            extension_requested, extension_end_date, extension_duration_hours, extension_price,
            payment_id, cancellation_reason, door_status, chat_room_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            booking.apartment_id,
            booking.renter_id,
            fmt_ts(&booking.start_date),
            fmt_ts(&booking.end_date),
            booking.status.as_str(),
            booking.extension_requested,
            booking.extension_end_date.as_ref().map(fmt_ts),
            booking.extension_duration_hours,
            booking.extension_price,
            booking.payment_id,
            booking.cancellation_reason,
            booking.door_status.as_str(),
            booking.chat_room_id,
            fmt_ts(&booking.created_at),
            fmt_ts(&booking.updated_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_booking_by_id(conn: &Connection, id: i64) -> anyhow::Result<Option<Booking>> {
    let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1");
    let booking = conn
        .query_row(&sql, params![id], |row| Ok(parse_booking_row(row)))
        .optional()?;
    booking.transpose()
}

/// Records a paid, undecided extension on an active booking.
pub fn set_pending_extension(
    conn: &Connection,
    id: i64,
    extension_end: &DateTime<Utc>,
    duration_hours: i64,
    price: i64,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET extension_requested = 1, extension_end_date = ?1,
            extension_duration_hours = ?2, extension_price = ?3, updated_at = ?4
         WHERE id = ?5 AND status = 'active'",
        params![
            fmt_ts(extension_end),
            duration_hours,
            price,
            fmt_ts(&Utc::now()),
            id
        ],
    )?;
    Ok(count > 0)
}

pub fn clear_extension_fields(conn: &Connection, id: i64) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET extension_requested = 0, extension_end_date = NULL,
            extension_duration_hours = 0, extension_price = 0, updated_at = ?1
         WHERE id = ?2",
        params![fmt_ts(&Utc::now()), id],
    )?;
    Ok(count > 0)
}

/// Merges an approved extension: moves `end_date` and clears the pending fields.
pub fn apply_extension(conn: &Connection, id: i64, new_end: &DateTime<Utc>) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET end_date = ?1, extension_requested = 0, extension_end_date = NULL,
            extension_duration_hours = 0, extension_price = 0, updated_at = ?2
         WHERE id = ?3 AND status = 'active'",
        params![fmt_ts(new_end), fmt_ts(&Utc::now()), id],
    )?;
    Ok(count > 0)
}

/// Compare-and-set on status. Returns false when the row was no longer in `from`.
pub fn transition_status(
    conn: &Connection,
    id: i64,
    from: BookingStatus,
    to: BookingStatus,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        params![to.as_str(), fmt_ts(&Utc::now()), id, from.as_str()],
    )?;
    Ok(count > 0)
}

/// Moves an active booking to completed and closes the door in one statement.
pub fn complete_active_booking(conn: &Connection, id: i64) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = 'completed', door_status = 'closed', updated_at = ?1
         WHERE id = ?2 AND status = 'active'",
        params![fmt_ts(&Utc::now()), id],
    )?;
    Ok(count > 0)
}

pub fn cancel_booking(conn: &Connection, id: i64, reason: Option<&str>) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = 'canceled', cancellation_reason = ?1, door_status = 'closed',
            updated_at = ?2
         WHERE id = ?3 AND status NOT IN ('completed', 'canceled', 'rejected')",
        params![reason, fmt_ts(&Utc::now()), id],
    )?;
    Ok(count > 0)
}

pub fn get_bookings_by_status(
    conn: &Connection,
    statuses: &[BookingStatus],
    limit: usize,
) -> anyhow::Result<Vec<Booking>> {
    if statuses.is_empty() {
        return Ok(vec![]);
    }

    let placeholders = (1..=statuses.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings WHERE status IN ({placeholders})
         ORDER BY start_date ASC LIMIT ?{}",
        statuses.len() + 1
    );

    let mut values: Vec<Value> = statuses
        .iter()
        .map(|s| Value::Text(s.as_str().to_string()))
        .collect();
    values.push(Value::Integer(limit as i64));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
        Ok(parse_booking_row(row))
    })?;
    collect(rows)
}

/// Active bookings whose end passed before `cutoff` without a completion.
pub fn get_overdue_active_bookings(
    conn: &Connection,
    cutoff: &DateTime<Utc>,
    limit: usize,
) -> anyhow::Result<Vec<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE status = 'active' AND end_date < ?1 ORDER BY end_date ASC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![fmt_ts(cutoff), limit as i64], |row| {
        Ok(parse_booking_row(row))
    })?;
    collect(rows)
}

/// Apartments flagged free even though an active booking occupies them.
pub fn get_free_apartments_with_active_booking(conn: &Connection) -> anyhow::Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT a.id FROM apartments a
         JOIN bookings b ON b.apartment_id = a.id
         WHERE a.is_free = 1 AND b.status = 'active'
         ORDER BY a.id",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
    let mut ids = vec![];
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

/// Hard-deletes up to `batch` never-paid bookings created before `cutoff`.
pub fn cleanup_expired_bookings(
    conn: &Connection,
    cutoff: &DateTime<Utc>,
    batch: usize,
) -> anyhow::Result<usize> {
    let count = conn.execute(
        "DELETE FROM bookings WHERE id IN (
            SELECT id FROM bookings
            WHERE status IN ('created', 'awaiting_payment') AND created_at < ?1
            LIMIT ?2
        )",
        params![fmt_ts(cutoff), batch as i64],
    )?;
    Ok(count)
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let start_date: String = row.get(3)?;
    let end_date: String = row.get(4)?;
    let status: String = row.get(5)?;
    let extension_end_date: Option<String> = row.get(7)?;
    let door_status: String = row.get(12)?;
    let created_at: String = row.get(14)?;
    let updated_at: String = row.get(15)?;

    Ok(Booking {
        id: row.get(0)?,
        apartment_id: row.get(1)?,
        renter_id: row.get(2)?,
        start_date: parse_ts(&start_date)?,
        end_date: parse_ts(&end_date)?,
        status: BookingStatus::parse(&status),
        extension_requested: row.get(6)?,
        extension_end_date: parse_opt_ts(extension_end_date)?,
        extension_duration_hours: row.get(8)?,
        extension_price: row.get(9)?,
        payment_id: row.get(10)?,
        cancellation_reason: row.get(11)?,
        door_status: DoorStatus::parse(&door_status),
        chat_room_id: row.get(13)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

// ── Extensions ──

pub fn create_extension(conn: &Connection, ext: &BookingExtension) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO booking_extensions (booking_id, duration_hours, price, status, payment_id,
            requested_at, approved_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            ext.booking_id,
            ext.duration_hours,
            ext.price,
            ext.status.as_str(),
            ext.payment_id,
            fmt_ts(&ext.requested_at),
            ext.approved_at.as_ref().map(fmt_ts),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_extension_by_id(conn: &Connection, id: i64) -> anyhow::Result<Option<BookingExtension>> {
    let sql = format!("SELECT {EXTENSION_COLUMNS} FROM booking_extensions WHERE id = ?1");
    let ext = conn
        .query_row(&sql, params![id], |row| Ok(parse_extension_row(row)))
        .optional()?;
    ext.transpose()
}

pub fn get_extensions_by_booking(
    conn: &Connection,
    booking_id: i64,
) -> anyhow::Result<Vec<BookingExtension>> {
    let sql = format!(
        "SELECT {EXTENSION_COLUMNS} FROM booking_extensions WHERE booking_id = ?1
         ORDER BY requested_at DESC, id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![booking_id], |row| Ok(parse_extension_row(row)))?;
    collect(rows)
}

/// Writes the mutable extension fields if the row is still in `expected`.
/// Returns false when another writer moved it first.
pub fn update_extension(
    conn: &Connection,
    ext: &BookingExtension,
    expected: ExtensionStatus,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE booking_extensions SET status = ?1, payment_id = ?2, requested_at = ?3,
            approved_at = ?4
         WHERE id = ?5 AND status = ?6",
        params![
            ext.status.as_str(),
            ext.payment_id,
            fmt_ts(&ext.requested_at),
            ext.approved_at.as_ref().map(fmt_ts),
            ext.id,
            expected.as_str(),
        ],
    )?;
    Ok(count > 0)
}

/// Hard-deletes up to `batch` unpaid extension requests older than `cutoff`.
pub fn cleanup_expired_extensions(
    conn: &Connection,
    cutoff: &DateTime<Utc>,
    batch: usize,
) -> anyhow::Result<usize> {
    let count = conn.execute(
        "DELETE FROM booking_extensions WHERE id IN (
            SELECT id FROM booking_extensions
            WHERE status = 'awaiting_payment' AND requested_at < ?1
            LIMIT ?2
        )",
        params![fmt_ts(cutoff), batch as i64],
    )?;
    Ok(count)
}

fn parse_extension_row(row: &rusqlite::Row) -> anyhow::Result<BookingExtension> {
    let status: String = row.get(4)?;
    let requested_at: String = row.get(6)?;
    let approved_at: Option<String> = row.get(7)?;

    Ok(BookingExtension {
        id: row.get(0)?,
        booking_id: row.get(1)?,
        duration_hours: row.get(2)?,
        price: row.get(3)?,
        status: ExtensionStatus::parse(&status),
        payment_id: row.get(5)?,
        requested_at: parse_ts(&requested_at)?,
        approved_at: parse_opt_ts(approved_at)?,
    })
}
