use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;

use crate::db::queries::{self, ConflictWindow};

/// How far ahead an upcoming approved/pending booking already blocks the apartment.
pub const LOOKAHEAD_MINUTES: i64 = 120;

/// Freshly created bookings count as conflicts for this long, covering writes
/// still in flight in the booking-creation flow.
pub const CREATION_GRACE_MINUTES: i64 = 30;

/// Above this many apartments `recalculate_many` uses the batched query.
pub const BATCH_THRESHOLD: usize = 10;

fn conflict_window(now: DateTime<Utc>) -> ConflictWindow {
    ConflictWindow {
        now,
        lookahead_end: now + Duration::minutes(LOOKAHEAD_MINUTES),
        creation_cutoff: now - Duration::minutes(CREATION_GRACE_MINUTES),
    }
}

/// Whether the apartment is free at `now`, read from booking rows only.
pub fn is_free(conn: &Connection, apartment_id: i64, now: DateTime<Utc>) -> anyhow::Result<bool> {
    let busy = queries::has_conflicting_booking(conn, apartment_id, &conflict_window(now))?;
    Ok(!busy)
}

/// Recomputes and stores the flag for one apartment. Returns the new value.
pub fn recalculate(conn: &Connection, apartment_id: i64, now: DateTime<Utc>) -> anyhow::Result<bool> {
    let free = is_free(conn, apartment_id, now)?;
    if queries::set_apartment_free(conn, apartment_id, free)? {
        tracing::info!(apartment_id, is_free = free, "apartment availability changed");
    }
    Ok(free)
}

/// Recomputes the flag for every apartment in `apartment_ids` and returns how
/// many stored flags changed.
pub fn recalculate_many(
    conn: &Connection,
    apartment_ids: &[i64],
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    let mut ids = apartment_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();

    if ids.len() > BATCH_THRESHOLD {
        match recalculate_batch(conn, &ids, now) {
            Ok(changed) => return Ok(changed),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    count = ids.len(),
                    "batched availability recalculation failed, falling back to sequential"
                );
            }
        }
    }

    recalculate_sequential(conn, &ids, now)
}

fn recalculate_batch(conn: &Connection, ids: &[i64], now: DateTime<Utc>) -> anyhow::Result<usize> {
    let busy = queries::conflicting_apartments(conn, ids, &conflict_window(now))?;
    let flags: Vec<(i64, bool)> = ids.iter().map(|id| (*id, !busy.contains(id))).collect();
    let changed = queries::set_apartments_free_many(conn, &flags)?;
    tracing::debug!(count = ids.len(), changed, "batched availability recalculation");
    Ok(changed)
}

fn recalculate_sequential(
    conn: &Connection,
    ids: &[i64],
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    let mut changed = 0;
    for id in ids {
        let free = is_free(conn, *id, now)?;
        if queries::set_apartment_free(conn, *id, free)? {
            changed += 1;
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{Apartment, Booking, BookingStatus, DoorStatus};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 13, 0, 0).unwrap()
    }

    fn setup_db(apartments: i64) -> Connection {
        let conn = db::init_db(":memory:").unwrap();
        for id in 1..=apartments {
            queries::insert_apartment(
                &conn,
                &Apartment {
                    id,
                    owner_id: 100,
                    is_free: true,
                },
            )
            .unwrap();
        }
        conn
    }

    fn add_booking(
        conn: &Connection,
        apartment_id: i64,
        status: BookingStatus,
        starts_in_minutes: i64,
        created_minutes_ago: i64,
    ) -> i64 {
        let start = now() + Duration::minutes(starts_in_minutes);
        let created = now() - Duration::minutes(created_minutes_ago);
        queries::create_booking(
            conn,
            &Booking {
                id: 0,
                apartment_id,
                renter_id: 200,
                start_date: start,
                end_date: start + Duration::hours(2),
                status,
                extension_requested: false,
                extension_end_date: None,
                extension_duration_hours: 0,
                extension_price: 0,
                payment_id: None,
                cancellation_reason: None,
                door_status: DoorStatus::Closed,
                chat_room_id: None,
                created_at: created,
                updated_at: created,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_no_bookings_is_free() {
        let conn = setup_db(1);
        assert!(recalculate(&conn, 1, now()).unwrap());
    }

    #[test]
    fn test_active_booking_blocks() {
        let conn = setup_db(1);
        add_booking(&conn, 1, BookingStatus::Active, -30, 600);
        assert!(!recalculate(&conn, 1, now()).unwrap());
        assert!(!queries::get_apartment(&conn, 1).unwrap().unwrap().is_free);
    }

    #[test]
    fn test_approved_within_lookahead_blocks() {
        let conn = setup_db(2);
        add_booking(&conn, 1, BookingStatus::Approved, 90, 600);
        add_booking(&conn, 2, BookingStatus::Approved, 180, 600);
        assert!(!is_free(&conn, 1, now()).unwrap());
        assert!(is_free(&conn, 2, now()).unwrap());
    }

    #[test]
    fn test_created_booking_only_blocks_during_creation_grace() {
        let conn = setup_db(2);
        add_booking(&conn, 1, BookingStatus::Created, 60, 10);
        add_booking(&conn, 2, BookingStatus::Created, 60, 45);
        assert!(!is_free(&conn, 1, now()).unwrap());
        assert!(is_free(&conn, 2, now()).unwrap());
    }

    #[test]
    fn test_terminal_bookings_never_block() {
        let conn = setup_db(1);
        add_booking(&conn, 1, BookingStatus::Completed, -30, 600);
        add_booking(&conn, 1, BookingStatus::Canceled, 10, 600);
        assert!(is_free(&conn, 1, now()).unwrap());
    }

    #[test]
    fn test_recalculate_is_stable_without_changes() {
        let conn = setup_db(1);
        add_booking(&conn, 1, BookingStatus::Pending, 30, 600);
        let first = recalculate(&conn, 1, now()).unwrap();
        let second = recalculate(&conn, 1, now()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_batch_matches_sequential() {
        let conn = setup_db(15);
        for id in (1..=15).step_by(3) {
            add_booking(&conn, id, BookingStatus::Active, -10, 600);
        }
        let ids: Vec<i64> = (1..=15).collect();

        let changed = recalculate_many(&conn, &ids, now()).unwrap();
        assert_eq!(changed, 5);

        for id in ids {
            let stored = queries::get_apartment(&conn, id).unwrap().unwrap().is_free;
            assert_eq!(stored, is_free(&conn, id, now()).unwrap());
        }

        // Nothing left to correct on a second pass.
        assert_eq!(recalculate_many(&conn, &(1..=15).collect::<Vec<_>>(), now()).unwrap(), 0);
    }
}
