use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;

use crate::model::*;
use crate::timezone::{local_to_utc, to_local_datetime};

// ── Daily Slot Generation ────────────────────────────────────────

/// Fixed-length free slots for one civil date.
///
/// `window` is the weekday's opening hours (`None` when closed). `bookings`
/// are the non-canceled appointment spans overlapping the day, sorted by
/// start. Slots are laid on a grid anchored at the opening time; any slot
/// overlapping a booking is dropped, and a trailing slot that would run past
/// closing is never emitted. Slots that have already started relative to
/// `now` are skipped by moving to the first grid boundary strictly after it.
pub fn generate_daily_slots(
    tz: Tz,
    date: NaiveDate,
    window: Option<(NaiveTime, NaiveTime)>,
    bookings: &[Span],
    slot_ms: Ms,
    now: Ms,
) -> DailySlots {
    let Some((open, close)) = window else {
        return DailySlots {
            date,
            is_closed: true,
            slots: Vec::new(),
        };
    };

    let day_start = local_to_utc(tz, date, open);
    let day_end = local_to_utc(tz, date, close);

    let mut cursor = day_start;
    if now >= day_start {
        let elapsed = now - day_start;
        cursor = day_start + (elapsed / slot_ms + 1) * slot_ms;
    }

    let mut slots = Vec::new();
    let mut bi = 0;
    while cursor + slot_ms <= day_end {
        let slot = Span::new(cursor, cursor + slot_ms);
        while bi < bookings.len() && bookings[bi].end <= slot.start {
            bi += 1;
        }
        let taken = bookings[bi..]
            .iter()
            .take_while(|b| b.start < slot.end)
            .any(|b| b.overlaps(&slot));
        if !taken {
            slots.push(Slot {
                span: slot,
                start_local: to_local_datetime(tz, slot.start),
                end_local: to_local_datetime(tz, slot.end),
            });
        }
        cursor += slot_ms;
    }

    DailySlots {
        date,
        is_closed: false,
        slots,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: Ms = 60_000;
    const H: Ms = 60 * M;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn at(date: NaiveDate, h: u32, m: u32) -> Ms {
        local_to_utc(Tz::UTC, date, t(h, m))
    }

    // A time long before any test date.
    const LONG_AGO: Ms = 0;

    #[test]
    fn closed_day_has_no_slots() {
        let out = generate_daily_slots(Tz::UTC, d(2026, 11, 2), None, &[], 30 * M, LONG_AGO);
        assert!(out.is_closed);
        assert!(out.slots.is_empty());
    }

    #[test]
    fn empty_day_yields_full_grid() {
        let date = d(2026, 11, 2);
        let out = generate_daily_slots(
            Tz::UTC,
            date,
            Some((t(9, 0), t(17, 0))),
            &[],
            30 * M,
            LONG_AGO,
        );
        assert!(!out.is_closed);
        assert_eq!(out.slots.len(), 16);
        assert_eq!(out.slots[0].span.start, at(date, 9, 0));
        assert_eq!(out.slots[15].span.end, at(date, 17, 0));
    }

    #[test]
    fn booked_interval_removes_overlapping_slots() {
        let date = d(2026, 11, 2);
        let booking = Span::new(at(date, 10, 0), at(date, 11, 0));
        let out = generate_daily_slots(
            Tz::UTC,
            date,
            Some((t(9, 0), t(17, 0))),
            &[booking],
            30 * M,
            LONG_AGO,
        );
        assert_eq!(out.slots.len(), 14);
        assert!(out.slots.iter().all(|s| !s.span.overlaps(&booking)));
    }

    #[test]
    fn off_grid_booking_removes_both_touched_slots() {
        let date = d(2026, 11, 2);
        let booking = Span::new(at(date, 10, 15), at(date, 10, 45));
        let out = generate_daily_slots(
            Tz::UTC,
            date,
            Some((t(9, 0), t(12, 0))),
            &[booking],
            30 * M,
            LONG_AGO,
        );
        let starts: Vec<Ms> = out.slots.iter().map(|s| s.span.start).collect();
        assert!(!starts.contains(&at(date, 10, 0)));
        assert!(!starts.contains(&at(date, 10, 30)));
        assert_eq!(out.slots.len(), 4);
    }

    #[test]
    fn partial_trailing_slot_is_not_emitted() {
        let date = d(2026, 11, 2);
        let out = generate_daily_slots(
            Tz::UTC,
            date,
            Some((t(9, 0), t(10, 45))),
            &[],
            30 * M,
            LONG_AGO,
        );
        assert_eq!(out.slots.len(), 3);
        assert_eq!(out.slots[2].span.end, at(date, 10, 30));
    }

    #[test]
    fn today_starts_after_now() {
        let date = d(2026, 11, 2);
        let now = at(date, 10, 10);
        let out = generate_daily_slots(
            Tz::UTC,
            date,
            Some((t(9, 0), t(12, 0))),
            &[],
            30 * M,
            now,
        );
        assert_eq!(out.slots[0].span.start, at(date, 10, 30));
        assert_eq!(out.slots.len(), 3);
    }

    #[test]
    fn now_exactly_on_boundary_skips_that_slot() {
        let date = d(2026, 11, 2);
        let now = at(date, 10, 0);
        let out = generate_daily_slots(
            Tz::UTC,
            date,
            Some((t(9, 0), t(12, 0))),
            &[],
            30 * M,
            now,
        );
        assert_eq!(out.slots[0].span.start, at(date, 10, 30));
    }

    #[test]
    fn after_closing_nothing_left() {
        let date = d(2026, 11, 2);
        let out = generate_daily_slots(
            Tz::UTC,
            date,
            Some((t(9, 0), t(12, 0))),
            &[],
            30 * M,
            at(date, 13, 0),
        );
        assert!(!out.is_closed);
        assert!(out.slots.is_empty());
    }

    #[test]
    fn local_offsets_are_rendered() {
        let tz: Tz = "Europe/Bucharest".parse().unwrap();
        let date = d(2026, 7, 1);
        let out = generate_daily_slots(tz, date, Some((t(9, 0), t(10, 0))), &[], H, LONG_AGO);
        assert_eq!(out.slots.len(), 1);
        assert_eq!(out.slots[0].start_local.to_rfc3339(), "2026-07-01T09:00:00+03:00");
    }

    #[test]
    fn spring_forward_day_keeps_utc_grid() {
        // Europe/Berlin skips 02:00..03:00 on 2026-03-29: 00:00..06:00 is five real hours.
        let tz: Tz = "Europe/Berlin".parse().unwrap();
        let out = generate_daily_slots(
            tz,
            d(2026, 3, 29),
            Some((t(0, 0), t(6, 0))),
            &[],
            H,
            LONG_AGO,
        );
        assert_eq!(out.slots.len(), 5);
        assert!(out.slots.iter().all(|s| s.span.duration_ms() == H));
    }
}
