use chrono::NaiveDate;
use chrono_tz::Tz;

use super::day_index::group_by_day;
use crate::model::*;
use crate::timezone::{iso_weekday, local_to_utc};

// ── Available-Day Scan ───────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Milliseconds of `window` covered by the union of `bookings`.
///
/// Overlapping or adjacent bookings are merged first so nothing is counted
/// twice.
pub fn booked_ms(window: &Span, bookings: &[Span]) -> Ms {
    let mut sorted = bookings.to_vec();
    sorted.sort_by_key(|s| s.start);
    merge_overlapping(&sorted)
        .iter()
        .map(|b| b.overlap_ms(window))
        .sum()
}

/// Dates in `[start, end]` (not before `today`) that are open and not fully booked.
///
/// `bookings` are the non-canceled spans overlapping the range, sorted by start.
pub fn scan_available_days(
    tz: Tz,
    schedule: &WeeklySchedule,
    bookings: &[Span],
    start: NaiveDate,
    end: NaiveDate,
    today: NaiveDate,
) -> Vec<NaiveDate> {
    let dates: Vec<NaiveDate> = start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| *d >= today)
        .collect();

    let windows: Vec<Option<Span>> = dates
        .iter()
        .map(|&date| {
            schedule
                .window_for(iso_weekday(date))
                .map(|(open, close)| {
                    (local_to_utc(tz, date, open), local_to_utc(tz, date, close))
                })
                .filter(|(s, e)| s < e)
                .map(|(s, e)| Span::new(s, e))
        })
        .collect();

    let groups = group_by_day(&windows, bookings);

    dates
        .into_iter()
        .zip(windows)
        .zip(groups)
        .filter_map(|((date, window), group)| {
            let window = window?;
            let booked = booked_ms(&window, &bookings[group]);
            (booked < window.duration_ms()).then_some(date)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    const M: Ms = 60_000;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn at(date: NaiveDate, h: u32, m: u32) -> Ms {
        local_to_utc(Tz::UTC, date, t(h, m))
    }

    /// Monday..Friday 09:00-17:00, weekend closed.
    fn weekdays() -> WeeklySchedule {
        let mut s = WeeklySchedule::default();
        for day in 1..=5 {
            s.days.insert(day, DayRule { open: Some(t(9, 0)), close: Some(t(17, 0)) });
        }
        s.days.insert(6, DayRule::CLOSED);
        s.days.insert(7, DayRule::CLOSED);
        s
    }

    // ── merge_overlapping ─────────────────────────────────

    #[test]
    fn merge_disjoint_kept() {
        let spans = vec![Span::new(0, 10), Span::new(20, 30)];
        assert_eq!(merge_overlapping(&spans), spans);
    }

    #[test]
    fn merge_overlap_and_adjacent() {
        let spans = vec![Span::new(0, 10), Span::new(5, 15), Span::new(15, 20), Span::new(30, 40)];
        assert_eq!(
            merge_overlapping(&spans),
            vec![Span::new(0, 20), Span::new(30, 40)]
        );
    }

    #[test]
    fn merge_contained() {
        let spans = vec![Span::new(0, 100), Span::new(10, 20)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(0, 100)]);
    }

    // ── booked_ms ─────────────────────────────────────────

    #[test]
    fn booked_ms_clamps_to_window() {
        let window = Span::new(100, 200);
        assert_eq!(booked_ms(&window, &[Span::new(50, 150)]), 50);
        assert_eq!(booked_ms(&window, &[Span::new(0, 1000)]), 100);
        assert_eq!(booked_ms(&window, &[]), 0);
    }

    #[test]
    fn booked_ms_does_not_double_count() {
        let window = Span::new(0, 100);
        let bookings = [Span::new(10, 50), Span::new(30, 60), Span::new(60, 70)];
        assert_eq!(booked_ms(&window, &bookings), 60);
    }

    // ── scan_available_days ───────────────────────────────

    #[test]
    fn weekend_is_never_available() {
        // 2026-11-02 is a Monday.
        let days = scan_available_days(
            Tz::UTC,
            &weekdays(),
            &[],
            d(2026, 11, 2),
            d(2026, 11, 8),
            d(2026, 11, 1),
        );
        assert_eq!(days.len(), 5);
        assert_eq!(days.first(), Some(&d(2026, 11, 2)));
        assert_eq!(days.last(), Some(&d(2026, 11, 6)));
    }

    #[test]
    fn fully_booked_day_is_dropped() {
        let tue = d(2026, 11, 3);
        let bookings = [
            Span::new(at(tue, 9, 0), at(tue, 13, 0)),
            Span::new(at(tue, 13, 0), at(tue, 17, 0)),
        ];
        let days = scan_available_days(
            Tz::UTC,
            &weekdays(),
            &bookings,
            d(2026, 11, 2),
            d(2026, 11, 4),
            d(2026, 11, 1),
        );
        assert_eq!(days, vec![d(2026, 11, 2), d(2026, 11, 4)]);
    }

    #[test]
    fn partially_booked_day_stays() {
        let mon = d(2026, 11, 2);
        let bookings = [Span::new(at(mon, 9, 0), at(mon, 16, 30))];
        let days = scan_available_days(Tz::UTC, &weekdays(), &bookings, mon, mon, mon);
        assert_eq!(days, vec![mon]);
    }

    #[test]
    fn multi_day_block_covers_every_day() {
        let bookings = [Span::new(at(d(2026, 11, 2), 0, 0), at(d(2026, 11, 5), 0, 0))];
        let days = scan_available_days(
            Tz::UTC,
            &weekdays(),
            &bookings,
            d(2026, 11, 2),
            d(2026, 11, 6),
            d(2026, 11, 1),
        );
        assert_eq!(days, vec![d(2026, 11, 5), d(2026, 11, 6)]);
    }

    #[test]
    fn past_dates_are_skipped() {
        let days = scan_available_days(
            Tz::UTC,
            &weekdays(),
            &[],
            d(2026, 11, 2),
            d(2026, 11, 6),
            d(2026, 11, 4),
        );
        assert_eq!(days, vec![d(2026, 11, 4), d(2026, 11, 5), d(2026, 11, 6)]);
    }

    #[test]
    fn booking_straddling_open_counts_only_inside() {
        let mon = d(2026, 11, 2);
        // 08:00-17:00 covers all of 09:00-17:00 once clamped.
        let bookings = [Span::new(at(mon, 8, 0), at(mon, 17, 0))];
        let days = scan_available_days(Tz::UTC, &weekdays(), &bookings, mon, mon, mon);
        assert!(days.is_empty());
        let short = [Span::new(at(mon, 8, 0), at(mon, 9, 0) + 30 * M)];
        let days = scan_available_days(Tz::UTC, &weekdays(), &short, mon, mon, mon);
        assert_eq!(days, vec![mon]);
    }
}
