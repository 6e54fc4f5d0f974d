use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;

use super::day_index::group_by_day;
use crate::model::*;
use crate::timezone::{iso_weekday, local_to_utc, to_local_datetime};

// ── Provider Calendar ────────────────────────────────────────────

fn entry(tz: Tz, kind: EntryKind, span: Span, booking: Option<BookingRef>) -> CalendarEntry {
    CalendarEntry {
        kind,
        span,
        start_local: to_local_datetime(tz, span.start),
        end_local: to_local_datetime(tz, span.end),
        booking,
    }
}

fn booked_entry(tz: Tz, appt: &Appointment) -> CalendarEntry {
    let kind = if appt.is_blocked {
        EntryKind::Blocked
    } else {
        EntryKind::Booked
    };
    let booking = BookingRef {
        appointment_id: appt.id,
        customer_id: appt.customer_id,
        channel: appt.channel,
        is_blocked: appt.is_blocked,
        details: appt.details.clone(),
    };
    entry(tz, kind, appt.span, Some(booking))
}

/// Push `span` as plain entries: the part inside `open` is `Free`, the
/// parts before and after it are `Closed`. Empty pieces are skipped.
fn push_plain(entries: &mut Vec<CalendarEntry>, tz: Tz, open: Span, span: Span) {
    let pieces = [
        (EntryKind::Closed, span.start, span.end.min(open.start)),
        (EntryKind::Free, span.start.max(open.start), span.end.min(open.end)),
        (EntryKind::Closed, span.start.max(open.end), span.end),
    ];
    for (kind, start, end) in pieces {
        if start < end {
            entries.push(entry(tz, kind, Span::new(start, end), None));
        }
    }
}

/// Walk one day's grid, merging each booking into a single entry.
///
/// Steps outside the day's own opening hours (but inside the global window)
/// are `Closed`; a step straddling an opening or closing time is split there.
/// The last step is truncated at the window end.
fn day_entries(
    tz: Tz,
    grid: Span,
    open: Span,
    bookings: &[Appointment],
    slot_ms: Ms,
) -> Vec<CalendarEntry> {
    let mut entries = Vec::new();
    let mut cursor = grid.start;
    let mut bi = 0;
    while cursor < grid.end {
        let step_end = (cursor + slot_ms).min(grid.end);
        while bi < bookings.len() && bookings[bi].span.end <= cursor {
            bi += 1;
        }
        if let Some(appt) = bookings.get(bi).filter(|a| a.span.start < step_end) {
            if appt.span.start > cursor {
                push_plain(&mut entries, tz, open, Span::new(cursor, appt.span.start));
            }
            entries.push(booked_entry(tz, appt));
            cursor = appt.span.end;
            bi += 1;
            continue;
        }
        push_plain(&mut entries, tz, open, Span::new(cursor, step_end));
        cursor = step_end;
    }
    entries
}

/// Per-day calendar over `[start, end]` for a configured schedule.
///
/// Every open day is laid out over the schedule's global window (earliest
/// opening to latest closing across all weekdays) so days line up in a grid.
/// `appointments` are the non-canceled appointments overlapping the range,
/// sorted by start.
pub fn build_calendar(
    tz: Tz,
    schedule: &WeeklySchedule,
    appointments: &[Appointment],
    start: NaiveDate,
    end: NaiveDate,
    slot_ms: Ms,
) -> Calendar {
    let dates: Vec<NaiveDate> = start.iter_days().take_while(|d| *d <= end).collect();
    let global = schedule.global_window();

    let project = |date: NaiveDate, (open, close): (NaiveTime, NaiveTime)| {
        let s = local_to_utc(tz, date, open);
        let e = local_to_utc(tz, date, close);
        (s < e).then(|| Span::new(s, e))
    };

    // (grid, actual opening) per date; `None` for closed days.
    let windows: Vec<Option<(Span, Span)>> = dates
        .iter()
        .map(|&date| {
            let own = schedule.window_for(iso_weekday(date))?;
            let grid = project(date, global?)?;
            let open = project(date, own)?;
            Some((grid, open))
        })
        .collect();

    let spans: Vec<Span> = appointments.iter().map(|a| a.span).collect();
    let grids: Vec<Option<Span>> = windows.iter().map(|w| w.map(|(grid, _)| grid)).collect();
    let groups = group_by_day(&grids, &spans);

    let mut days = Vec::with_capacity(dates.len());
    for ((date, window), group) in dates.into_iter().zip(windows).zip(groups) {
        let Some((grid, open)) = window else {
            days.push(CalendarDay {
                date,
                is_closed: true,
                is_booked: false,
                entries: Vec::new(),
            });
            continue;
        };
        let entries = day_entries(tz, grid, open, &appointments[group], slot_ms);
        let is_booked = entries.iter().all(|e| e.kind.is_unavailable());
        days.push(CalendarDay {
            date,
            is_closed: false,
            is_booked,
            entries,
        });
    }

    let touched = days.iter().flat_map(|d| d.entries.iter());
    let min_slot_time = touched.clone().map(|e| e.span.start).min();
    let max_slot_time = touched.map(|e| e.span.end).max();

    Calendar {
        min_slot_time,
        max_slot_time,
        days,
    }
}
