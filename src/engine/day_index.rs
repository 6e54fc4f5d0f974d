use std::ops::Range;

use crate::model::Span;

/// Assign sorted, mutually non-overlapping bookings to a run of day windows.
///
/// `windows` must be in increasing order. Each result range indexes into
/// `bookings` and covers exactly those bookings that overlap the window; a
/// closed day (`None`) gets an empty range. One forward pass over both lists.
pub(crate) fn group_by_day(windows: &[Option<Span>], bookings: &[Span]) -> Vec<Range<usize>> {
    let mut lo = 0;
    windows
        .iter()
        .map(|window| {
            let Some(window) = window else {
                return lo..lo;
            };
            // A booking reaching into a later day stays available to it.
            while lo < bookings.len() && bookings[lo].end <= window.start {
                lo += 1;
            }
            let mut hi = lo;
            while hi < bookings.len() && bookings[hi].start < window.end {
                hi += 1;
            }
            lo..hi
        })
        .collect()
}
