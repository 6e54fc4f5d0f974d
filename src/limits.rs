use crate::model::Ms;

pub const MAX_PROVIDERS: usize = 100_000;
pub const MAX_APPOINTMENTS_PER_PROVIDER: usize = 100_000;
pub const MAX_SERVICES_PER_PROVIDER: usize = 1_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_MESSAGE_LEN: usize = 2_048;
pub const MAX_REASON_LEN: usize = 1_024;
pub const MAX_CURRENCY_LEN: usize = 8;

/// Slot granularity bounds, in minutes.
pub const MIN_SLOT_MINUTES: i64 = 5;
pub const MAX_SLOT_MINUTES: i64 = 24 * 60;

/// Longest date range accepted by the scanner and the calendar.
pub const MAX_QUERY_DAYS: i64 = 366;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
/// A single appointment (or blocked interval) may span at most 90 days.
pub const MAX_SPAN_DURATION_MS: Ms = 90 * 24 * 3_600_000;
