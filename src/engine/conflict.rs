use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start >= span.end {
        return Err(EngineError::InvalidDateRange(
            "start must be before end".into(),
        ));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Any non-canceled appointment of the provider that overlaps `span`.
pub(crate) fn check_provider_conflict(ps: &ProviderState, span: &Span) -> Result<(), EngineError> {
    match ps.active_overlapping(span).next() {
        Some(existing) => Err(EngineError::SlotAlreadyBooked(existing.id)),
        None => Ok(()),
    }
}

/// Any non-canceled appointment the customer already holds, with any provider.
/// `held` is sorted by start.
pub(crate) fn check_customer_conflict(held: &[(Ulid, Span)], span: &Span) -> Result<(), EngineError> {
    let right_bound = held.partition_point(|(_, s)| s.start < span.end);
    match held[..right_bound].iter().find(|(_, s)| s.end > span.start) {
        Some((id, _)) => Err(EngineError::CustomerAlreadyBooked(*id)),
        None => Ok(()),
    }
}
