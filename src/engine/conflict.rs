use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::Validation("interval start must be before end"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Reject blank or oversized free text.
pub(crate) fn validate_text(
    value: &str,
    max_len: usize,
    empty: &'static str,
    too_long: &'static str,
) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(empty));
    }
    if value.len() > max_len {
        return Err(EngineError::LimitExceeded(too_long));
    }
    Ok(())
}

/// Which bookings block a candidate interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictScope {
    /// Pending and confirmed bookings. Used at submission.
    Active,
    /// Confirmed bookings only. Used when a booking is about to be confirmed.
    Confirmed,
}

/// First booking on `hs` that blocks `span` under `scope`, skipping `exclude`.
pub(crate) fn find_conflict(
    hs: &HallState,
    span: &Span,
    exclude: Option<Ulid>,
    scope: ConflictScope,
) -> Option<Ulid> {
    hs.overlapping(span)
        .filter(|i| Some(i.id) != exclude)
        .find(|i| match scope {
            ConflictScope::Active => true,
            ConflictScope::Confirmed => i.kind == IntervalKind::Confirmed,
        })
        .map(|i| i.id)
}

pub fn has_conflict(hs: &HallState, span: &Span, exclude: Option<Ulid>, scope: ConflictScope) -> bool {
    find_conflict(hs, span, exclude, scope).is_some()
}

/// Submission-time check: any active overlapping booking is a conflict.
pub(crate) fn check_no_conflict(hs: &HallState, span: &Span) -> Result<(), EngineError> {
    match find_conflict(hs, span, None, ConflictScope::Active) {
        Some(id) => Err(EngineError::Conflict(id)),
        None => Ok(()),
    }
}

/// Confirmation-time re-check for `booking_id` against other confirmed bookings.
pub(crate) fn check_confirmable(hs: &HallState, booking_id: Ulid, span: &Span) -> Result<(), EngineError> {
    match find_conflict(hs, span, Some(booking_id), ConflictScope::Confirmed) {
        Some(conflicting) => Err(EngineError::ConfirmationConflict {
            booking_id,
            conflicting,
        }),
        None => Ok(()),
    }
}
