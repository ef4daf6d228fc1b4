use std::str::FromStr;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// How the cleaning buffer separates two reservations on one facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferPolicy {
    /// Every reservation keeps the buffer after its end, whichever was booked
    /// first: `b.start < a.end + buffer && a.start < b.end + buffer` conflicts.
    #[default]
    Symmetric,
    /// Only existing reservations are extended: a new booking may end right
    /// before an existing one, but may not start inside its buffer.
    Trailing,
}

impl FromStr for BufferPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "symmetric" => Ok(BufferPolicy::Symmetric),
            "trailing" => Ok(BufferPolicy::Trailing),
            other => Err(format!("unknown buffer policy {other:?} (symmetric|trailing)")),
        }
    }
}

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Ordering, range and length checks for a requested interval.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidInterval { start, end });
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_RESERVATION_DURATION_MS {
        return Err(EngineError::LimitExceeded("reservation too long"));
    }
    Ok(span)
}

/// Window in which an existing reservation's start must fall (and past whose
/// start its end must reach) for it to conflict with `candidate`.
///
/// An existing `r` conflicts iff `r.start < window.end && r.end > window.start`,
/// which is exactly `Timeline::overlapping(window)`.
pub(crate) fn conflict_window(candidate: &Span, buffer: Ms, policy: BufferPolicy) -> Span {
    let end = match policy {
        BufferPolicy::Symmetric => candidate.end + buffer,
        BufferPolicy::Trailing => candidate.end,
    };
    Span::new(candidate.start - buffer, end)
}

/// First reservation on `timeline` that `candidate` would collide with,
/// skipping `exclude` (the reservation being updated).
pub fn find_conflict(
    timeline: &Timeline,
    candidate: &Span,
    buffer: Ms,
    policy: BufferPolicy,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    let window = conflict_window(candidate, buffer, policy);
    timeline
        .overlapping(&window)
        .find(|r| Some(r.id) != exclude)
        .map(|r| r.id)
}

/// Pairs of reservations on `timeline` that break the separation rule.
/// Used to audit a replayed log.
///
/// Under `Trailing` the accepted set depends on booking order, which the
/// timeline no longer knows, so only plain overlaps are reported.
pub fn violations(timeline: &Timeline, buffer: Ms, policy: BufferPolicy) -> Vec<(Ulid, Ulid)> {
    let (buffer, policy) = match policy {
        BufferPolicy::Symmetric => (buffer, BufferPolicy::Symmetric),
        BufferPolicy::Trailing => (0, BufferPolicy::Symmetric),
    };
    let mut found = Vec::new();
    for (i, r) in timeline.reservations.iter().enumerate() {
        let window = conflict_window(&r.span, buffer, policy);
        // Each pair once: only look at reservations after `r` in start order.
        for other in timeline.reservations[i + 1..].iter() {
            if other.span.start >= window.end {
                break;
            }
            if other.span.overlaps(&window) {
                found.push((r.id, other.id));
            }
        }
    }
    found
}
