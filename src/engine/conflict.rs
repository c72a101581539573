use crate::limits::*;
use crate::model::*;

use super::ledger::ProviderLedger;
use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.end <= span.start {
        return Err(EngineError::invalid("slot.end", "must be after slot.start"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::invalid("slot", "timestamp out of range"));
    }
    if span.duration_ms() > MAX_SLOT_DURATION_MS {
        return Err(EngineError::invalid("slot", "slot too long"));
    }
    Ok(())
}

/// Fill in a missing end from the default duration, then validate.
pub(crate) fn resolve_span(start: Ms, end: Option<Ms>, default_duration: Ms) -> Result<Span, EngineError> {
    let end = match end {
        Some(end) => end,
        None => start
            .checked_add(default_duration)
            .ok_or(EngineError::invalid("slot", "timestamp out of range"))?,
    };
    let span = Span { start, end };
    validate_span(&span)?;
    Ok(span)
}

/// New slots must not start in the past.
pub(crate) fn require_future(span: &Span, now: Ms) -> Result<(), EngineError> {
    if span.start < now {
        return Err(EngineError::invalid("slot.start", "slot starts in the past"));
    }
    Ok(())
}

/// Reject `span` if it overlaps any active hold other than `ignore`'s.
/// `ignore` lets a booking move within (or next to) its own current slot.
pub(crate) fn check_no_conflict(
    ledger: &ProviderLedger,
    span: &Span,
    ignore: Option<BookingId>,
) -> Result<(), EngineError> {
    match ledger
        .overlapping(span)
        .find(|h| Some(h.booking) != ignore)
    {
        Some(hold) => {
            metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL).increment(1);
            Err(EngineError::SlotConflict {
                conflicting: hold.booking,
            })
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::super::ledger::Hold;
    use super::*;

    const M: Ms = 60_000;

    fn ledger_with(spans: &[(Ms, Ms)]) -> (ProviderLedger, Vec<BookingId>) {
        let mut ledger = ProviderLedger::new(UserId::new());
        let mut ids = Vec::new();
        for (start, end) in spans {
            let id = BookingId::new();
            ledger.insert_hold(Hold {
                booking: id,
                span: Span::new(*start, *end),
            });
            ids.push(id);
        }
        (ledger, ids)
    }

    #[test]
    fn overlap_is_conflict() {
        let (ledger, ids) = ledger_with(&[(600 * M, 630 * M)]);
        let err = check_no_conflict(&ledger, &Span::new(615 * M, 645 * M), None).unwrap_err();
        assert_eq!(err, EngineError::SlotConflict { conflicting: ids[0] });
    }

    #[test]
    fn touching_endpoints_do_not_conflict() {
        let (ledger, _) = ledger_with(&[(600 * M, 630 * M)]);
        assert!(check_no_conflict(&ledger, &Span::new(630 * M, 660 * M), None).is_ok());
        assert!(check_no_conflict(&ledger, &Span::new(570 * M, 600 * M), None).is_ok());
    }

    #[test]
    fn own_hold_is_ignored() {
        let (ledger, ids) = ledger_with(&[(600 * M, 630 * M), (700 * M, 730 * M)]);
        assert!(check_no_conflict(&ledger, &Span::new(610 * M, 640 * M), Some(ids[0])).is_ok());
        // but not someone else's
        let err = check_no_conflict(&ledger, &Span::new(620 * M, 710 * M), Some(ids[0])).unwrap_err();
        assert_eq!(err, EngineError::SlotConflict { conflicting: ids[1] });
    }

    #[test]
    fn resolve_span_applies_default_duration() {
        let span = resolve_span(1_000, None, 30 * M).unwrap();
        assert_eq!(span, Span::new(1_000, 1_000 + 30 * M));
        let explicit = resolve_span(1_000, Some(2_000), 30 * M).unwrap();
        assert_eq!(explicit, Span::new(1_000, 2_000));
    }

    #[test]
    fn resolve_span_rejects_inverted_or_empty() {
        let err = resolve_span(2_000, Some(2_000), 30 * M).unwrap_err();
        assert_eq!(err.field(), Some("slot.end"));
        assert!(resolve_span(2_000, Some(1_000), 30 * M).is_err());
    }

    #[test]
    fn validate_span_limits() {
        assert!(validate_span(&Span { start: -5, end: 10 }).is_err());
        assert!(validate_span(&Span { start: 0, end: MAX_VALID_TIMESTAMP_MS + 1 }).is_err());
        assert!(validate_span(&Span { start: 0, end: MAX_SLOT_DURATION_MS + 1 }).is_err());
        assert!(validate_span(&Span { start: 0, end: MAX_SLOT_DURATION_MS }).is_ok());
    }

    #[test]
    fn past_start_rejected() {
        let err = require_future(&Span::new(100, 200), 150).unwrap_err();
        assert_eq!(err.field(), Some("slot.start"));
        assert!(require_future(&Span::new(150, 200), 150).is_ok());
    }
}
