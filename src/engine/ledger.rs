use std::collections::HashMap;

use crate::model::*;

/// An active claim on a provider's time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hold {
    pub booking: BookingId,
    pub span: Span,
}

/// Everything the engine knows about one provider: its bookings (any status)
/// and the derived set of held intervals. Guarded by a single lock, so the
/// holds can never drift from the bookings they are derived from.
#[derive(Debug, Clone)]
pub struct ProviderLedger {
    pub provider: UserId,
    /// Active holds, sorted by `span.start`.
    pub holds: Vec<Hold>,
    pub bookings: HashMap<BookingId, Booking>,
}

impl ProviderLedger {
    pub fn new(provider: UserId) -> Self {
        Self {
            provider,
            holds: Vec::new(),
            bookings: HashMap::new(),
        }
    }

    /// Insert a hold maintaining sort order by span.start.
    pub fn insert_hold(&mut self, hold: Hold) {
        let pos = self
            .holds
            .binary_search_by_key(&hold.span.start, |h| h.span.start)
            .unwrap_or_else(|e| e);
        self.holds.insert(pos, hold);
    }

    pub fn release_hold(&mut self, booking: BookingId) -> Option<Hold> {
        let pos = self.holds.iter().position(|h| h.booking == booking)?;
        Some(self.holds.remove(pos))
    }

    /// Holds whose span overlaps the query window.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Hold> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self.holds.partition_point(|h| h.span.start < query.end);
        self.holds[..right_bound]
            .iter()
            .filter(move |h| h.span.end > query.start)
    }

    pub fn booking(&self, id: &BookingId) -> Option<&Booking> {
        self.bookings.get(id)
    }

    pub fn active_count(&self) -> usize {
        self.holds.len()
    }

    /// Holds must be exactly the slots of bookings in a slot-holding status.
    #[cfg(test)]
    pub fn is_consistent(&self) -> bool {
        let mut expected: Vec<Hold> = self
            .bookings
            .values()
            .filter(|b| b.status.holds_slot())
            .map(|b| Hold {
                booking: b.id,
                span: b.slot,
            })
            .collect();
        let mut actual = self.holds.clone();
        expected.sort_by_key(|h| (h.span.start, h.booking));
        actual.sort_by_key(|h| (h.span.start, h.booking));
        expected == actual
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hold(start: Ms, end: Ms) -> Hold {
        Hold {
            booking: BookingId::new(),
            span: Span::new(start, end),
        }
    }

    #[test]
    fn holds_stay_sorted() {
        let mut ledger = ProviderLedger::new(UserId::new());
        ledger.insert_hold(hold(300, 400));
        ledger.insert_hold(hold(100, 200));
        ledger.insert_hold(hold(200, 300));
        let starts: Vec<Ms> = ledger.holds.iter().map(|h| h.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn release_middle_preserves_order() {
        let mut ledger = ProviderLedger::new(UserId::new());
        let holds: Vec<Hold> = (0..3).map(|i| hold(i * 100, i * 100 + 50)).collect();
        for h in &holds {
            ledger.insert_hold(*h);
        }
        assert_eq!(ledger.release_hold(holds[1].booking), Some(holds[1]));
        assert_eq!(ledger.holds, vec![holds[0], holds[2]]);
    }

    #[test]
    fn release_unknown_is_none() {
        let mut ledger = ProviderLedger::new(UserId::new());
        ledger.insert_hold(hold(100, 200));
        assert!(ledger.release_hold(BookingId::new()).is_none());
        assert_eq!(ledger.active_count(), 1);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut ledger = ProviderLedger::new(UserId::new());
        ledger.insert_hold(hold(100, 200));
        ledger.insert_hold(hold(450, 600));
        ledger.insert_hold(hold(1000, 1100));

        let hits: Vec<_> = ledger.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut ledger = ProviderLedger::new(UserId::new());
        ledger.insert_hold(hold(100, 200));
        ledger.insert_hold(hold(300, 400));
        let hits: Vec<_> = ledger.overlapping(&Span::new(200, 300)).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn overlapping_long_hold_spanning_query() {
        let mut ledger = ProviderLedger::new(UserId::new());
        ledger.insert_hold(hold(0, 10_000));
        let hits: Vec<_> = ledger.overlapping(&Span::new(500, 600)).collect();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn overlapping_single_ms() {
        let mut ledger = ProviderLedger::new(UserId::new());
        ledger.insert_hold(hold(100, 201));
        let hits: Vec<_> = ledger.overlapping(&Span::new(200, 300)).collect();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn overlapping_empty_ledger() {
        let ledger = ProviderLedger::new(UserId::new());
        assert_eq!(ledger.overlapping(&Span::new(0, 1000)).count(), 0);
    }
}
