use crate::model::*;

use super::ledger::Hold;
use super::{Engine, EngineError, SharedLedger};

impl Engine {
    pub async fn get_booking(&self, id: &BookingId) -> Result<Booking, EngineError> {
        let provider = self
            .provider_of(id)
            .ok_or_else(|| EngineError::booking_not_found(*id))?;
        let ledger = self
            .get_ledger(&provider)
            .ok_or_else(|| EngineError::booking_not_found(*id))?;
        let guard = ledger.read().await;
        guard
            .booking(id)
            .cloned()
            .ok_or_else(|| EngineError::booking_not_found(*id))
    }

    /// All bookings served by `provider`, ordered by slot start.
    pub async fn bookings_for_provider(&self, provider: &UserId) -> Vec<Booking> {
        let Some(ledger) = self.get_ledger(provider) else {
            return Vec::new();
        };
        let guard = ledger.read().await;
        let mut bookings: Vec<Booking> = guard.bookings.values().cloned().collect();
        bookings.sort_by_key(|b| (b.slot.start, b.id));
        bookings
    }

    /// Bookings where `user` is either the tenant or the provider.
    pub async fn bookings_for_user(&self, user: &UserId) -> Vec<Booking> {
        let ledgers: Vec<SharedLedger> = self.ledgers.iter().map(|e| e.value().clone()).collect();
        let mut bookings = Vec::new();
        for ledger in ledgers {
            let guard = ledger.read().await;
            bookings.extend(guard.bookings.values().filter(|b| b.involves(user)).cloned());
        }
        bookings.sort_by_key(|b| (b.slot.start, b.id));
        bookings
    }

    /// Currently held intervals for `provider`, ordered by start.
    pub async fn active_holds(&self, provider: &UserId) -> Vec<Hold> {
        match self.get_ledger(provider) {
            Some(ledger) => ledger.read().await.holds.clone(),
            None => Vec::new(),
        }
    }

    /// Whether `span` could be reserved with `provider` right now.
    pub async fn is_free(&self, provider: &UserId, span: &Span) -> bool {
        match self.get_ledger(provider) {
            Some(ledger) => ledger.read().await.overlapping(span).next().is_none(),
            None => true,
        }
    }

    /// Bookings still awaiting acceptance whose slot has ended by `now`.
    /// Contended ledgers are skipped; the next sweep picks them up.
    pub fn collect_past_due(&self, now: Ms) -> Vec<BookingId> {
        let mut due = Vec::new();
        for entry in self.ledgers.iter() {
            let ledger = entry.value().clone();
            if let Ok(guard) = ledger.try_read() {
                for hold in &guard.holds {
                    if hold.span.has_ended(now)
                        && guard
                            .booking(&hold.booking)
                            .is_some_and(|b| b.status.awaits_acceptance())
                    {
                        due.push(hold.booking);
                    }
                }
            }
        }
        due
    }

    pub fn booking_count(&self) -> usize {
        self.booking_to_provider.len()
    }
}
