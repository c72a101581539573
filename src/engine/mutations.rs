use tracing::info;

use crate::limits::*;
use crate::model::*;
use crate::verification::{Parties, Purpose, Verdict};

use super::conflict::{check_no_conflict, require_future, validate_span};
use super::transitions::{plan, Step, Transition};
use super::{Engine, EngineError};

/// A reservation request whose provider and slot are already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub subject: Subject,
    pub tenant: UserId,
    pub provider: UserId,
    pub slot: Span,
    pub notes: Option<String>,
}

/// Result of a state-changing call. `changed` is false when the call was an
/// idempotent repeat and nothing was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub booking: Booking,
    pub changed: bool,
}

impl Outcome {
    fn unchanged(booking: Booking) -> Self {
        Self {
            booking,
            changed: false,
        }
    }

    fn changed(booking: Booking) -> Self {
        Self {
            booking,
            changed: true,
        }
    }
}

fn validate_notes(notes: &Option<String>) -> Result<(), EngineError> {
    if let Some(n) = notes
        && n.len() > MAX_NOTES_LEN
    {
        return Err(EngineError::invalid("notes", "notes too long"));
    }
    Ok(())
}

fn validate_payment(payment: &PaymentInfo) -> Result<(), EngineError> {
    let fields = [
        ("payment.provider", &payment.provider),
        ("payment.transaction_id", &payment.transaction_id),
        ("payment.currency", &payment.currency),
    ];
    for (field, value) in fields {
        if value.trim().is_empty() {
            return Err(EngineError::invalid(field, "must not be empty"));
        }
        if value.len() > MAX_PAYMENT_FIELD_LEN {
            return Err(EngineError::invalid(field, "too long"));
        }
    }
    Ok(())
}

fn slot_not_ended(booking: &Booking, transition: Transition) -> EngineError {
    EngineError::InvalidTransition {
        from: booking.status,
        transition,
        reason: "slot has not ended yet",
    }
}

impl Engine {
    /// Reserve `req.slot` on the provider's ledger and create the booking in
    /// `pending`. The conflict check and the insert happen under one write
    /// lock, so of several overlapping concurrent requests exactly one wins.
    pub async fn create_booking(&self, req: NewBooking, actor: Actor) -> Result<Booking, EngineError> {
        validate_span(&req.slot)?;
        require_future(&req.slot, self.now())?;
        validate_notes(&req.notes)?;
        if req.tenant == req.provider {
            return Err(EngineError::invalid("provider", "cannot book your own listing"));
        }

        // Verification lookups may hit an external store: resolve before locking.
        let parties = Parties {
            tenant: req.tenant,
            provider: req.provider,
            subject: req.subject,
        };
        if let Verdict::Ineligible { user, field } = self.gate.evaluate(&parties, Purpose::Creation).await? {
            return Err(EngineError::NotEligible { user, field });
        }

        let _shared = self.commit_gate.read().await;
        let ledger = self.ledger_for(req.provider);
        let mut guard = ledger.write().await;
        if guard.active_count() >= MAX_ACTIVE_HOLDS_PER_PROVIDER {
            return Err(EngineError::invalid("provider", "too many active bookings"));
        }
        check_no_conflict(&guard, &req.slot, None)?;

        let id = BookingId::new();
        let event = Event::BookingCreated {
            id,
            subject: req.subject,
            tenant: req.tenant,
            provider: req.provider,
            slot: req.slot,
            notes: req.notes,
            at: self.now(),
            actor,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let booking = guard
            .booking(&id)
            .cloned()
            .ok_or_else(|| EngineError::booking_not_found(id))?;
        info!(
            "booking {id} created: {} for {} with {} [{}, {})",
            booking.kind(),
            booking.tenant,
            booking.provider,
            booking.slot.start,
            booking.slot.end
        );
        Ok(booking)
    }

    /// Run a status-only transition under the provider lock. `precondition`
    /// sees the booking as it is under the lock and the current time.
    async fn transition<F>(
        &self,
        id: BookingId,
        actor: Actor,
        transition: Transition,
        precondition: F,
    ) -> Result<Outcome, EngineError>
    where
        F: FnOnce(&Booking, Ms) -> Result<(), EngineError>,
    {
        let _shared = self.commit_gate.read().await;
        let mut guard = self.resolve_booking_write(&id).await?;
        let booking = guard
            .booking(&id)
            .ok_or_else(|| EngineError::booking_not_found(id))?;

        let next = match plan(booking.status, transition)? {
            Step::AlreadyThere => return Ok(Outcome::unchanged(booking.clone())),
            Step::Apply(next) => next,
        };
        let now = self.now();
        precondition(booking, now)?;
        let from = booking.status;

        let event = Event::StatusChanged {
            id,
            provider: guard.provider,
            status: next,
            at: now,
            actor,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let booking = guard
            .booking(&id)
            .cloned()
            .ok_or_else(|| EngineError::booking_not_found(id))?;
        info!("booking {id}: {from} -> {next} ({transition} by {actor})");
        Ok(Outcome::changed(booking))
    }

    /// `pending`/`rescheduled` → `confirmed`. Requires the verification gate
    /// for confirmation; repeated calls on a confirmed booking are no-ops.
    pub async fn confirm(&self, id: BookingId, actor: Actor) -> Result<Outcome, EngineError> {
        let snapshot = self.get_booking(&id).await?;
        if let Step::AlreadyThere = plan(snapshot.status, Transition::Confirm)? {
            return Ok(Outcome::unchanged(snapshot));
        }
        // Parties are immutable, so a snapshot read is enough for the gate.
        let verdict = self
            .gate
            .evaluate(&Parties::of(&snapshot), Purpose::Confirmation)
            .await?;
        self.transition(id, actor, Transition::Confirm, |_, _| match verdict {
            Verdict::Eligible => Ok(()),
            Verdict::Ineligible { user, field } => Err(EngineError::NotEligible { user, field }),
        })
        .await
    }

    /// Any non-terminal status → `cancelled`, releasing the hold.
    pub async fn cancel(&self, id: BookingId, actor: Actor) -> Result<Outcome, EngineError> {
        self.transition(id, actor, Transition::Cancel, |_, _| Ok(())).await
    }

    /// `confirmed` → `completed`, only once the slot has ended.
    pub async fn complete(&self, id: BookingId, actor: Actor) -> Result<Outcome, EngineError> {
        self.transition(id, actor, Transition::Complete, |b, now| {
            if b.slot.has_ended(now) {
                Ok(())
            } else {
                Err(slot_not_ended(b, Transition::Complete))
            }
        })
        .await
    }

    /// Cancel a booking nobody accepted before its slot ended.
    pub async fn expire(&self, id: BookingId) -> Result<Outcome, EngineError> {
        self.transition(id, Actor::System, Transition::Expire, |b, now| {
            if b.slot.has_ended(now) {
                Ok(())
            } else {
                Err(slot_not_ended(b, Transition::Expire))
            }
        })
        .await
    }

    /// Move a `pending` or `confirmed` booking to `new_slot`. Releasing the
    /// old hold and claiming the new one is a single step under the provider
    /// lock; on conflict the booking is left exactly as it was.
    pub async fn reschedule(&self, id: BookingId, actor: Actor, new_slot: Span) -> Result<Outcome, EngineError> {
        validate_span(&new_slot)?;

        let _shared = self.commit_gate.read().await;
        let mut guard = self.resolve_booking_write(&id).await?;
        let booking = guard
            .booking(&id)
            .ok_or_else(|| EngineError::booking_not_found(id))?;

        // A repeat of an applied move succeeds even once the new slot has begun.
        if booking.status == BookingStatus::Rescheduled && booking.slot == new_slot {
            return Ok(Outcome::unchanged(booking.clone()));
        }
        require_future(&new_slot, self.now())?;
        if let Step::AlreadyThere = plan(booking.status, Transition::Reschedule)? {
            return Err(EngineError::InvalidTransition {
                from: booking.status,
                transition: Transition::Reschedule,
                reason: "previous reschedule awaits confirmation",
            });
        }
        let from = booking.status;
        check_no_conflict(&guard, &new_slot, Some(id))?;

        let event = Event::Rescheduled {
            id,
            provider: guard.provider,
            slot: new_slot,
            at: self.now(),
            actor,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let booking = guard
            .booking(&id)
            .cloned()
            .ok_or_else(|| EngineError::booking_not_found(id))?;
        info!(
            "booking {id}: {from} -> rescheduled to [{}, {}) by {actor}",
            new_slot.start, new_slot.end
        );
        Ok(Outcome::changed(booking))
    }

    /// Replace the free-text notes while the booking is still open.
    pub async fn update_notes(&self, id: BookingId, notes: Option<String>) -> Result<Outcome, EngineError> {
        validate_notes(&notes)?;
        let _shared = self.commit_gate.read().await;
        let mut guard = self.resolve_booking_write(&id).await?;
        let booking = guard
            .booking(&id)
            .ok_or_else(|| EngineError::booking_not_found(id))?;
        if booking.status.is_terminal() {
            return Err(EngineError::invalid("notes", "booking is closed"));
        }
        if booking.notes == notes {
            return Ok(Outcome::unchanged(booking.clone()));
        }

        let event = Event::NotesUpdated {
            id,
            provider: guard.provider,
            notes,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let booking = guard
            .booking(&id)
            .cloned()
            .ok_or_else(|| EngineError::booking_not_found(id))?;
        Ok(Outcome::changed(booking))
    }

    /// Record an externally captured payment. Only confirmed (or completed)
    /// bookings accept one, and only one.
    pub async fn attach_payment(&self, id: BookingId, payment: PaymentInfo) -> Result<Outcome, EngineError> {
        validate_payment(&payment)?;
        let _shared = self.commit_gate.read().await;
        let mut guard = self.resolve_booking_write(&id).await?;
        let booking = guard
            .booking(&id)
            .ok_or_else(|| EngineError::booking_not_found(id))?;
        if !matches!(booking.status, BookingStatus::Confirmed | BookingStatus::Completed) {
            return Err(EngineError::invalid("payment", "booking is not confirmed"));
        }
        match &booking.payment {
            Some(existing) if *existing == payment => {
                return Ok(Outcome::unchanged(booking.clone()));
            }
            Some(_) => return Err(EngineError::invalid("payment", "a payment is already recorded")),
            None => {}
        }

        let event = Event::PaymentAttached {
            id,
            provider: guard.provider,
            payment,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let booking = guard
            .booking(&id)
            .cloned()
            .ok_or_else(|| EngineError::booking_not_found(id))?;
        info!("booking {id}: payment recorded");
        Ok(Outcome::changed(booking))
    }
}
