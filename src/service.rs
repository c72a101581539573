//! The booking façade: the only surface external callers use.
//!
//! Each operation resolves the caller's permission on the booking, delegates
//! to the engine, and hands any resulting change to the dispatcher. Mutating
//! operations run as detached tasks, so a caller that goes away mid-request
//! (client disconnect, dropped future) cannot cut a reservation in half.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::catalog::ListingCatalog;
use crate::engine::{resolve_span, Engine, EngineError, NewBooking};
use crate::model::*;
use crate::notify::Dispatcher;
use crate::observability;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub subject: Subject,
    /// Defaults to the caller. Only admins may book on someone else's behalf.
    pub tenant: Option<UserId>,
    /// Resolved from the catalog when omitted; must match it when given.
    pub provider: Option<UserId>,
    pub start: Ms,
    /// Defaults to `start + default_duration`.
    pub end: Option<Ms>,
    pub notes: Option<String>,
}

/// Post-creation operations on one booking.
#[derive(Debug, Clone)]
enum Op {
    Confirm,
    Cancel,
    Complete,
    Reschedule { start: Ms, end: Option<Ms> },
    UpdateNotes(Option<String>),
    AttachPayment(PaymentInfo),
}

impl Op {
    fn label(&self) -> &'static str {
        match self {
            Op::Confirm => "confirm",
            Op::Cancel => "cancel",
            Op::Complete => "complete",
            Op::Reschedule { .. } => "reschedule",
            Op::UpdateNotes(_) => "update_notes",
            Op::AttachPayment(_) => "attach_payment",
        }
    }

    fn notification(&self) -> NotificationKind {
        match self {
            Op::Confirm => NotificationKind::BookingConfirmed,
            Op::Cancel => NotificationKind::BookingCancelled,
            Op::Complete => NotificationKind::BookingCompleted,
            Op::Reschedule { .. } => NotificationKind::BookingRescheduled,
            Op::UpdateNotes(_) => NotificationKind::NotesUpdated,
            Op::AttachPayment(_) => NotificationKind::PaymentAttached,
        }
    }
}

/// Record request metrics around one operation.
async fn observe<T>(
    op: &'static str,
    fut: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    let start = Instant::now();
    let result = fut.await;
    let status = observability::status_label(&result);
    metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        debug!("{op} rejected: {e}");
    }
    result
}

/// Run `fut` to completion on its own task regardless of whether the
/// awaiting caller is still around.
async fn detached<T>(fut: impl Future<Output = Result<T, EngineError>> + Send + 'static) -> Result<T, EngineError>
where
    T: Send + 'static,
{
    tokio::spawn(fut)
        .await
        .map_err(|e| EngineError::Unavailable(format!("operation aborted: {e}")))?
}

#[derive(Clone)]
pub struct BookingService {
    engine: Arc<Engine>,
    catalog: Arc<dyn ListingCatalog>,
    dispatcher: Arc<dyn Dispatcher>,
    default_duration: Ms,
}

impl BookingService {
    pub fn new(
        engine: Arc<Engine>,
        catalog: Arc<dyn ListingCatalog>,
        dispatcher: Arc<dyn Dispatcher>,
        default_duration: Ms,
    ) -> Self {
        Self {
            engine,
            catalog,
            dispatcher,
            default_duration,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub async fn create(&self, caller: Caller, req: CreateRequest) -> Result<Booking, EngineError> {
        let this = self.clone();
        observe("create", detached(async move { this.create_inner(caller, req).await })).await
    }

    pub async fn confirm(&self, caller: Caller, id: BookingId) -> Result<Booking, EngineError> {
        self.submit(caller, id, Op::Confirm).await
    }

    pub async fn reschedule(
        &self,
        caller: Caller,
        id: BookingId,
        start: Ms,
        end: Option<Ms>,
    ) -> Result<Booking, EngineError> {
        self.submit(caller, id, Op::Reschedule { start, end }).await
    }

    pub async fn cancel(&self, caller: Caller, id: BookingId) -> Result<Booking, EngineError> {
        self.submit(caller, id, Op::Cancel).await
    }

    pub async fn complete(&self, caller: Caller, id: BookingId) -> Result<Booking, EngineError> {
        self.submit(caller, id, Op::Complete).await
    }

    pub async fn update_notes(
        &self,
        caller: Caller,
        id: BookingId,
        notes: Option<String>,
    ) -> Result<Booking, EngineError> {
        self.submit(caller, id, Op::UpdateNotes(notes)).await
    }

    pub async fn attach_payment(
        &self,
        caller: Caller,
        id: BookingId,
        payment: PaymentInfo,
    ) -> Result<Booking, EngineError> {
        self.submit(caller, id, Op::AttachPayment(payment)).await
    }

    pub async fn get(&self, caller: Caller, id: BookingId) -> Result<Booking, EngineError> {
        observe("get", self.authorize(&caller, id)).await
    }

    /// Bookings where `user` is tenant or provider. Users may only list
    /// their own; admins may list anyone's.
    pub async fn list_for_user(&self, caller: Caller, user: UserId) -> Result<Vec<Booking>, EngineError> {
        observe("list_for_user", async {
            if caller.user != user && !caller.is_admin() {
                return Err(EngineError::Forbidden { user: caller.user });
            }
            Ok(self.engine.bookings_for_user(&user).await)
        })
        .await
    }

    /// A provider (or admin) sees the whole schedule; anyone else sees only
    /// their own bookings with that provider.
    pub async fn list_for_provider(
        &self,
        caller: Caller,
        provider: UserId,
    ) -> Result<Vec<Booking>, EngineError> {
        observe("list_for_provider", async {
            let bookings = self.engine.bookings_for_provider(&provider).await;
            if caller.user == provider || caller.is_admin() {
                return Ok(bookings);
            }
            Ok(bookings
                .into_iter()
                .filter(|b| b.tenant == caller.user)
                .collect())
        })
        .await
    }

    /// Auto-cancel bookings still awaiting acceptance after their slot ended.
    /// Returns how many were expired.
    pub async fn expire_past_due(&self) -> usize {
        let due = self.engine.collect_past_due(self.engine.now());
        let mut expired = 0;
        for id in due {
            match self.engine.expire(id).await {
                Ok(outcome) if outcome.changed => {
                    expired += 1;
                    metrics::counter!(observability::EXPIRED_TOTAL).increment(1);
                    info!("expired past-due booking {id}");
                    self.dispatcher
                        .dispatch(NotificationKind::BookingExpired, &outcome.booking);
                }
                Ok(_) => {}
                // Confirmed or cancelled since it was collected.
                Err(e) => debug!("expiry skip {id}: {e}"),
            }
        }
        expired
    }

    async fn submit(&self, caller: Caller, id: BookingId, op: Op) -> Result<Booking, EngineError> {
        let label = op.label();
        let this = self.clone();
        observe(label, detached(async move { this.apply(caller, id, op).await })).await
    }

    async fn authorize(&self, caller: &Caller, id: BookingId) -> Result<Booking, EngineError> {
        let booking = self.engine.get_booking(&id).await?;
        if caller.is_admin() || booking.involves(&caller.user) {
            Ok(booking)
        } else {
            Err(EngineError::Forbidden { user: caller.user })
        }
    }

    async fn create_inner(&self, caller: Caller, req: CreateRequest) -> Result<Booking, EngineError> {
        let tenant = req.tenant.unwrap_or(caller.user);
        if tenant != caller.user && !caller.is_admin() {
            return Err(EngineError::Forbidden { user: caller.user });
        }

        let owner = self
            .catalog
            .resolve_provider(&req.subject)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                field: "subject",
                id: req.subject.to_string(),
            })?;
        let provider = match req.provider {
            Some(given) if given != owner => {
                return Err(EngineError::invalid("provider", "does not own the subject"));
            }
            _ => owner,
        };
        let slot = resolve_span(req.start, req.end, self.default_duration)?;

        let booking = self
            .engine
            .create_booking(
                NewBooking {
                    subject: req.subject,
                    tenant,
                    provider,
                    slot,
                    notes: req.notes,
                },
                caller.actor(),
            )
            .await?;
        self.dispatcher
            .dispatch(NotificationKind::BookingCreated, &booking);
        Ok(booking)
    }

    async fn apply(&self, caller: Caller, id: BookingId, op: Op) -> Result<Booking, EngineError> {
        let current = self.authorize(&caller, id).await?;
        let actor = caller.actor();
        let notification = op.notification();

        let outcome = match op {
            Op::Confirm => self.engine.confirm(id, actor).await?,
            Op::Cancel => self.engine.cancel(id, actor).await?,
            Op::Complete => self.engine.complete(id, actor).await?,
            Op::Reschedule { start, end } => {
                // Without an explicit end, keep the booking's current length.
                let slot = resolve_span(start, end, current.slot.duration_ms())?;
                self.engine.reschedule(id, actor, slot).await?
            }
            Op::UpdateNotes(notes) => self.engine.update_notes(id, notes).await?,
            Op::AttachPayment(payment) => self.engine.attach_payment(id, payment).await?,
        };
        if outcome.changed {
            self.dispatcher.dispatch(notification, &outcome.booking);
        }
        Ok(outcome.booking)
    }
}
