use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Ulid);

        impl $name {
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ulid::from_string(s).map(Self)
            }
        }
    };
}

ulid_id!(
    /// A user known to the identity provider (tenant, owner or service provider).
    UserId
);
ulid_id!(PropertyId);
ulid_id!(ServiceId);
ulid_id!(
    /// Assigned on creation, never reused.
    BookingId
);

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn has_ended(&self, now: Ms) -> bool {
        self.end <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingKind {
    PropertyViewing,
    ServiceBooking,
}

impl fmt::Display for BookingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BookingKind::PropertyViewing => "property_viewing",
            BookingKind::ServiceBooking => "service_booking",
        })
    }
}

/// What a booking is about. Carrying the id inside the variant keeps
/// "exactly one of property/service" true by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Property(PropertyId),
    Service(ServiceId),
}

impl Subject {
    pub fn from_kind(kind: BookingKind, id: Ulid) -> Self {
        match kind {
            BookingKind::PropertyViewing => Subject::Property(PropertyId(id)),
            BookingKind::ServiceBooking => Subject::Service(ServiceId(id)),
        }
    }

    pub fn kind(&self) -> BookingKind {
        match self {
            Subject::Property(_) => BookingKind::PropertyViewing,
            Subject::Service(_) => BookingKind::ServiceBooking,
        }
    }

    pub fn property(&self) -> Option<PropertyId> {
        match self {
            Subject::Property(id) => Some(*id),
            Subject::Service(_) => None,
        }
    }

    pub fn service(&self) -> Option<ServiceId> {
        match self {
            Subject::Service(id) => Some(*id),
            Subject::Property(_) => None,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Property(id) => write!(f, "property:{id}"),
            Subject::Service(id) => write!(f, "service:{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Rescheduled,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }

    /// Statuses whose slot is an active hold in the ledger.
    pub fn holds_slot(&self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::Rescheduled
        )
    }

    /// Waiting for someone to (re-)confirm.
    pub fn awaits_acceptance(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Rescheduled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Rescheduled => "rescheduled",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Tenant,
    Provider,
    Admin,
}

/// Identity resolved by the session layer for one inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user: UserId,
    pub role: Role,
}

impl Caller {
    pub fn new(user: UserId, role: Role) -> Self {
        Self { user, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn actor(&self) -> Actor {
        Actor::User(self.user)
    }
}

/// Who caused a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    User(UserId),
    /// Background sweeps (past-due expiry).
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::User(id) => write!(f, "user:{id}"),
            Actor::System => f.write_str("system"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub status: BookingStatus,
    pub at: Ms,
    pub actor: Actor,
}

/// Reference to a payment captured elsewhere. Amount is in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub provider: String,
    pub transaction_id: String,
    pub amount: u64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub subject: Subject,
    pub tenant: UserId,
    pub provider: UserId,
    pub slot: Span,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub payment: Option<PaymentInfo>,
    pub created_at: Ms,
    /// Append-only.
    pub history: Vec<HistoryEntry>,
}

impl Booking {
    pub fn kind(&self) -> BookingKind {
        self.subject.kind()
    }

    pub fn involves(&self, user: &UserId) -> bool {
        self.tenant == *user || self.provider == *user
    }

    pub(crate) fn record(&mut self, status: BookingStatus, at: Ms, actor: Actor) {
        self.status = status;
        self.history.push(HistoryEntry { status, at, actor });
    }
}

/// WAL record format. Flat, no nesting.
/// Every event carries the provider so replay can route it to its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated {
        id: BookingId,
        subject: Subject,
        tenant: UserId,
        provider: UserId,
        slot: Span,
        notes: Option<String>,
        at: Ms,
        actor: Actor,
    },
    StatusChanged {
        id: BookingId,
        provider: UserId,
        status: BookingStatus,
        at: Ms,
        actor: Actor,
    },
    Rescheduled {
        id: BookingId,
        provider: UserId,
        slot: Span,
        at: Ms,
        actor: Actor,
    },
    NotesUpdated {
        id: BookingId,
        provider: UserId,
        notes: Option<String>,
    },
    PaymentAttached {
        id: BookingId,
        provider: UserId,
        payment: PaymentInfo,
    },
    /// Written by compaction: the full current state of one booking.
    Snapshot { booking: Booking },
}

impl Event {
    pub fn provider(&self) -> UserId {
        match self {
            Event::BookingCreated { provider, .. }
            | Event::StatusChanged { provider, .. }
            | Event::Rescheduled { provider, .. }
            | Event::NotesUpdated { provider, .. }
            | Event::PaymentAttached { provider, .. } => *provider,
            Event::Snapshot { booking } => booking.provider,
        }
    }
}

/// Outbound notification types handed to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingCreated,
    BookingConfirmed,
    BookingRescheduled,
    BookingCancelled,
    BookingCompleted,
    BookingExpired,
    NotesUpdated,
    PaymentAttached,
}

impl NotificationKind {
    pub fn for_status(status: BookingStatus) -> Self {
        match status {
            BookingStatus::Pending => NotificationKind::BookingCreated,
            BookingStatus::Confirmed => NotificationKind::BookingConfirmed,
            BookingStatus::Rescheduled => NotificationKind::BookingRescheduled,
            BookingStatus::Cancelled => NotificationKind::BookingCancelled,
            BookingStatus::Completed => NotificationKind::BookingCompleted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_contained_overlaps() {
        let outer = Span::new(100, 400);
        let inner = Span::new(150, 300);
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn span_has_ended_at_end_instant() {
        let s = Span::new(100, 200);
        assert!(!s.has_ended(199));
        assert!(s.has_ended(200));
    }

    #[test]
    fn subject_kind_matches_variant() {
        let p = Subject::from_kind(BookingKind::PropertyViewing, Ulid::new());
        assert_eq!(p.kind(), BookingKind::PropertyViewing);
        assert!(p.property().is_some());
        assert!(p.service().is_none());

        let s = Subject::from_kind(BookingKind::ServiceBooking, Ulid::new());
        assert_eq!(s.kind(), BookingKind::ServiceBooking);
        assert!(s.property().is_none());
        assert!(s.service().is_some());
    }

    #[test]
    fn status_classes() {
        assert!(BookingStatus::Cancelled.is_terminal());
        assert!(BookingStatus::Completed.is_terminal());
        assert!(!BookingStatus::Rescheduled.is_terminal());
        assert!(BookingStatus::Rescheduled.holds_slot());
        assert!(!BookingStatus::Completed.holds_slot());
        assert!(BookingStatus::Rescheduled.awaits_acceptance());
        assert!(!BookingStatus::Confirmed.awaits_acceptance());
    }

    #[test]
    fn ids_parse_from_display() {
        let id = BookingId::new();
        let parsed: BookingId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-ulid".parse::<UserId>().is_err());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = UserId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            id: BookingId::new(),
            subject: Subject::Property(PropertyId::new()),
            tenant: UserId::new(),
            provider: UserId::new(),
            slot: Span::new(1000, 2000),
            notes: Some("ring twice".into()),
            at: 500,
            actor: Actor::System,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
