use std::fmt;

use crate::model::BookingStatus;
use crate::model::BookingStatus::*;

use super::EngineError;

/// Events that move a booking through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Confirm,
    Reschedule,
    Cancel,
    Complete,
    /// Past-due sweep of a booking nobody accepted.
    Expire,
}

impl Transition {
    /// Status the booking is in after this transition succeeds. A booking
    /// already there makes the transition a no-op.
    pub fn target(&self) -> BookingStatus {
        match self {
            Transition::Confirm => Confirmed,
            Transition::Reschedule => Rescheduled,
            Transition::Cancel | Transition::Expire => Cancelled,
            Transition::Complete => Completed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Confirm => "confirm",
            Transition::Reschedule => "reschedule",
            Transition::Cancel => "cancel",
            Transition::Complete => "complete",
            Transition::Expire => "expire",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(current, transition) -> next`. Anything not listed is illegal.
const TABLE: &[(BookingStatus, Transition, BookingStatus)] = &[
    (Pending, Transition::Confirm, Confirmed),
    (Pending, Transition::Reschedule, Rescheduled),
    (Pending, Transition::Cancel, Cancelled),
    (Pending, Transition::Expire, Cancelled),
    (Confirmed, Transition::Reschedule, Rescheduled),
    (Confirmed, Transition::Cancel, Cancelled),
    (Confirmed, Transition::Complete, Completed),
    (Rescheduled, Transition::Confirm, Confirmed),
    (Rescheduled, Transition::Cancel, Cancelled),
    (Rescheduled, Transition::Expire, Cancelled),
];

pub fn next_status(from: BookingStatus, transition: Transition) -> Option<BookingStatus> {
    TABLE
        .iter()
        .find(|(s, t, _)| *s == from && *t == transition)
        .map(|(_, _, next)| *next)
}

/// What the caller should do with a transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Already in the target state; succeed without writing anything.
    AlreadyThere,
    Apply(BookingStatus),
}

/// Resolve a transition against the table. Re-issuing a transition whose
/// target is the current status is idempotent success.
pub(crate) fn plan(from: BookingStatus, transition: Transition) -> Result<Step, EngineError> {
    if from == transition.target() {
        return Ok(Step::AlreadyThere);
    }
    next_status(from, transition)
        .map(Step::Apply)
        .ok_or(EngineError::InvalidTransition {
            from,
            transition,
            reason: "not reachable from current status",
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATUSES: [BookingStatus; 5] = [Pending, Confirmed, Rescheduled, Cancelled, Completed];

    #[test]
    fn terminal_states_have_no_exits() {
        for t in [
            Transition::Confirm,
            Transition::Reschedule,
            Transition::Cancel,
            Transition::Complete,
            Transition::Expire,
        ] {
            assert_eq!(next_status(Cancelled, t), None);
            assert_eq!(next_status(Completed, t), None);
        }
    }

    #[test]
    fn cancel_is_legal_from_every_live_state() {
        for s in ALL_STATUSES.iter().filter(|s| !s.is_terminal()) {
            assert_eq!(next_status(*s, Transition::Cancel), Some(Cancelled));
        }
    }

    #[test]
    fn complete_only_from_confirmed() {
        for s in ALL_STATUSES {
            let expected = (s == Confirmed).then_some(Completed);
            assert_eq!(next_status(s, Transition::Complete), expected, "from {s}");
        }
    }

    #[test]
    fn reschedule_not_from_rescheduled() {
        assert_eq!(next_status(Rescheduled, Transition::Reschedule), None);
        assert_eq!(next_status(Confirmed, Transition::Reschedule), Some(Rescheduled));
    }

    #[test]
    fn expire_only_while_awaiting_acceptance() {
        for s in ALL_STATUSES {
            let expected = s.awaits_acceptance().then_some(Cancelled);
            assert_eq!(next_status(s, Transition::Expire), expected, "from {s}");
        }
    }

    #[test]
    fn plan_treats_target_state_as_noop() {
        assert_eq!(plan(Confirmed, Transition::Confirm), Ok(Step::AlreadyThere));
        assert_eq!(plan(Cancelled, Transition::Cancel), Ok(Step::AlreadyThere));
        assert_eq!(plan(Cancelled, Transition::Expire), Ok(Step::AlreadyThere));
        assert_eq!(plan(Pending, Transition::Confirm), Ok(Step::Apply(Confirmed)));
    }

    #[test]
    fn plan_rejects_unreachable() {
        let err = plan(Cancelled, Transition::Confirm).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: Cancelled,
                transition: Transition::Confirm,
                ..
            }
        ));
        assert!(plan(Completed, Transition::Cancel).is_err());
        assert!(plan(Pending, Transition::Complete).is_err());
    }
}
