use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::model::{Booking, NotificationKind, UserId};

const CHANNEL_CAPACITY: usize = 256;

/// Outbound notification sink. Fire-and-forget: a delivery failure must
/// never roll back the booking change that produced it.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, kind: NotificationKind, booking: &Booking);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub booking: Booking,
}

/// Broadcast hub keyed by user. Every notification goes to both the
/// booking's tenant and its provider.
pub struct NotifyHub {
    channels: DashMap<UserId, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a user. Creates the channel if needed.
    pub fn subscribe(&self, user: UserId) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(user)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Drop a user's channel once nobody listens any more.
    pub fn prune(&self, user: &UserId) {
        self.channels
            .remove_if(user, |_, sender| sender.receiver_count() == 0);
    }

    /// Send a notification. No-op if nobody is listening.
    fn send(&self, user: &UserId, notification: &Notification) {
        if let Some(sender) = self.channels.get(user)
            && sender.send(notification.clone()).is_err()
        {
            metrics::counter!(crate::observability::NOTIFICATIONS_DROPPED_TOTAL).increment(1);
        }
    }
}

impl Dispatcher for NotifyHub {
    fn dispatch(&self, kind: NotificationKind, booking: &Booking) {
        debug!("{kind:?} for booking {}", booking.id);
        let notification = Notification {
            kind,
            booking: booking.clone(),
        };
        self.send(&booking.tenant, &notification);
        self.send(&booking.provider, &notification);
    }
}
