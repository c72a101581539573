use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::service::BookingService;

/// Background task that periodically cancels bookings nobody accepted
/// before their slot ended.
pub async fn run_reaper(service: BookingService, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let expired = service.expire_past_due().await;
        if expired > 0 {
            info!("past-due sweep expired {expired} bookings");
        }
    }
}

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&engine, threshold).await {
            warn!("WAL compaction failed: {e}");
        }
    }
}

/// Compact when the WAL has grown past `threshold` appends. Returns whether
/// a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> Result<bool, crate::engine::EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!("compaction skipped: {appends} appends since last run");
        return Ok(false);
    }
    engine.compact_wal().await?;
    info!(
        "compacted WAL after {appends} appends ({} bookings)",
        engine.booking_count()
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::clock::ManualClock;
    use crate::engine::NewBooking;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use crate::verification::{InMemoryVerificationStore, VerificationGate};
    use std::path::PathBuf;

    const H: Ms = 3_600_000;
    const T0: Ms = 1_893_456_000_000;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("viewslot_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn engine(path: PathBuf, clock: Arc<ManualClock>) -> Arc<Engine> {
        let gate = VerificationGate::new(Arc::new(InMemoryVerificationStore::new()));
        Arc::new(Engine::new(path, gate, clock).unwrap())
    }

    fn new_booking(provider: UserId, start: Ms) -> NewBooking {
        NewBooking {
            subject: Subject::Property(PropertyId::new()),
            tenant: UserId::new(),
            provider,
            slot: Span::new(start, start + H),
            notes: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_expires_past_due_bookings() {
        let clock = Arc::new(ManualClock::new(T0));
        let engine = engine(test_wal_path("reaper_expire.wal"), clock.clone());
        let hub = Arc::new(NotifyHub::new());
        let service = BookingService::new(engine.clone(), Arc::new(InMemoryCatalog::new()), hub.clone(), H);

        let provider = UserId::new();
        let b = engine
            .create_booking(new_booking(provider, T0 + H), Actor::System)
            .await
            .unwrap();
        let mut rx = hub.subscribe(b.tenant);

        tokio::spawn(run_reaper(service, Duration::from_secs(30)));
        clock.set(T0 + 2 * H + 1);

        let n = rx.recv().await.unwrap();
        assert_eq!(n.kind, NotificationKind::BookingExpired);
        assert_eq!(n.booking.status, BookingStatus::Cancelled);
        assert!(engine.active_holds(&provider).await.is_empty());
    }

    #[tokio::test]
    async fn compaction_waits_for_threshold() {
        let path = test_wal_path("compact_threshold.wal");
        let clock = Arc::new(ManualClock::new(T0));
        let engine = engine(path.clone(), clock.clone());
        let provider = UserId::new();

        let mut ids = Vec::new();
        for i in 0..4 {
            let b = engine
                .create_booking(new_booking(provider, T0 + (i + 1) * H), Actor::System)
                .await
                .unwrap();
            ids.push(b.id);
        }
        engine.cancel(ids[0], Actor::System).await.unwrap();

        assert!(!compact_if_due(&engine, 10).await.unwrap());
        assert!(compact_if_due(&engine, 5).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        let before = engine.bookings_for_provider(&provider).await;
        drop(engine);
        let reopened = self::engine(path, clock);
        assert_eq!(reopened.bookings_for_provider(&provider).await, before);
        assert_eq!(reopened.active_holds(&provider).await.len(), 3);
    }
}
