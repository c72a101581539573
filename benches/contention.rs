use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use viewslot::clock::{Clock, SystemClock};
use viewslot::engine::{Engine, EngineError, NewBooking};
use viewslot::model::*;
use viewslot::verification::{InMemoryVerificationStore, VerificationGate};

const HOUR: Ms = 3_600_000; // 1 hour in ms
const DAY: Ms = 24 * HOUR;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn bench_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("viewslot_bench");
    let _ = std::fs::create_dir_all(&dir);
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn open_engine(name: &str) -> Arc<Engine> {
    let gate = VerificationGate::new(Arc::new(InMemoryVerificationStore::new()));
    match Engine::new(bench_wal_path(name), gate, Arc::new(SystemClock)) {
        Ok(engine) => Arc::new(engine),
        Err(e) => panic!("cannot open engine: {e}"),
    }
}

/// Well clear of "now" so slots are always in the future.
fn base_time() -> Ms {
    SystemClock.now_ms() + 30 * DAY
}

fn request(provider: UserId, start: Ms) -> NewBooking {
    NewBooking {
        subject: Subject::Service(ServiceId::new()),
        tenant: UserId::new(),
        provider,
        slot: Span::new(start, start + HOUR),
        notes: None,
    }
}

async fn phase1_sequential() {
    let engine = open_engine("sequential.wal");
    let provider = UserId::new();
    let base = base_time();
    let n = 2_000;

    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let t = Instant::now();
        if let Err(e) = engine.create_booking(request(provider, base + i as Ms * HOUR), Actor::System).await {
            panic!("sequential create failed: {e}");
        }
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create", &mut latencies);
}

async fn phase2_disjoint_providers() {
    let engine = open_engine("disjoint.wal");
    let base = base_time();
    let n_tasks = 16;
    let n_per_task = 500;

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let provider = UserId::new();
            for j in 0..n_per_task {
                let _ = engine.create_booking(request(provider, base + j as Ms * HOUR), Actor::System).await;
            }
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} providers x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_hot_slot() {
    let engine = open_engine("hot_slot.wal");
    let base = base_time();
    let rounds = 200;
    let racers = 32;

    let mut latencies = Vec::with_capacity(rounds * racers);
    let mut double_booked = 0;
    let start = Instant::now();
    for round in 0..rounds {
        let provider = UserId::new();
        let slot_start = base + round as Ms * HOUR;
        let mut handles = Vec::with_capacity(racers);
        for _ in 0..racers {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let t = Instant::now();
                let result = engine.create_booking(request(provider, slot_start), Actor::System).await;
                (t.elapsed(), result)
            }));
        }
        let mut wins = 0;
        for h in handles {
            if let Ok((latency, result)) = h.await {
                latencies.push(latency);
                match result {
                    Ok(_) => wins += 1,
                    Err(EngineError::SlotConflict { .. }) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
        }
        if wins != 1 {
            double_booked += 1;
        }
    }
    let elapsed = start.elapsed();
    println!(
        "  {rounds} rounds x {racers} racers in {:.2}s, rounds without exactly one winner: {double_booked}",
        elapsed.as_secs_f64()
    );
    print_latency("contended create", &mut latencies);
}

async fn phase4_read_under_load() {
    let engine = open_engine("read_under_load.wal");
    let provider = UserId::new();
    let base = base_time();

    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for i in 0..2_000 {
                let _ = engine.create_booking(request(provider, base + i as Ms * HOUR), Actor::System).await;
            }
        })
    };

    let mut latencies = Vec::new();
    let window = Span::new(base, base + 365 * DAY);
    while !writer.is_finished() {
        let t = Instant::now();
        let _ = engine.is_free(&provider, &window).await;
        let _ = engine.bookings_for_provider(&provider).await;
        latencies.push(t.elapsed());
        tokio::task::yield_now().await;
    }
    let _ = writer.await;
    print_latency("availability + schedule read", &mut latencies);
}

#[tokio::main]
async fn main() {
    println!("=== viewslot contention benchmark ===\n");

    println!("[phase 1] sequential create throughput");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent creates, disjoint providers");
    phase2_disjoint_providers().await;

    println!("\n[phase 3] racing creates for one slot");
    phase3_hot_slot().await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load().await;

    println!("\n=== benchmark complete ===");
}
