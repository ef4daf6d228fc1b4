use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use banya::catalog::{CatalogSeed, InMemoryCatalog};
use banya::engine::{Engine, EngineConfig, EngineError};
use banya::model::*;
use banya::service::ReservationService;
use banya::time::format_instant;

const HOUR: Ms = 3_600_000;
// 2024-06-01T00:00:00Z
const EPOCH: Ms = 1_717_200_000_000;

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
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn seed(n_facilities: usize) -> CatalogSeed {
    CatalogSeed {
        facilities: (0..n_facilities)
            .map(|i| Facility {
                id: Ulid::new(),
                name: format!("Banya {i}"),
                base_rate: 1000,
                base_guests: 4,
                extra_guest_price: 200,
            })
            .collect(),
        brooms: vec![CatalogItem {
            id: Ulid::new(),
            name: "Oak broom".into(),
            unit_price: 300,
            category: None,
        }],
        ..CatalogSeed::default()
    }
}

fn service(seed: &CatalogSeed, name: &str) -> ReservationService {
    let dir = std::env::temp_dir().join(format!("banya_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let engine = Engine::open(dir.join(name), EngineConfig::default()).expect("open engine");
    ReservationService::new(
        Arc::new(engine),
        Arc::new(InMemoryCatalog::from_seed(seed)),
        Arc::new(seed.status_table()),
    )
}

/// One-hour booking in slot `i`, two hours apart so the buffer never trips.
fn booking(facility_id: Ulid, i: usize, broom: Ulid) -> NewReservation {
    let start = EPOCH + (i as Ms) * 2 * HOUR;
    let mut req = NewReservation::new(
        facility_id,
        format_instant(start),
        format_instant(start + HOUR),
        "Bench Guest",
        "+7 900 000 00 00",
    );
    req.guests = 6;
    req.add_ons.brooms = vec![LineItem::new(broom, 1)];
    req
}

async fn phase1_sequential() {
    let seed = seed(1);
    let svc = service(&seed, "sequential.wal");
    let facility = seed.facilities[0].id;
    let broom = seed.brooms[0].id;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let t = Instant::now();
        svc.create(booking(facility, i, broom)).await.expect("create");
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create latency", &mut latencies);
}

async fn phase2_concurrent() {
    let seed = seed(10);
    let svc = service(&seed, "concurrent.wal");
    let broom = seed.brooms[0].id;

    let n_tasks = 10;
    let n_per_task = 200;
    let start = Instant::now();
    let mut handles = Vec::new();
    for t in 0..n_tasks {
        let svc = svc.clone();
        let facility = seed.facilities[t].id;
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                svc.create(booking(facility, j, broom)).await.expect("create");
            }
        }));
    }
    for h in handles {
        h.await.expect("task");
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} reservations = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_contended_slot() {
    let seed = seed(1);
    let svc = service(&seed, "contended.wal");
    let facility = seed.facilities[0].id;
    let broom = seed.brooms[0].id;

    let rounds = 50;
    let per_round = 20;
    let accepted = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    for round in 0..rounds {
        let mut handles = Vec::new();
        for _ in 0..per_round {
            let svc = svc.clone();
            let accepted = accepted.clone();
            let rejected = rejected.clone();
            handles.push(tokio::spawn(async move {
                match svc.create(booking(facility, round, broom)).await {
                    Ok(_) => accepted.fetch_add(1, Ordering::Relaxed),
                    Err(EngineError::Conflict(_) | EngineError::Contention(_)) => {
                        rejected.fetch_add(1, Ordering::Relaxed)
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                };
            }));
        }
        for h in handles {
            h.await.expect("task");
        }
    }
    println!(
        "  {rounds} slots x {per_round} racers: {} accepted, {} rejected in {:.2}s",
        accepted.load(Ordering::Relaxed),
        rejected.load(Ordering::Relaxed),
        start.elapsed().as_secs_f64()
    );
}

async fn phase4_read_under_load() {
    let seed = seed(6);
    let svc = service(&seed, "read_load.wal");
    let broom = seed.brooms[0].id;
    let reader_facility = seed.facilities[0].id;

    for i in 0..200 {
        svc.create(booking(reader_facility, i, broom)).await.expect("prefill");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for w in 1..6 {
        let svc = svc.clone();
        let stop = stop.clone();
        let facility = seed.facilities[w].id;
        writers.push(tokio::spawn(async move {
            let mut i = 0;
            while !stop.load(Ordering::Relaxed) {
                let _ = svc.create(booking(facility, i, broom)).await;
                i += 1;
            }
            i
        }));
    }

    let mut latencies = Vec::with_capacity(1000);
    for _ in 0..1000 {
        let t = Instant::now();
        let day = svc
            .list("2024-06-02", Some(reader_facility))
            .await
            .expect("list");
        latencies.push(t.elapsed());
        assert!(!day.is_empty());
    }

    stop.store(true, Ordering::Relaxed);
    let mut written = 0;
    for h in writers {
        written += h.await.expect("writer");
    }
    println!("  writers stored {written} reservations meanwhile");
    print_latency("list latency", &mut latencies);
}

#[tokio::main]
async fn main() {
    println!("=== banya stress benchmark ===");

    println!("\n[phase 1] sequential create throughput");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent create throughput");
    phase2_concurrent().await;

    println!("\n[phase 3] racing creates on one slot");
    phase3_contended_slot().await;

    println!("\n[phase 4] list latency under write load");
    phase4_read_under_load().await;

    println!("\n=== benchmark complete ===");
}
