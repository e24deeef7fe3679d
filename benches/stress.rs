//! Wire-level stress runs against a live server.
//!
//! Start one first:
//!   CRENEAU_DATA_DIR=/tmp/creneau-bench cargo run --release
//! then:
//!   cargo bench --bench stress

use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const DATE: &str = "2026-04-07";

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(format!("bench_{}", Ulid::new()))
        .user("creneau")
        .password("creneau");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
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
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

async fn publish_schedule(client: &tokio_postgres::Client, center: Ulid, staff: &[Ulid]) {
    let entries: Vec<String> = staff
        .iter()
        .map(|id| {
            format!(
                r#"{{"id":"{id}","windows":[{{"open":420,"close":1140,"break_range":null}}],"qualifications":["vl"]}}"#
            )
        })
        .collect();
    let json = format!("[{}]", entries.join(","));
    client
        .batch_execute(&format!(
            "INSERT INTO schedules (center_id, date, closed, staff) VALUES ('{center}', '{DATE}', false, '{json}')"
        ))
        .await
        .unwrap();
}

/// Sequential bookings against one center: every contrôleur's day fills up
/// slot by slot.
async fn phase1_sequential_bookings(host: &str, port: u16) {
    let client = connect(host, port).await;
    let center = Ulid::new();
    let staff: Vec<Ulid> = (0..8).map(|_| Ulid::new()).collect();
    publish_schedule(&client, center, &staff).await;

    let mut latencies = Vec::new();
    let started = Instant::now();
    let mut booked = 0usize;

    for s in &staff {
        // 07:00 to 19:00 in 45-minute service bites on the quarter grid
        let mut start = 420;
        while start + 45 <= 1140 {
            let id = Ulid::new();
            let t = Instant::now();
            client
                .batch_execute(&format!(
                    "INSERT INTO appointments (id, center_id, date, start, staff_id, control, vehicle, fuel) VALUES ('{id}', '{center}', '{DATE}', {start}, '{s}', 'ctp', 'vl', 'diesel')"
                ))
                .await
                .unwrap();
            latencies.push(t.elapsed());
            booked += 1;
            start += 45;
        }
    }

    let elapsed = started.elapsed();
    println!(
        "phase 1: {booked} sequential bookings in {:.2}s ({:.0}/s)",
        elapsed.as_secs_f64(),
        booked as f64 / elapsed.as_secs_f64()
    );
    print_latency("insert appointment", &mut latencies);
}

/// Availability reads with a warm cache.
async fn phase2_availability_reads(host: &str, port: u16) {
    let client = connect(host, port).await;
    let center = Ulid::new();
    let staff: Vec<Ulid> = (0..8).map(|_| Ulid::new()).collect();
    publish_schedule(&client, center, &staff).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let started = Instant::now();

    for _ in 0..n {
        let t = Instant::now();
        client
            .simple_query(&format!(
                "SELECT * FROM availability WHERE center_id = '{center}' AND date = '{DATE}' AND control = 'ctp' AND vehicle = 'vp' AND fuel = 'essence'"
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = started.elapsed();
    println!(
        "phase 2: {n} availability reads in {:.2}s ({:.0}/s)",
        elapsed.as_secs_f64(),
        n as f64 / elapsed.as_secs_f64()
    );
    print_latency("select availability", &mut latencies);
}

/// Contended bookings: many connections fight for the same contrôleur's
/// morning. Exactly one writer per slot should win.
async fn phase3_contention(host: &str, port: u16) {
    let center = Ulid::new();
    let staff = Ulid::new();
    {
        let client = connect(host, port).await;
        publish_schedule(&client, center, &[staff]).await;
    }

    let workers = 16;
    let attempts_per_worker = 50;
    let started = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..workers {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut won = 0usize;
            let mut lost = 0usize;
            for i in 0..attempts_per_worker {
                let id = Ulid::new();
                let start = 420 + (i % 16) * 45;
                let result = client
                    .batch_execute(&format!(
                        "INSERT INTO appointments (id, center_id, date, start, staff_id, control, vehicle, fuel) VALUES ('{id}', '{center}', '{DATE}', {start}, '{staff}', 'ctp', 'vl', 'diesel')"
                    ))
                    .await;
                match result {
                    Ok(_) => won += 1,
                    Err(_) => lost += 1,
                }
            }
            (won, lost)
        }));
    }

    let mut total_won = 0;
    let mut total_lost = 0;
    for h in handles {
        let (won, lost) = h.await.unwrap();
        total_won += won;
        total_lost += lost;
    }

    let elapsed = started.elapsed();
    println!(
        "phase 3: {} contended attempts in {:.2}s — {total_won} committed, {total_lost} rejected",
        workers * attempts_per_worker,
        elapsed.as_secs_f64()
    );
    assert_eq!(total_won, 16, "one winner per distinct slot");
}

#[tokio::main]
async fn main() {
    let host = std::env::var("CRENEAU_BENCH_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("CRENEAU_BENCH_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5433);

    println!("creneau stress bench against {host}:{port}");
    phase1_sequential_bookings(&host, port).await;
    phase2_availability_reads(&host, port).await;
    phase3_contention(&host, port).await;
}
