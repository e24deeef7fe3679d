use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::Engine;

/// Background task that evicts expired availability cache entries.
pub async fn run_cache_janitor(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_millis() as i64;
        let before = engine.cache.len();
        engine.cache.sweep(now);
        let evicted = before.saturating_sub(engine.cache.len());
        if evicted > 0 {
            debug!("evicted {evicted} stale availability entries");
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}
