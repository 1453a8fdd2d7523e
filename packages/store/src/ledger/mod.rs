//! Artifact usage ledger.
//!
//! Receives "artifact X was used at time T" events from the rest of the
//! application and answers "how often / when last" queries for the external
//! eviction policy. Events flow through an unbounded write-behind queue into
//! a single consumer task that commits batched transactions against an
//! embedded SQLite database; producers never block on disk I/O.
//!
//! The per-day bucket table is the source of truth. The lifetime aggregate
//! is rebuildable from it, which is what makes the 30-day retention horizon
//! possible without losing aggregate accuracy for recent history.

mod schema;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use scf::ContentHash;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;

pub use schema::SCHEMA_VERSION;

/// Errors from opening the usage ledger.
///
/// Steady-state failures after a successful open are logged and degraded
/// instead of surfaced: usage data is advisory, not authoritative.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("ledger IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifetime usage snapshot for one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageStat {
    pub seen_count: u64,
    pub last_seen_at: DateTime<Utc>,
}

struct UsageEvent {
    hash: String,
    at: DateTime<Utc>,
}

struct CleanupState {
    last_run: Option<Instant>,
}

/// Timestamps are stored fixed-width so SQL `MIN`/`MAX` over the text
/// columns compares chronologically.
fn format_ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Suffix turning a bucket date into a midnight timestamp during aggregate
/// rebuilds; same width as [`format_ts`] output.
const MIDNIGHT_SUFFIX: &str = "T00:00:00.000000Z";

/// Write-behind usage tracking over an embedded SQLite file.
pub struct UsageLedger {
    conn: Arc<Mutex<Connection>>,
    tx: mpsc::UnboundedSender<UsageEvent>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

impl UsageLedger {
    /// Open (or create) the ledger database and start the consumer task.
    ///
    /// Pending schema migrations are applied inside one transaction; a
    /// migration failure is fatal. Retention cleanup then runs once
    /// unconditionally, vacuuming only if it removed anything.
    pub fn open(db_path: &Path, config: LedgerConfig) -> Result<Self, LedgerError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        schema::ensure_schema(&mut conn)?;

        match run_retention_cleanup(&mut conn, config.retention_days) {
            Ok(removed) if removed > 0 => {
                info!(removed, "startup retention cleanup pruned expired buckets");
                if let Err(e) = conn.execute_batch("VACUUM") {
                    warn!(error = %e, "vacuum after startup cleanup failed");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "startup retention cleanup failed"),
        }

        let conn = Arc::new(Mutex::new(conn));
        let cleanup = Arc::new(Mutex::new(CleanupState {
            last_run: Some(Instant::now()),
        }));
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(run_consumer(
            Arc::clone(&conn),
            Arc::clone(&cleanup),
            config,
            rx,
            cancel.clone(),
        ));

        Ok(Self {
            conn,
            tx,
            cancel,
            worker,
        })
    }

    /// Record one usage event. Never blocks on disk I/O: the event is
    /// normalized and queued for the consumer task.
    pub fn record_usage(&self, hash: &ContentHash, at: DateTime<Utc>) {
        let event = UsageEvent {
            hash: hash.to_hex(),
            at,
        };
        if self.tx.send(event).is_err() {
            warn!("usage event dropped: ledger consumer stopped");
        }
    }

    /// Point-in-time snapshot of the lifetime aggregates.
    ///
    /// Failures degrade to an empty map; the eviction policy treats missing
    /// stats as "no usage signal", never as an error.
    pub async fn aggregated_usage(&self) -> HashMap<ContentHash, UsageStat> {
        let conn = self.conn.lock().await;
        match read_aggregates(&conn) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "usage snapshot failed, returning empty");
                HashMap::new()
            }
        }
    }

    /// Forget an evicted artifact: delete the aggregate row and all bucket
    /// rows in one transaction, so stale usage data cannot resurrect it.
    pub async fn remove_usage(&self, hash: &ContentHash) {
        let mut conn = self.conn.lock().await;
        let hex = hash.to_hex();
        match purge(&mut conn, &hex) {
            Ok(()) => debug!(hash = %hex, "usage purged"),
            Err(e) => warn!(hash = %hex, error = %e, "usage purge failed"),
        }
    }

    /// Stop the consumer task, flushing every buffered event first.
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(e) = self.worker.await {
            warn!(error = %e, "ledger consumer task failed");
        }
    }
}

async fn run_consumer(
    conn: Arc<Mutex<Connection>>,
    cleanup: Arc<Mutex<CleanupState>>,
    config: LedgerConfig,
    mut rx: mpsc::UnboundedReceiver<UsageEvent>,
    cancel: CancellationToken,
) {
    let mut pending: Vec<UsageEvent> = Vec::with_capacity(config.batch_size);

    let mut flush_tick =
        tokio::time::interval(Duration::from_secs(config.flush_interval_secs.max(1)));
    flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cleanup_tick =
        tokio::time::interval(Duration::from_secs(config.cleanup_interval_secs.max(60)));
    cleanup_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = flush_tick.tick() => {
                flush_batch(&conn, &cleanup, &config, &mut pending).await;
            }
            _ = cleanup_tick.tick() => {
                maybe_run_cleanup(&conn, &cleanup, &config).await;
            }
            event = rx.recv() => match event {
                Some(event) => {
                    pending.push(event);
                    if pending.len() >= config.batch_size {
                        flush_batch(&conn, &cleanup, &config, &mut pending).await;
                    }
                }
                None => break,
            }
        }
    }

    // Final drain: the stop signal ends the timer/dequeue loop, but buffered
    // events are still flushed so a clean shutdown drops nothing.
    rx.close();
    while let Ok(event) = rx.try_recv() {
        pending.push(event);
    }
    flush_batch(&conn, &cleanup, &config, &mut pending).await;
}

async fn flush_batch(
    conn: &Arc<Mutex<Connection>>,
    cleanup: &Arc<Mutex<CleanupState>>,
    config: &LedgerConfig,
    pending: &mut Vec<UsageEvent>,
) {
    if pending.is_empty() {
        return;
    }

    maybe_run_cleanup(conn, cleanup, config).await;

    let mut guard = conn.lock().await;
    match commit_batch(&mut guard, pending) {
        Ok(()) => debug!(events = pending.len(), "usage batch committed"),
        Err(e) => warn!(error = %e, dropped = pending.len(), "usage batch commit failed"),
    }
    pending.clear();
}

fn commit_batch(conn: &mut Connection, events: &[UsageEvent]) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    {
        let mut daily = tx.prepare_cached(
            "INSERT INTO usage_daily (file_hash, bucket_date, seen_count) VALUES (?1, ?2, 1)
             ON CONFLICT(file_hash, bucket_date) DO UPDATE SET seen_count = seen_count + 1",
        )?;
        let mut total = tx.prepare_cached(
            "INSERT INTO usage_total (file_hash, first_seen_at, last_seen_at, seen_count)
             VALUES (?1, ?2, ?2, 1)
             ON CONFLICT(file_hash) DO UPDATE SET
                 first_seen_at = MIN(first_seen_at, excluded.first_seen_at),
                 last_seen_at = MAX(last_seen_at, excluded.last_seen_at),
                 seen_count = seen_count + 1",
        )?;

        for event in events {
            daily.execute(params![event.hash, event.at.date_naive()])?;
            total.execute(params![event.hash, format_ts(&event.at)])?;
        }
    }
    tx.commit()
}

fn read_aggregates(conn: &Connection) -> rusqlite::Result<HashMap<ContentHash, UsageStat>> {
    let mut stmt =
        conn.prepare("SELECT file_hash, last_seen_at, seen_count FROM usage_total")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut map = HashMap::new();
    for row in rows {
        let (hash_hex, last_seen, count) = row?;
        let Ok(hash) = ContentHash::from_hex(&hash_hex) else {
            warn!(hash = %hash_hex, "skipping aggregate row with malformed hash");
            continue;
        };
        let Ok(last_seen_at) = DateTime::parse_from_rfc3339(&last_seen) else {
            warn!(hash = %hash_hex, "skipping aggregate row with malformed timestamp");
            continue;
        };
        map.insert(
            hash,
            UsageStat {
                seen_count: count.max(0) as u64,
                last_seen_at: last_seen_at.with_timezone(&Utc),
            },
        );
    }
    Ok(map)
}

fn purge(conn: &mut Connection, hash_hex: &str) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM usage_daily WHERE file_hash = ?1", params![hash_hex])?;
    tx.execute("DELETE FROM usage_total WHERE file_hash = ?1", params![hash_hex])?;
    tx.commit()
}

/// Run retention cleanup unless it already ran within the configured
/// interval. The cleanup state lock covers both the "due yet?" check and
/// the cleanup transaction, so the periodic timer and the write-batch path
/// cannot run cleanup concurrently; the loser just observes a recent run
/// and skips.
async fn maybe_run_cleanup(
    conn: &Arc<Mutex<Connection>>,
    cleanup: &Arc<Mutex<CleanupState>>,
    config: &LedgerConfig,
) {
    let mut state = cleanup.lock().await;

    if let Some(last) = state.last_run {
        if last.elapsed() < Duration::from_secs(config.cleanup_interval_secs) {
            debug!("retention cleanup ran recently, skipping");
            return;
        }
    }

    let mut guard = conn.lock().await;
    match run_retention_cleanup(&mut guard, config.retention_days) {
        Ok(removed) => {
            state.last_run = Some(Instant::now());
            if removed > 0 {
                info!(removed, "retention cleanup pruned expired buckets");
                if let Err(e) = guard.execute_batch("VACUUM") {
                    warn!(error = %e, "vacuum after retention cleanup failed");
                }
            }
        }
        Err(e) => warn!(error = %e, "retention cleanup failed, will retry next cycle"),
    }
}

fn run_retention_cleanup(conn: &mut Connection, retention_days: u32) -> rusqlite::Result<usize> {
    let threshold = Utc::now()
        .date_naive()
        .checked_sub_days(chrono::Days::new(retention_days as u64))
        .unwrap_or(NaiveDate::MIN);

    let tx = conn.transaction()?;
    let removed = tx.execute(
        "DELETE FROM usage_daily WHERE bucket_date < ?1",
        params![threshold],
    )?;

    if removed > 0 {
        // Bucket deletion can move the first/last-seen bounds in ways that
        // are simpler to recompute than patch: rebuild the aggregate table
        // from the surviving buckets.
        tx.execute("DELETE FROM usage_total", [])?;
        tx.execute(
            "INSERT INTO usage_total (file_hash, first_seen_at, last_seen_at, seen_count)
             SELECT file_hash, MIN(bucket_date) || ?1, MAX(bucket_date) || ?1, SUM(seen_count)
             FROM usage_daily GROUP BY file_hash",
            params![MIDNIGHT_SUFFIX],
        )?;
    }

    tx.commit()?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn hash(label: &str) -> ContentHash {
        ContentHash::compute(label.as_bytes())
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    fn test_config() -> LedgerConfig {
        LedgerConfig {
            flush_interval_secs: 1,
            ..LedgerConfig::default()
        }
    }

    #[tokio::test]
    async fn aggregation_counts_every_event() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("usage.db");

        let ledger = UsageLedger::open(&db, test_config()).unwrap();
        let h = hash("artifact-a");
        for hour in 1..=5 {
            ledger.record_usage(&h, at(10, hour));
        }
        ledger.close().await;

        let ledger = UsageLedger::open(&db, test_config()).unwrap();
        let stats = ledger.aggregated_usage().await;
        assert_eq!(stats[&h].seen_count, 5);
        assert_eq!(stats[&h].last_seen_at, at(10, 5));
        ledger.close().await;
    }

    #[tokio::test]
    async fn aggregation_spans_batch_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("usage.db");

        // 120 events forces at least two 50-event batches plus a drain.
        let ledger = UsageLedger::open(&db, test_config()).unwrap();
        let h = hash("artifact-b");
        for i in 0..120u32 {
            ledger.record_usage(&h, at(10, 0) + chrono::Duration::seconds(i as i64));
        }
        ledger.close().await;

        let ledger = UsageLedger::open(&db, test_config()).unwrap();
        let stats = ledger.aggregated_usage().await;
        assert_eq!(stats[&h].seen_count, 120);
        assert_eq!(
            stats[&h].last_seen_at,
            at(10, 0) + chrono::Duration::seconds(119)
        );
        ledger.close().await;
    }

    #[tokio::test]
    async fn tracks_hashes_independently() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("usage.db");

        let ledger = UsageLedger::open(&db, test_config()).unwrap();
        ledger.record_usage(&hash("one"), at(1, 1));
        ledger.record_usage(&hash("two"), at(2, 2));
        ledger.record_usage(&hash("two"), at(3, 3));
        ledger.close().await;

        let ledger = UsageLedger::open(&db, test_config()).unwrap();
        let stats = ledger.aggregated_usage().await;
        assert_eq!(stats[&hash("one")].seen_count, 1);
        assert_eq!(stats[&hash("two")].seen_count, 2);
        ledger.close().await;
    }

    #[tokio::test]
    async fn empty_ledger_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = UsageLedger::open(&dir.path().join("usage.db"), test_config()).unwrap();
        assert!(ledger.aggregated_usage().await.is_empty());
        ledger.close().await;
    }

    #[tokio::test]
    async fn purge_removes_both_layers_without_resurrection() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("usage.db");

        let ledger = UsageLedger::open(&db, test_config()).unwrap();
        let h = hash("purged");
        for hour in 1..=4 {
            ledger.record_usage(&h, at(5, hour));
        }
        ledger.close().await;

        let ledger = UsageLedger::open(&db, test_config()).unwrap();
        ledger.remove_usage(&h).await;
        assert!(!ledger.aggregated_usage().await.contains_key(&h));

        // New usage after the purge starts a fresh aggregate.
        ledger.record_usage(&h, at(6, 1));
        ledger.record_usage(&h, at(6, 2));
        ledger.close().await;

        let ledger = UsageLedger::open(&db, test_config()).unwrap();
        let stats = ledger.aggregated_usage().await;
        assert_eq!(stats[&h].seen_count, 2);
        assert_eq!(stats[&h].last_seen_at, at(6, 2));
        ledger.close().await;
    }

    #[tokio::test]
    async fn retention_prunes_old_buckets_and_recomputes() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("usage.db");
        let h = hash("aging");
        let hex = h.to_hex();

        // Seed one expired and one surviving bucket directly, with an
        // aggregate that still counts both.
        {
            let ledger = UsageLedger::open(&db, test_config()).unwrap();
            ledger.close().await;

            let conn = Connection::open(&db).unwrap();
            let old = Utc::now().date_naive() - chrono::Days::new(40);
            let recent = Utc::now().date_naive() - chrono::Days::new(5);
            conn.execute(
                "INSERT INTO usage_daily VALUES (?1, ?2, 3)",
                params![hex, old],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO usage_daily VALUES (?1, ?2, 2)",
                params![hex, recent],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO usage_total VALUES (?1, ?2, ?2, 5)",
                params![hex, format_ts(&Utc::now())],
            )
            .unwrap();
        }

        // Opening runs cleanup unconditionally.
        let ledger = UsageLedger::open(&db, test_config()).unwrap();
        let stats = ledger.aggregated_usage().await;
        assert_eq!(stats[&h].seen_count, 2);
        ledger.close().await;

        let conn = Connection::open(&db).unwrap();
        let buckets: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM usage_daily WHERE file_hash = ?1",
                params![hex],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(buckets, 1);
    }

    #[tokio::test]
    async fn close_flushes_pending_events() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("usage.db");

        // Close immediately after recording; the final drain must commit
        // everything the consumer never got to.
        let ledger = UsageLedger::open(&db, test_config()).unwrap();
        let h = hash("flush-on-close");
        for hour in 1..=9 {
            ledger.record_usage(&h, at(12, hour));
        }
        ledger.close().await;

        let ledger = UsageLedger::open(&db, test_config()).unwrap();
        let stats = ledger.aggregated_usage().await;
        assert_eq!(stats[&h].seen_count, 9);
        ledger.close().await;
    }
}
