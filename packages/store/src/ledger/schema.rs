use rusqlite::{Connection, OptionalExtension};

use super::LedgerError;

/// One forward migration: everything needed to reach `target_version`.
///
/// Statements are idempotent (`IF NOT EXISTS`) and additive-only; there are
/// no down-migrations. Kept as data so each step is testable in isolation.
struct MigrationStep {
    target_version: i64,
    statements: &'static [&'static str],
}

const MIGRATION_STEPS: &[MigrationStep] = &[
    // v1: lifetime aggregate per artifact hash. This was the original
    // schema; the aggregate alone cannot be pruned by date.
    MigrationStep {
        target_version: 1,
        statements: &[
            "CREATE TABLE IF NOT EXISTS usage_total (
                file_hash     TEXT PRIMARY KEY,
                first_seen_at TEXT NOT NULL,
                last_seen_at  TEXT NOT NULL,
                seen_count    INTEGER NOT NULL DEFAULT 0
            )",
        ],
    },
    // v2: per-day buckets become the source of truth; the aggregate is
    // rebuildable from them, which makes date-bounded retention possible.
    MigrationStep {
        target_version: 2,
        statements: &[
            "CREATE TABLE IF NOT EXISTS usage_daily (
                file_hash   TEXT NOT NULL,
                bucket_date TEXT NOT NULL,
                seen_count  INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (file_hash, bucket_date)
            )",
            "CREATE INDEX IF NOT EXISTS idx_usage_daily_date ON usage_daily(bucket_date)",
        ],
    },
];

/// Schema version an up-to-date ledger reports.
pub const SCHEMA_VERSION: i64 = 2;

/// Bring the database to [`SCHEMA_VERSION`], applying any pending
/// migrations inside a single transaction.
///
/// A failure here is fatal to `open`: the ledger cannot safely operate on a
/// database of unknown shape.
pub fn ensure_schema(conn: &mut Connection) -> Result<(), LedgerError> {
    let tx = conn.transaction()?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS ledger_meta (
            id             INTEGER PRIMARY KEY CHECK (id = 1),
            schema_version INTEGER NOT NULL
        )",
        [],
    )?;

    let current: i64 = tx
        .query_row("SELECT schema_version FROM ledger_meta WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?
        .unwrap_or(0);

    let mut applied = current;
    for step in MIGRATION_STEPS {
        if step.target_version <= current {
            continue;
        }
        for statement in step.statements {
            tx.execute(statement, [])?;
        }
        applied = step.target_version;
    }

    if applied != current {
        tx.execute(
            "INSERT INTO ledger_meta (id, schema_version) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET schema_version = excluded.schema_version",
            [applied],
        )?;
        tracing::info!(from = current, to = applied, "ledger schema migrated");
    }

    tx.commit()?;
    Ok(())
}

/// Read the persisted schema version, 0 for a brand-new database.
pub fn schema_version(conn: &Connection) -> Result<i64, LedgerError> {
    let version = conn
        .query_row("SELECT schema_version FROM ledger_meta WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?
        .unwrap_or(0);
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_reaches_current_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        ensure_schema(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);

        // Both tables exist.
        conn.execute("INSERT INTO usage_total VALUES ('A', 't', 't', 1)", [])
            .unwrap();
        conn.execute("INSERT INTO usage_daily VALUES ('A', '2026-01-01', 1)", [])
            .unwrap();
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        ensure_schema(&mut conn).unwrap();
        ensure_schema(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn migrates_v1_database_forward() {
        let mut conn = Connection::open_in_memory().unwrap();

        // Simulate an install that stopped at v1.
        conn.execute(
            "CREATE TABLE ledger_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                schema_version INTEGER NOT NULL
            )",
            [],
        )
        .unwrap();
        conn.execute("INSERT INTO ledger_meta VALUES (1, 1)", []).unwrap();
        conn.execute(
            "CREATE TABLE usage_total (
                file_hash TEXT PRIMARY KEY,
                first_seen_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL,
                seen_count INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )
        .unwrap();
        conn.execute("INSERT INTO usage_total VALUES ('A', 't', 't', 7)", [])
            .unwrap();

        ensure_schema(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);

        // v1 data survives, v2 table is present.
        let count: i64 = conn
            .query_row("SELECT seen_count FROM usage_total WHERE file_hash = 'A'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(count, 7);
        conn.execute("INSERT INTO usage_daily VALUES ('A', '2026-01-01', 1)", [])
            .unwrap();
    }
}
