//! Versioned migration sequence. One ordered array, applied idempotently
//! with `CREATE TABLE IF NOT EXISTS` the way `vault_db.rs` bootstraps its
//! schema — no branching revision graph, so there's nothing for a duplicate
//! revision id to collide with.

use anyhow::{Context, Result};
use rusqlite::Connection;

pub const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_sessions",
        "CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            started_at_ms INTEGER NOT NULL,
            upstream_session_id TEXT
        )",
    ),
    (
        "0002_recommendation_groups",
        "CREATE TABLE IF NOT EXISTS recommendation_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL,
            thesis TEXT,
            equivalence_notes TEXT,
            strategy TEXT NOT NULL,
            estimated_edge_pct REAL,
            computed_edge_pct REAL,
            computed_fees_usd REAL,
            total_exposure_usd REAL,
            status TEXT NOT NULL,
            expires_at_ms INTEGER NOT NULL,
            reviewed_at_ms INTEGER,
            executed_at_ms INTEGER,
            hypothetical_pnl_usd REAL
        )",
    ),
    (
        "0003_recommendation_legs",
        "CREATE TABLE IF NOT EXISTS recommendation_legs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id INTEGER NOT NULL,
            leg_index INTEGER NOT NULL,
            exchange TEXT NOT NULL,
            market_id TEXT NOT NULL,
            market_title TEXT,
            action TEXT NOT NULL,
            side TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            price_cents INTEGER NOT NULL,
            is_maker INTEGER,
            order_type TEXT NOT NULL,
            status TEXT NOT NULL,
            order_id TEXT,
            fill_price_cents INTEGER,
            fill_quantity INTEGER,
            orderbook_snapshot_json TEXT,
            settlement_value INTEGER,
            settled_at_ms INTEGER,
            executed_at_ms INTEGER
        )",
    ),
    (
        "0004_trades",
        "CREATE TABLE IF NOT EXISTS trades (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            leg_id INTEGER,
            exchange TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            market_id TEXT NOT NULL,
            action TEXT NOT NULL,
            side TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            price_cents INTEGER,
            order_type TEXT,
            order_id TEXT,
            status TEXT NOT NULL,
            result_json TEXT
        )",
    ),
    (
        "0005_session_logs",
        "CREATE TABLE IF NOT EXISTS session_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL,
            content TEXT NOT NULL
        )",
    ),
    (
        "0006_indexes",
        "CREATE INDEX IF NOT EXISTS idx_legs_group ON recommendation_legs(group_id);
         CREATE INDEX IF NOT EXISTS idx_groups_session ON recommendation_groups(session_id);
         CREATE INDEX IF NOT EXISTS idx_groups_status ON recommendation_groups(status);
         CREATE INDEX IF NOT EXISTS idx_trades_session ON trades(session_id);
         CREATE INDEX IF NOT EXISTS idx_logs_session ON session_logs(session_id);",
    ),
];

pub fn apply(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            revision TEXT PRIMARY KEY,
            applied_at_ms INTEGER NOT NULL
        )",
    )
    .context("creating schema_migrations table")?;

    for (revision, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT 1 FROM schema_migrations WHERE revision = ?1",
                [revision],
                |_| Ok(true),
            )
            .unwrap_or(false);
        if already {
            continue;
        }
        conn.execute_batch(sql)
            .with_context(|| format!("applying migration {revision}"))?;
        conn.execute(
            "INSERT INTO schema_migrations (revision, applied_at_ms) VALUES (?1, ?2)",
            rusqlite::params![revision, crate::models::now_ms()],
        )
        .with_context(|| format!("recording migration {revision}"))?;
    }
    Ok(())
}
