//! The single writer of persistent state: sessions, recommendation
//! groups/legs, trades, session logs. All reads by other components go
//! through it too.
//!
//! Wraps a single `rusqlite::Connection` behind a `tokio::sync::Mutex`, the
//! same shape `vault_db.rs` uses for its own SQLite-backed store — every
//! operation here is individually serialized by that lock, which is also
//! SQLite's own concurrency model for a single-writer file.

pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{JournalError, QueryGuardError};
use crate::models::{
    Action, GroupStatus, LegStatus, NewLeg, RecommendationGroup, RecommendationLeg, Session,
    SessionLog, Side, Trade, TradeStatus,
};

#[derive(Clone)]
pub struct JournalStore {
    conn: Arc<Mutex<Connection>>,
}

impl JournalStore {
    pub fn open(db_path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::apply(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn create_session(&self) -> anyhow::Result<Session> {
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            started_at_ms: crate::models::now_ms(),
            upstream_session_id: None,
        };
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO sessions (id, started_at_ms, upstream_session_id) VALUES (?1, ?2, NULL)",
            params![session.id, session.started_at_ms],
        )?;
        Ok(session)
    }

    pub async fn update_session_upstream_id(&self, session_id: &str, upstream_id: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE sessions SET upstream_session_id = ?1 WHERE id = ?2",
            params![upstream_id, session_id],
        )?;
        if updated == 0 {
            return Err(JournalError::SessionNotFound(session_id.to_string()).into());
        }
        Ok(())
    }

    /// Inserts the group and every leg in one transaction; each leg's
    /// `leg_index` is assigned from its position in `legs`.
    pub async fn create_recommendation_group(
        &self,
        session_id: &str,
        thesis: Option<&str>,
        equivalence_notes: Option<&str>,
        estimated_edge_pct: Option<f64>,
        strategy: &str,
        legs: &[NewLeg],
        ttl_minutes: i64,
    ) -> anyhow::Result<(i64, i64)> {
        for leg in legs {
            leg.validate().map_err(anyhow::Error::msg)?;
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let created_at_ms = crate::models::now_ms();
        let expires_at_ms = created_at_ms + ttl_minutes * 60_000;

        tx.execute(
            "INSERT INTO recommendation_groups
                (session_id, created_at_ms, thesis, equivalence_notes, strategy,
                 estimated_edge_pct, status, expires_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session_id,
                created_at_ms,
                thesis,
                equivalence_notes,
                strategy,
                estimated_edge_pct,
                GroupStatus::Pending.as_str(),
                expires_at_ms,
            ],
        )?;
        let group_id = tx.last_insert_rowid();

        for (idx, leg) in legs.iter().enumerate() {
            tx.execute(
                "INSERT INTO recommendation_legs
                    (group_id, leg_index, exchange, market_id, market_title, action, side,
                     quantity, price_cents, order_type, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    group_id,
                    idx as i64,
                    leg.exchange,
                    leg.market_id,
                    leg.market_title,
                    leg.action.as_str(),
                    leg.side.as_str(),
                    leg.quantity,
                    leg.price_cents,
                    leg.order_type,
                    LegStatus::Pending.as_str(),
                ],
            )?;
        }

        tx.commit()?;
        info!(group_id, num_legs = legs.len(), "created recommendation group");
        Ok((group_id, expires_at_ms))
    }

    pub async fn get_group(&self, group_id: i64) -> anyhow::Result<RecommendationGroup> {
        let conn = self.conn.lock().await;
        get_group_locked(&conn, group_id)
    }

    pub async fn get_pending_groups(&self) -> anyhow::Result<Vec<RecommendationGroup>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id FROM recommendation_groups WHERE status = ?1 ORDER BY created_at_ms",
        )?;
        let ids: Vec<i64> = stmt
            .query_map(params![GroupStatus::Pending.as_str()], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        ids.into_iter().map(|id| get_group_locked(&conn, id)).collect()
    }

    pub async fn update_leg_status(
        &self,
        leg_id: i64,
        new_status: LegStatus,
        order_id: Option<&str>,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        let sql = match new_status {
            LegStatus::Executed => {
                "UPDATE recommendation_legs
                    SET status = ?1, order_id = COALESCE(?2, order_id), executed_at_ms = ?3
                 WHERE id = ?4"
            }
            _ => {
                "UPDATE recommendation_legs
                    SET status = ?1, order_id = COALESCE(?2, order_id)
                 WHERE id = ?4"
            }
        };
        let updated = conn.execute(sql, params![new_status.as_str(), order_id, crate::models::now_ms(), leg_id])?;
        if updated == 0 {
            return Err(JournalError::LegNotFound(leg_id).into());
        }
        Ok(())
    }

    pub async fn update_leg_fill(&self, leg_id: i64, fill_price_cents: i64, fill_qty: i64) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE recommendation_legs SET fill_price_cents = ?1, fill_quantity = ?2 WHERE id = ?3",
            params![fill_price_cents, fill_qty, leg_id],
        )?;
        if updated == 0 {
            return Err(JournalError::LegNotFound(leg_id).into());
        }
        Ok(())
    }

    pub async fn update_group_status(&self, group_id: i64, new_status: GroupStatus) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        let now = crate::models::now_ms();
        let sql = match new_status {
            GroupStatus::Executed => {
                "UPDATE recommendation_groups SET status = ?1, executed_at_ms = ?2 WHERE id = ?3"
            }
            _ => "UPDATE recommendation_groups SET status = ?1, reviewed_at_ms = ?2 WHERE id = ?3",
        };
        let updated = conn.execute(sql, params![new_status.as_str(), now, group_id])?;
        if updated == 0 {
            return Err(JournalError::GroupNotFound(group_id).into());
        }
        Ok(())
    }

    pub async fn update_group_computed_fields(
        &self,
        group_id: i64,
        net_edge_pct: f64,
        fees_usd: f64,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE recommendation_groups SET computed_edge_pct = ?1, computed_fees_usd = ?2 WHERE id = ?3",
            params![net_edge_pct, fees_usd, group_id],
        )?;
        if updated == 0 {
            return Err(JournalError::GroupNotFound(group_id).into());
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn log_trade(
        &self,
        session_id: &str,
        leg_id: Option<i64>,
        exchange: &str,
        market_id: &str,
        action: Action,
        side: Side,
        quantity: i64,
        price_cents: Option<i64>,
        order_type: Option<&str>,
        order_id: Option<&str>,
    ) -> anyhow::Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO trades
                (session_id, leg_id, exchange, timestamp_ms, market_id, action, side,
                 quantity, price_cents, order_type, order_id, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                session_id,
                leg_id,
                exchange,
                crate::models::now_ms(),
                market_id,
                action.as_str(),
                side.as_str(),
                quantity,
                price_cents,
                order_type,
                order_id,
                TradeStatus::Placed.as_str(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn update_trade_status(
        &self,
        trade_id: i64,
        status: TradeStatus,
        result_blob: Option<&serde_json::Value>,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        let result_json = result_blob.map(|v| v.to_string());
        conn.execute(
            "UPDATE trades SET status = ?1, result_json = COALESCE(?2, result_json) WHERE id = ?3",
            params![status.as_str(), result_json, trade_id],
        )?;
        Ok(())
    }

    pub async fn log_session_summary(&self, session_id: &str, content: &str) -> anyhow::Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO session_logs (session_id, created_at_ms, content) VALUES (?1, ?2, ?3)",
            params![session_id, crate::models::now_ms(), content],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Sessions with no corresponding `session_logs` row — died without a
    /// summary, either from a crash or process kill.
    pub async fn get_unlogged_sessions(&self) -> anyhow::Result<Vec<Session>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT s.id, s.started_at_ms, s.upstream_session_id
             FROM sessions s
             LEFT JOIN session_logs l ON l.session_id = s.id
             WHERE l.id IS NULL
             ORDER BY s.started_at_ms",
        )?;
        let sessions = stmt
            .query_map([], |row| {
                Ok(Session {
                    id: row.get(0)?,
                    started_at_ms: row.get(1)?,
                    upstream_session_id: row.get(2)?,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(sessions)
    }

    /// Collates the most recent prior session's summary, this session's
    /// outstanding pending groups, and recent unreconciled trades into one
    /// JSON blob for the agent system prompt.
    pub async fn build_session_context(&self, current_session_id: &str) -> anyhow::Result<serde_json::Value> {
        let conn = self.conn.lock().await;

        let last_summary: Option<String> = conn
            .query_row(
                "SELECT content FROM session_logs
                 WHERE session_id != ?1
                 ORDER BY created_at_ms DESC LIMIT 1",
                params![current_session_id],
                |row| row.get(0),
            )
            .optional()?;

        let mut stmt = conn.prepare(
            "SELECT id FROM recommendation_groups WHERE status = ?1 ORDER BY created_at_ms",
        )?;
        let pending_ids: Vec<i64> = stmt
            .query_map(params![GroupStatus::Pending.as_str()], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        let pending_groups: Vec<RecommendationGroup> = pending_ids
            .into_iter()
            .map(|id| get_group_locked(&conn, id))
            .collect::<Result<_, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT id, session_id, leg_id, exchange, timestamp_ms, market_id, action, side,
                    quantity, price_cents, order_type, order_id, status, result_json
             FROM trades
             WHERE status IN (?1, ?2)
             ORDER BY timestamp_ms DESC
             LIMIT 25",
        )?;
        let unreconciled: Vec<Trade> = stmt
            .query_map(
                params![TradeStatus::Placed.as_str(), TradeStatus::Failed.as_str()],
                row_to_trade,
            )?
            .collect::<Result<_, _>>()?;

        Ok(json!({
            "previous_session_summary": last_summary,
            "pending_groups": pending_groups,
            "unreconciled_trades": unreconciled,
        }))
    }

    /// Copies the database file to `backup_dir` if the most recent backup is
    /// older than `max_age_hours`, then prunes to `retain_count` newest.
    pub async fn maybe_backup(
        &self,
        backup_dir: &str,
        max_age_hours: i64,
        retain_count: usize,
    ) -> anyhow::Result<Option<PathBuf>> {
        std::fs::create_dir_all(backup_dir)?;
        let existing = list_backups(backup_dir)?;
        if let Some(latest) = existing.last() {
            let age_hours = (Utc::now().timestamp() - latest.1) / 3600;
            if age_hours < max_age_hours {
                return Ok(None);
            }
        }

        let conn = self.conn.lock().await;
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let dest = Path::new(backup_dir).join(format!("journal-{stamp}.sqlite"));
        conn.execute("VACUUM INTO ?1", params![dest.to_string_lossy()])?;
        drop(conn);
        info!(path = %dest.display(), "wrote journal backup");

        let mut all = list_backups(backup_dir)?;
        all.sort_by_key(|(_, ts)| *ts);
        while all.len() > retain_count {
            let (path, _) = all.remove(0);
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(?e, path = %path.display(), "failed to prune old backup");
            }
        }

        Ok(Some(dest))
    }

    /// Runs `sql` against the journal, rejecting anything but a read-only
    /// `SELECT`/`WITH` statement — the guard backing the agent's "db query" tool.
    pub async fn run_guarded_query(&self, sql: &str) -> anyhow::Result<Vec<serde_json::Value>> {
        guard_read_only(sql)?;
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(sql)?;
        let col_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let rows = stmt.query_map([], move |row| {
            let mut obj = serde_json::Map::new();
            for (i, name) in col_names.iter().enumerate() {
                let value: rusqlite::types::Value = row.get(i)?;
                obj.insert(name.clone(), sqlite_value_to_json(value));
            }
            Ok(serde_json::Value::Object(obj))
        })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }
}

fn sqlite_value_to_json(value: rusqlite::types::Value) -> serde_json::Value {
    use rusqlite::types::Value as V;
    match value {
        V::Null => serde_json::Value::Null,
        V::Integer(i) => json!(i),
        V::Real(f) => json!(f),
        V::Text(s) => json!(s),
        V::Blob(b) => json!(b),
    }
}

fn guard_read_only(sql: &str) -> Result<(), QueryGuardError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(QueryGuardError::Empty);
    }
    let lowered = trimmed.to_ascii_lowercase();
    if lowered.starts_with("select") || lowered.starts_with("with") {
        Ok(())
    } else {
        Err(QueryGuardError::NotReadOnly(trimmed.to_string()))
    }
}

fn get_group_locked(conn: &Connection, group_id: i64) -> anyhow::Result<RecommendationGroup> {
    let mut group = conn
        .query_row(
            "SELECT id, session_id, created_at_ms, thesis, equivalence_notes, strategy,
                    estimated_edge_pct, computed_edge_pct, computed_fees_usd, total_exposure_usd,
                    status, expires_at_ms, reviewed_at_ms, executed_at_ms, hypothetical_pnl_usd
             FROM recommendation_groups WHERE id = ?1",
            params![group_id],
            row_to_group,
        )
        .optional()?
        .ok_or(JournalError::GroupNotFound(group_id))?;

    let mut stmt = conn.prepare(
        "SELECT id, group_id, leg_index, exchange, market_id, market_title, action, side,
                quantity, price_cents, is_maker, order_type, status, order_id,
                fill_price_cents, fill_quantity, orderbook_snapshot_json, settlement_value,
                settled_at_ms, executed_at_ms
         FROM recommendation_legs WHERE group_id = ?1 ORDER BY leg_index",
    )?;
    group.legs = stmt
        .query_map(params![group_id], row_to_leg)?
        .collect::<Result<_, _>>()?;
    Ok(group)
}

fn row_to_group(row: &rusqlite::Row) -> rusqlite::Result<RecommendationGroup> {
    Ok(RecommendationGroup {
        id: row.get(0)?,
        session_id: row.get(1)?,
        created_at_ms: row.get(2)?,
        thesis: row.get(3)?,
        equivalence_notes: row.get(4)?,
        strategy: row.get(5)?,
        estimated_edge_pct: row.get(6)?,
        computed_edge_pct: row.get(7)?,
        computed_fees_usd: row.get(8)?,
        total_exposure_usd: row.get(9)?,
        status: GroupStatus::from_str(&row.get::<_, String>(10)?).unwrap_or(GroupStatus::Pending),
        expires_at_ms: row.get(11)?,
        reviewed_at_ms: row.get(12)?,
        executed_at_ms: row.get(13)?,
        hypothetical_pnl_usd: row.get(14)?,
        legs: Vec::new(),
    })
}

fn row_to_leg(row: &rusqlite::Row) -> rusqlite::Result<RecommendationLeg> {
    Ok(RecommendationLeg {
        id: row.get(0)?,
        group_id: row.get(1)?,
        leg_index: row.get(2)?,
        exchange: row.get(3)?,
        market_id: row.get(4)?,
        market_title: row.get(5)?,
        action: Action::from_str(&row.get::<_, String>(6)?).unwrap_or(Action::Buy),
        side: Side::from_str(&row.get::<_, String>(7)?).unwrap_or(Side::Yes),
        quantity: row.get(8)?,
        price_cents: row.get(9)?,
        is_maker: row.get::<_, Option<i64>>(10)?.map(|v| v != 0),
        order_type: row.get(11)?,
        status: LegStatus::from_str(&row.get::<_, String>(12)?).unwrap_or(LegStatus::Pending),
        order_id: row.get(13)?,
        fill_price_cents: row.get(14)?,
        fill_quantity: row.get(15)?,
        orderbook_snapshot_json: row.get(16)?,
        settlement_value: row.get(17)?,
        settled_at_ms: row.get(18)?,
        executed_at_ms: row.get(19)?,
    })
}

fn row_to_trade(row: &rusqlite::Row) -> rusqlite::Result<Trade> {
    Ok(Trade {
        id: row.get(0)?,
        session_id: row.get(1)?,
        leg_id: row.get(2)?,
        exchange: row.get(3)?,
        timestamp_ms: row.get(4)?,
        market_id: row.get(5)?,
        action: Action::from_str(&row.get::<_, String>(6)?).unwrap_or(Action::Buy),
        side: Side::from_str(&row.get::<_, String>(7)?).unwrap_or(Side::Yes),
        quantity: row.get(8)?,
        price_cents: row.get(9)?,
        order_type: row.get(10)?,
        order_id: row.get(11)?,
        status: TradeStatus::from_str(&row.get::<_, String>(12)?).unwrap_or(TradeStatus::Placed),
        result_json: row.get(13)?,
    })
}

fn list_backups(backup_dir: &str) -> anyhow::Result<Vec<(PathBuf, i64)>> {
    let mut out = Vec::new();
    if !Path::new(backup_dir).exists() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(backup_dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified()?;
        let ts = modified
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        out.push((entry.path(), ts));
    }
    out.sort_by_key(|(_, ts)| *ts);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp() -> (JournalStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("journal.sqlite");
        let store = JournalStore::open(db_path.to_str().unwrap()).unwrap();
        (store, dir)
    }

    fn sample_leg(price_cents: i64) -> NewLeg {
        NewLeg {
            exchange: "kalshi".into(),
            market_id: "MKT-1".into(),
            market_title: Some("Test market".into()),
            action: Action::Buy,
            side: Side::Yes,
            quantity: 10,
            price_cents,
            order_type: "limit".into(),
        }
    }

    #[tokio::test]
    async fn create_session_then_group_round_trips() {
        let (store, _dir) = open_temp().await;
        let session = store.create_session().await.unwrap();

        let (group_id, _expires) = store
            .create_recommendation_group(
                &session.id,
                Some("thesis"),
                None,
                Some(5.0),
                "bracket",
                &[sample_leg(52), sample_leg(51)],
                60,
            )
            .await
            .unwrap();

        let group = store.get_group(group_id).await.unwrap();
        assert_eq!(group.legs.len(), 2);
        assert_eq!(group.legs[0].leg_index, 0);
        assert_eq!(group.status, GroupStatus::Pending);
    }

    #[tokio::test]
    async fn get_pending_groups_only_returns_pending() {
        let (store, _dir) = open_temp().await;
        let session = store.create_session().await.unwrap();
        let (group_id, _) = store
            .create_recommendation_group(&session.id, None, None, None, "bracket", &[sample_leg(50)], 60)
            .await
            .unwrap();
        store.update_group_status(group_id, GroupStatus::Rejected).await.unwrap();

        let pending = store.get_pending_groups().await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn guarded_query_rejects_writes() {
        let (store, _dir) = open_temp().await;
        let err = store.run_guarded_query("DELETE FROM sessions").await.unwrap_err();
        assert!(err.to_string().contains("only SELECT"));
    }

    #[tokio::test]
    async fn guarded_query_allows_select() {
        let (store, _dir) = open_temp().await;
        store.create_session().await.unwrap();
        let rows = store.run_guarded_query("SELECT id FROM sessions").await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn unlogged_sessions_excludes_logged_ones() {
        let (store, _dir) = open_temp().await;
        let a = store.create_session().await.unwrap();
        let b = store.create_session().await.unwrap();
        store.log_session_summary(&a.id, "wrapped up").await.unwrap();

        let unlogged = store.get_unlogged_sessions().await.unwrap();
        assert_eq!(unlogged.len(), 1);
        assert_eq!(unlogged[0].id, b.id);
    }
}
