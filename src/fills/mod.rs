//! Private-WebSocket fill monitors: one lazily-opened connection per venue,
//! answering `wait_for_fill(order_id, timeout) -> Option<FillEvent>`.
//!
//! Reconnection on connection loss is deliberately not implemented here: a
//! drop mid-wait surfaces as a timeout, and the execution engine treats that
//! the same as any other failed maker leg. This mirrors the lazy-connect,
//! no-retry shape of `scrapers/polymarket_ws.rs`'s cache worker, scaled down
//! to the single-subscription case a fill monitor needs.

pub mod kalshi_ws;
pub mod polymarket_ws;

use async_trait::async_trait;
use tokio::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillType {
    Full,
    Partial,
}

#[derive(Debug, Clone)]
pub struct FillEvent {
    pub order_id: String,
    pub fill_price_cents: i64,
    pub fill_quantity: i64,
    pub fill_type: Option<FillType>,
}

/// Matches one JSON frame against a candidate fill, independent of each
/// venue's field names — kept as a small table rather than inlined
/// field-path lookups so a venue's schema drift is a one-line fix.
///
/// `order_id_paths` holds more than one candidate path because at least one
/// venue's payload uses different field names for the same value across
/// message variants (e.g. `id` vs `orderId`); the first path that resolves
/// wins.
pub struct FillFieldMap {
    pub order_id_paths: &'static [&'static [&'static str]],
    pub price_path: &'static [&'static str],
    pub quantity_path: &'static [&'static str],
    pub type_path: &'static [&'static str],
}

pub fn extract_path<'a>(value: &'a serde_json::Value, path: &[&str]) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    Some(current)
}

/// Tries each candidate path in order, returning the first that resolves.
pub fn extract_first<'a>(value: &'a serde_json::Value, paths: &[&[&str]]) -> Option<&'a serde_json::Value> {
    paths.iter().find_map(|path| extract_path(value, path))
}

#[async_trait]
pub trait FillMonitor: Send + Sync {
    async fn wait_for_fill(
        &self,
        order_id: &str,
        timeout: Duration,
        market_hint: Option<&str>,
    ) -> anyhow::Result<Option<FillEvent>>;

    async fn close(&self);
}
