//! Typed REST wrappers over each venue's HTTP API.
//!
//! Every operation acquires the matching rate-limit token, takes the venue's
//! call mutex, issues a signed request, and normalizes the JSON response to
//! a plain map for downstream consumers — mirroring the shape of
//! `vault/execution.rs`'s `ExecutionAdapter` trait, generalized from a single
//! paper-trading adapter to the read/write surface a real venue exposes.

pub mod kalshi;
pub mod polymarket;
pub mod signing;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Action, Side};

/// Response body normalized to a plain JSON value. Venues return differently
/// shaped envelopes; wrappers unwrap to the payload before returning this.
pub type NormalizedResponse = Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub market_id: String,
    pub action: Action,
    pub side: Side,
    pub quantity: i64,
    pub order_type: String,
    pub price_cents: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub raw: NormalizedResponse,
}

/// Venue-neutral operation set a REST wrapper must expose (spec §4.2).
/// Optional parameters are omitted from the request entirely when `None` —
/// never sent as explicit JSON `null` — since venues distinguish the two.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn exchange_tag(&self) -> &'static str;

    async fn search_markets(
        &self,
        query: Option<&str>,
        status: Option<&str>,
        event_id: Option<&str>,
        limit: Option<u32>,
        cursor: Option<&str>,
    ) -> Result<NormalizedResponse>;

    async fn get_market(&self, market_id: &str) -> Result<NormalizedResponse>;

    async fn get_orderbook(&self, market_id: &str, depth: Option<u32>) -> Result<NormalizedResponse>;

    async fn get_event(&self, event_id: &str) -> Result<NormalizedResponse>;

    async fn get_trades(&self, market_id: &str, limit: Option<u32>) -> Result<NormalizedResponse>;

    async fn get_candlesticks(
        &self,
        market_id: &str,
        start_ts: Option<i64>,
        end_ts: Option<i64>,
        interval: Option<&str>,
    ) -> Result<NormalizedResponse>;

    async fn get_balance(&self) -> Result<NormalizedResponse>;

    async fn get_positions(&self) -> Result<NormalizedResponse>;

    async fn get_fills(&self, market_id: Option<&str>, limit: Option<u32>) -> Result<NormalizedResponse>;

    async fn get_settlements(&self, market_id: Option<&str>) -> Result<NormalizedResponse>;

    async fn list_orders(&self, market_id: Option<&str>, status: Option<&str>) -> Result<NormalizedResponse>;

    async fn get_exchange_status(&self) -> Result<NormalizedResponse>;

    async fn create_order(&self, req: &OrderRequest) -> Result<OrderAck>;

    async fn cancel_order(&self, order_id: &str) -> Result<NormalizedResponse>;
}
