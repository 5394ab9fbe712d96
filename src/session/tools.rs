//! Agent-facing tool catalog: read tools backed by the rate-limited REST
//! wrappers, one write tool (`recommend_trade`) backed by the journal store.
//!
//! Each tool is an explicit descriptor struct (name, handler) rather than
//! introspected from a decorated function, per the registry pattern used
//! throughout this crate's trait-object maps — no schema reflection.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use crate::exchange::ExchangeClient;
use crate::journal::JournalStore;
use crate::models::NewLeg;

pub const READ_TOOL_NAMES: &[&str] = &[
    "search_markets",
    "get_market",
    "get_orderbook",
    "get_event",
    "get_price_history",
    "get_trades",
    "get_portfolio",
    "get_orders",
    "get_exchange_status",
];

pub const WRITE_TOOL_NAME: &str = "recommend_trade";

pub struct ToolContext {
    pub exchanges: HashMap<&'static str, Arc<dyn ExchangeClient>>,
    pub journal: JournalStore,
}

impl ToolContext {
    fn client(&self, exchange: &str) -> Result<&Arc<dyn ExchangeClient>> {
        self.exchanges
            .get(exchange)
            .ok_or_else(|| anyhow!("unknown exchange: {exchange}"))
    }

    fn clients_for(&self, exchange: Option<&str>) -> Result<Vec<&Arc<dyn ExchangeClient>>> {
        match exchange {
            Some(tag) => Ok(vec![self.client(tag)?]),
            None => Ok(self.exchanges.values().collect()),
        }
    }

    pub async fn search_markets(&self, args: &Value) -> Result<Value> {
        let exchange = args.get("exchange").and_then(Value::as_str);
        let query = args.get("query").and_then(Value::as_str);
        let status = args.get("status").and_then(Value::as_str);
        let event_id = args.get("event_id").and_then(Value::as_str);
        let limit = args.get("limit").and_then(Value::as_u64).map(|v| v as u32);

        let mut out = serde_json::Map::new();
        for client in self.clients_for(exchange)? {
            let result = client.search_markets(query, status, event_id, limit, None).await?;
            out.insert(client.exchange_tag().to_string(), result);
        }
        Ok(Value::Object(out))
    }

    pub async fn get_market(&self, args: &Value) -> Result<Value> {
        let exchange = args.get("exchange").and_then(Value::as_str).ok_or_else(|| anyhow!("missing exchange"))?;
        let market_id = args.get("market_id").and_then(Value::as_str).ok_or_else(|| anyhow!("missing market_id"))?;
        self.client(exchange)?.get_market(market_id).await
    }

    pub async fn get_orderbook(&self, args: &Value) -> Result<Value> {
        let exchange = args.get("exchange").and_then(Value::as_str).ok_or_else(|| anyhow!("missing exchange"))?;
        let market_id = args.get("market_id").and_then(Value::as_str).ok_or_else(|| anyhow!("missing market_id"))?;
        let depth = args.get("depth").and_then(Value::as_u64).map(|v| v as u32);
        self.client(exchange)?.get_orderbook(market_id, depth).await
    }

    pub async fn get_event(&self, args: &Value) -> Result<Value> {
        let exchange = args.get("exchange").and_then(Value::as_str).ok_or_else(|| anyhow!("missing exchange"))?;
        let event_id = args.get("event_id").and_then(Value::as_str).ok_or_else(|| anyhow!("missing event_id"))?;
        self.client(exchange)?.get_event(event_id).await
    }

    pub async fn get_price_history(&self, args: &Value) -> Result<Value> {
        let exchange = args.get("exchange").and_then(Value::as_str).ok_or_else(|| anyhow!("missing exchange"))?;
        let market_id = args.get("market_id").and_then(Value::as_str).ok_or_else(|| anyhow!("missing market_id"))?;
        let start_ts = args.get("start_ts").and_then(Value::as_i64);
        let end_ts = args.get("end_ts").and_then(Value::as_i64);
        let interval = args.get("interval").and_then(Value::as_str);
        self.client(exchange)?.get_candlesticks(market_id, start_ts, end_ts, interval).await
    }

    pub async fn get_trades(&self, args: &Value) -> Result<Value> {
        let exchange = args.get("exchange").and_then(Value::as_str).ok_or_else(|| anyhow!("missing exchange"))?;
        let market_id = args.get("market_id").and_then(Value::as_str).ok_or_else(|| anyhow!("missing market_id"))?;
        let limit = args.get("limit").and_then(Value::as_u64).map(|v| v as u32);
        self.client(exchange)?.get_trades(market_id, limit).await
    }

    pub async fn get_portfolio(&self, args: &Value) -> Result<Value> {
        let exchange = args.get("exchange").and_then(Value::as_str);
        let include_fills = args.get("include_fills").and_then(Value::as_bool).unwrap_or(false);
        let include_settlements = args.get("include_settlements").and_then(Value::as_bool).unwrap_or(false);

        let mut out = serde_json::Map::new();
        for client in self.clients_for(exchange)? {
            let mut entry = json!({
                "balance": client.get_balance().await?,
                "positions": client.get_positions().await?,
            });
            if include_fills {
                entry["fills"] = client.get_fills(None, None).await?;
            }
            if include_settlements {
                entry["settlements"] = client.get_settlements(None).await?;
            }
            out.insert(client.exchange_tag().to_string(), entry);
        }
        Ok(Value::Object(out))
    }

    pub async fn get_orders(&self, args: &Value) -> Result<Value> {
        let exchange = args.get("exchange").and_then(Value::as_str);
        let market_id = args.get("market_id").and_then(Value::as_str);
        let status = args.get("status").and_then(Value::as_str);

        let mut out = serde_json::Map::new();
        for client in self.clients_for(exchange)? {
            out.insert(client.exchange_tag().to_string(), client.list_orders(market_id, status).await?);
        }
        Ok(Value::Object(out))
    }

    pub async fn get_exchange_status(&self, args: &Value) -> Result<Value> {
        let exchange = args.get("exchange").and_then(Value::as_str);
        let mut out = serde_json::Map::new();
        for client in self.clients_for(exchange)? {
            out.insert(client.exchange_tag().to_string(), client.get_exchange_status().await?);
        }
        Ok(Value::Object(out))
    }

    /// The single write tool: atomically creates a recommendation group and
    /// its legs, returning `{group_id, leg_count, expires_at}`.
    pub async fn recommend_trade(&self, session_id: &str, args: &Value) -> Result<Value> {
        let thesis = args.get("thesis").and_then(Value::as_str);
        let estimated_edge_pct = args.get("estimated_edge_pct").and_then(Value::as_f64);
        let equivalence_notes = args.get("equivalence_notes").and_then(Value::as_str);
        let strategy = args.get("strategy").and_then(Value::as_str).unwrap_or("bracket");
        let ttl_minutes = args.get("ttl_minutes").and_then(Value::as_i64).unwrap_or(60);

        let legs_json = args.get("legs").and_then(Value::as_array).ok_or_else(|| anyhow!("missing legs[]"))?;
        let legs: Vec<NewLeg> = legs_json
            .iter()
            .map(|v| serde_json::from_value(v.clone()).map_err(|e| anyhow!("invalid leg: {e}")))
            .collect::<Result<_>>()?;

        let (group_id, expires_at) = self
            .journal
            .create_recommendation_group(
                session_id,
                thesis,
                equivalence_notes,
                estimated_edge_pct,
                strategy,
                &legs,
                ttl_minutes,
            )
            .await?;

        Ok(json!({
            "group_id": group_id,
            "leg_count": legs.len(),
            "expires_at": expires_at,
        }))
    }
}
