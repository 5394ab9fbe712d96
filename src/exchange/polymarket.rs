//! Polymarket (US-regulated venue) REST wrapper: Ed25519 signed requests.
//!
//! Distinct from the offshore Polymarket CLOB — this targets the
//! US-regulated exchange's REST surface, keyed off `X-PM-Access-*` headers
//! rather than Kalshi's `KALSHI-ACCESS-*` scheme.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{Credentials, TradingConfig};
use crate::models::EXCHANGE_POLYMARKET;
use crate::rate_limit::VenueLimiter;

use super::signing::{now_ms, venue_b_sign};
use super::{ExchangeClient, NormalizedResponse, OrderAck, OrderRequest};

const API_PREFIX: &str = "/v1";

pub struct PolymarketClient {
    http: Client,
    base_url: String,
    key_id: String,
    secret_key_b64: String,
    limiter: Arc<VenueLimiter>,
}

impl PolymarketClient {
    pub fn new(config: &TradingConfig, creds: &Credentials) -> Result<Self> {
        let secret_key_b64 = creds
            .polymarket_secret_key_b64
            .clone()
            .context("no POLYMARKET_SECRET_KEY configured")?;
        Ok(Self {
            http: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .context("building Polymarket HTTP client")?,
            base_url: config.polymarket_base_url.clone(),
            key_id: creds.polymarket_key_id.clone(),
            secret_key_b64,
            limiter: VenueLimiter::new(
                config.polymarket_limits.reads_per_sec,
                config.polymarket_limits.writes_per_sec,
            ),
        })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<NormalizedResponse> {
        let is_write = method != Method::GET;
        if is_write {
            self.limiter.acquire_write(1.0).await;
        } else {
            self.limiter.acquire_read(1.0).await;
        }
        let _call_guard = self.limiter.lock_call().await;

        let full_path = format!("{API_PREFIX}{path}");
        let timestamp_ms = now_ms();
        let signature = venue_b_sign(&self.secret_key_b64, timestamp_ms, method.as_str(), &full_path)
            .context("signing Polymarket request")?;

        let url = format!("{}{}", self.base_url, full_path);
        let mut builder = self
            .http
            .request(method.clone(), &url)
            .header("X-PM-Access-Key", &self.key_id)
            .header("X-PM-Access-Timestamp", timestamp_ms.to_string())
            .header("X-PM-Access-Signature", signature);

        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(b) = &body {
            builder = builder.json(b);
        }

        debug!(%method, %full_path, "polymarket request");
        let resp = builder.send().await.context("sending Polymarket request")?;
        let status = resp.status();
        let text = resp.text().await.context("reading Polymarket response body")?;
        if !status.is_success() {
            warn!(%status, body = %text, "polymarket request failed");
            anyhow::bail!("polymarket {method} {full_path} returned {status}: {text}");
        }
        serde_json::from_str(&text).context("parsing Polymarket response JSON")
    }
}

#[async_trait]
impl ExchangeClient for PolymarketClient {
    fn exchange_tag(&self) -> &'static str {
        EXCHANGE_POLYMARKET
    }

    async fn search_markets(
        &self,
        query: Option<&str>,
        status: Option<&str>,
        event_id: Option<&str>,
        limit: Option<u32>,
        cursor: Option<&str>,
    ) -> Result<NormalizedResponse> {
        let mut q = Vec::new();
        if let Some(v) = query {
            q.push(("q", v.to_string()));
        }
        if let Some(v) = status {
            q.push(("status", v.to_string()));
        }
        if let Some(v) = event_id {
            q.push(("event_id", v.to_string()));
        }
        if let Some(v) = limit {
            q.push(("limit", v.to_string()));
        }
        if let Some(v) = cursor {
            q.push(("cursor", v.to_string()));
        }
        self.request(Method::GET, "/markets", &q, None).await
    }

    async fn get_market(&self, market_id: &str) -> Result<NormalizedResponse> {
        self.request(Method::GET, &format!("/markets/{market_id}"), &[], None)
            .await
    }

    async fn get_orderbook(&self, market_id: &str, depth: Option<u32>) -> Result<NormalizedResponse> {
        let mut q = Vec::new();
        if let Some(d) = depth {
            q.push(("depth", d.to_string()));
        }
        self.request(Method::GET, &format!("/markets/{market_id}/book"), &q, None)
            .await
    }

    async fn get_event(&self, event_id: &str) -> Result<NormalizedResponse> {
        self.request(
            Method::GET,
            &format!("/events/{event_id}"),
            &[("include_markets", "true".to_string())],
            None,
        )
        .await
    }

    async fn get_trades(&self, market_id: &str, limit: Option<u32>) -> Result<NormalizedResponse> {
        let mut q = vec![("market_id", market_id.to_string())];
        if let Some(v) = limit {
            q.push(("limit", v.to_string()));
        }
        self.request(Method::GET, "/trades", &q, None).await
    }

    async fn get_candlesticks(
        &self,
        market_id: &str,
        start_ts: Option<i64>,
        end_ts: Option<i64>,
        interval: Option<&str>,
    ) -> Result<NormalizedResponse> {
        let mut q = Vec::new();
        if let Some(v) = start_ts {
            q.push(("start", v.to_string()));
        }
        if let Some(v) = end_ts {
            q.push(("end", v.to_string()));
        }
        if let Some(v) = interval {
            q.push(("interval", v.to_string()));
        }
        self.request(
            Method::GET,
            &format!("/markets/{market_id}/candles"),
            &q,
            None,
        )
        .await
    }

    async fn get_balance(&self) -> Result<NormalizedResponse> {
        self.request(Method::GET, "/account/balance", &[], None).await
    }

    async fn get_positions(&self) -> Result<NormalizedResponse> {
        self.request(Method::GET, "/account/positions", &[], None).await
    }

    async fn get_fills(&self, market_id: Option<&str>, limit: Option<u32>) -> Result<NormalizedResponse> {
        let mut q = Vec::new();
        if let Some(v) = market_id {
            q.push(("market_id", v.to_string()));
        }
        if let Some(v) = limit {
            q.push(("limit", v.to_string()));
        }
        self.request(Method::GET, "/account/fills", &q, None).await
    }

    async fn get_settlements(&self, market_id: Option<&str>) -> Result<NormalizedResponse> {
        let mut q = Vec::new();
        if let Some(v) = market_id {
            q.push(("market_id", v.to_string()));
        }
        self.request(Method::GET, "/account/settlements", &q, None).await
    }

    async fn list_orders(&self, market_id: Option<&str>, status: Option<&str>) -> Result<NormalizedResponse> {
        let mut q = Vec::new();
        if let Some(v) = market_id {
            q.push(("market_id", v.to_string()));
        }
        if let Some(v) = status {
            q.push(("status", v.to_string()));
        }
        self.request(Method::GET, "/account/orders", &q, None).await
    }

    async fn get_exchange_status(&self) -> Result<NormalizedResponse> {
        self.request(Method::GET, "/status", &[], None).await
    }

    async fn create_order(&self, req: &OrderRequest) -> Result<OrderAck> {
        let mut body = json!({
            "market_id": req.market_id,
            "action": req.action.as_str(),
            "side": req.side.as_str(),
            "quantity": req.quantity,
            "order_type": req.order_type,
            "price_cents": req.price_cents,
        });
        if let Some(cid) = &req.client_order_id {
            body["client_order_id"] = json!(cid);
        }
        if let Some(exp) = req.expires_at_ms {
            body["expires_at"] = json!(exp);
        }
        let raw = self.request(Method::POST, "/orders", &[], Some(body)).await?;
        let order_id = raw
            .get("order_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(OrderAck { order_id, raw })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<NormalizedResponse> {
        self.request(Method::DELETE, &format!("/orders/{order_id}"), &[], None)
            .await
    }
}
