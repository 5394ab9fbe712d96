//! Kalshi REST wrapper: RSA-PSS signed requests over the trade-api v2 surface.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{Credentials, TradingConfig};
use crate::models::EXCHANGE_KALSHI;
use crate::rate_limit::VenueLimiter;

use super::signing::{kalshi_sign, now_ms};
use super::{ExchangeClient, NormalizedResponse, OrderAck, OrderRequest};

const API_PREFIX: &str = "/trade-api/v2";

pub struct KalshiClient {
    http: Client,
    base_url: String,
    api_key_id: String,
    private_key_pem: String,
    limiter: Arc<VenueLimiter>,
}

impl KalshiClient {
    pub fn new(config: &TradingConfig, creds: &Credentials) -> Result<Self> {
        let private_key_pem = creds
            .kalshi_private_key_pem()
            .context("loading Kalshi private key")?;
        Ok(Self {
            http: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .context("building Kalshi HTTP client")?,
            base_url: config.kalshi_base_url.clone(),
            api_key_id: creds.kalshi_api_key_id.clone(),
            private_key_pem,
            limiter: VenueLimiter::new(
                config.kalshi_limits.reads_per_sec,
                config.kalshi_limits.writes_per_sec,
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
        let signature = kalshi_sign(&self.private_key_pem, timestamp_ms, method.as_str(), &full_path)
            .context("signing Kalshi request")?;

        let url = format!("{}{}", self.base_url, full_path);
        let mut builder = self
            .http
            .request(method.clone(), &url)
            .header("KALSHI-ACCESS-KEY", &self.api_key_id)
            .header("KALSHI-ACCESS-TIMESTAMP", timestamp_ms.to_string())
            .header("KALSHI-ACCESS-SIGNATURE", signature);

        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(b) = &body {
            builder = builder.json(b);
        }

        debug!(%method, %full_path, "kalshi request");
        let resp = builder.send().await.context("sending Kalshi request")?;
        let status = resp.status();
        let text = resp.text().await.context("reading Kalshi response body")?;
        if !status.is_success() {
            warn!(%status, body = %text, "kalshi request failed");
            anyhow::bail!("kalshi {method} {full_path} returned {status}: {text}");
        }
        serde_json::from_str(&text).context("parsing Kalshi response JSON")
    }
}

#[async_trait]
impl ExchangeClient for KalshiClient {
    fn exchange_tag(&self) -> &'static str {
        EXCHANGE_KALSHI
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
            q.push(("search", v.to_string()));
        }
        if let Some(v) = status {
            q.push(("status", v.to_string()));
        }
        if let Some(v) = event_id {
            q.push(("event_ticker", v.to_string()));
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
        self.request(Method::GET, &format!("/markets/{market_id}/orderbook"), &q, None)
            .await
    }

    async fn get_event(&self, event_id: &str) -> Result<NormalizedResponse> {
        self.request(
            Method::GET,
            &format!("/events/{event_id}"),
            &[("with_nested_markets", "true".to_string())],
            None,
        )
        .await
    }

    async fn get_trades(&self, market_id: &str, limit: Option<u32>) -> Result<NormalizedResponse> {
        let mut q = vec![("ticker", market_id.to_string())];
        if let Some(v) = limit {
            q.push(("limit", v.to_string()));
        }
        self.request(Method::GET, "/markets/trades", &q, None).await
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
            q.push(("start_ts", v.to_string()));
        }
        if let Some(v) = end_ts {
            q.push(("end_ts", v.to_string()));
        }
        if let Some(v) = interval {
            q.push(("period_interval", v.to_string()));
        }
        self.request(
            Method::GET,
            &format!("/markets/{market_id}/candlesticks"),
            &q,
            None,
        )
        .await
    }

    async fn get_balance(&self) -> Result<NormalizedResponse> {
        self.request(Method::GET, "/portfolio/balance", &[], None).await
    }

    async fn get_positions(&self) -> Result<NormalizedResponse> {
        self.request(Method::GET, "/portfolio/positions", &[], None).await
    }

    async fn get_fills(&self, market_id: Option<&str>, limit: Option<u32>) -> Result<NormalizedResponse> {
        let mut q = Vec::new();
        if let Some(v) = market_id {
            q.push(("ticker", v.to_string()));
        }
        if let Some(v) = limit {
            q.push(("limit", v.to_string()));
        }
        self.request(Method::GET, "/portfolio/fills", &q, None).await
    }

    async fn get_settlements(&self, market_id: Option<&str>) -> Result<NormalizedResponse> {
        let mut q = Vec::new();
        if let Some(v) = market_id {
            q.push(("ticker", v.to_string()));
        }
        self.request(Method::GET, "/portfolio/settlements", &q, None).await
    }

    async fn list_orders(&self, market_id: Option<&str>, status: Option<&str>) -> Result<NormalizedResponse> {
        let mut q = Vec::new();
        if let Some(v) = market_id {
            q.push(("ticker", v.to_string()));
        }
        if let Some(v) = status {
            q.push(("status", v.to_string()));
        }
        self.request(Method::GET, "/portfolio/orders", &q, None).await
    }

    async fn get_exchange_status(&self) -> Result<NormalizedResponse> {
        self.request(Method::GET, "/exchange/status", &[], None).await
    }

    async fn create_order(&self, req: &OrderRequest) -> Result<OrderAck> {
        let mut body = json!({
            "ticker": req.market_id,
            "action": req.action.as_str(),
            "side": req.side.as_str(),
            "count": req.quantity,
            "type": req.order_type,
        });
        if req.side == crate::models::Side::Yes {
            body["yes_price"] = json!(req.price_cents);
        } else {
            body["no_price"] = json!(req.price_cents);
        }
        if let Some(cid) = &req.client_order_id {
            body["client_order_id"] = json!(cid);
        }
        if let Some(exp) = req.expires_at_ms {
            body["expiration_ts"] = json!(exp / 1000);
        }
        let raw = self.request(Method::POST, "/portfolio/orders", &[], Some(body)).await?;
        let order_id = raw
            .get("order")
            .and_then(|o| o.get("order_id"))
            .or_else(|| raw.get("order_id"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(OrderAck { order_id, raw })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<NormalizedResponse> {
        self.request(
            Method::DELETE,
            &format!("/portfolio/orders/{order_id}"),
            &[],
            None,
        )
        .await
    }
}
