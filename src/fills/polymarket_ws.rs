use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

use crate::config::{Credentials, TradingConfig};
use crate::exchange::signing::{now_ms, venue_b_sign};

use super::{extract_first, extract_path, FillEvent, FillFieldMap, FillMonitor, FillType};

const WS_URL: &str = "wss://api.polymarket.us/v1/ws/private";
const WS_PATH: &str = "/v1/ws/private";

// The order id has shown up under both `id` and `orderId` on the same
// execution object across payload variants; try both.
const FIELDS: FillFieldMap = FillFieldMap {
    order_id_paths: &[
        &["orderSubscriptionUpdate", "execution", "order", "id"],
        &["orderSubscriptionUpdate", "execution", "order", "orderId"],
    ],
    price_path: &["orderSubscriptionUpdate", "execution", "lastPx", "value"],
    quantity_path: &["orderSubscriptionUpdate", "execution", "lastShares"],
    type_path: &["orderSubscriptionUpdate", "execution", "type"],
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct PolymarketFillMonitor {
    key_id: String,
    secret_key_b64: String,
    stream: Arc<Mutex<Option<WsStream>>>,
}

impl PolymarketFillMonitor {
    pub fn new(_config: &TradingConfig, creds: &Credentials) -> anyhow::Result<Self> {
        let secret_key_b64 = creds
            .polymarket_secret_key_b64
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no POLYMARKET_SECRET_KEY configured"))?;
        Ok(Self {
            key_id: creds.polymarket_key_id.clone(),
            secret_key_b64,
            stream: Arc::new(Mutex::new(None)),
        })
    }

    async fn ensure_connected(&self, guard: &mut Option<WsStream>, market_hint: Option<&str>) -> anyhow::Result<()> {
        if guard.is_some() {
            return Ok(());
        }
        let ts = now_ms();
        let signature = venue_b_sign(&self.secret_key_b64, ts, "GET", WS_PATH)?;

        let mut request = WS_URL.into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("X-PM-Access-Key", self.key_id.parse()?);
        headers.insert("X-PM-Timestamp", ts.to_string().parse()?);
        headers.insert("X-PM-Signature", signature.parse()?);

        let (mut ws, _resp) = connect_async(request).await?;
        let mut subscribe = json!({
            "subscribe": {
                "requestId": "fill-monitor-1",
                "subscriptionType": "SUBSCRIPTION_TYPE_ORDER",
            }
        });
        if let Some(slug) = market_hint {
            subscribe["subscribe"]["marketSlugs"] = json!([slug]);
        }
        ws.send(Message::Text(subscribe.to_string())).await?;
        info!("polymarket fill monitor connected and subscribed");
        *guard = Some(ws);
        Ok(())
    }
}

#[async_trait]
impl FillMonitor for PolymarketFillMonitor {
    async fn wait_for_fill(
        &self,
        order_id: &str,
        wait_timeout: Duration,
        market_hint: Option<&str>,
    ) -> anyhow::Result<Option<FillEvent>> {
        let mut guard = self.stream.lock().await;
        if let Err(e) = self.ensure_connected(&mut guard, market_hint).await {
            warn!(error = %e, "polymarket fill monitor connect failed");
            return Err(e);
        }
        let ws = guard.as_mut().expect("connected above");

        let deadline = Instant::now() + wait_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let frame = match timeout(remaining, ws.next()).await {
                Ok(Some(Ok(frame))) => frame,
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "polymarket fill monitor recv error");
                    return Ok(None);
                }
                Ok(None) => {
                    warn!("polymarket fill monitor stream closed");
                    *guard = None;
                    return Ok(None);
                }
                Err(_) => return Ok(None),
            };

            let text = match frame {
                Message::Text(t) => t,
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => {
                    *guard = None;
                    return Ok(None);
                }
                _ => continue,
            };
            let Ok(msg) = serde_json::from_str::<Value>(&text) else {
                continue;
            };

            let exec_type = extract_path(&msg, FIELDS.type_path).and_then(Value::as_str).unwrap_or("");
            if !matches!(exec_type, "EXECUTION_TYPE_FILL" | "EXECUTION_TYPE_PARTIAL_FILL") {
                continue;
            }
            let matched_id = extract_first(&msg, FIELDS.order_id_paths).and_then(Value::as_str);
            if matched_id != Some(order_id) {
                continue;
            }

            let price_fraction = extract_path(&msg, FIELDS.price_path).and_then(Value::as_f64).unwrap_or(0.0);
            let quantity = extract_path(&msg, FIELDS.quantity_path).and_then(Value::as_i64).unwrap_or(0);
            let fill_type = if exec_type == "EXECUTION_TYPE_PARTIAL_FILL" {
                FillType::Partial
            } else {
                FillType::Full
            };

            info!(order_id, "polymarket fill received");
            return Ok(Some(FillEvent {
                order_id: order_id.to_string(),
                fill_price_cents: (price_fraction * 100.0).round() as i64,
                fill_quantity: quantity,
                fill_type: Some(fill_type),
            }));
        }
    }

    async fn close(&self) {
        let mut guard = self.stream.lock().await;
        if let Some(mut ws) = guard.take() {
            let _ = ws.close(None).await;
            info!("polymarket fill monitor closed");
        }
    }
}
