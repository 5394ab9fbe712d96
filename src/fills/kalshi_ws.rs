use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

use crate::config::{Credentials, TradingConfig};
use crate::exchange::signing::{kalshi_sign, now_ms};

use super::{extract_first, extract_path, FillEvent, FillFieldMap, FillMonitor, FillType};

const WS_PATH: &str = "/trade-api/ws/v2";

const FIELDS: FillFieldMap = FillFieldMap {
    order_id_paths: &[&["order_id"]],
    price_path: &["price"],
    quantity_path: &["count"],
    type_path: &["action"],
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct KalshiFillMonitor {
    base_url: String,
    api_key_id: String,
    private_key_pem: String,
    stream: Arc<Mutex<Option<WsStream>>>,
}

impl KalshiFillMonitor {
    pub fn new(config: &TradingConfig, creds: &Credentials) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: config.kalshi_base_url.clone(),
            api_key_id: creds.kalshi_api_key_id.clone(),
            private_key_pem: creds.kalshi_private_key_pem()?,
            stream: Arc::new(Mutex::new(None)),
        })
    }

    fn ws_url(&self) -> String {
        format!("{}{WS_PATH}", self.base_url.replacen("https://", "wss://", 1))
    }

    async fn ensure_connected(&self, guard: &mut Option<WsStream>) -> anyhow::Result<()> {
        if guard.is_some() {
            return Ok(());
        }
        let ts = now_ms();
        let signature = kalshi_sign(&self.private_key_pem, ts, "GET", WS_PATH)?;

        let mut request = self.ws_url().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("KALSHI-ACCESS-KEY", self.api_key_id.parse()?);
        headers.insert("KALSHI-ACCESS-TIMESTAMP", ts.to_string().parse()?);
        headers.insert("KALSHI-ACCESS-SIGNATURE", signature.parse()?);

        let (mut ws, _resp) = connect_async(request).await?;
        ws.send(Message::Text(
            json!({"id": 1, "cmd": "subscribe", "params": {"channels": ["fill"]}}).to_string(),
        ))
        .await?;
        info!("kalshi fill monitor connected and subscribed");
        *guard = Some(ws);
        Ok(())
    }
}

use tokio_tungstenite::tungstenite::client::IntoClientRequest;

#[async_trait]
impl FillMonitor for KalshiFillMonitor {
    async fn wait_for_fill(
        &self,
        order_id: &str,
        wait_timeout: Duration,
        _market_hint: Option<&str>,
    ) -> anyhow::Result<Option<FillEvent>> {
        let mut guard = self.stream.lock().await;
        if let Err(e) = self.ensure_connected(&mut guard).await {
            warn!(error = %e, "kalshi fill monitor connect failed");
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
                    warn!(error = %e, "kalshi fill monitor recv error");
                    return Ok(None);
                }
                Ok(None) => {
                    warn!("kalshi fill monitor stream closed");
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

            let is_fill = msg
                .get("type")
                .and_then(Value::as_str)
                .map(|t| t == "fill")
                .unwrap_or(false);
            if !is_fill {
                continue;
            }
            let payload = msg.get("msg").or_else(|| msg.get("data")).unwrap_or(&msg);
            let matched_id = extract_first(payload, FIELDS.order_id_paths).and_then(Value::as_str);
            if matched_id != Some(order_id) {
                continue;
            }

            let price = extract_path(payload, FIELDS.price_path).and_then(Value::as_i64).unwrap_or(0);
            let quantity = extract_path(payload, FIELDS.quantity_path).and_then(Value::as_i64).unwrap_or(0);
            let fill_type = extract_path(payload, FIELDS.type_path)
                .and_then(Value::as_str)
                .map(|t| if t.contains("partial") { FillType::Partial } else { FillType::Full });

            info!(order_id, "kalshi fill received");
            return Ok(Some(FillEvent {
                order_id: order_id.to_string(),
                fill_price_cents: price,
                fill_quantity: quantity,
                fill_type,
            }));
        }
    }

    async fn close(&self) {
        let mut guard = self.stream.lock().await;
        if let Some(mut ws) = guard.take() {
            let _ = ws.close(None).await;
            info!("kalshi fill monitor closed");
        }
    }
}
