//! Session WebSocket server: hosts the long-lived connection between a
//! single TUI client and a single interactive agent session, relays
//! execution progress, and guarantees every finished session ends with a
//! summary log or a stub.

pub mod agent;
pub mod context;
pub mod tools;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout, Duration};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::TradingConfig;
use crate::engine::ExecutionEngine;
use crate::exchange::ExchangeClient;
use crate::fills::FillMonitor;
use crate::journal::JournalStore;
use crate::models::Session;

use self::agent::{AgentClient, AgentMessage, AgentOptions, AgentSession};
use self::tools::ToolContext;

const EXTRACTION_TIMEOUT_SECS: u64 = 20;
const WRAP_UP_PROMPT: &str = "Summarize this session's market research and any trades discussed, in a few sentences.";

/// For every session in the journal without a log row, try to resume its
/// upstream agent session and re-run the wrap-up prompt, bounded by a fixed
/// timeout so this fits within a container's shutdown grace period. On
/// failure or a missing upstream id, writes a stub instead — guaranteeing
/// exactly one log row per session even across crashes.
///
/// Takes its dependencies by reference rather than `&AppState` so it can run
/// before the active session (and therefore `AppState`) is created — the
/// session created for this run must never itself be swept up as unlogged.
pub async fn run_deferred_extraction(journal: &JournalStore, agent_client: &Arc<dyn AgentClient>) -> anyhow::Result<()> {
    let unlogged = journal.get_unlogged_sessions().await?;
    for session in unlogged {
        let summary = match &session.upstream_session_id {
            Some(upstream_id) => try_resume_and_wrap_up(agent_client, upstream_id).await,
            None => None,
        };
        let content = summary.unwrap_or_else(|| {
            "Session ended without a recoverable upstream conversation; no summary available.".to_string()
        });
        journal.log_session_summary(&session.id, &content).await?;
        info!(session_id = %session.id, "deferred extraction wrote session log");
    }
    Ok(())
}

async fn try_resume_and_wrap_up(agent_client: &Arc<dyn AgentClient>, upstream_id: &str) -> Option<String> {
    let options = AgentOptions {
        model_id: "default".to_string(),
        working_directory: ".".to_string(),
        resume_session_id: Some(upstream_id.to_string()),
        system_prompt: String::new(),
        tool_names: Vec::new(),
        budget_cap_usd: None,
    };
    let result = timeout(Duration::from_secs(EXTRACTION_TIMEOUT_SECS), async {
        let agent_session = agent_client.open(options).await.ok()?;
        agent_session.query(WRAP_UP_PROMPT).await.ok()?;
        let mut stream = agent_session.receive_response();
        let mut text = String::new();
        while let Some(Ok(msg)) = stream.next().await {
            if let AgentMessage::AssistantText { text: ref t } = msg {
                text.push_str(&t);
            }
            if matches!(msg, AgentMessage::Result { .. }) {
                break;
            }
        }
        drop(stream);
        let _ = agent_session.close().await;
        if text.is_empty() { None } else { Some(text) }
    })
    .await;
    match result {
        Ok(Some(text)) => Some(text),
        Ok(None) => None,
        Err(_) => {
            warn!(upstream_id, "deferred extraction timed out");
            None
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Chat { content: String },
    Clear,
    Interrupt,
    AskResponse { request_id: String, answers: Vec<String> },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Text { content: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: Value, is_error: bool },
    Result { cost_usd: f64, is_error: bool, error_message: Option<String> },
    AskQuestion { request_id: String, question: String, options: Vec<String> },
    RecommendationCreated { group_id: i64, leg_count: usize, expires_at: i64 },
    SessionReset { session_id: String },
    SessionLogSaved { session_id: String },
    Status { message: String },
}

struct ActiveSession {
    session: Session,
    agent_session: Option<Box<dyn AgentSession>>,
    message_count: u64,
}

pub struct AppState {
    pub config: TradingConfig,
    pub journal: JournalStore,
    pub exchanges: HashMap<&'static str, Arc<dyn ExchangeClient>>,
    pub fill_monitors: HashMap<&'static str, Arc<dyn FillMonitor>>,
    pub engine: Arc<ExecutionEngine>,
    pub agent_client: Arc<dyn AgentClient>,
    active: Mutex<ActiveSession>,
    rotation_lock: Mutex<()>,
    tui_tx: Mutex<Option<mpsc::UnboundedSender<OutboundFrame>>>,
}

impl AppState {
    pub async fn new(
        config: TradingConfig,
        journal: JournalStore,
        exchanges: HashMap<&'static str, Arc<dyn ExchangeClient>>,
        fill_monitors: HashMap<&'static str, Arc<dyn FillMonitor>>,
        engine: Arc<ExecutionEngine>,
        agent_client: Arc<dyn AgentClient>,
    ) -> anyhow::Result<Arc<Self>> {
        let session = journal.create_session().await?;
        let state = Arc::new(Self {
            config,
            journal,
            exchanges,
            fill_monitors,
            engine,
            agent_client,
            active: Mutex::new(ActiveSession { session, agent_session: None, message_count: 0 }),
            rotation_lock: Mutex::new(()),
            tui_tx: Mutex::new(None),
        });
        Ok(state)
    }

    fn tool_context(&self) -> ToolContext {
        ToolContext { exchanges: self.exchanges.clone(), journal: self.journal.clone() }
    }

    /// Serializes against other rotations and in-flight chat/ask activity:
    /// cancel, wrap up (skipped if the session saw zero user messages),
    /// dispose, recreate, emit `session_reset`.
    pub async fn rotate_session(&self) -> anyhow::Result<String> {
        let _rotation_guard = self.rotation_lock.lock().await;

        let (old_session_id, old_agent, had_messages) = {
            let mut active = self.active.lock().await;
            let agent = active.agent_session.take();
            (active.session.id.clone(), agent, active.message_count > 0)
        };

        if let Some(agent) = old_agent {
            let _ = agent.interrupt().await;
            if had_messages {
                if let Ok(Some(summary)) = timeout(
                    Duration::from_secs(self.config.wrap_up_timeout_secs),
                    self.wrap_up(agent.as_ref()),
                )
                .await
                {
                    self.journal.log_session_summary(&old_session_id, &summary).await?;
                    self.write_session_log_file(&old_session_id, &summary).await;
                    self.emit(OutboundFrame::SessionLogSaved { session_id: old_session_id.clone() }).await;
                }
            }
            let _ = agent.close().await;
        }

        let new_session = self.journal.create_session().await?;
        let new_id = new_session.id.clone();
        {
            let mut active = self.active.lock().await;
            *active = ActiveSession { session: new_session, agent_session: None, message_count: 0 };
        }
        self.emit(OutboundFrame::SessionReset { session_id: new_id.clone() }).await;
        Ok(new_id)
    }

    async fn wrap_up(&self, agent: &dyn AgentSession) -> Option<String> {
        agent.query(WRAP_UP_PROMPT).await.ok()?;
        let mut stream = agent.receive_response();
        let mut text = String::new();
        while let Some(Ok(msg)) = stream.next().await {
            if let AgentMessage::AssistantText { text: ref t } = msg {
                text.push_str(&t);
            }
            if matches!(msg, AgentMessage::Result { .. }) {
                break;
            }
        }
        if text.is_empty() { None } else { Some(text) }
    }

    async fn write_session_log_file(&self, session_id: &str, content: &str) {
        let dir = &self.config.session_log_dir;
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(?e, "failed to create session log dir");
            return;
        }
        let path = std::path::Path::new(dir).join(format!("{session_id}.md"));
        if let Err(e) = tokio::fs::write(&path, content).await {
            warn!(?e, path = %path.display(), "failed to write session log file");
        }
    }

    async fn emit(&self, frame: OutboundFrame) {
        if let Some(tx) = self.tui_tx.lock().await.as_ref() {
            let _ = tx.send(frame);
        }
    }

    /// Shutdown path: cancel pending asks, attempt one bounded wrap-up,
    /// then let the caller close the journal and exit.
    pub async fn shutdown(&self) {
        let _rotation_guard = self.rotation_lock.lock().await;
        let (session_id, agent, had_messages) = {
            let mut active = self.active.lock().await;
            (active.session.id.clone(), active.agent_session.take(), active.message_count > 0)
        };
        let Some(agent) = agent else { return };
        if had_messages {
            if let Ok(Some(summary)) =
                timeout(Duration::from_secs(self.config.wrap_up_timeout_secs), self.wrap_up(agent.as_ref())).await
            {
                let _ = self.journal.log_session_summary(&session_id, &summary).await;
            } else {
                let _ = self
                    .journal
                    .log_session_summary(&session_id, "Shutdown before wrap-up could complete.")
                    .await;
            }
        }
        let _ = agent.close().await;
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// At most one active TUI connection; a new connection displaces the old
/// by replacing the shared sender, which causes the previous writer task's
/// channel to close.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();
    *state.tui_tx.lock().await = Some(tx);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else { continue };
            if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        let WsMessage::Text(text) = msg else { continue };
        let frame: InboundFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "dropping malformed inbound frame");
                continue;
            }
        };
        if let Err(e) = dispatch_inbound(&state, frame).await {
            warn!(error = %e, "error handling inbound frame");
        }
    }

    writer.abort();
}

async fn dispatch_inbound(state: &Arc<AppState>, frame: InboundFrame) -> anyhow::Result<()> {
    match frame {
        InboundFrame::Chat { content } => handle_chat(state, &content).await,
        InboundFrame::Clear => {
            state.rotate_session().await?;
            Ok(())
        }
        InboundFrame::Interrupt => {
            let active = state.active.lock().await;
            if let Some(agent) = &active.agent_session {
                agent.interrupt().await?;
            }
            Ok(())
        }
        InboundFrame::AskResponse { .. } => Ok(()),
        InboundFrame::Unknown => Ok(()),
    }
}

async fn handle_chat(state: &Arc<AppState>, content: &str) -> anyhow::Result<()> {
    let session_id = {
        let mut active = state.active.lock().await;
        active.message_count += 1;
        if active.agent_session.is_none() {
            let system_prompt = context::build_system_prompt(&state.journal, &active.session.id).await?;
            let options = AgentOptions {
                model_id: "default".to_string(),
                working_directory: ".".to_string(),
                resume_session_id: None,
                system_prompt,
                tool_names: tools::READ_TOOL_NAMES
                    .iter()
                    .chain(std::iter::once(&tools::WRITE_TOOL_NAME))
                    .map(|s| s.to_string())
                    .collect(),
                budget_cap_usd: None,
            };
            active.agent_session = Some(state.agent_client.open(options).await?);
        }
        active.session.id.clone()
    };

    let tool_ctx = state.tool_context();
    let active = state.active.lock().await;
    let Some(agent) = &active.agent_session else { return Ok(()) };
    agent.query(content).await?;

    let mut stream = agent.receive_response();
    while let Some(item) = stream.next().await {
        match item {
            Ok(AgentMessage::AssistantText { text }) => {
                state.emit(OutboundFrame::Text { content: text }).await;
            }
            Ok(AgentMessage::ToolUse { id, name, input }) => {
                state.emit(OutboundFrame::ToolUse { id: id.clone(), name: name.clone(), input: input.clone() }).await;
                let result = dispatch_tool(&tool_ctx, &session_id, &name, &input).await;
                let (content, is_error) = match result {
                    Ok(v) if name == tools::WRITE_TOOL_NAME => {
                        if let (Some(group_id), Some(leg_count), Some(expires_at)) = (
                            v.get("group_id").and_then(Value::as_i64),
                            v.get("leg_count").and_then(Value::as_u64),
                            v.get("expires_at").and_then(Value::as_i64),
                        ) {
                            state
                                .emit(OutboundFrame::RecommendationCreated {
                                    group_id,
                                    leg_count: leg_count as usize,
                                    expires_at,
                                })
                                .await;
                        }
                        (v, false)
                    }
                    Ok(v) => (v, false),
                    Err(e) => (Value::String(e.to_string()), true),
                };
                state.emit(OutboundFrame::ToolResult { tool_use_id: id, content, is_error }).await;
            }
            Ok(AgentMessage::User { .. }) => {}
            Ok(AgentMessage::ToolResult { .. }) => {}
            Ok(AgentMessage::Result { cost_usd, is_error, upstream_session_id, error_message }) => {
                drop(stream);
                state.journal.update_session_upstream_id(&session_id, &upstream_session_id).await?;
                state.emit(OutboundFrame::Result { cost_usd, is_error, error_message }).await;
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "agent stream error");
                state
                    .emit(OutboundFrame::Result { cost_usd: 0.0, is_error: true, error_message: Some(e.to_string()) })
                    .await;
                return Ok(());
            }
        }
    }
    Ok(())
}

async fn dispatch_tool(ctx: &ToolContext, session_id: &str, name: &str, input: &Value) -> anyhow::Result<Value> {
    match name {
        "search_markets" => ctx.search_markets(input).await,
        "get_market" => ctx.get_market(input).await,
        "get_orderbook" => ctx.get_orderbook(input).await,
        "get_event" => ctx.get_event(input).await,
        "get_price_history" => ctx.get_price_history(input).await,
        "get_trades" => ctx.get_trades(input).await,
        "get_portfolio" => ctx.get_portfolio(input).await,
        "get_orders" => ctx.get_orders(input).await,
        "get_exchange_status" => ctx.get_exchange_status(input).await,
        tools::WRITE_TOOL_NAME => ctx.recommend_trade(session_id, input).await,
        other => Err(anyhow::anyhow!("unknown tool: {other}")),
    }
}
