//! Trading copilot backend entrypoint: wires the rate-limited exchange
//! clients, the SQLite journal, the execution engine, and the session
//! WebSocket server, then runs until SIGINT/SIGTERM.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use copilot_engine::config::{Credentials, TradingConfig};
use copilot_engine::engine::ExecutionEngine;
use copilot_engine::exchange::kalshi::KalshiClient;
use copilot_engine::exchange::polymarket::PolymarketClient;
use copilot_engine::exchange::ExchangeClient;
use copilot_engine::fills::kalshi_ws::KalshiFillMonitor;
use copilot_engine::fills::polymarket_ws::PolymarketFillMonitor;
use copilot_engine::fills::FillMonitor;
use copilot_engine::journal::JournalStore;
use copilot_engine::models::{EXCHANGE_KALSHI, EXCHANGE_POLYMARKET};
use copilot_engine::session::agent::{AgentClient, AgentOptions, AgentSession};
use copilot_engine::session::{router, run_deferred_extraction, AppState};

/// The interactive agent harness (the LLM loop and its tool-calling
/// runtime) is an external collaborator this crate integrates with, not
/// something it implements. This stub satisfies the `AgentClient` trait
/// boundary so the binary links and runs standalone; swap it for the real
/// SDK client in deployment.
struct UnconfiguredAgentClient;

#[async_trait::async_trait]
impl AgentClient for UnconfiguredAgentClient {
    async fn open(&self, _options: AgentOptions) -> Result<Box<dyn AgentSession>> {
        anyhow::bail!("no agent client configured: wire a real AgentClient implementation before accepting chat traffic")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = TradingConfig::from_env()?;
    let creds = Credentials::from_env();

    let journal = JournalStore::open(&config.database_path)?;
    if let Some(path) = journal
        .maybe_backup(&config.backup_dir, config.backup_max_age_hours, config.backup_retain_count)
        .await?
    {
        info!(backup_path = %path.display(), "wrote startup backup");
    }

    let mut exchanges: HashMap<&'static str, Arc<dyn ExchangeClient>> = HashMap::new();
    exchanges.insert(EXCHANGE_KALSHI, Arc::new(KalshiClient::new(&config, &creds)?));
    exchanges.insert(EXCHANGE_POLYMARKET, Arc::new(PolymarketClient::new(&config, &creds)?));

    let mut fill_monitors: HashMap<&'static str, Arc<dyn FillMonitor>> = HashMap::new();
    fill_monitors.insert(EXCHANGE_KALSHI, Arc::new(KalshiFillMonitor::new(&config, &creds)?));
    fill_monitors.insert(EXCHANGE_POLYMARKET, Arc::new(PolymarketFillMonitor::new(&config, &creds)?));

    let engine = Arc::new(ExecutionEngine::new(
        config.clone(),
        journal.clone(),
        exchanges.clone(),
        fill_monitors.clone(),
    ));

    let agent_client: Arc<dyn AgentClient> = Arc::new(UnconfiguredAgentClient);

    if let Err(e) = run_deferred_extraction(&journal, &agent_client).await {
        error!(error = %e, "deferred extraction pass failed");
    }

    let state = AppState::new(config.clone(), journal.clone(), exchanges, fill_monitors, engine, agent_client).await?;

    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.server_port)).await?;
    info!(port = config.server_port, "session server listening");

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!(error = %e, "server exited with error");
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received, wrapping up active session");
            state.shutdown().await;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
