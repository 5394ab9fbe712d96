//! Leg-in execution orchestrator: given a group id, safely transitions the
//! group through recompute → place maker → wait for fill → place takers →
//! unwind-on-timeout → finalize, persisting every intermediate fact.
//!
//! Structured the way `engine.rs`'s `ExecutionEngine` pairs safeguards with
//! a venue client map, generalized from a flat platform match to the
//! `ExchangeClient` trait object map this crate's venues share.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::config::TradingConfig;
use crate::edge::{self, EdgeLegInput};
use crate::exchange::{ExchangeClient, OrderRequest};
use crate::fills::FillMonitor;
use crate::journal::JournalStore;
use crate::models::{GroupStatus, LegStatus, RecommendationGroup, RecommendationLeg, TradeStatus};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Progress {
    RecomputingEdge,
    PlacingMaker,
    WaitingForMakerFill,
    MakerFilled,
    PlacingTaker,
    FillReceived { leg_id: i64, fill_price_cents: i64, fill_quantity: i64 },
    Complete { status: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct LegResult {
    pub leg_id: i64,
    pub status: String,
    pub reason: Option<String>,
}

pub type OnProgress = Arc<dyn Fn(Progress) + Send + Sync>;

pub struct ExecutionEngine {
    config: TradingConfig,
    journal: JournalStore,
    exchanges: HashMap<&'static str, Arc<dyn ExchangeClient>>,
    fill_monitors: HashMap<&'static str, Arc<dyn FillMonitor>>,
}

impl ExecutionEngine {
    pub fn new(
        config: TradingConfig,
        journal: JournalStore,
        exchanges: HashMap<&'static str, Arc<dyn ExchangeClient>>,
        fill_monitors: HashMap<&'static str, Arc<dyn FillMonitor>>,
    ) -> Self {
        Self { config, journal, exchanges, fill_monitors }
    }

    /// Never raises to its caller except when `group_id` is unknown, in
    /// which case it returns an empty result — every observable failure is
    /// instead captured as a rejected or partial group with reasons
    /// recorded per leg.
    pub async fn execute_group(&self, group_id: i64, on_progress: OnProgress) -> Vec<LegResult> {
        let group = match self.journal.get_group(group_id).await {
            Ok(g) => g,
            Err(e) => {
                warn!(group_id, error = %e, "execute_group: unknown group");
                return Vec::new();
            }
        };

        match self.run(group, &on_progress).await {
            Ok(results) => results,
            Err(e) => {
                warn!(group_id, error = %e, "execute_group: unexpected failure, rejecting group");
                let _ = self.journal.update_group_status(group_id, GroupStatus::Rejected).await;
                vec![LegResult { leg_id: 0, status: "rejected".into(), reason: Some(e.to_string()) }]
            }
        }
    }

    async fn run(&self, group: RecommendationGroup, on_progress: &OnProgress) -> anyhow::Result<Vec<LegResult>> {
        on_progress(Progress::RecomputingEdge);
        let refreshed = match self.refresh_and_validate(&group).await {
            Ok(legs) => legs,
            Err(reason) => return Ok(self.reject_all(&group, &reason).await),
        };

        if let Err(reason) = self.validate_execution(&group, &refreshed) {
            return Ok(self.reject_all(&group, &reason).await);
        }

        let edge_inputs: Vec<EdgeLegInput> = refreshed
            .iter()
            .enumerate()
            .map(|(i, leg)| EdgeLegInput {
                exchange: leg.exchange.clone(),
                action: leg.action,
                price_cents: leg.price_cents,
                is_maker: i == 0,
            })
            .collect();
        let contracts = refreshed.first().map(|l| l.quantity).unwrap_or(0);
        let edge_result = edge::compute_edge(&edge_inputs, contracts)?;
        self.journal
            .update_group_computed_fields(group.id, edge_result.net_edge_pct, edge_result.total_fees_usd)
            .await?;

        let (maker, takers) = refreshed.split_first().expect("validated non-empty above");

        on_progress(Progress::PlacingMaker);
        let mut results = Vec::new();
        let maker_order_id = match self.place_leg(&group, maker).await {
            Ok(order_id) => order_id,
            Err(e) => {
                warn!(group_id = group.id, leg_id = maker.id, error = %e, "maker placement failed");
                return Ok(self.reject_all(&group, &format!("maker placement failed: {e}")).await);
            }
        };

        on_progress(Progress::WaitingForMakerFill);
        let maker_timeout = Duration::from_secs(self.config.maker_fill_timeout_secs);
        let maker_fill = self.wait_for_fill(maker, &maker_order_id, maker_timeout).await;

        let Some(fill) = maker_fill else {
            warn!(group_id = group.id, leg_id = maker.id, "maker leg timed out");
            self.best_effort_cancel(maker, &maker_order_id).await;
            self.journal.update_leg_status(maker.id, LegStatus::Rejected, None).await?;
            self.journal.update_group_status(group.id, GroupStatus::Rejected).await?;
            return Ok(vec![LegResult {
                leg_id: maker.id,
                status: "rejected".into(),
                reason: Some(format!(
                    "Maker leg timed out after {}s",
                    self.config.maker_fill_timeout_secs
                )),
            }]);
        };

        self.journal.update_leg_fill(maker.id, fill.fill_price_cents, fill.fill_quantity).await?;
        on_progress(Progress::MakerFilled);
        on_progress(Progress::FillReceived {
            leg_id: maker.id,
            fill_price_cents: fill.fill_price_cents,
            fill_quantity: fill.fill_quantity,
        });
        results.push(LegResult { leg_id: maker.id, status: "executed".into(), reason: None });

        let taker_timeout = Duration::from_secs(self.config.taker_fill_timeout_secs);
        for taker in takers {
            on_progress(Progress::PlacingTaker);
            let order_id = match self.place_leg(&group, taker).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(group_id = group.id, leg_id = taker.id, error = %e, "taker placement failed");
                    self.unwind(&group, maker, &fill, &mut results).await;
                    self.journal.update_group_status(group.id, GroupStatus::Partial).await?;
                    results.push(LegResult { leg_id: taker.id, status: "failed".into(), reason: Some(e.to_string()) });
                    on_progress(Progress::Complete { status: "partial".into() });
                    self.close_monitor(maker).await;
                    return Ok(results);
                }
            };

            let taker_fill = self.wait_for_fill(taker, &order_id, taker_timeout).await;
            match taker_fill {
                Some(f) => {
                    self.journal.update_leg_fill(taker.id, f.fill_price_cents, f.fill_quantity).await?;
                    self.journal.update_leg_status(taker.id, LegStatus::Executed, Some(&order_id)).await?;
                    on_progress(Progress::FillReceived {
                        leg_id: taker.id,
                        fill_price_cents: f.fill_price_cents,
                        fill_quantity: f.fill_quantity,
                    });
                    results.push(LegResult { leg_id: taker.id, status: "executed".into(), reason: None });
                }
                None => {
                    warn!(group_id = group.id, leg_id = taker.id, "taker leg timed out, unwinding maker");
                    self.unwind(&group, maker, &fill, &mut results).await;
                    self.journal.update_group_status(group.id, GroupStatus::Partial).await?;
                    results.push(LegResult {
                        leg_id: taker.id,
                        status: "failed".into(),
                        reason: Some(format!("Taker leg timed out after {}s", self.config.taker_fill_timeout_secs)),
                    });
                    on_progress(Progress::Complete { status: "partial".into() });
                    self.close_monitor(maker).await;
                    return Ok(results);
                }
            }
        }

        self.journal.update_group_status(group.id, GroupStatus::Executed).await?;
        on_progress(Progress::Complete { status: "executed".into() });
        self.close_monitor(maker).await;
        Ok(results)
    }

    /// Pure pre-check re-applying per-venue notional caps and the portfolio
    /// cap (including fees); called before any REST write is attempted.
    pub fn validate_execution(&self, group: &RecommendationGroup, legs: &[RecommendationLeg]) -> Result<(), String> {
        let mut total_cost_usd = 0.0;
        for (i, leg) in legs.iter().enumerate() {
            let notional_usd = leg.quantity as f64 * leg.price_cents as f64 / 100.0;
            let is_maker = leg.is_maker.unwrap_or(i == 0);
            let fee = edge::leg_fee(&leg.exchange, leg.quantity, leg.price_cents, is_maker).unwrap_or(0.0);
            let cap = self.config.max_position_usd(&leg.exchange);
            if notional_usd + fee > cap {
                return Err(format!(
                    "leg {} on {} exceeds max position ${:.2} (notional ${:.2} + fees ${:.2})",
                    leg.market_id, leg.exchange, cap, notional_usd, fee
                ));
            }
            total_cost_usd += notional_usd + fee;
        }
        if total_cost_usd > self.config.max_portfolio_usd {
            return Err(format!(
                "group {} total cost ${:.2} exceeds portfolio cap ${:.2}",
                group.id, total_cost_usd, self.config.max_portfolio_usd
            ));
        }
        Ok(())
    }

    /// Refreshes every leg's orderbook, checks slippage against the
    /// proposed price, recomputes edge, and re-checks position/portfolio
    /// caps. Returns legs sorted ascending by depth-at-best (the shallowest
    /// book goes first and becomes the maker).
    async fn refresh_and_validate(&self, group: &RecommendationGroup) -> Result<Vec<RecommendationLeg>, String> {
        let mut refreshed = Vec::with_capacity(group.legs.len());
        for leg in &group.legs {
            let client = self
                .exchanges
                .get(leg.exchange.as_str())
                .ok_or_else(|| format!("no exchange client configured for {}", leg.exchange))?;
            let orderbook = client
                .get_orderbook(&leg.market_id, None)
                .await
                .map_err(|e| format!("orderbook fetch failed for {}: {e}", leg.market_id))?;
            let (best, depth) = edge::best_and_depth(&orderbook, leg.side);
            let best_price = best.unwrap_or(leg.price_cents);

            let moved = (best_price - leg.price_cents).abs();
            if moved > self.config.max_slippage_cents {
                return Err(format!(
                    "Price moved {moved}c on {} (max allowed {}c)",
                    leg.market_id, self.config.max_slippage_cents
                ));
            }

            let mut updated = leg.clone();
            updated.price_cents = best_price;
            updated.orderbook_snapshot_json = Some(orderbook.to_string());
            refreshed.push((updated, depth));
        }

        refreshed.sort_by_key(|(_, depth)| *depth);
        let legs: Vec<RecommendationLeg> = refreshed.into_iter().map(|(leg, _)| leg).collect();

        let edge_inputs: Vec<EdgeLegInput> = legs
            .iter()
            .enumerate()
            .map(|(i, leg)| EdgeLegInput {
                exchange: leg.exchange.clone(),
                action: leg.action,
                price_cents: leg.price_cents,
                is_maker: i == 0,
            })
            .collect();
        let contracts = legs.first().map(|l| l.quantity).unwrap_or(0);
        let edge_result = edge::compute_edge(&edge_inputs, contracts).map_err(|e| e.to_string())?;
        if edge_result.net_edge_pct < self.config.min_edge_pct {
            return Err(format!(
                "recomputed net edge {:.2}% below minimum {:.2}%",
                edge_result.net_edge_pct, self.config.min_edge_pct
            ));
        }

        Ok(legs)
    }

    async fn place_leg(&self, group: &RecommendationGroup, leg: &RecommendationLeg) -> anyhow::Result<String> {
        let client = self
            .exchanges
            .get(leg.exchange.as_str())
            .ok_or_else(|| anyhow::anyhow!("no exchange client configured for {}", leg.exchange))?;

        let trade_id = self
            .journal
            .log_trade(
                &group.session_id,
                Some(leg.id),
                &leg.exchange,
                &leg.market_id,
                leg.action,
                leg.side,
                leg.quantity,
                Some(leg.price_cents),
                Some(&leg.order_type),
                None,
            )
            .await?;

        let req = OrderRequest {
            market_id: leg.market_id.clone(),
            action: leg.action,
            side: leg.side,
            quantity: leg.quantity,
            order_type: leg.order_type.clone(),
            price_cents: leg.price_cents,
            client_order_id: None,
            expires_at_ms: None,
        };

        match client.create_order(&req).await {
            Ok(ack) => {
                self.journal
                    .update_trade_status(trade_id, TradeStatus::Placed, Some(&ack.raw))
                    .await?;
                self.journal.update_leg_status(leg.id, LegStatus::Executed, Some(&ack.order_id)).await?;
                info!(group_id = group.id, leg_id = leg.id, order_id = %ack.order_id, "leg placed");
                Ok(ack.order_id)
            }
            Err(e) => {
                self.journal.update_trade_status(trade_id, TradeStatus::Failed, None).await?;
                Err(e)
            }
        }
    }

    async fn wait_for_fill(
        &self,
        leg: &RecommendationLeg,
        order_id: &str,
        timeout: Duration,
    ) -> Option<crate::fills::FillEvent> {
        let Some(monitor) = self.fill_monitors.get(leg.exchange.as_str()) else {
            warn!(exchange = %leg.exchange, "no fill monitor configured");
            return None;
        };
        match monitor.wait_for_fill(order_id, timeout, Some(&leg.market_id)).await {
            Ok(fill) => fill,
            Err(e) => {
                warn!(leg_id = leg.id, error = %e, "fill monitor error, treating as timeout");
                None
            }
        }
    }

    async fn best_effort_cancel(&self, leg: &RecommendationLeg, order_id: &str) {
        if let Some(client) = self.exchanges.get(leg.exchange.as_str()) {
            if let Err(e) = client.cancel_order(order_id).await {
                warn!(leg_id = leg.id, error = %e, "best-effort cancel failed");
            }
        }
    }

    async fn close_monitor(&self, leg: &RecommendationLeg) {
        if let Some(monitor) = self.fill_monitors.get(leg.exchange.as_str()) {
            monitor.close().await;
        }
    }

    /// Places an opposite-action order at the maker's last known fill price
    /// as a best-effort reversal. Fire-and-forget: its own result is logged
    /// as an informational leg entry but never blocks finalization — the
    /// group is already `partial` and no further waiting is attempted.
    async fn unwind(
        &self,
        group: &RecommendationGroup,
        maker: &RecommendationLeg,
        fill: &crate::fills::FillEvent,
        results: &mut Vec<LegResult>,
    ) {
        let Some(client) = self.exchanges.get(maker.exchange.as_str()) else {
            results.push(LegResult { leg_id: maker.id, status: "unwind_failed".into(), reason: Some("no exchange client".into()) });
            return;
        };
        let req = OrderRequest {
            market_id: maker.market_id.clone(),
            action: maker.action.opposite(),
            side: maker.side,
            quantity: fill.fill_quantity,
            order_type: maker.order_type.clone(),
            price_cents: fill.fill_price_cents,
            client_order_id: None,
            expires_at_ms: None,
        };
        match client.create_order(&req).await {
            Ok(ack) => {
                info!(group_id = group.id, leg_id = maker.id, order_id = %ack.order_id, "unwind placed");
                results.push(LegResult { leg_id: maker.id, status: "unwind_placed".into(), reason: None });
            }
            Err(e) => {
                warn!(group_id = group.id, leg_id = maker.id, error = %e, "unwind failed");
                results.push(LegResult { leg_id: maker.id, status: "unwind_failed".into(), reason: Some(e.to_string()) });
            }
        }
    }

    async fn reject_all(&self, group: &RecommendationGroup, reason: &str) -> Vec<LegResult> {
        let mut results = Vec::with_capacity(group.legs.len());
        for leg in &group.legs {
            let _ = self.journal.update_leg_status(leg.id, LegStatus::Rejected, None).await;
            results.push(LegResult { leg_id: leg.id, status: "rejected".into(), reason: Some(reason.to_string()) });
        }
        let _ = self.journal.update_group_status(group.id, GroupStatus::Rejected).await;
        warn!(group_id = group.id, reason, "group rejected");
        results
    }
}
