//! Core data model: sessions, recommendation groups/legs, trades, session logs.
//!
//! Mirrors the nine-table schema the journal store owns (`journal::schema`).
//! Timestamps are Unix milliseconds throughout.

use serde::{Deserialize, Serialize};

pub const EXCHANGE_KALSHI: &str = "kalshi";
pub const EXCHANGE_POLYMARKET: &str = "polymarket";

pub fn known_exchange(tag: &str) -> bool {
    matches!(tag, EXCHANGE_KALSHI | EXCHANGE_POLYMARKET)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Buy,
    Sell,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
        }
    }

    pub fn opposite(self) -> Action {
        match self {
            Action::Buy => Action::Sell,
            Action::Sell => Action::Buy,
        }
    }

    pub fn from_str(s: &str) -> Option<Action> {
        match s {
            "buy" => Some(Action::Buy),
            "sell" => Some(Action::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }

    pub fn from_str(s: &str) -> Option<Side> {
        match s {
            "yes" => Some(Side::Yes),
            "no" => Some(Side::No),
            _ => None,
        }
    }

    /// Effective settlement (0 or 100) for this side given the YES settlement value.
    pub fn effective_settlement(self, yes_settlement_cents: i64) -> i64 {
        match self {
            Side::Yes => yes_settlement_cents,
            Side::No => 100 - yes_settlement_cents,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Pending,
    Executed,
    Partial,
    Rejected,
}

impl GroupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupStatus::Pending => "pending",
            GroupStatus::Executed => "executed",
            GroupStatus::Partial => "partial",
            GroupStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<GroupStatus> {
        match s {
            "pending" => Some(GroupStatus::Pending),
            "executed" => Some(GroupStatus::Executed),
            "partial" => Some(GroupStatus::Partial),
            "rejected" => Some(GroupStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, GroupStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegStatus {
    Pending,
    Executed,
    Rejected,
}

impl LegStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LegStatus::Pending => "pending",
            LegStatus::Executed => "executed",
            LegStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<LegStatus> {
        match s {
            "pending" => Some(LegStatus::Pending),
            "executed" => Some(LegStatus::Executed),
            "rejected" => Some(LegStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Placed,
    Cancelled,
    Filled,
    Failed,
}

impl TradeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TradeStatus::Placed => "placed",
            TradeStatus::Cancelled => "cancelled",
            TradeStatus::Filled => "filled",
            TradeStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<TradeStatus> {
        match s {
            "placed" => Some(TradeStatus::Placed),
            "cancelled" => Some(TradeStatus::Cancelled),
            "filled" => Some(TradeStatus::Filled),
            "failed" => Some(TradeStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub started_at_ms: i64,
    pub upstream_session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLeg {
    pub exchange: String,
    pub market_id: String,
    pub market_title: Option<String>,
    pub action: Action,
    pub side: Side,
    pub quantity: i64,
    pub price_cents: i64,
    pub order_type: String,
}

impl NewLeg {
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=99).contains(&self.price_cents) {
            return Err(format!(
                "price {} out of range [1, 99] for {} {}",
                self.price_cents, self.exchange, self.market_id
            ));
        }
        if self.quantity < 1 {
            return Err(format!(
                "quantity {} must be >= 1 for {} {}",
                self.quantity, self.exchange, self.market_id
            ));
        }
        if !known_exchange(&self.exchange) {
            return Err(format!("unknown exchange: {}", self.exchange));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationLeg {
    pub id: i64,
    pub group_id: i64,
    pub leg_index: i64,
    pub exchange: String,
    pub market_id: String,
    pub market_title: Option<String>,
    pub action: Action,
    pub side: Side,
    pub quantity: i64,
    pub price_cents: i64,
    pub is_maker: Option<bool>,
    pub order_type: String,
    pub status: LegStatus,
    pub order_id: Option<String>,
    pub fill_price_cents: Option<i64>,
    pub fill_quantity: Option<i64>,
    pub orderbook_snapshot_json: Option<String>,
    pub settlement_value: Option<i64>,
    pub settled_at_ms: Option<i64>,
    pub executed_at_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationGroup {
    pub id: i64,
    pub session_id: String,
    pub created_at_ms: i64,
    pub thesis: Option<String>,
    pub equivalence_notes: Option<String>,
    pub strategy: String,
    pub estimated_edge_pct: Option<f64>,
    pub computed_edge_pct: Option<f64>,
    pub computed_fees_usd: Option<f64>,
    pub total_exposure_usd: Option<f64>,
    pub status: GroupStatus,
    pub expires_at_ms: i64,
    pub reviewed_at_ms: Option<i64>,
    pub executed_at_ms: Option<i64>,
    pub hypothetical_pnl_usd: Option<f64>,
    pub legs: Vec<RecommendationLeg>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub session_id: String,
    pub leg_id: Option<i64>,
    pub exchange: String,
    pub timestamp_ms: i64,
    pub market_id: String,
    pub action: Action,
    pub side: Side,
    pub quantity: i64,
    pub price_cents: Option<i64>,
    pub order_type: Option<String>,
    pub order_id: Option<String>,
    pub status: TradeStatus,
    pub result_json: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLog {
    pub id: i64,
    pub session_id: String,
    pub created_at_ms: i64,
    pub content: String,
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
