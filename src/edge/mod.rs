//! Fee, edge, depth, and hypothetical-P&L calculators.
//!
//! Pure functions, no I/O — dispatched by exchange tag the way
//! `arbitrage/fees.rs`'s `FeeCalculator` dispatches by leg side, generalized
//! here to a per-venue fee formula lookup instead of a single hardcoded pair.

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::models::{Action, RecommendationLeg, Side, EXCHANGE_KALSHI, EXCHANGE_POLYMARKET};

const KALSHI_TAKER_RATE: f64 = 0.07;
const KALSHI_MAKER_RATE: f64 = 0.0175;
const KALSHI_FEE_CAP_PER_CONTRACT: f64 = 0.02;

/// Fee in USD for a single leg, dispatched by exchange tag.
///
/// Kalshi's formula is parabolic in price: highest fee at 50c, near zero at
/// the extremes. Unknown venues are an error rather than a silent zero fee.
pub fn leg_fee(exchange: &str, contracts: i64, price_cents: i64, maker: bool) -> Result<f64> {
    match exchange {
        EXCHANGE_KALSHI => Ok(kalshi_fee(contracts, price_cents, maker)),
        EXCHANGE_POLYMARKET => Ok(0.0),
        other => Err(anyhow!("unknown exchange: {other}")),
    }
}

fn kalshi_fee(contracts: i64, price_cents: i64, maker: bool) -> f64 {
    if contracts <= 0 || !(1..=99).contains(&price_cents) {
        return 0.0;
    }
    let p = price_cents as f64 / 100.0;
    let rate = if maker { KALSHI_MAKER_RATE } else { KALSHI_TAKER_RATE };
    let raw = (100.0 * rate * contracts as f64 * p * (1.0 - p)).ceil() / 100.0;
    let cap = KALSHI_FEE_CAP_PER_CONTRACT * contracts as f64;
    raw.min(cap)
}

/// Extract `(best_price_cents, depth_at_best)` for `side` from an orderbook
/// that may be keyed directly by side or nested under an `orderbook` field,
/// with levels expressed as `[price, qty]` pairs or `{price, quantity}`
/// objects. Missing side data yields `(None, 0)`.
pub fn best_and_depth(orderbook: &Value, side: Side) -> (Option<i64>, i64) {
    let ob = orderbook.get("orderbook").unwrap_or(orderbook);
    let key = side.as_str();
    let levels = match ob.get(key).and_then(Value::as_array) {
        Some(levels) if !levels.is_empty() => levels,
        _ => return (None, 0),
    };

    let first = &levels[0];
    if let Some(pair) = first.as_array() {
        let price = pair.first().and_then(Value::as_i64);
        let qty = pair.get(1).and_then(Value::as_i64).unwrap_or(0);
        return (price, qty);
    }
    if first.is_object() {
        let price = first.get("price").and_then(Value::as_i64);
        let qty = first
            .get("quantity")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        return (price, qty);
    }
    (None, 0)
}

/// Human-readable warning when the book can't absorb the requested size at
/// the best price on this leg's side, else `None`.
pub fn depth_concern(requested_quantity: i64, depth_at_best: i64, market_id: &str) -> Option<String> {
    if depth_at_best < requested_quantity {
        Some(format!(
            "depth at best ({depth_at_best}) is less than requested quantity ({requested_quantity}) on {market_id}"
        ))
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct EdgeLegInput {
    pub exchange: String,
    pub action: Action,
    pub price_cents: i64,
    pub is_maker: bool,
}

#[derive(Debug, Clone)]
pub struct EdgeResult {
    pub gross_edge_usd: f64,
    pub total_fees_usd: f64,
    pub net_edge_usd: f64,
    pub net_edge_pct: f64,
}

/// Edge for a balanced group (every leg trades the same contract count).
///
/// A bracket across mutually exclusive outcomes always settles to exactly
/// $1 per set; the group's edge is the gap between what the set costs to
/// assemble and that guaranteed $1 payout, net of per-leg fees.
pub fn compute_edge(legs: &[EdgeLegInput], contracts: i64) -> Result<EdgeResult> {
    if legs.is_empty() || contracts <= 0 {
        return Ok(EdgeResult {
            gross_edge_usd: 0.0,
            total_fees_usd: 0.0,
            net_edge_usd: 0.0,
            net_edge_pct: 0.0,
        });
    }

    let cost_per_set_cents: i64 = legs
        .iter()
        .map(|l| match l.action {
            Action::Buy => l.price_cents,
            Action::Sell => -(100 - l.price_cents),
        })
        .sum();
    let payout_per_set_cents = 100i64;
    let total_deployed_usd = contracts as f64 * 100.0 / 100.0;

    let gross_edge_per_set = (payout_per_set_cents - cost_per_set_cents).abs() as f64 / 100.0;
    let gross_edge_usd = contracts as f64 * gross_edge_per_set;

    let mut total_fees_usd = 0.0;
    for leg in legs {
        total_fees_usd += leg_fee(&leg.exchange, contracts, leg.price_cents, leg.is_maker)?;
    }

    let net_edge_usd = gross_edge_usd - total_fees_usd;
    let net_edge_pct = if total_deployed_usd > 0.0 {
        net_edge_usd / total_deployed_usd * 100.0
    } else {
        0.0
    };

    Ok(EdgeResult {
        gross_edge_usd,
        total_fees_usd,
        net_edge_usd,
        net_edge_pct,
    })
}

/// Hypothetical P&L for a settled group: sums each leg's `(settlement −
/// fill_price) · fill_qty / 100`, signed by action, over legs that recorded
/// both a settlement value and a fill; subtracts realized fees. Legs
/// missing a settlement are skipped entirely, not treated as zero.
pub fn hypothetical_pnl(legs: &[RecommendationLeg], realized_fees_usd: f64) -> f64 {
    let mut total = 0.0;
    for leg in legs {
        let (Some(settlement), Some(fill_price), Some(fill_qty)) =
            (leg.settlement_value, leg.fill_price_cents, leg.fill_quantity)
        else {
            continue;
        };
        let effective_settlement = leg.side.effective_settlement(settlement);
        let signed = match leg.action {
            Action::Buy => 1.0,
            Action::Sell => -1.0,
        };
        total += signed * (effective_settlement - fill_price) as f64 * fill_qty as f64 / 100.0;
    }
    total - realized_fees_usd
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kalshi_fee_peaks_near_fifty_cents() {
        let at_50 = kalshi_fee(100, 50, false);
        let at_5 = kalshi_fee(100, 5, false);
        assert!(at_50 > at_5);
    }

    #[test]
    fn kalshi_fee_respects_cap() {
        let fee = kalshi_fee(1000, 50, false);
        assert!(fee <= KALSHI_FEE_CAP_PER_CONTRACT * 1000.0 + 1e-9);
    }

    #[test]
    fn kalshi_fee_zero_outside_price_range() {
        assert_eq!(kalshi_fee(10, 0, false), 0.0);
        assert_eq!(kalshi_fee(10, 100, false), 0.0);
    }

    #[test]
    fn unknown_exchange_is_an_error() {
        assert!(leg_fee("nope", 10, 50, false).is_err());
    }

    #[test]
    fn best_and_depth_reads_array_of_pairs() {
        let ob = json!({"yes": [[62, 40]], "no": [[39, 10]]});
        assert_eq!(best_and_depth(&ob, Side::Yes), (Some(62), 40));
    }

    #[test]
    fn best_and_depth_reads_array_of_objects() {
        let ob = json!({"yes": [{"price": 62, "quantity": 40}]});
        assert_eq!(best_and_depth(&ob, Side::Yes), (Some(62), 40));
    }

    #[test]
    fn best_and_depth_missing_side_is_none() {
        let ob = json!({"yes": []});
        assert_eq!(best_and_depth(&ob, Side::No), (None, 0));
    }

    #[test]
    fn depth_concern_flags_thin_book() {
        assert!(depth_concern(50, 10, "XYZ").is_some());
        assert!(depth_concern(5, 10, "XYZ").is_none());
    }

    #[test]
    fn bracket_edge_is_positive_when_sum_exceeds_a_dollar() {
        let legs = vec![
            EdgeLegInput { exchange: "kalshi".into(), action: Action::Buy, price_cents: 52, is_maker: true },
            EdgeLegInput { exchange: "kalshi".into(), action: Action::Buy, price_cents: 51, is_maker: false },
        ];
        let result = compute_edge(&legs, 10).unwrap();
        assert!(result.gross_edge_usd > 0.0);
        assert!(result.net_edge_usd < result.gross_edge_usd);
    }
}
