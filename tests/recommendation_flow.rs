//! End-to-end coverage of the journal store's recommendation lifecycle
//! and the edge math it feeds, against a throwaway on-disk database.

use copilot_engine::edge::{compute_edge, hypothetical_pnl, EdgeLegInput};
use copilot_engine::journal::JournalStore;
use copilot_engine::models::{Action, GroupStatus, LegStatus, NewLeg, Side, EXCHANGE_KALSHI};

async fn open_store() -> (JournalStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("journal.db");
    let store = JournalStore::open(db_path.to_str().unwrap()).unwrap();
    (store, dir)
}

fn bracket_legs() -> Vec<NewLeg> {
    vec![
        NewLeg {
            exchange: EXCHANGE_KALSHI.to_string(),
            market_id: "MKT-YES".to_string(),
            market_title: Some("Will it happen? (Yes)".to_string()),
            action: Action::Buy,
            side: Side::Yes,
            quantity: 10,
            price_cents: 45,
            order_type: "limit".to_string(),
        },
        NewLeg {
            exchange: EXCHANGE_KALSHI.to_string(),
            market_id: "MKT-NO".to_string(),
            market_title: Some("Will it happen? (No)".to_string()),
            action: Action::Buy,
            side: Side::No,
            quantity: 10,
            price_cents: 48,
            order_type: "limit".to_string(),
        },
    ]
}

#[tokio::test]
async fn recommend_trade_creates_a_pending_group_with_ordered_legs() {
    let (store, _dir) = open_store().await;
    let session = store.create_session().await.unwrap();
    let legs = bracket_legs();

    let (group_id, expires_at) = store
        .create_recommendation_group(&session.id, Some("cheap bracket"), None, Some(6.0), "bracket", &legs, 60)
        .await
        .unwrap();

    let group = store.get_group(group_id).await.unwrap();
    assert_eq!(group.status, GroupStatus::Pending);
    assert_eq!(group.legs.len(), 2);
    assert_eq!(group.legs[0].leg_index, 0);
    assert_eq!(group.legs[1].leg_index, 1);
    assert!(group.legs.iter().all(|l| l.status == LegStatus::Pending));
    assert!(expires_at > group.created_at_ms);
}

#[tokio::test]
async fn rejects_a_leg_with_out_of_range_price() {
    let (store, _dir) = open_store().await;
    let session = store.create_session().await.unwrap();
    let mut legs = bracket_legs();
    legs[0].price_cents = 0;

    let result = store
        .create_recommendation_group(&session.id, None, None, None, "bracket", &legs, 60)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn pending_groups_survive_a_reopen_of_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("journal.db");
    let legs = bracket_legs();

    let group_id = {
        let store = JournalStore::open(db_path.to_str().unwrap()).unwrap();
        let session = store.create_session().await.unwrap();
        let (group_id, _) = store
            .create_recommendation_group(&session.id, None, None, None, "bracket", &legs, 60)
            .await
            .unwrap();
        group_id
    };

    let store = JournalStore::open(db_path.to_str().unwrap()).unwrap();
    let pending = store.get_pending_groups().await.unwrap();
    assert!(pending.iter().any(|g| g.id == group_id));
}

#[test]
fn a_cheap_bracket_has_positive_net_edge() {
    let legs = vec![
        EdgeLegInput { exchange: EXCHANGE_KALSHI.to_string(), action: Action::Buy, price_cents: 45, is_maker: true },
        EdgeLegInput { exchange: EXCHANGE_KALSHI.to_string(), action: Action::Buy, price_cents: 48, is_maker: false },
    ];

    let result = compute_edge(&legs, 10).unwrap();
    assert!(result.gross_edge_usd > 0.0, "cost of 93c per set should undercut the $1 payout");
    assert!(result.net_edge_usd < result.gross_edge_usd, "fees should narrow the edge");
    assert!(result.net_edge_pct > 0.0);
}

#[test]
fn an_even_money_bracket_has_no_edge_left_after_fees() {
    let legs = vec![
        EdgeLegInput { exchange: EXCHANGE_KALSHI.to_string(), action: Action::Buy, price_cents: 50, is_maker: true },
        EdgeLegInput { exchange: EXCHANGE_KALSHI.to_string(), action: Action::Buy, price_cents: 50, is_maker: false },
    ];

    let result = compute_edge(&legs, 10).unwrap();
    assert_eq!(result.gross_edge_usd, 0.0);
    assert!(result.net_edge_usd < 0.0, "fees alone should push net edge negative");
}

#[tokio::test]
async fn hypothetical_pnl_nets_fills_against_settlement_and_fees() {
    let (store, _dir) = open_store().await;
    let session = store.create_session().await.unwrap();
    let legs = bracket_legs();
    let (group_id, _) = store
        .create_recommendation_group(&session.id, None, None, None, "bracket", &legs, 60)
        .await
        .unwrap();

    let group = store.get_group(group_id).await.unwrap();
    store.update_leg_fill(group.legs[0].id, 45, 10).await.unwrap();
    store.update_leg_fill(group.legs[1].id, 48, 10).await.unwrap();

    let mut settled = store.get_group(group_id).await.unwrap();
    for leg in settled.legs.iter_mut() {
        leg.settlement_value = Some(100); // underlying resolves "yes"
    }

    let pnl = hypothetical_pnl(&settled.legs, 0.93);
    // Leg 0 (yes, filled at 45, effective settlement 100): (100 - 45) * 10 / 100 = 5.50
    // Leg 1 (no, filled at 48, effective settlement 100 - 100 = 0): (0 - 48) * 10 / 100 = -4.80
    // minus realized fees of 0.93
    assert!((pnl - (5.50 - 4.80 - 0.93)).abs() < 1e-6);
}
