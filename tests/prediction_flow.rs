mod common;

use std::time::Duration;

use common::{service_with, RecordingSink};
use points_market::{
    NewPrediction, PersistentStore, PointsError, PredictionStatus, Settlement, Side, StoreError,
};

const CREATOR: u64 = 9;

#[tokio::test]
async fn repeated_wagers_on_one_side_accumulate() {
    let (store, sink, service) = service_with(&[(1, 500)]);
    let registry = service.registry();
    registry.start(CREATOR, "Rain?", "yes", "no").await.unwrap();

    let first = registry.place_bet(CREATOR, 1, Side::A, 120).await.unwrap();
    let second = registry.place_bet(CREATOR, 1, Side::A, 80).await.unwrap();

    assert_eq!((first.previous, first.total), (0, 120));
    assert_eq!((second.previous, second.total), (120, 200));
    assert_eq!(service.ledger().balance(1).await.unwrap(), 300);

    let market = registry.get(CREATOR).await.unwrap();
    let id = market.lock().await.id();
    let bets = store.bets_for(id).await.unwrap();
    assert_eq!(bets.len(), 1);
    assert_eq!(bets[0].points, 200);
    assert_eq!(
        sink.last_reply().unwrap(),
        "<@1> bet 200 points on **yes**\n(up from 120)"
    );
}

#[tokio::test]
async fn refund_restores_pre_bet_balances() {
    let (store, sink, service) = service_with(&[(1, 300), (2, 80)]);
    let registry = service.registry();
    let market = registry.start(CREATOR, "Rain?", "yes", "no").await.unwrap();
    let id = market.lock().await.id();

    registry.place_bet(CREATOR, 1, Side::A, 100).await.unwrap();
    registry.place_bet(CREATOR, 2, Side::B, 50).await.unwrap();
    assert_eq!(service.ledger().balance(1).await.unwrap(), 200);
    assert_eq!(service.ledger().balance(2).await.unwrap(), 30);

    registry.refund(CREATOR).await.unwrap();

    assert_eq!(service.ledger().balance(1).await.unwrap(), 300);
    assert_eq!(service.ledger().balance(2).await.unwrap(), 80);
    assert_eq!(
        store.prediction(id).await.unwrap().unwrap().status,
        PredictionStatus::Refunded
    );
    assert!(registry.is_empty().await);
    assert_eq!(sink.last_reply().unwrap(), "Prediction cancelled. Points refunded.");
}

#[tokio::test]
async fn winners_take_the_losing_pool() {
    let (store, sink, service) = service_with(&[(1, 1000), (2, 1000)]);
    let registry = service.registry();
    let market = registry.start(CREATOR, "Rain?", "yes", "no").await.unwrap();
    let id = market.lock().await.id();

    registry.place_bet(CREATOR, 1, Side::A, 100).await.unwrap();
    registry.place_bet(CREATOR, 2, Side::B, 300).await.unwrap();
    registry.lock(CREATOR).await.unwrap();

    let settlement = registry.complete(CREATOR, "yes").await.unwrap();
    match settlement {
        Settlement::Payout { winner, multiplier, losing_pool, .. } => {
            assert_eq!(winner, Side::A);
            assert_eq!(multiplier, 4.0);
            assert_eq!(losing_pool, 300);
        }
        other => panic!("expected payout, got {other:?}"),
    }

    assert_eq!(service.ledger().balance(1).await.unwrap(), 900 + 400);
    assert_eq!(service.ledger().balance(2).await.unwrap(), 700);

    let row = store.prediction(id).await.unwrap().unwrap();
    assert_eq!(row.status, PredictionStatus::Completed);
    assert_eq!(row.winner.as_deref(), Some("yes"));
    assert!(registry.get(CREATOR).await.is_none());
    assert_eq!(
        sink.last_reply().unwrap(),
        "Prediction completed -- 300 points distributed to yes (4.0x payout)."
    );
}

#[tokio::test]
async fn one_sided_market_refunds_on_completion() {
    let (_store, sink, service) = service_with(&[(2, 150)]);
    let registry = service.registry();
    registry.start(CREATOR, "Rain?", "yes", "no").await.unwrap();

    registry.place_bet(CREATOR, 2, Side::B, 150).await.unwrap();
    assert_eq!(service.ledger().balance(2).await.unwrap(), 0);
    registry.lock(CREATOR).await.unwrap();

    let settlement = registry.complete(CREATOR, "yes").await.unwrap();
    assert!(matches!(settlement, Settlement::Wash { .. }));
    assert_eq!(service.ledger().balance(2).await.unwrap(), 150);
    assert_eq!(
        sink.last_reply().unwrap(),
        "Everyone voted the same way! Points refunded."
    );
}

#[tokio::test]
async fn creators_hold_one_open_market() {
    let (_store, _sink, service) = service_with(&[]);
    let registry = service.registry();
    registry.start(CREATOR, "Rain?", "yes", "no").await.unwrap();

    let err = registry.start(CREATOR, "Snow?", "yes", "no").await.err();
    assert_eq!(err, Some(PointsError::DuplicateMarket));

    registry.lock(CREATOR).await.unwrap();
    let err = registry.start(CREATOR, "Snow?", "yes", "no").await.err();
    assert_eq!(err, Some(PointsError::DuplicateMarket));
}

#[tokio::test]
async fn duplicate_check_consults_storage() {
    let (store, _sink, service) = service_with(&[]);
    store
        .create_prediction(NewPrediction {
            creator_id: CREATOR,
            title: "Left over".into(),
            option_a: "a".into(),
            option_b: "b".into(),
            thread_id: 1,
            message_id: 2,
        })
        .await
        .unwrap();

    let err = service.registry().start(CREATOR, "Rain?", "yes", "no").await.err();
    assert_eq!(err, Some(PointsError::DuplicateMarket));
}

#[tokio::test]
async fn slow_start_does_not_stall_other_markets() {
    let (_store, sink, service) = service_with(&[(1, 100), (2, 100)]);
    let registry = service.registry().clone();
    registry.start(7, "Rain?", "yes", "no").await.unwrap();

    sink.hold_next_post();
    let pending = tokio::spawn({
        let registry = registry.clone();
        async move { registry.start(8, "Snow?", "yes", "no").await.err() }
    });
    sink.post_held().await;

    let receipt = tokio::time::timeout(Duration::from_secs(5), registry.place_bet(7, 1, Side::A, 10))
        .await
        .expect("bet on another market finished while a start was in flight")
        .unwrap();
    assert_eq!(receipt.total, 10);
    assert_eq!(
        registry.start(8, "Hail?", "yes", "no").await.err(),
        Some(PointsError::DuplicateMarket)
    );
    assert!(registry.get(8).await.is_none());

    sink.release_post();
    assert_eq!(pending.await.unwrap(), None);
    assert!(registry.get(8).await.is_some());
    registry.place_bet(8, 2, Side::B, 40).await.unwrap();
}

#[tokio::test]
async fn failed_start_frees_the_creator() {
    let (_store, _sink, service) = service_with(&[]);
    let registry = service.registry();
    let err = registry.start(CREATOR, "Rain?", "yes", "yes").await.err();
    assert_eq!(err, Some(PointsError::InvalidOptions));
    assert!(registry.start(CREATOR, "Rain?", "yes", "no").await.is_ok());
}

#[tokio::test]
async fn identical_options_are_rejected() {
    let (store, sink, service) = service_with(&[]);
    let err = service.registry().start(CREATOR, "Rain?", "yes", "yes").await.err();
    assert_eq!(err, Some(PointsError::InvalidOptions));
    assert!(store.open_prediction_for(CREATOR).await.unwrap().is_none());
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn switching_sides_changes_nothing() {
    let (store, _sink, service) = service_with(&[(1, 500)]);
    let registry = service.registry();
    let market = registry.start(CREATOR, "Rain?", "yes", "no").await.unwrap();
    let id = market.lock().await.id();
    registry.place_bet(CREATOR, 1, Side::A, 100).await.unwrap();

    let err = registry.place_bet(CREATOR, 1, Side::B, 50).await.unwrap_err();
    assert_eq!(err, PointsError::SideConflict { held: "yes".into() });

    assert_eq!(service.ledger().balance(1).await.unwrap(), 400);
    assert_eq!(store.bets_for(id).await.unwrap()[0].points, 100);
    let totals = market.lock().await.totals();
    assert_eq!((totals.sum_a, totals.sum_b), (100, 0));
}

#[tokio::test]
async fn wagers_beyond_balance_are_rejected() {
    let (_store, _sink, service) = service_with(&[(1, 40)]);
    let registry = service.registry();
    registry.start(CREATOR, "Rain?", "yes", "no").await.unwrap();

    let err = registry.place_bet(CREATOR, 1, Side::A, 41).await.unwrap_err();
    assert_eq!(err, PointsError::InsufficientFunds);
    let err = registry.place_bet(CREATOR, 2, Side::A, 1).await.unwrap_err();
    assert_eq!(err, PointsError::InsufficientFunds);
    assert_eq!(service.ledger().balance(1).await.unwrap(), 40);
}

#[tokio::test]
async fn failed_bet_write_leaves_market_untouched() {
    let (store, _sink, service) = service_with(&[(1, 100)]);
    let registry = service.registry();
    let market = registry.start(CREATOR, "Rain?", "yes", "no").await.unwrap();

    store.inject_write_failure(true);
    let err = registry.place_bet(CREATOR, 1, Side::A, 10).await.unwrap_err();
    assert!(matches!(err, PointsError::Store(StoreError::Backend(_))));
    store.inject_write_failure(false);

    assert_eq!(service.ledger().balance(1).await.unwrap(), 100);
    assert_eq!(market.lock().await.bets().position(1), None);
}

#[tokio::test]
async fn failed_settlement_write_keeps_market_open() {
    let (store, _sink, service) = service_with(&[(1, 100)]);
    let registry = service.registry();
    registry.start(CREATOR, "Rain?", "yes", "no").await.unwrap();
    registry.place_bet(CREATOR, 1, Side::A, 60).await.unwrap();

    store.inject_write_failure(true);
    assert!(registry.refund(CREATOR).await.is_err());
    store.inject_write_failure(false);

    let market = registry.get(CREATOR).await.unwrap();
    assert_eq!(market.lock().await.status(), PredictionStatus::Active);
    assert_eq!(service.ledger().balance(1).await.unwrap(), 40);

    registry.refund(CREATOR).await.unwrap();
    assert_eq!(service.ledger().balance(1).await.unwrap(), 100);
}

#[tokio::test]
async fn notification_outage_does_not_undo_bets() {
    let (_store, sink, service) = service_with(&[(1, 100)]);
    let registry = service.registry();
    registry.start(CREATOR, "Rain?", "yes", "no").await.unwrap();

    sink.set_outage(true);
    let receipt = registry.place_bet(CREATOR, 1, Side::A, 25).await.unwrap();
    assert_eq!(receipt.total, 25);
    assert_eq!(service.ledger().balance(1).await.unwrap(), 75);
}

#[tokio::test]
async fn locked_markets_take_no_bets_and_must_be_locked_to_complete() {
    let (_store, _sink, service) = service_with(&[(1, 100), (2, 100)]);
    let registry = service.registry();
    registry.start(CREATOR, "Rain?", "yes", "no").await.unwrap();
    registry.place_bet(CREATOR, 1, Side::A, 10).await.unwrap();

    assert_eq!(registry.complete(CREATOR, "yes").await.err(), Some(PointsError::NotLocked));

    assert!(registry.lock(CREATOR).await.unwrap());
    assert!(!registry.lock(CREATOR).await.unwrap());

    let err = registry.place_bet(CREATOR, 2, Side::B, 10).await.unwrap_err();
    assert_eq!(err, PointsError::MarketClosed(PredictionStatus::Locked));

    let err = registry.complete(CREATOR, "maybe").await.unwrap_err();
    assert_eq!(
        err,
        PointsError::InvalidWinner { option_a: "yes".into(), option_b: "no".into() }
    );
}

#[tokio::test]
async fn settled_markets_reject_further_bets() {
    let (_store, _sink, service) = service_with(&[(1, 100)]);
    let registry = service.registry();
    let market = registry.start(CREATOR, "Rain?", "yes", "no").await.unwrap();
    registry.refund(CREATOR).await.unwrap();

    let err = market.lock().await.place_bet(1, Side::A, 5).await.unwrap_err();
    assert_eq!(err, PointsError::MarketClosed(PredictionStatus::Refunded));
    assert_eq!(registry.place_bet(CREATOR, 1, Side::A, 5).await.err(), Some(PointsError::NoOpenMarket));
    assert_eq!(service.ledger().balance(1).await.unwrap(), 100);
}

#[tokio::test(start_paused = true)]
async fn markets_lock_themselves_after_the_timeout() {
    let (store, sink, service) = service_with(&[(1, 100)]);
    let registry = service.registry();
    let market = registry.start(CREATOR, "Rain?", "yes", "no").await.unwrap();
    let id = market.lock().await.id();

    tokio::time::sleep(Duration::from_secs(1199)).await;
    assert_eq!(market.lock().await.status(), PredictionStatus::Active);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(market.lock().await.status(), PredictionStatus::Locked);
    assert_eq!(
        store.prediction(id).await.unwrap().unwrap().status,
        PredictionStatus::Locked
    );
    assert_eq!(sink.last_reply().unwrap(), "Prediction locked.");

    let err = registry.place_bet(CREATOR, 1, Side::A, 5).await.unwrap_err();
    assert_eq!(err, PointsError::MarketClosed(PredictionStatus::Locked));
}

#[tokio::test]
async fn starting_posts_headline_thread_and_board() {
    let sink = RecordingSink::new();
    let store = std::sync::Arc::new(points_market::MemoryStore::new());
    let service = points_market::PointsService::new(
        store,
        sink.clone(),
        points_market::PointsConfig::default(),
    );
    let market = service.registry().start(CREATOR, "Rain?", "yes", "no").await.unwrap();
    let thread = market.lock().await.thread_id();

    let events = sink.events();
    assert_eq!(events[0], common::SinkEvent::Post("PREDICTION: **Rain?**".into()));
    assert_eq!(
        events[1],
        common::SinkEvent::Thread { thread, name: "PREDICTION: Rain?".into() }
    );
    assert!(matches!(
        &events[2],
        common::SinkEvent::Send { thread: t, view, .. } if *t == thread && !view.locked
    ));
}
