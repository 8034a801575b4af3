//! Settlement cascade integration tests: markets, events, cancellation.

mod common;

use rust_decimal_macros::dec;

use wagerbook::error::BookError;
use wagerbook::types::{EntryKind, EventStatus, WagerStatus};

#[tokio::test]
async fn market_settlement_resolves_every_wager() {
    let book = common::open_book().await;
    let alice = common::seed_punter(&book, dec!(100.00)).await;
    let bob = common::seed_punter(&book, dec!(100.00)).await;
    let (_, market, outcomes) = common::seed_market(
        &book,
        "Full-time result",
        &[("Home", dec!(2.500)), ("Draw", dec!(3.000)), ("Away", dec!(4.000))],
    )
    .await;

    let on_home = book
        .wagers
        .place_wager(alice.id, outcomes[0].id, dec!(40.00))
        .await
        .unwrap();
    let on_away = book
        .wagers
        .place_wager(bob.id, outcomes[2].id, dec!(25.00))
        .await
        .unwrap();

    let report = book
        .settlement
        .settle_market(market.id, Some(outcomes[0].id))
        .await
        .unwrap();
    assert!(!report.already_settled);
    assert_eq!(report.winning_outcome_id, Some(outcomes[0].id));
    assert_eq!(report.wagers_won, 1);
    assert_eq!(report.wagers_lost, 1);
    assert_eq!(report.total_paid, dec!(100.00));

    // Exactly one winning outcome
    let outcomes = book.store.outcomes_for_market(market.id).await.unwrap();
    let winners: Vec<_> = outcomes.iter().filter(|o| o.is_winner).collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].name, "Home");

    assert_eq!(
        book.store.wager(on_home.id).await.unwrap().status,
        WagerStatus::Won
    );
    assert_eq!(
        book.store.wager(on_away.id).await.unwrap().status,
        WagerStatus::Lost
    );

    let alice = book.store.account(alice.id).await.unwrap();
    let bob = book.store.account(bob.id).await.unwrap();
    assert_eq!(alice.balance, dec!(160.00));
    assert_eq!(bob.balance, dec!(75.00));
    assert_eq!(book.store.ledger_sum(alice.id).await.unwrap(), alice.balance);
    assert_eq!(book.store.ledger_sum(bob.id).await.unwrap(), bob.balance);
}

#[tokio::test]
async fn foreign_winner_is_rejected() {
    let book = common::open_book().await;
    let (_, market, _) = common::seed_market(&book, "A", &[("Home", dec!(2.000))]).await;
    let (_, _, other_outcomes) = common::seed_market(&book, "B", &[("Home", dec!(2.000))]).await;

    let err = book
        .settlement
        .settle_market(market.id, Some(other_outcomes[0].id))
        .await
        .unwrap_err();
    assert!(matches!(err, BookError::OutcomeNotFound(_)));

    assert!(!book.store.market(market.id).await.unwrap().is_settled);
}

#[tokio::test]
async fn market_without_winner_cannot_settle() {
    let book = common::open_book().await;
    let (_, market, _) = common::seed_market(&book, "A", &[("Home", dec!(2.000))]).await;

    let err = book.settlement.settle_market(market.id, None).await.unwrap_err();
    assert!(matches!(
        err,
        BookError::NoOutcomeSpecified { market_id } if market_id == market.id
    ));
}

#[tokio::test]
async fn settled_market_resettle_is_a_noop() {
    let book = common::open_book().await;
    let account = common::seed_punter(&book, dec!(100.00)).await;
    let (_, market, outcomes) =
        common::seed_market(&book, "A", &[("Home", dec!(2.000)), ("Away", dec!(3.000))]).await;
    book.wagers
        .place_wager(account.id, outcomes[0].id, dec!(50.00))
        .await
        .unwrap();

    book.settlement
        .settle_market(market.id, Some(outcomes[0].id))
        .await
        .unwrap();
    let entries_before = book.store.entries_for_account(account.id).await.unwrap().len();

    // Second settlement, even naming a different winner, changes nothing
    let report = book
        .settlement
        .settle_market(market.id, Some(outcomes[1].id))
        .await
        .unwrap();
    assert!(report.already_settled);
    assert_eq!(report.wagers_won, 0);
    assert_eq!(report.total_paid, dec!(0));

    let market = book.store.market(market.id).await.unwrap();
    assert_eq!(market.settled_outcome_id, Some(outcomes[0].id));
    assert_eq!(
        book.store.entries_for_account(account.id).await.unwrap().len(),
        entries_before
    );
}

#[tokio::test]
async fn event_settlement_cascades_across_markets() {
    let book = common::open_book().await;
    let account = common::seed_punter(&book, dec!(200.00)).await;
    let (event, result_market, result_outcomes) = common::seed_market(
        &book,
        "Full-time result",
        &[("Home", dec!(2.100)), ("Away", dec!(3.600))],
    )
    .await;
    let totals_market = book
        .catalog
        .add_market(event.id, "Total goals", wagerbook::types::MarketKind::OverUnder, None)
        .await
        .unwrap();
    let over = book
        .catalog
        .add_outcome(totals_market.id, "Over 2.5", dec!(1.900))
        .await
        .unwrap();
    let under = book
        .catalog
        .add_outcome(totals_market.id, "Under 2.5", dec!(1.900))
        .await
        .unwrap();

    book.wagers
        .place_wager(account.id, result_outcomes[0].id, dec!(50.00))
        .await
        .unwrap();
    book.wagers
        .place_wager(account.id, under.id, dec!(30.00))
        .await
        .unwrap();

    book.catalog
        .assign_winner(result_market.id, result_outcomes[0].id)
        .await
        .unwrap();
    book.catalog.assign_winner(totals_market.id, over.id).await.unwrap();

    let report = book.settlement.settle_event(event.id).await.unwrap();
    assert!(!report.already_settled);
    assert_eq!(report.markets.len(), 2);
    assert_eq!(report.wagers_won(), 1);
    assert_eq!(report.wagers_lost(), 1);
    assert_eq!(report.total_paid(), dec!(105.00));

    let event = book.store.event(event.id).await.unwrap();
    assert_eq!(event.status, EventStatus::Settled);
    for market in book.store.markets_for_event(event.id).await.unwrap() {
        assert!(market.is_settled);
    }

    // 200 - 50 - 30 + 105
    let account = book.store.account(account.id).await.unwrap();
    assert_eq!(account.balance, dec!(225.00));
    assert_eq!(book.store.ledger_sum(account.id).await.unwrap(), account.balance);
}

#[tokio::test]
async fn event_resettle_is_a_noop() {
    let book = common::open_book().await;
    let account = common::seed_punter(&book, dec!(100.00)).await;
    let (event, market, outcomes) =
        common::seed_market(&book, "A", &[("Home", dec!(2.000))]).await;
    book.wagers
        .place_wager(account.id, outcomes[0].id, dec!(50.00))
        .await
        .unwrap();
    book.catalog.assign_winner(market.id, outcomes[0].id).await.unwrap();

    book.settlement.settle_event(event.id).await.unwrap();
    let balance_after = book.store.account(account.id).await.unwrap().balance;

    let report = book.settlement.settle_event(event.id).await.unwrap();
    assert!(report.already_settled);
    assert!(report.markets.is_empty());
    assert_eq!(
        book.store.account(account.id).await.unwrap().balance,
        balance_after
    );
}

#[tokio::test]
async fn event_settlement_is_all_or_nothing() {
    let book = common::open_book().await;
    let account = common::seed_punter(&book, dec!(100.00)).await;
    let (event, ready_market, ready_outcomes) =
        common::seed_market(&book, "Ready", &[("Home", dec!(2.000))]).await;
    let stuck_market = book
        .catalog
        .add_market(event.id, "Stuck", wagerbook::types::MarketKind::Custom, None)
        .await
        .unwrap();
    book.catalog
        .add_outcome(stuck_market.id, "Only", dec!(1.500))
        .await
        .unwrap();

    book.wagers
        .place_wager(account.id, ready_outcomes[0].id, dec!(50.00))
        .await
        .unwrap();
    book.catalog
        .assign_winner(ready_market.id, ready_outcomes[0].id)
        .await
        .unwrap();
    // stuck_market has no winner assigned

    let err = book.settlement.settle_event(event.id).await.unwrap_err();
    assert!(matches!(
        err,
        BookError::NoOutcomeSpecified { market_id } if market_id == stuck_market.id
    ));

    // Nothing moved: event still live, no market settled, no payout
    let event = book.store.event(event.id).await.unwrap();
    assert_eq!(event.status, EventStatus::Live);
    assert!(!book.store.market(ready_market.id).await.unwrap().is_settled);
    assert_eq!(
        book.store.account(account.id).await.unwrap().balance,
        dec!(50.00)
    );
}

#[tokio::test]
async fn cancelled_event_cannot_settle() {
    let book = common::open_book().await;
    let (event, _, _) = common::seed_market(&book, "A", &[("Home", dec!(2.000))]).await;

    book.settlement.cancel_event(event.id).await.unwrap();

    let err = book.settlement.settle_event(event.id).await.unwrap_err();
    assert!(matches!(
        err,
        BookError::InvalidTransition {
            from: EventStatus::Cancelled,
            to: EventStatus::Settled,
        }
    ));
}

#[tokio::test]
async fn cancellation_refunds_open_wagers() {
    let book = common::open_book().await;
    let alice = common::seed_punter(&book, dec!(100.00)).await;
    let bob = common::seed_punter(&book, dec!(100.00)).await;
    let (event, _, outcomes) =
        common::seed_market(&book, "A", &[("Home", dec!(2.000)), ("Away", dec!(3.000))]).await;

    let a = book
        .wagers
        .place_wager(alice.id, outcomes[0].id, dec!(40.00))
        .await
        .unwrap();
    let b = book
        .wagers
        .place_wager(bob.id, outcomes[1].id, dec!(15.00))
        .await
        .unwrap();

    let report = book.settlement.cancel_event(event.id).await.unwrap();
    assert!(!report.already_cancelled);
    assert_eq!(report.wagers_refunded, 2);
    assert_eq!(report.total_refunded, dec!(55.00));

    for (wager, account) in [(a, alice.id), (b, bob.id)] {
        assert_eq!(
            book.store.wager(wager.id).await.unwrap().status,
            WagerStatus::Cancelled
        );
        let account = book.store.account(account).await.unwrap();
        assert_eq!(account.balance, dec!(100.00));
        assert_eq!(book.store.ledger_sum(account.id).await.unwrap(), account.balance);

        let release = book
            .store
            .entries_for_account(account.id)
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.kind == EntryKind::StakeRelease)
            .unwrap();
        assert_eq!(release.reference, format!("RLS-W{}", wager.id));
    }

    // Cancelling again is a no-op, stakes are not released twice
    let report = book.settlement.cancel_event(event.id).await.unwrap();
    assert!(report.already_cancelled);
    assert_eq!(report.wagers_refunded, 0);
    assert_eq!(
        book.store.account(alice.id).await.unwrap().balance,
        dec!(100.00)
    );
}

#[tokio::test]
async fn settled_event_cannot_cancel() {
    let book = common::open_book().await;
    let (event, market, outcomes) =
        common::seed_market(&book, "A", &[("Home", dec!(2.000))]).await;
    book.catalog.assign_winner(market.id, outcomes[0].id).await.unwrap();
    book.settlement.settle_event(event.id).await.unwrap();

    let err = book.settlement.cancel_event(event.id).await.unwrap_err();
    assert!(matches!(
        err,
        BookError::InvalidTransition {
            from: EventStatus::Settled,
            to: EventStatus::Cancelled,
        }
    ));
}

#[tokio::test]
async fn mark_live_transitions_only_from_upcoming() {
    let book = common::open_book().await;
    let event = book
        .catalog
        .create_event("Derby", chrono::Utc::now(), "")
        .await
        .unwrap();
    assert_eq!(event.status, EventStatus::Upcoming);

    let event = book.catalog.mark_live(event.id).await.unwrap();
    assert_eq!(event.status, EventStatus::Live);

    let err = book.catalog.mark_live(event.id).await.unwrap_err();
    assert!(matches!(
        err,
        BookError::InvalidTransition {
            from: EventStatus::Live,
            to: EventStatus::Live,
        }
    ));
}

#[tokio::test]
async fn settled_market_refuses_new_outcomes_and_winner_changes() {
    let book = common::open_book().await;
    let (_, market, outcomes) = common::seed_market(&book, "A", &[("Home", dec!(2.000))]).await;
    book.settlement
        .settle_market(market.id, Some(outcomes[0].id))
        .await
        .unwrap();

    let err = book
        .catalog
        .add_outcome(market.id, "Late", dec!(5.000))
        .await
        .unwrap_err();
    assert!(matches!(err, BookError::AlreadySettled { .. }));

    let err = book
        .catalog
        .assign_winner(market.id, outcomes[0].id)
        .await
        .unwrap_err();
    assert!(matches!(err, BookError::AlreadySettled { .. }));
}

#[tokio::test]
async fn catalog_rejects_bad_odds_and_duplicate_names() {
    let book = common::open_book().await;
    let (event, market, _) = common::seed_market(&book, "A", &[("Home", dec!(2.000))]).await;

    let err = book
        .catalog
        .add_outcome(market.id, "Zero", dec!(0))
        .await
        .unwrap_err();
    assert!(matches!(err, BookError::InvalidOdds(_)));

    let err = book
        .catalog
        .add_outcome(market.id, "Home", dec!(2.100))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BookError::DuplicateName { entity: "outcome", .. }
    ));

    let err = book
        .catalog
        .add_market(event.id, "A", wagerbook::types::MarketKind::Custom, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BookError::DuplicateName { entity: "market", .. }
    ));

    // Odds are stored to three places
    let outcome = book
        .catalog
        .add_outcome(market.id, "Precise", dec!(2.12345))
        .await
        .unwrap();
    assert_eq!(outcome.decimal_odds, dec!(2.123));
}
