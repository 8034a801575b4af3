//! Shared helpers for integration tests.
//!
//! Every test gets its own throwaway SQLite file under the system temp
//! directory, so tests can run in parallel without interfering.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use wagerbook::clock::{ManualClock, SharedClock, SystemClock};
use wagerbook::config::{AppConfig, DatabaseConfig};
use wagerbook::engine::Book;
use wagerbook::store;
use wagerbook::types::{Account, EntryKind, Event, Market, MarketKind, Outcome};

pub fn temp_config() -> AppConfig {
    let mut path = std::env::temp_dir();
    path.push(format!("wagerbook_it_{}.db", Uuid::new_v4()));
    AppConfig {
        database: DatabaseConfig {
            url: format!("sqlite://{}", path.display()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A book on a fresh database with the system clock.
pub async fn open_book() -> Book {
    let cfg = temp_config();
    let pool = store::connect(&cfg.database).await.expect("connect");
    Book::new(pool, Arc::new(SystemClock), &cfg)
}

/// A book on a fresh database with a controllable clock, for tests that
/// assert on synthesized references or timestamps.
pub async fn open_book_with_clock() -> (Book, Arc<ManualClock>) {
    let cfg = temp_config();
    let pool = store::connect(&cfg.database).await.expect("connect");
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let shared: SharedClock = clock.clone();
    (Book::new(pool, shared, &cfg), clock)
}

/// A funded account under a unique user id.
pub async fn seed_punter(book: &Book, deposit: Decimal) -> Account {
    let user_id = format!("punter-{}", Uuid::new_v4());
    let account = book
        .ledger
        .create_account(&user_id)
        .await
        .expect("create account");
    if deposit > Decimal::ZERO {
        book.ledger
            .credit(account.id, deposit, EntryKind::Deposit, None)
            .await
            .expect("deposit");
    }
    account
}

/// A live event with one market and the given priced outcomes.
pub async fn seed_market(
    book: &Book,
    name: &str,
    odds: &[(&str, Decimal)],
) -> (Event, Market, Vec<Outcome>) {
    let event = book
        .catalog
        .create_event(
            &format!("event-{}", Uuid::new_v4()),
            Utc::now() + chrono::Duration::hours(1),
            "",
        )
        .await
        .expect("create event");
    let market = book
        .catalog
        .add_market(event.id, name, MarketKind::Custom, None)
        .await
        .expect("add market");
    let mut outcomes = Vec::with_capacity(odds.len());
    for (outcome_name, price) in odds {
        outcomes.push(
            book.catalog
                .add_outcome(market.id, outcome_name, *price)
                .await
                .expect("add outcome"),
        );
    }
    let event = book.catalog.mark_live(event.id).await.expect("mark live");
    (event, market, outcomes)
}
