//! WAGERBOOK — Sports Wagering Ledger & Settlement Engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens (or creates) the book database, and runs a demonstration
//! matchday: deposit, catalog setup, wagers, settlement, reconciliation.

use anyhow::Result;
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use tracing::info;

use wagerbook::config;
use wagerbook::engine::Book;
use wagerbook::types::{EntryKind, MarketKind};

const BANNER: &str = r#"
__        ___    ____ _____ ____  ____   ___   ___  _  __
\ \      / / \  / ___| ____|  _ \| __ ) / _ \ / _ \| |/ /
 \ \ /\ / / _ \| |  _|  _| | |_) |  _ \| | | | | | | ' /
  \ V  V / ___ \ |_| | |___|  _ <| |_) | |_| | |_| | . \
   \_/\_/_/   \_\____|_____|_| \_\____/ \___/ \___/|_|\_\

  Sports Wagering Ledger & Settlement Engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = match config::AppConfig::load("config.toml") {
        Ok(cfg) => cfg,
        Err(_) => config::AppConfig::default(),
    };

    init_logging();

    println!("{BANNER}");
    info!(
        database = %cfg.database.url,
        currency = %cfg.book.default_currency,
        "WAGERBOOK starting up"
    );

    let book = Book::open(&cfg).await?;

    // -- Punter and bankroll ---------------------------------------------

    let user_id = format!("demo-{}", uuid::Uuid::new_v4());
    let account = book.ledger.create_account(&user_id).await?;
    book.ledger
        .credit(account.id, dec!(500.00), EntryKind::Deposit, None)
        .await?;

    // -- Matchday catalog -------------------------------------------------

    let kickoff = Utc::now() + Duration::hours(2);
    let event = book
        .catalog
        .create_event("Hearts of Oak vs Asante Kotoko", kickoff, "Matchday 1")
        .await?;
    let market = book
        .catalog
        .add_market(event.id, "Full-time result", MarketKind::WinDrawWin, None)
        .await?;
    let home = book.catalog.add_outcome(market.id, "Home", dec!(2.100)).await?;
    let draw = book.catalog.add_outcome(market.id, "Draw", dec!(3.250)).await?;
    let away = book.catalog.add_outcome(market.id, "Away", dec!(3.600)).await?;
    book.catalog.mark_live(event.id).await?;

    // -- Wagers ------------------------------------------------------------

    let on_home = book.wagers.place_wager(account.id, home.id, dec!(50.00)).await?;
    let on_draw = book.wagers.place_wager(account.id, draw.id, dec!(20.00)).await?;
    info!(
        home_payout = %on_home.potential_payout,
        draw_payout = %on_draw.potential_payout,
        away_odds = %away.decimal_odds,
        "Wagers placed"
    );

    // -- Full time: home win ----------------------------------------------

    book.catalog.assign_winner(market.id, home.id).await?;
    let report = book.settlement.settle_event(event.id).await?;
    info!(%report, "Event settled");

    // -- Reconciliation ----------------------------------------------------

    let account = book.store.account(account.id).await?;
    let ledger_sum = book.store.ledger_sum(account.id).await?;
    info!(
        balance = %account.balance,
        ledger_sum = %ledger_sum,
        consistent = account.balance == ledger_sum,
        "Final position"
    );
    for entry in book.store.entries_for_account(account.id).await? {
        println!("  {entry}");
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wagerbook=info"));

    let json_logging = std::env::var("WAGERBOOK_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
