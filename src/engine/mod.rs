//! Engine — the operational core of the book.
//!
//! Split by concern: `ledger` moves money, `wagers` places and settles
//! individual wagers, `settlement` orchestrates market and event
//! cascades, `catalog` administers events, markets and outcomes.
//! `Book` bundles them over one pool and one clock.

pub mod catalog;
pub mod ledger;
pub mod settlement;
pub mod wagers;

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::clock::{SharedClock, SystemClock};
use crate::config::AppConfig;
use crate::engine::catalog::Catalog;
use crate::engine::ledger::Ledger;
use crate::engine::settlement::Settlement;
use crate::engine::wagers::WagerEngine;
use crate::error::Result;
use crate::store::{self, Store};

/// Everything needed to run a book: read-side store plus the four
/// write-side engines, sharing one pool and one clock.
#[derive(Clone)]
pub struct Book {
    pub store: Store,
    pub ledger: Ledger,
    pub wagers: WagerEngine,
    pub settlement: Settlement,
    pub catalog: Catalog,
}

impl Book {
    /// Connect per the config and assemble the engines on the system clock.
    pub async fn open(config: &AppConfig) -> Result<Self> {
        let pool = store::connect(&config.database).await?;
        Ok(Self::new(pool, Arc::new(SystemClock), config))
    }

    /// Assemble over an existing pool with an injected clock.
    pub fn new(pool: SqlitePool, clock: SharedClock, config: &AppConfig) -> Self {
        Self {
            store: Store::new(pool.clone()),
            ledger: Ledger::new(
                pool.clone(),
                clock.clone(),
                config.book.default_currency.clone(),
            ),
            wagers: WagerEngine::new(pool.clone(), clock.clone()),
            settlement: Settlement::new(pool.clone(), clock.clone()),
            catalog: Catalog::new(pool, clock),
        }
    }
}
