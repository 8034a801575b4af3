//! Catalog administration — the data-entry side of the book.
//!
//! Events, markets and outcomes are created here by admin tooling; odds
//! and winners are assumed to come from an external process. Winner
//! pre-assignment (`assign_winner`) is what lets event-level settlement
//! run without per-market knowledge.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::clock::SharedClock;
use crate::error::{is_unique_violation, BookError, Result};
use crate::store;
use crate::types::{Event, EventStatus, Market, MarketKind, Outcome};

#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
    clock: SharedClock,
}

impl Catalog {
    pub fn new(pool: SqlitePool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }

    pub async fn create_event(
        &self,
        title: &str,
        start_time: DateTime<Utc>,
        description: &str,
    ) -> Result<Event> {
        let now = self.clock.now();
        let result = sqlx::query(
            "INSERT INTO events (title, start_time, status, description, created_at, updated_at)
             VALUES (?, ?, 'upcoming', ?, ?, ?)",
        )
        .bind(title)
        .bind(start_time.to_rfc3339())
        .bind(description)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let event = Event {
            id: result.last_insert_rowid(),
            title: title.to_string(),
            start_time,
            status: EventStatus::Upcoming,
            description: description.to_string(),
            external_id: None,
            created_at: now,
            updated_at: now,
        };
        info!(event_id = event.id, title, "Event created");
        Ok(event)
    }

    /// upcoming -> live. Any other starting status is an error.
    pub async fn mark_live(&self, event_id: i64) -> Result<Event> {
        let now = self.clock.now();
        let updated = sqlx::query(
            "UPDATE events SET status = 'live', updated_at = ? WHERE id = ? AND status = 'upcoming'",
        )
        .bind(now.to_rfc3339())
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM events WHERE id = ?")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Err(BookError::EventNotFound(event_id));
        };
        let event = store::map_event(&row)?;

        if updated.rows_affected() == 0 {
            return Err(BookError::InvalidTransition {
                from: event.status,
                to: EventStatus::Live,
            });
        }
        info!(event_id, "Event live");
        Ok(event)
    }

    pub async fn add_market(
        &self,
        event_id: i64,
        name: &str,
        kind: MarketKind,
        params: Option<serde_json::Value>,
    ) -> Result<Market> {
        // Surface a typed error rather than a foreign-key failure.
        let event = sqlx::query("SELECT id FROM events WHERE id = ?")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        if event.is_none() {
            return Err(BookError::EventNotFound(event_id));
        }

        let params_raw = params
            .as_ref()
            .map(|p| serde_json::to_string(p))
            .transpose()
            .map_err(|e| BookError::Storage(format!("bad market params: {e}")))?;

        let result = sqlx::query(
            "INSERT INTO markets (event_id, name, kind, params) VALUES (?, ?, ?, ?)",
        )
        .bind(event_id)
        .bind(name)
        .bind(kind.as_str())
        .bind(params_raw)
        .execute(&self.pool)
        .await;

        let result = match result {
            Ok(r) => r,
            Err(e) if is_unique_violation(&e) => {
                return Err(BookError::DuplicateName {
                    entity: "market",
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let market = Market {
            id: result.last_insert_rowid(),
            event_id,
            name: name.to_string(),
            kind,
            params,
            is_settled: false,
            settled_outcome_id: None,
        };
        info!(market_id = market.id, event_id, name, kind = %kind, "Market added");
        Ok(market)
    }

    pub async fn add_outcome(
        &self,
        market_id: i64,
        name: &str,
        decimal_odds: Decimal,
    ) -> Result<Outcome> {
        if decimal_odds <= Decimal::ZERO {
            return Err(BookError::InvalidOdds(decimal_odds));
        }
        let odds = decimal_odds.round_dp_with_strategy(3, RoundingStrategy::MidpointAwayFromZero);

        let row = sqlx::query("SELECT is_settled FROM markets WHERE id = ?")
            .bind(market_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Err(BookError::MarketNotFound(market_id));
        };
        if row.try_get::<i64, _>("is_settled")? != 0 {
            return Err(BookError::AlreadySettled {
                entity: "market",
                id: market_id,
            });
        }

        let result = sqlx::query(
            "INSERT INTO outcomes (market_id, name, decimal_odds) VALUES (?, ?, ?)",
        )
        .bind(market_id)
        .bind(name)
        .bind(odds.to_string())
        .execute(&self.pool)
        .await;

        let result = match result {
            Ok(r) => r,
            Err(e) if is_unique_violation(&e) => {
                return Err(BookError::DuplicateName {
                    entity: "outcome",
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let outcome = Outcome {
            id: result.last_insert_rowid(),
            market_id,
            name: name.to_string(),
            decimal_odds: odds,
            is_winner: false,
        };
        info!(outcome_id = outcome.id, market_id, name, odds = %odds, "Outcome added");
        Ok(outcome)
    }

    /// Pre-assign the winning outcome of an unsettled market, so
    /// event-level settlement can resolve it later. Refused once settled.
    pub async fn assign_winner(&self, market_id: i64, outcome_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT is_settled FROM markets WHERE id = ?")
            .bind(market_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(BookError::MarketNotFound(market_id));
        };
        if row.try_get::<i64, _>("is_settled")? != 0 {
            return Err(BookError::AlreadySettled {
                entity: "market",
                id: market_id,
            });
        }

        let belongs = sqlx::query("SELECT id FROM outcomes WHERE id = ? AND market_id = ?")
            .bind(outcome_id)
            .bind(market_id)
            .fetch_optional(&mut *tx)
            .await?;
        if belongs.is_none() {
            return Err(BookError::OutcomeNotFound(outcome_id));
        }

        sqlx::query("UPDATE markets SET settled_outcome_id = ? WHERE id = ? AND is_settled = 0")
            .bind(outcome_id)
            .bind(market_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(market_id, outcome_id, "Winner assigned");
        Ok(())
    }
}
