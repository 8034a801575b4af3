//! Wager engine — placement and per-wager settlement.
//!
//! Placement holds the stake and creates the wager in one transaction, so
//! a failure can never leave a debited-but-wagerless account. Settlement
//! is guarded on the open status: a wager transitions exactly once, and a
//! winning payout is credited in the same transaction as the transition.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::engine::ledger::{self, Direction};
use crate::error::{BookError, Result};
use crate::store;
use crate::types::{from_minor, quantize, to_minor, EntryKind, EventStatus, Wager, WagerStatus};

#[derive(Clone)]
pub struct WagerEngine {
    pool: SqlitePool,
    clock: SharedClock,
}

impl WagerEngine {
    pub fn new(pool: SqlitePool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }

    /// Place a stake on an outcome. The potential payout is computed from
    /// the outcome's odds at this moment and never recomputed.
    pub async fn place_wager(
        &self,
        account_id: i64,
        outcome_id: i64,
        stake: Decimal,
    ) -> Result<Wager> {
        let stake = quantize(stake);
        if stake <= Decimal::ZERO {
            return Err(BookError::InvalidStake(stake));
        }
        let stake_minor = to_minor(stake).ok_or(BookError::InvalidStake(stake))?;
        let now = self.clock.now();

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT o.id, o.market_id, o.name, o.decimal_odds, o.is_winner,
                    m.is_settled, e.id AS event_id, e.status AS event_status
             FROM outcomes o
             JOIN markets m ON m.id = o.market_id
             JOIN events e ON e.id = m.event_id
             WHERE o.id = ?",
        )
        .bind(outcome_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Err(BookError::OutcomeNotFound(outcome_id));
        };
        let outcome = store::map_outcome(&row)?;
        if row.try_get::<i64, _>("is_settled")? != 0 {
            return Err(BookError::AlreadySettled {
                entity: "market",
                id: outcome.market_id,
            });
        }
        // A terminal event closes its markets to new money even when the
        // individual market row was never flipped (late-added markets).
        let event_status: EventStatus = row.try_get::<String, _>("event_status")?.parse()?;
        if !event_status.is_active() {
            return Err(BookError::EventClosed {
                id: row.try_get("event_id")?,
                status: event_status,
            });
        }

        let payout = outcome.potential_payout(stake);
        let payout_minor = to_minor(payout).ok_or(BookError::InvalidStake(stake))?;

        // Hold the stake; the conditional debit enforces stake <= balance.
        let reference = ledger::synthesize_reference(EntryKind::StakeHold, now);
        ledger::apply_tx(
            &mut tx,
            account_id,
            stake_minor,
            EntryKind::StakeHold,
            &reference,
            Direction::Debit,
            now,
        )
        .await?;

        let inserted = sqlx::query(
            "INSERT INTO wagers (account_id, outcome_id, stake_minor, potential_payout_minor, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, 'open', ?, ?)",
        )
        .bind(account_id)
        .bind(outcome_id)
        .bind(stake_minor)
        .bind(payout_minor)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let wager = Wager {
            id: inserted.last_insert_rowid(),
            account_id,
            outcome_id,
            stake,
            potential_payout: payout,
            status: WagerStatus::Open,
            created_at: now,
            updated_at: now,
        };
        info!(
            wager_id = wager.id,
            account_id,
            outcome_id,
            stake = %stake,
            payout = %payout,
            "Wager placed"
        );
        Ok(wager)
    }

    /// Settle a single wager. Returns `true` if the wager transitioned,
    /// `false` if it was no longer open (idempotent guard).
    pub async fn settle_wager(&self, wager_id: i64, won: bool) -> Result<bool> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let changed = settle_wager_tx(&mut tx, wager_id, won, now).await?;
        tx.commit().await?;
        Ok(changed)
    }
}

/// Transition a wager open -> won/lost inside an existing transaction,
/// crediting the fixed payout when won. The payout reference is derived
/// from the wager id, so a retried cascade can never pay twice.
pub(crate) async fn settle_wager_tx(
    tx: &mut Transaction<'_, Sqlite>,
    wager_id: i64,
    won: bool,
    now: DateTime<Utc>,
) -> Result<bool> {
    let row = sqlx::query("SELECT account_id, potential_payout_minor FROM wagers WHERE id = ?")
        .bind(wager_id)
        .fetch_optional(&mut **tx)
        .await?;
    let Some(row) = row else {
        return Err(BookError::WagerNotFound(wager_id));
    };
    let account_id: i64 = row.try_get("account_id")?;
    let payout_minor: i64 = row.try_get("potential_payout_minor")?;

    let status = if won { WagerStatus::Won } else { WagerStatus::Lost };
    let updated = sqlx::query("UPDATE wagers SET status = ?, updated_at = ? WHERE id = ? AND status = 'open'")
        .bind(status.as_str())
        .bind(now.to_rfc3339())
        .bind(wager_id)
        .execute(&mut **tx)
        .await?;
    if updated.rows_affected() == 0 {
        return Ok(false);
    }

    if won {
        let reference = format!("PAY-W{wager_id}");
        ledger::apply_tx(
            tx,
            account_id,
            payout_minor,
            EntryKind::Payout,
            &reference,
            Direction::Credit,
            now,
        )
        .await?;
    }

    debug!(wager_id, won, payout = %from_minor(payout_minor), "Wager settled");
    Ok(true)
}
