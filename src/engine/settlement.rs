//! Settlement orchestration — the Event -> Market -> Outcome -> Wager cascade.
//!
//! Expressed as explicit orchestration over entity ids rather than objects
//! calling siblings, with one transaction per externally visible operation:
//! settling a market is atomic over the market, its outcomes and their open
//! wagers; settling an event is all-or-nothing over every market it owns.
//!
//! Policy (applied consistently): settling an already-settled market or
//! event is a silent no-op; the report's `already_settled` flag says so.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::fmt;
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::engine::ledger::{self, Direction};
use crate::engine::wagers::settle_wager_tx;
use crate::error::{BookError, Result};
use crate::types::{from_minor, EntryKind, EventStatus};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// What a market settlement did.
#[derive(Debug, Clone, Serialize)]
pub struct MarketSettlement {
    pub market_id: i64,
    pub winning_outcome_id: Option<i64>,
    pub already_settled: bool,
    pub wagers_won: usize,
    pub wagers_lost: usize,
    pub total_paid: Decimal,
}

impl MarketSettlement {
    fn noop(market_id: i64, winning_outcome_id: Option<i64>) -> Self {
        Self {
            market_id,
            winning_outcome_id,
            already_settled: true,
            wagers_won: 0,
            wagers_lost: 0,
            total_paid: Decimal::ZERO,
        }
    }
}

impl fmt::Display for MarketSettlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.already_settled {
            write!(f, "market {}: already settled", self.market_id)
        } else {
            write!(
                f,
                "market {}: winner {:?}, {} won / {} lost, paid {}",
                self.market_id,
                self.winning_outcome_id,
                self.wagers_won,
                self.wagers_lost,
                self.total_paid,
            )
        }
    }
}

/// What an event settlement did across its markets.
#[derive(Debug, Clone, Serialize)]
pub struct EventSettlement {
    pub event_id: i64,
    pub already_settled: bool,
    pub markets: Vec<MarketSettlement>,
}

impl EventSettlement {
    pub fn wagers_won(&self) -> usize {
        self.markets.iter().map(|m| m.wagers_won).sum()
    }

    pub fn wagers_lost(&self) -> usize {
        self.markets.iter().map(|m| m.wagers_lost).sum()
    }

    pub fn total_paid(&self) -> Decimal {
        self.markets.iter().map(|m| m.total_paid).sum()
    }
}

impl fmt::Display for EventSettlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.already_settled {
            write!(f, "event {}: already settled", self.event_id)
        } else {
            write!(
                f,
                "event {}: {} markets, {} won / {} lost, paid {}",
                self.event_id,
                self.markets.len(),
                self.wagers_won(),
                self.wagers_lost(),
                self.total_paid(),
            )
        }
    }
}

/// What an event cancellation refunded.
#[derive(Debug, Clone, Serialize)]
pub struct EventCancellation {
    pub event_id: i64,
    pub already_cancelled: bool,
    pub wagers_refunded: usize,
    pub total_refunded: Decimal,
}

impl fmt::Display for EventCancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.already_cancelled {
            write!(f, "event {}: already cancelled", self.event_id)
        } else {
            write!(
                f,
                "event {}: cancelled, {} wagers refunded ({})",
                self.event_id, self.wagers_refunded, self.total_refunded,
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Settlement service
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Settlement {
    pool: SqlitePool,
    clock: SharedClock,
}

impl Settlement {
    pub fn new(pool: SqlitePool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }

    /// Settle one market: resolve the winner, mark every outcome, settle
    /// every open wager. Atomic over the market.
    pub async fn settle_market(
        &self,
        market_id: i64,
        winning_outcome_id: Option<i64>,
    ) -> Result<MarketSettlement> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let report = settle_market_tx(&mut tx, market_id, winning_outcome_id, now).await?;
        tx.commit().await?;

        if report.already_settled {
            debug!(market_id, "Market already settled; nothing to do");
        } else {
            info!(
                market_id,
                winner = ?report.winning_outcome_id,
                won = report.wagers_won,
                lost = report.wagers_lost,
                paid = %report.total_paid,
                "Market settled"
            );
        }
        Ok(report)
    }

    /// Settle an event and every market it owns, all-or-nothing. Every
    /// unsettled market must already have an assigned winner; the check
    /// runs before any row is touched (fail-fast).
    pub async fn settle_event(&self, event_id: i64) -> Result<EventSettlement> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        match event_status_tx(&mut tx, event_id).await? {
            EventStatus::Settled => {
                return Ok(EventSettlement {
                    event_id,
                    already_settled: true,
                    markets: Vec::new(),
                })
            }
            EventStatus::Cancelled => {
                return Err(BookError::InvalidTransition {
                    from: EventStatus::Cancelled,
                    to: EventStatus::Settled,
                })
            }
            EventStatus::Upcoming | EventStatus::Live => {}
        }

        let missing = sqlx::query(
            "SELECT id FROM markets
             WHERE event_id = ? AND is_settled = 0 AND settled_outcome_id IS NULL
             ORDER BY id LIMIT 1",
        )
        .bind(event_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = missing {
            return Err(BookError::NoOutcomeSpecified {
                market_id: row.try_get("id")?,
            });
        }

        sqlx::query(
            "UPDATE events SET status = 'settled', updated_at = ?
             WHERE id = ? AND status IN ('upcoming', 'live')",
        )
        .bind(now.to_rfc3339())
        .bind(event_id)
        .execute(&mut *tx)
        .await?;

        let market_ids: Vec<i64> = sqlx::query("SELECT id FROM markets WHERE event_id = ? ORDER BY id")
            .bind(event_id)
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|r| r.try_get("id"))
            .collect::<std::result::Result<_, sqlx::Error>>()?;

        let mut markets = Vec::with_capacity(market_ids.len());
        for market_id in market_ids {
            markets.push(settle_market_tx(&mut tx, market_id, None, now).await?);
        }

        tx.commit().await?;

        let report = EventSettlement {
            event_id,
            already_settled: false,
            markets,
        };
        info!(
            event_id,
            markets = report.markets.len(),
            won = report.wagers_won(),
            lost = report.wagers_lost(),
            paid = %report.total_paid(),
            "Event settled"
        );
        Ok(report)
    }

    /// Cancel an event: void every open wager on its markets and release
    /// the stakes back to their accounts, in one transaction.
    pub async fn cancel_event(&self, event_id: i64) -> Result<EventCancellation> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        match event_status_tx(&mut tx, event_id).await? {
            EventStatus::Cancelled => {
                return Ok(EventCancellation {
                    event_id,
                    already_cancelled: true,
                    wagers_refunded: 0,
                    total_refunded: Decimal::ZERO,
                })
            }
            EventStatus::Settled => {
                return Err(BookError::InvalidTransition {
                    from: EventStatus::Settled,
                    to: EventStatus::Cancelled,
                })
            }
            EventStatus::Upcoming | EventStatus::Live => {}
        }

        sqlx::query(
            "UPDATE events SET status = 'cancelled', updated_at = ?
             WHERE id = ? AND status IN ('upcoming', 'live')",
        )
        .bind(now.to_rfc3339())
        .bind(event_id)
        .execute(&mut *tx)
        .await?;

        let open_wagers: Vec<(i64, i64, i64)> = sqlx::query(
            "SELECT w.id, w.account_id, w.stake_minor
             FROM wagers w
             JOIN outcomes o ON o.id = w.outcome_id
             JOIN markets m ON m.id = o.market_id
             WHERE m.event_id = ? AND w.status = 'open'
             ORDER BY w.id",
        )
        .bind(event_id)
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(|r| {
            Ok((
                r.try_get("id")?,
                r.try_get("account_id")?,
                r.try_get("stake_minor")?,
            ))
        })
        .collect::<std::result::Result<_, sqlx::Error>>()?;

        let mut refunded = 0usize;
        let mut total_minor = 0i64;
        for (wager_id, account_id, stake_minor) in open_wagers {
            let voided = sqlx::query(
                "UPDATE wagers SET status = 'cancelled', updated_at = ?
                 WHERE id = ? AND status = 'open'",
            )
            .bind(now.to_rfc3339())
            .bind(wager_id)
            .execute(&mut *tx)
            .await?;
            if voided.rows_affected() == 0 {
                continue;
            }
            let reference = format!("RLS-W{wager_id}");
            ledger::apply_tx(
                &mut tx,
                account_id,
                stake_minor,
                EntryKind::StakeRelease,
                &reference,
                Direction::Credit,
                now,
            )
            .await?;
            refunded += 1;
            total_minor += stake_minor;
        }

        tx.commit().await?;

        let report = EventCancellation {
            event_id,
            already_cancelled: false,
            wagers_refunded: refunded,
            total_refunded: from_minor(total_minor),
        };
        info!(
            event_id,
            refunded = report.wagers_refunded,
            total = %report.total_refunded,
            "Event cancelled"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Transaction-scoped steps
// ---------------------------------------------------------------------------

async fn event_status_tx(
    tx: &mut Transaction<'_, Sqlite>,
    event_id: i64,
) -> Result<EventStatus> {
    let row = sqlx::query("SELECT status FROM events WHERE id = ?")
        .bind(event_id)
        .fetch_optional(&mut **tx)
        .await?;
    match row {
        Some(r) => r.try_get::<String, _>("status")?.parse(),
        None => Err(BookError::EventNotFound(event_id)),
    }
}

/// Settle one market inside an existing transaction. Shared by direct
/// market settlement and the event cascade.
pub(crate) async fn settle_market_tx(
    tx: &mut Transaction<'_, Sqlite>,
    market_id: i64,
    winning_outcome_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<MarketSettlement> {
    let row = sqlx::query("SELECT is_settled, settled_outcome_id FROM markets WHERE id = ?")
        .bind(market_id)
        .fetch_optional(&mut **tx)
        .await?;
    let Some(row) = row else {
        return Err(BookError::MarketNotFound(market_id));
    };
    let stored_winner: Option<i64> = row.try_get("settled_outcome_id")?;
    if row.try_get::<i64, _>("is_settled")? != 0 {
        return Ok(MarketSettlement::noop(market_id, stored_winner));
    }

    let winner_id = match winning_outcome_id {
        Some(id) => {
            let belongs = sqlx::query("SELECT id FROM outcomes WHERE id = ? AND market_id = ?")
                .bind(id)
                .bind(market_id)
                .fetch_optional(&mut **tx)
                .await?;
            if belongs.is_none() {
                return Err(BookError::OutcomeNotFound(id));
            }
            id
        }
        None => stored_winner.ok_or(BookError::NoOutcomeSpecified { market_id })?,
    };

    // Guarded flip: a settlement that lost the race becomes a no-op.
    let updated = sqlx::query(
        "UPDATE markets SET is_settled = 1, settled_outcome_id = ? WHERE id = ? AND is_settled = 0",
    )
    .bind(winner_id)
    .bind(market_id)
    .execute(&mut **tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Ok(MarketSettlement::noop(market_id, stored_winner));
    }

    let outcome_ids: Vec<i64> = sqlx::query("SELECT id FROM outcomes WHERE market_id = ? ORDER BY id")
        .bind(market_id)
        .fetch_all(&mut **tx)
        .await?
        .iter()
        .map(|r| r.try_get("id"))
        .collect::<std::result::Result<_, sqlx::Error>>()?;

    let mut wagers_won = 0usize;
    let mut wagers_lost = 0usize;
    let mut paid_minor = 0i64;

    for outcome_id in outcome_ids {
        let is_winner = outcome_id == winner_id;
        sqlx::query("UPDATE outcomes SET is_winner = ? WHERE id = ?")
            .bind(is_winner as i64)
            .bind(outcome_id)
            .execute(&mut **tx)
            .await?;

        let open: Vec<(i64, i64)> = sqlx::query(
            "SELECT id, potential_payout_minor FROM wagers
             WHERE outcome_id = ? AND status = 'open' ORDER BY id",
        )
        .bind(outcome_id)
        .fetch_all(&mut **tx)
        .await?
        .iter()
        .map(|r| Ok((r.try_get("id")?, r.try_get("potential_payout_minor")?)))
        .collect::<std::result::Result<_, sqlx::Error>>()?;

        for (wager_id, payout_minor) in open {
            if settle_wager_tx(tx, wager_id, is_winner, now).await? {
                if is_winner {
                    wagers_won += 1;
                    paid_minor += payout_minor;
                } else {
                    wagers_lost += 1;
                }
            }
        }
    }

    Ok(MarketSettlement {
        market_id,
        winning_outcome_id: Some(winner_id),
        already_settled: false,
        wagers_won,
        wagers_lost,
        total_paid: from_minor(paid_minor),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
