//! Ledger — account provisioning and atomic balance movement.
//!
//! Every credit or debit is one transaction containing exactly two writes:
//! a conditional balance update and an entry insert. The debit's balance
//! floor is part of the UPDATE itself, so two debits racing for the same
//! funds can never both pass the check.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::error::{is_unique_violation, BookError, Result};
use crate::types::{from_minor, quantize, to_minor, Account, EntryKind, LedgerEntry};

/// Which way money moves relative to the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Credit,
    Debit,
}

#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
    clock: SharedClock,
    default_currency: String,
}

impl Ledger {
    pub fn new(pool: SqlitePool, clock: SharedClock, default_currency: String) -> Self {
        Self {
            pool,
            clock,
            default_currency,
        }
    }

    /// Create a zero-balance account in the default currency.
    pub async fn create_account(&self, user_id: &str) -> Result<Account> {
        let now = self.clock.now();
        let result = sqlx::query(
            "INSERT INTO accounts (user_id, balance_minor, currency, is_verified, created_at, updated_at)
             VALUES (?, 0, ?, 0, ?, ?)",
        )
        .bind(user_id)
        .bind(&self.default_currency)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await;

        let result = match result {
            Ok(r) => r,
            Err(e) if is_unique_violation(&e) => {
                return Err(BookError::DuplicateName {
                    entity: "account",
                    name: user_id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let account = Account {
            id: result.last_insert_rowid(),
            user_id: user_id.to_string(),
            balance: Decimal::ZERO,
            currency: self.default_currency.clone(),
            is_verified: false,
            created_at: now,
            updated_at: now,
        };
        info!(account_id = account.id, user_id, "Account created");
        Ok(account)
    }

    /// Increase an account's balance. Fails `InvalidAmount` on non-positive
    /// amounts, `DuplicateReference` on a reference collision.
    pub async fn credit(
        &self,
        account_id: i64,
        amount: Decimal,
        kind: EntryKind,
        reference: Option<&str>,
    ) -> Result<LedgerEntry> {
        self.apply(account_id, amount, kind, reference, Direction::Credit)
            .await
    }

    /// Decrease an account's balance. Same validation as `credit`, plus
    /// `InsufficientBalance` when the amount exceeds the current balance.
    pub async fn debit(
        &self,
        account_id: i64,
        amount: Decimal,
        kind: EntryKind,
        reference: Option<&str>,
    ) -> Result<LedgerEntry> {
        self.apply(account_id, amount, kind, reference, Direction::Debit)
            .await
    }

    async fn apply(
        &self,
        account_id: i64,
        amount: Decimal,
        kind: EntryKind,
        reference: Option<&str>,
        direction: Direction,
    ) -> Result<LedgerEntry> {
        let minor = validate_amount(amount)?;
        let now = self.clock.now();
        let reference = match reference {
            Some(r) => r.to_string(),
            None => synthesize_reference(kind, now),
        };

        let mut tx = self.pool.begin().await?;
        let entry = apply_tx(&mut tx, account_id, minor, kind, &reference, direction, now).await?;
        tx.commit().await?;

        debug!(
            account_id,
            kind = %kind,
            amount = %entry.amount,
            reference = %entry.reference,
            "Ledger entry applied"
        );
        Ok(entry)
    }
}

/// Validate and quantize an amount, returning minor units.
pub(crate) fn validate_amount(amount: Decimal) -> Result<i64> {
    let quantized = quantize(amount);
    if quantized <= Decimal::ZERO {
        return Err(BookError::InvalidAmount(amount));
    }
    to_minor(quantized).ok_or(BookError::InvalidAmount(amount))
}

/// `<KIND-PREFIX>-<timestamp>-<nonce>`, nanosecond resolution from the
/// injected clock. The nonce keeps two same-kind movements in the same
/// clock instant from colliding on the unique reference column.
pub(crate) fn synthesize_reference(kind: EntryKind, now: DateTime<Utc>) -> String {
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}",
        kind.reference_prefix(),
        now.format("%Y%m%d%H%M%S%f"),
        &nonce[..6],
    )
}

/// Apply a balance movement inside an existing transaction. Used directly
/// by the ledger and reused by wager placement and settlement so the
/// movement commits or rolls back with the surrounding operation.
pub(crate) async fn apply_tx(
    tx: &mut Transaction<'_, Sqlite>,
    account_id: i64,
    minor: i64,
    kind: EntryKind,
    reference: &str,
    direction: Direction,
    now: DateTime<Utc>,
) -> Result<LedgerEntry> {
    let updated = match direction {
        Direction::Credit => {
            sqlx::query("UPDATE accounts SET balance_minor = balance_minor + ?, updated_at = ? WHERE id = ?")
                .bind(minor)
                .bind(now.to_rfc3339())
                .bind(account_id)
                .execute(&mut **tx)
                .await?
        }
        Direction::Debit => {
            // Conditional decrement: the floor check and the subtraction are
            // one statement, never check-then-act.
            sqlx::query(
                "UPDATE accounts SET balance_minor = balance_minor - ?, updated_at = ?
                 WHERE id = ? AND balance_minor >= ?",
            )
            .bind(minor)
            .bind(now.to_rfc3339())
            .bind(account_id)
            .bind(minor)
            .execute(&mut **tx)
            .await?
        }
    };

    if updated.rows_affected() == 0 {
        let row = sqlx::query("SELECT balance_minor FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&mut **tx)
            .await?;
        return Err(match row {
            Some(r) => BookError::InsufficientBalance {
                needed: from_minor(minor),
                available: from_minor(r.try_get::<i64, _>("balance_minor")?),
            },
            None => BookError::AccountNotFound(account_id),
        });
    }

    let signed = match direction {
        Direction::Credit => minor,
        Direction::Debit => -minor,
    };
    let inserted = sqlx::query(
        "INSERT INTO ledger_entries (account_id, kind, amount_minor, reference, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(account_id)
    .bind(kind.as_str())
    .bind(signed)
    .bind(reference)
    .bind(now.to_rfc3339())
    .execute(&mut **tx)
    .await;

    let inserted = match inserted {
        Ok(r) => r,
        Err(e) if is_unique_violation(&e) => {
            return Err(BookError::DuplicateReference(reference.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    Ok(LedgerEntry {
        id: inserted.last_insert_rowid(),
        account_id,
        kind,
        amount: from_minor(signed),
        reference: reference.to_string(),
        created_at: now,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
