//! SQLite persistence.
//!
//! Pool bootstrap (WAL, bounded busy waits, foreign keys, schema), row
//! mapping, and the read side: queries the request layer needs that never
//! mutate state. All writes live in the engine modules, each inside its
//! own transaction.
//!
//! Monetary columns are integer minor units so balance updates can be
//! single conditional statements; odds are stored as text and parsed into
//! `Decimal`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::{BookError, Result};
use crate::types::{
    from_minor, Account, EntryKind, Event, EventStatus, LedgerEntry, Market, MarketKind, Outcome,
    Wager, WagerStatus,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id       TEXT    NOT NULL UNIQUE,
    balance_minor INTEGER NOT NULL DEFAULT 0 CHECK (balance_minor >= 0),
    currency      TEXT    NOT NULL,
    is_verified   INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT    NOT NULL,
    updated_at    TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS ledger_entries (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id   INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    kind         TEXT    NOT NULL,
    amount_minor INTEGER NOT NULL,
    reference    TEXT    NOT NULL UNIQUE,
    created_at   TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entries_account ON ledger_entries(account_id);

CREATE TABLE IF NOT EXISTS events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    title       TEXT    NOT NULL,
    start_time  TEXT    NOT NULL,
    status      TEXT    NOT NULL DEFAULT 'upcoming',
    description TEXT    NOT NULL DEFAULT '',
    external_id TEXT,
    created_at  TEXT    NOT NULL,
    updated_at  TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_status ON events(status, start_time);

CREATE TABLE IF NOT EXISTS markets (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id           INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
    name               TEXT    NOT NULL,
    kind               TEXT    NOT NULL DEFAULT 'custom',
    params             TEXT,
    is_settled         INTEGER NOT NULL DEFAULT 0,
    settled_outcome_id INTEGER REFERENCES outcomes(id) ON DELETE SET NULL,
    UNIQUE (event_id, name)
);

CREATE TABLE IF NOT EXISTS outcomes (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    market_id    INTEGER NOT NULL REFERENCES markets(id) ON DELETE CASCADE,
    name         TEXT    NOT NULL,
    decimal_odds TEXT    NOT NULL,
    is_winner    INTEGER NOT NULL DEFAULT 0,
    UNIQUE (market_id, name)
);

CREATE TABLE IF NOT EXISTS wagers (
    id                     INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id             INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    outcome_id             INTEGER NOT NULL REFERENCES outcomes(id) ON DELETE CASCADE,
    stake_minor            INTEGER NOT NULL CHECK (stake_minor > 0),
    potential_payout_minor INTEGER NOT NULL,
    status                 TEXT    NOT NULL DEFAULT 'open',
    created_at             TEXT    NOT NULL,
    updated_at             TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_wagers_outcome_status ON wagers(outcome_id, status);
CREATE INDEX IF NOT EXISTS idx_wagers_account ON wagers(account_id);
"#;

/// Open (or create) the database and bootstrap the schema.
pub async fn connect(cfg: &DatabaseConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&cfg.url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(cfg.busy_timeout_ms))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(cfg.max_connections)
        .connect_with(options)
        .await?;

    sqlx::raw_sql(SCHEMA).execute(&pool).await?;
    info!(url = %cfg.url, "Database ready");
    Ok(pool)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| BookError::Storage(format!("bad timestamp {raw:?}: {e}")))
}

pub(crate) fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| BookError::Storage(format!("bad decimal {raw:?}: {e}")))
}

pub(crate) fn map_account(row: &SqliteRow) -> Result<Account> {
    Ok(Account {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        balance: from_minor(row.try_get("balance_minor")?),
        currency: row.try_get("currency")?,
        is_verified: row.try_get::<i64, _>("is_verified")? != 0,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

pub(crate) fn map_entry(row: &SqliteRow) -> Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        kind: row.try_get::<String, _>("kind")?.parse::<EntryKind>()?,
        amount: from_minor(row.try_get("amount_minor")?),
        reference: row.try_get("reference")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

pub(crate) fn map_event(row: &SqliteRow) -> Result<Event> {
    Ok(Event {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        start_time: parse_timestamp(&row.try_get::<String, _>("start_time")?)?,
        status: row.try_get::<String, _>("status")?.parse::<EventStatus>()?,
        description: row.try_get("description")?,
        external_id: row.try_get("external_id")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

pub(crate) fn map_market(row: &SqliteRow) -> Result<Market> {
    let params = match row.try_get::<Option<String>, _>("params")? {
        Some(raw) => Some(
            serde_json::from_str(&raw)
                .map_err(|e| BookError::Storage(format!("bad market params: {e}")))?,
        ),
        None => None,
    };
    Ok(Market {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        name: row.try_get("name")?,
        kind: row.try_get::<String, _>("kind")?.parse::<MarketKind>()?,
        params,
        is_settled: row.try_get::<i64, _>("is_settled")? != 0,
        settled_outcome_id: row.try_get("settled_outcome_id")?,
    })
}

pub(crate) fn map_outcome(row: &SqliteRow) -> Result<Outcome> {
    Ok(Outcome {
        id: row.try_get("id")?,
        market_id: row.try_get("market_id")?,
        name: row.try_get("name")?,
        decimal_odds: parse_decimal(&row.try_get::<String, _>("decimal_odds")?)?,
        is_winner: row.try_get::<i64, _>("is_winner")? != 0,
    })
}

pub(crate) fn map_wager(row: &SqliteRow) -> Result<Wager> {
    Ok(Wager {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        outcome_id: row.try_get("outcome_id")?,
        stake: from_minor(row.try_get("stake_minor")?),
        potential_payout: from_minor(row.try_get("potential_payout_minor")?),
        status: row.try_get::<String, _>("status")?.parse::<WagerStatus>()?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

// ---------------------------------------------------------------------------
// Read-side queries
// ---------------------------------------------------------------------------

/// Read-only access to persisted state.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn account(&self, id: i64) -> Result<Account> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(map_account)
            .transpose()?
            .ok_or(BookError::AccountNotFound(id))
    }

    pub async fn account_by_user(&self, user_id: &str) -> Result<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_account).transpose()
    }

    pub async fn event(&self, id: i64) -> Result<Event> {
        let row = sqlx::query("SELECT * FROM events WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(map_event)
            .transpose()?
            .ok_or(BookError::EventNotFound(id))
    }

    pub async fn market(&self, id: i64) -> Result<Market> {
        let row = sqlx::query("SELECT * FROM markets WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(map_market)
            .transpose()?
            .ok_or(BookError::MarketNotFound(id))
    }

    pub async fn outcome(&self, id: i64) -> Result<Outcome> {
        let row = sqlx::query("SELECT * FROM outcomes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(map_outcome)
            .transpose()?
            .ok_or(BookError::OutcomeNotFound(id))
    }

    pub async fn wager(&self, id: i64) -> Result<Wager> {
        let row = sqlx::query("SELECT * FROM wagers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(map_wager)
            .transpose()?
            .ok_or(BookError::WagerNotFound(id))
    }

    /// Upcoming and live events, soonest first.
    pub async fn active_events(&self) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            "SELECT * FROM events WHERE status IN ('upcoming', 'live') ORDER BY start_time",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_event).collect()
    }

    pub async fn markets_for_event(&self, event_id: i64) -> Result<Vec<Market>> {
        let rows = sqlx::query("SELECT * FROM markets WHERE event_id = ? ORDER BY id")
            .bind(event_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_market).collect()
    }

    pub async fn outcomes_for_market(&self, market_id: i64) -> Result<Vec<Outcome>> {
        let rows = sqlx::query("SELECT * FROM outcomes WHERE market_id = ? ORDER BY id")
            .bind(market_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_outcome).collect()
    }

    /// An account's wagers, newest first.
    pub async fn wagers_for_account(&self, account_id: i64) -> Result<Vec<Wager>> {
        let rows = sqlx::query(
            "SELECT * FROM wagers WHERE account_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_wager).collect()
    }

    /// An account's ledger entries, newest first.
    pub async fn entries_for_account(&self, account_id: i64) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM ledger_entries WHERE account_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_entry).collect()
    }

    /// Sum of signed entry amounts for an account. The reconciliation
    /// invariant: this always equals the stored balance.
    pub async fn ledger_sum(&self, account_id: i64) -> Result<Decimal> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount_minor), 0) AS total FROM ledger_entries WHERE account_id = ?",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(from_minor(row.try_get("total")?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    fn temp_db_config() -> DatabaseConfig {
        let mut path = std::env::temp_dir();
        path.push(format!("wagerbook_store_{}.db", uuid::Uuid::new_v4()));
        DatabaseConfig {
            url: format!("sqlite://{}", path.display()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_connect_bootstraps_schema() {
        let pool = connect(&temp_db_config()).await.unwrap();
        // Schema bootstrap is idempotent
        sqlx::raw_sql(SCHEMA).execute(&pool).await.unwrap();

        let store = Store::new(pool);
        assert!(store.active_events().await.unwrap().is_empty());
        assert!(matches!(
            store.account(1).await,
            Err(BookError::AccountNotFound(1))
        ));
    }

    #[tokio::test]
    async fn test_active_events_ordering_and_filter() {
        let pool = connect(&temp_db_config()).await.unwrap();
        let now = Utc::now().to_rfc3339();
        for (title, start, status) in [
            ("late", "2026-09-02T18:00:00+00:00", "upcoming"),
            ("early", "2026-09-01T12:00:00+00:00", "live"),
            ("done", "2026-08-01T12:00:00+00:00", "settled"),
        ] {
            sqlx::query(
                "INSERT INTO events (title, start_time, status, description, created_at, updated_at)
                 VALUES (?, ?, ?, '', ?, ?)",
            )
            .bind(title)
            .bind(start)
            .bind(status)
            .bind(&now)
            .bind(&now)
            .execute(&pool)
            .await
            .unwrap();
        }

        let store = Store::new(pool);
        let events = store.active_events().await.unwrap();
        let titles: Vec<_> = events.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["early", "late"]);
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("2026-08-25T10:00:00+00:00").is_ok());
        assert!(parse_timestamp("not-a-time").is_err());
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("2.500").unwrap().to_string(), "2.500");
        assert!(parse_decimal("two-point-five").is_err());
    }
}
