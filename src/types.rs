//! Domain model for the wagering ledger.
//!
//! These types are shared by the store and every engine module. Monetary
//! values are `rust_decimal::Decimal` quantized to two places; the store
//! keeps them as integer minor units, so no floating point ever touches
//! the money path.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::BookError;

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// Quantize a monetary value to two decimal places, round-half-up.
pub fn quantize(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert a quantized amount to integer minor units (cents).
/// Returns `None` if the value does not fit an `i64`.
pub fn to_minor(amount: Decimal) -> Option<i64> {
    (quantize(amount) * Decimal::ONE_HUNDRED).to_i64()
}

/// Convert integer minor units back to a two-place decimal.
pub fn from_minor(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Kind of balance-affecting ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Deposit,
    Withdrawal,
    Payout,
    Refund,
    StakeHold,
    StakeRelease,
}

impl EntryKind {
    pub const ALL: &'static [EntryKind] = &[
        EntryKind::Deposit,
        EntryKind::Withdrawal,
        EntryKind::Payout,
        EntryKind::Refund,
        EntryKind::StakeHold,
        EntryKind::StakeRelease,
    ];

    /// Storage token.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Deposit => "deposit",
            EntryKind::Withdrawal => "withdrawal",
            EntryKind::Payout => "payout",
            EntryKind::Refund => "refund",
            EntryKind::StakeHold => "stake_hold",
            EntryKind::StakeRelease => "stake_release",
        }
    }

    /// Prefix used when a ledger reference is synthesized.
    pub fn reference_prefix(&self) -> &'static str {
        match self {
            EntryKind::Deposit => "DEP",
            EntryKind::Withdrawal => "WDL",
            EntryKind::Payout => "PAY",
            EntryKind::Refund => "RFD",
            EntryKind::StakeHold => "STK",
            EntryKind::StakeRelease => "RLS",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntryKind {
    type Err = BookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(EntryKind::Deposit),
            "withdrawal" => Ok(EntryKind::Withdrawal),
            "payout" => Ok(EntryKind::Payout),
            "refund" => Ok(EntryKind::Refund),
            "stake_hold" => Ok(EntryKind::StakeHold),
            "stake_release" => Ok(EntryKind::StakeRelease),
            other => Err(BookError::Storage(format!("unknown entry kind: {other}"))),
        }
    }
}

/// Event lifecycle status. Settled and cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Upcoming,
    Live,
    Settled,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Upcoming => "upcoming",
            EventStatus::Live => "live",
            EventStatus::Settled => "settled",
            EventStatus::Cancelled => "cancelled",
        }
    }

    /// Whether wagering activity is still possible.
    pub fn is_active(&self) -> bool {
        matches!(self, EventStatus::Upcoming | EventStatus::Live)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventStatus {
    type Err = BookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upcoming" => Ok(EventStatus::Upcoming),
            "live" => Ok(EventStatus::Live),
            "settled" => Ok(EventStatus::Settled),
            "cancelled" => Ok(EventStatus::Cancelled),
            other => Err(BookError::Storage(format!("unknown event status: {other}"))),
        }
    }
}

/// Betting market type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    WinDrawWin,
    OverUnder,
    Moneyline,
    Spread,
    Custom,
}

impl MarketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketKind::WinDrawWin => "win_draw_win",
            MarketKind::OverUnder => "over_under",
            MarketKind::Moneyline => "moneyline",
            MarketKind::Spread => "spread",
            MarketKind::Custom => "custom",
        }
    }

    /// Human label, as a punter would read it.
    pub fn label(&self) -> &'static str {
        match self {
            MarketKind::WinDrawWin => "1X2",
            MarketKind::OverUnder => "Over/Under",
            MarketKind::Moneyline => "Moneyline",
            MarketKind::Spread => "Spread",
            MarketKind::Custom => "Custom",
        }
    }
}

impl fmt::Display for MarketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for MarketKind {
    type Err = BookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "win_draw_win" => Ok(MarketKind::WinDrawWin),
            "over_under" => Ok(MarketKind::OverUnder),
            "moneyline" => Ok(MarketKind::Moneyline),
            "spread" => Ok(MarketKind::Spread),
            "custom" => Ok(MarketKind::Custom),
            other => Err(BookError::Storage(format!("unknown market kind: {other}"))),
        }
    }
}

/// Wager status. Transitions only open -> {won, lost, cancelled}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WagerStatus {
    Open,
    Won,
    Lost,
    Cancelled,
    Pending,
}

impl WagerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WagerStatus::Open => "open",
            WagerStatus::Won => "won",
            WagerStatus::Lost => "lost",
            WagerStatus::Cancelled => "cancelled",
            WagerStatus::Pending => "pending",
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, WagerStatus::Won | WagerStatus::Lost | WagerStatus::Cancelled)
    }
}

impl fmt::Display for WagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WagerStatus {
    type Err = BookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(WagerStatus::Open),
            "won" => Ok(WagerStatus::Won),
            "lost" => Ok(WagerStatus::Lost),
            "cancelled" => Ok(WagerStatus::Cancelled),
            "pending" => Ok(WagerStatus::Pending),
            other => Err(BookError::Storage(format!("unknown wager status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Ledger-bearing identity for a user. Balance is mutated only through
/// ledger operations and always equals the sum of the account's entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub user_id: String,
    pub balance: Decimal,
    pub currency: String,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) - {}", self.user_id, self.currency, self.balance)
    }
}

/// Immutable record of a balance change. Append-only; the reference is
/// globally unique and doubles as an idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub account_id: i64,
    pub kind: EntryKind,
    /// Signed: credits positive, debits negative.
    pub amount: Decimal,
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn is_credit(&self) -> bool {
        self.amount > Decimal::ZERO
    }
}

impl fmt::Display for LedgerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (account {}, ref {})",
            self.kind, self.amount, self.account_id, self.reference,
        )
    }
}

/// A real-world occurrence wagers resolve against. Owns markets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub status: EventStatus,
    pub description: String,
    /// ID from an external provider, when sourced from a feed.
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.title, self.status)
    }
}

/// A betting market scoped to one event. Name is unique within the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: i64,
    pub event_id: i64,
    pub name: String,
    pub kind: MarketKind,
    pub params: Option<serde_json::Value>,
    pub is_settled: bool,
    pub settled_outcome_id: Option<i64>,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.kind)
    }
}

/// One selectable result within a market, with fixed decimal odds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub id: i64,
    pub market_id: i64,
    pub name: String,
    pub decimal_odds: Decimal,
    pub is_winner: bool,
}

impl Outcome {
    /// Payout for a given stake at these odds, quantized to currency.
    /// Fixed into the wager at placement; never recomputed.
    pub fn potential_payout(&self, stake: Decimal) -> Decimal {
        quantize(quantize(stake) * self.decimal_odds)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.name, self.decimal_odds)
    }
}

/// A stake placed by one account on one outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wager {
    pub id: i64,
    pub account_id: i64,
    pub outcome_id: i64,
    pub stake: Decimal,
    /// stake x odds at placement time. Immutable thereafter.
    pub potential_payout: Decimal,
    pub status: WagerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Wager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wager {}: {} on outcome {} -> {} ({})",
            self.id, self.stake, self.outcome_id, self.potential_payout, self.status,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
