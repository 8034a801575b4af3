//! WAGERBOOK — Sports Wagering Ledger & Settlement Engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod clock;
pub mod config;
pub mod error;
pub mod types;
pub mod store;
pub mod engine;
