//! # Inventory Hedger
//!
//! An automated hedging/rebalancing controller for a cross-chain swap
//! intermediary. It measures the drift between BTC-denominated inventory
//! and smart-chain token inventory and, past a configurable threshold,
//! runs a durable multi-leg pipeline through a CEX spot market to move
//! value from the heavy side to the light side.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `token`: Token set, decimals table, base-unit amounts
//! - `adapters`: Contracts for the external rails (smart chain, on-chain
//!   bitcoin, Lightning, CEX, inventory oracle) plus scripted mocks
//! - `exchange`: CEX REST client (signing, endpoints, instrument mapping)
//! - `engine`: The crash-safe rebalance state machine
//! - `monitor`: Periodic inventory split measurement and job seeding
//! - `persistence`: Single-document JSON state store with archival
//! - `supervisor`: Bootstrap and run loop
//! - `utils`: Decimal-string conversion and idempotency key minting

pub mod adapters;
pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod monitor;
pub mod persistence;
pub mod supervisor;
pub mod token;
pub mod utils;

pub use config::Config;
