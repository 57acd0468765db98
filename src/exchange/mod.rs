//! Venue integration: REST client, wire types, and instrument mapping.

mod client;
pub mod pair;
mod types;

pub use client::OkxClient;
pub use pair::TradingPair;
